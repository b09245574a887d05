//! Collapse state for test-case groups.

use std::collections::HashSet;

/// Tracks which test cases are shown as a single summary node
#[derive(Debug, Clone, Default)]
pub struct CollapseState {
    /// Cases explicitly expanded (overrides a collapsed default)
    expanded_cases: HashSet<usize>,

    /// Cases explicitly collapsed (overrides an expanded default)
    collapsed_cases: HashSet<usize>,
}

impl CollapseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a case should be shown collapsed
    pub fn is_collapsed(&self, case: usize, default_collapsed: bool) -> bool {
        if default_collapsed {
            !self.expanded_cases.contains(&case)
        } else {
            self.collapsed_cases.contains(&case)
        }
    }

    /// Toggle the collapse state of a case
    pub fn toggle(&mut self, case: usize, default_collapsed: bool) {
        let overrides = if default_collapsed {
            &mut self.expanded_cases
        } else {
            &mut self.collapsed_cases
        };
        if !overrides.remove(&case) {
            overrides.insert(case);
        }
    }

    /// Set the collapse state of a case explicitly
    pub fn set(&mut self, case: usize, collapsed: bool, default_collapsed: bool) {
        if self.is_collapsed(case, default_collapsed) != collapsed {
            self.toggle(case, default_collapsed);
        }
    }

    /// Drop every override and let the default take over
    pub fn reset(&mut self) {
        self.expanded_cases.clear();
        self.collapsed_cases.clear();
    }
}

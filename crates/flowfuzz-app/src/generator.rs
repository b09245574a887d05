//! Test-case generation
//!
//! The orchestrator asks a [`TestCaseGenerator`] for cases once per task.
//! [`FileGenerator`] stands in for a model-backed generator by reading a
//! JSON document from disk. Both accept either `{"testCases": [...]}` or a
//! bare array.

use std::path::{Path, PathBuf};

use flowfuzz_core::prelude::*;
use flowfuzz_core::{Task, TestCase};
use serde::{Deserialize, Serialize};

/// What the generator is asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub target_app: String,
    pub app_description: String,
    pub test_depth: usize,
    pub focus_areas: Vec<String>,
}

impl GenerationRequest {
    pub fn for_task(task: &Task) -> Self {
        Self {
            target_app: task.target_app.clone(),
            app_description: task.description.clone(),
            test_depth: task.config.test_depth,
            focus_areas: task.config.focus_areas.clone(),
        }
    }
}

/// Source of test cases for a task
#[trait_variant::make(TestCaseGenerator: Send)]
pub trait LocalTestCaseGenerator {
    /// Produce an ordered, non-empty list of test cases
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<TestCase>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GeneratedDocument {
    Wrapped {
        #[serde(rename = "testCases")]
        test_cases: Vec<TestCase>,
    },
    Bare(Vec<TestCase>),
}

/// Parse generator output into test cases
///
/// Empty or malformed output is a [`Error::GenerationFailure`].
pub fn parse_generated_cases(raw: &str) -> Result<Vec<TestCase>> {
    let document: GeneratedDocument = serde_json::from_str(raw.trim())
        .map_err(|e| Error::generation(format!("malformed test cases: {e}")))?;

    let cases = match document {
        GeneratedDocument::Wrapped { test_cases } => test_cases,
        GeneratedDocument::Bare(cases) => cases,
    };
    if cases.is_empty() {
        return Err(Error::generation("generator returned no test cases"));
    }

    Ok(cases
        .into_iter()
        .enumerate()
        .map(|(i, mut case)| {
            if case.id.is_empty() {
                case.id = format!("tc_{:03}", i + 1);
            }
            case
        })
        .collect())
}

/// Reads pre-generated test cases from a JSON file
#[derive(Debug, Clone)]
pub struct FileGenerator {
    path: PathBuf,
}

impl FileGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TestCaseGenerator for FileGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<TestCase>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::generation(format!("cannot read {}: {e}", self.path.display()))
        })?;

        let mut cases = parse_generated_cases(&raw)?;
        if request.test_depth > 0 && cases.len() > request.test_depth {
            debug!(
                "Truncating {} generated cases to test depth {}",
                cases.len(),
                request.test_depth
            );
            cases.truncate(request.test_depth);
        }

        info!(
            "Loaded {} test cases for {} from {}",
            cases.len(),
            request.target_app,
            self.path.display()
        );
        Ok(cases)
    }
}

/// Generator that returns a fixed list, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticGenerator {
    cases: Vec<TestCase>,
}

impl StaticGenerator {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }
}

impl TestCaseGenerator for StaticGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<TestCase>> {
        if self.cases.is_empty() {
            return Err(Error::generation("generator returned no test cases"));
        }
        Ok(self.cases.clone())
    }
}

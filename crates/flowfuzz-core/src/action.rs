//! Fuzz actions
//!
//! Generated test cases carry string-tagged [`ActionSpec`] records exactly as
//! the generator produced them. Before execution each spec is converted into
//! the closed [`Action`] sum type; unknown tags and unusable parameters fail
//! the conversion instead of falling through to a default.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Default screen point used when a tap or long-press has no coordinates
pub const DEFAULT_POINT: Point = Point { x: 500, y: 500 };

/// Default long-press and wait duration
pub const DEFAULT_HOLD: Duration = Duration::from_millis(1000);

/// Upper bound for a single `Wait` action
pub const MAX_WAIT: Duration = Duration::from_secs(60);

/// Duration of a plain swipe gesture
pub const SWIPE_DURATION: Duration = Duration::from_millis(300);

// ─────────────────────────────────────────────────────────────────────────────
// Raw generator records
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of a generated action; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    /// Bundle/package name (Launch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// Element description, activity name, or a coordinate string ("x y" / "x1 y1 x2 y2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Swipe direction: up, down, left, right
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    /// Duration in milliseconds; generators emit either numbers or numeric strings
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<u64>,
}

/// A generated action as received from the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action tag: Launch, Tap, Type, Swipe, Back, Home, LongPress, Wait
    pub action: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub params: ActionParams,
}

impl ActionSpec {
    pub fn new(action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
            params: ActionParams::default(),
        }
    }

    pub fn with_params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    /// Convert into a typed action
    pub fn to_action(&self) -> Result<Action> {
        Action::try_from(self)
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Number(u64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Millis>::deserialize(deserializer)? {
        Some(Millis::Number(n)) => Some(n),
        Some(Millis::Float(f)) if f.is_finite() && f >= 0.0 => Some(f as u64),
        Some(Millis::Text(s)) => s.trim().trim_end_matches("ms").trim().parse().ok(),
        _ => None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed actions
// ─────────────────────────────────────────────────────────────────────────────

/// A point on the device screen, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Named swipe direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    /// Fixed start and end points for a swipe in this direction
    pub fn points(&self) -> (Point, Point) {
        match self {
            Direction::Up => (Point::new(500, 800), Point::new(500, 200)),
            Direction::Down => (Point::new(500, 200), Point::new(500, 800)),
            Direction::Left => (Point::new(800, 500), Point::new(200, 500)),
            Direction::Right => (Point::new(200, 500), Point::new(800, 500)),
        }
    }
}

/// Discriminant of [`Action`], used for labels and settle delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Launch,
    Tap,
    Type,
    Swipe,
    Back,
    Home,
    LongPress,
    Wait,
}

impl ActionKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim() {
            "Launch" => Some(ActionKind::Launch),
            "Tap" => Some(ActionKind::Tap),
            "Type" => Some(ActionKind::Type),
            "Swipe" => Some(ActionKind::Swipe),
            "Back" => Some(ActionKind::Back),
            "Home" => Some(ActionKind::Home),
            "LongPress" => Some(ActionKind::LongPress),
            "Wait" => Some(ActionKind::Wait),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Launch => "Launch",
            ActionKind::Tap => "Tap",
            ActionKind::Type => "Type",
            ActionKind::Swipe => "Swipe",
            ActionKind::Back => "Back",
            ActionKind::Home => "Home",
            ActionKind::LongPress => "LongPress",
            ActionKind::Wait => "Wait",
        }
    }

    /// How long the UI is given to settle before the post-action screenshot
    pub fn settle_time(&self) -> Duration {
        let ms = match self {
            ActionKind::Launch => 3000,
            ActionKind::Tap => 1000,
            ActionKind::Type => 500,
            ActionKind::Swipe => 1500,
            ActionKind::Back => 1000,
            ActionKind::Home => 2000,
            ActionKind::LongPress => 1200,
            ActionKind::Wait => 0,
        };
        Duration::from_millis(ms)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One abstract UI interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Launch the target app; `activity` overrides the launcher activity
    Launch { activity: Option<String> },
    Tap { at: Point },
    Type { text: String },
    Swipe { from: Point, to: Point },
    Back,
    Home,
    LongPress { at: Point, hold: Duration },
    Wait { duration: Duration },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Launch { .. } => ActionKind::Launch,
            Action::Tap { .. } => ActionKind::Tap,
            Action::Type { .. } => ActionKind::Type,
            Action::Swipe { .. } => ActionKind::Swipe,
            Action::Back => ActionKind::Back,
            Action::Home => ActionKind::Home,
            Action::LongPress { .. } => ActionKind::LongPress,
            Action::Wait { .. } => ActionKind::Wait,
        }
    }
}

impl TryFrom<&ActionSpec> for Action {
    type Error = Error;

    fn try_from(spec: &ActionSpec) -> Result<Self> {
        let kind =
            ActionKind::parse(&spec.action).ok_or_else(|| Error::unsupported_action(&spec.action))?;
        let params = &spec.params;

        let action = match kind {
            ActionKind::Launch => Action::Launch {
                activity: params
                    .element
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            },
            ActionKind::Tap => Action::Tap {
                at: point_or_default(params.element.as_deref())?,
            },
            ActionKind::Type => match params.text.as_deref() {
                Some(text) if !text.is_empty() => Action::Type {
                    text: text.to_string(),
                },
                _ => return Err(Error::invalid_action("Type requires a non-empty text")),
            },
            ActionKind::Swipe => {
                // Explicit coordinates take precedence over a named direction
                if let Some(coords) = params.element.as_deref().and_then(parse_swipe_coords) {
                    Action::Swipe {
                        from: coords.0,
                        to: coords.1,
                    }
                } else {
                    let direction = params
                        .direction
                        .as_deref()
                        .and_then(Direction::parse)
                        .unwrap_or(Direction::Up);
                    let (from, to) = direction.points();
                    Action::Swipe { from, to }
                }
            }
            ActionKind::Back => Action::Back,
            ActionKind::Home => Action::Home,
            ActionKind::LongPress => Action::LongPress {
                at: point_or_default(params.element.as_deref())?,
                hold: params
                    .duration
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_HOLD),
            },
            ActionKind::Wait => Action::Wait {
                duration: params
                    .duration
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_HOLD)
                    .min(MAX_WAIT),
            },
        };

        Ok(action)
    }
}

fn parse_numbers(s: &str) -> Option<Vec<i32>> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<i32>().ok())
        .collect()
}

/// Parse an "x y" coordinate string
pub fn parse_point(s: &str) -> Option<Point> {
    match parse_numbers(s)?.as_slice() {
        [x, y] => Some(Point::new(*x, *y)),
        _ => None,
    }
}

/// Parse an "x1 y1 x2 y2" coordinate string
pub fn parse_swipe_coords(s: &str) -> Option<(Point, Point)> {
    match parse_numbers(s)?.as_slice() {
        [x1, y1, x2, y2] => Some((Point::new(*x1, *y1), Point::new(*x2, *y2))),
        _ => None,
    }
}

fn point_or_default(element: Option<&str>) -> Result<Point> {
    match element.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(DEFAULT_POINT),
        Some(s) => parse_point(s)
            .ok_or_else(|| Error::invalid_action(format!("expected \"x y\" coordinates, got {s:?}"))),
    }
}

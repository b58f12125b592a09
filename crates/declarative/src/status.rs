//! Check and apply results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a status, ordered from best to worst
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    /// Nothing to report
    #[default]
    Healthy,
    /// Checked, already in the desired state
    NoChange,
    /// Out of date, apply will change it
    WillChange,
    /// Out of date, but apply cannot change it
    CantChange,
    /// Failed
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Healthy => "healthy",
            Self::NoChange => "no change",
            Self::WillChange => "will change",
            Self::CantChange => "can't change",
            Self::Fatal => "fatal",
        };
        f.write_str(text)
    }
}

/// Before and after values of one field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub before: String,
    pub after: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Diff {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether the field actually changes
    pub fn changes(&self) -> bool {
        self.before != self.after
    }
}

/// Warning left on nodes that never ran
pub const SKIPPED: &str = "skipped: a dependency failed";

/// The result of checking or applying one resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub level: Level,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub differences: BTreeMap<String, Diff>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn no_change() -> Self {
        Self::new(Level::NoChange)
    }

    /// A node that never ran because something it depends on failed
    pub fn skipped() -> Self {
        let mut status = Self::new(Level::CantChange);
        status.set_warning(SKIPPED);
        status
    }

    pub fn is_skipped(&self) -> bool {
        self.level == Level::CantChange && self.warning.as_deref() == Some(SKIPPED)
    }

    /// A fatal status carrying `error`
    pub fn fatal(error: impl fmt::Display) -> Self {
        let mut status = Self::default();
        status.set_error(error);
        status
    }

    /// Raise the level; it is never lowered
    pub fn raise(&mut self, level: Level) {
        self.level = self.level.max(level);
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_output(mut self, line: impl Into<String>) -> Self {
        self.output.push(line.into());
        self
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn add_output(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    /// Record a field difference, raising the level when it changes something
    pub fn add_difference(&mut self, field: impl Into<String>, diff: Diff) {
        if diff.changes() {
            self.raise(Level::WillChange);
        }
        self.differences.insert(field.into(), diff);
    }

    pub fn set_warning(&mut self, warning: impl Into<String>) {
        self.warning = Some(warning.into());
    }

    /// Record an error and raise the level to fatal
    pub fn set_error(&mut self, error: impl fmt::Display) {
        self.error = Some(format!("{error:#}"));
        self.raise(Level::Fatal);
    }

    /// Whether applying would (or did) change something
    pub fn has_changes(&self) -> bool {
        self.level >= Level::WillChange || self.differences.values().any(Diff::changes)
    }

    pub fn is_fatal(&self) -> bool {
        self.level == Level::Fatal
    }

    /// Fold another status into this one
    ///
    /// The level only moves up. Existing differences and the first warning
    /// and error win.
    pub fn merge(&mut self, other: &Self) {
        self.raise(other.level);
        self.messages.extend(other.messages.iter().cloned());
        self.output.extend(other.output.iter().cloned());
        for (field, diff) in &other.differences {
            self.differences
                .entry(field.clone())
                .or_insert_with(|| diff.clone());
        }
        if self.warning.is_none() {
            self.warning.clone_from(&other.warning);
        }
        if self.error.is_none() {
            self.error.clone_from(&other.error);
        }
    }

    /// The wire form of this status
    pub fn details(&self) -> StatusDetails {
        StatusDetails {
            level: self.level,
            messages: self.messages.clone(),
            output: self.output.clone(),
            differences: self
                .differences
                .iter()
                .map(|(field, diff)| {
                    (
                        field.clone(),
                        DiffDetails {
                            before: diff.before.clone(),
                            after: diff.after.clone(),
                            changes: diff.changes(),
                        },
                    )
                })
                .collect(),
            has_changes: self.has_changes(),
            warning: self.warning.clone(),
            error: self.error.clone(),
        }
    }

    /// Health as seen by a health check
    pub fn health(&self) -> Health {
        match self.level {
            Level::Healthy | Level::NoChange => Health::Healthy,
            Level::WillChange | Level::CantChange => Health::Warning,
            Level::Fatal => Health::Error,
        }
    }
}

/// Health of a checked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Warning,
    Error,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Wire form of a field difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffDetails {
    pub before: String,
    pub after: String,
    pub changes: bool,
}

/// Wire form of a [`Status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDetails {
    pub level: Level,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub differences: BTreeMap<String, DiffDetails>,
    pub has_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<StatusDetails> for Status {
    fn from(details: StatusDetails) -> Self {
        Self {
            level: details.level,
            messages: details.messages,
            output: details.output,
            differences: details
                .differences
                .into_iter()
                .map(|(field, diff)| (field, Diff::new(diff.before, diff.after)))
                .collect(),
            warning: details.warning,
            error: details.error,
        }
    }
}

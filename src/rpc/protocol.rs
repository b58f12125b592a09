//! Wire format shared by the server and the client
//!
//! Machine endpoints answer with newline-delimited JSON. The first frame
//! carries the edge list of the rendered graph, then one event frame
//! follows for every node a stage starts and finishes. A run that completes
//! ends with a summary frame; one that fails ends with an error frame.

use anyhow::{Context, Result};
use dag::{Edge, NodeId};
use declarative::{Health, Params, Stage, StatusDetails, Summary};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PING: &str = "/api/v1/ping";
pub const VERSION: &str = "/api/v1/version";
pub const PLAN: &str = "/api/v1/machine/plan";
pub const APPLY: &str = "/api/v1/machine/apply";
pub const HEALTHCHECK: &str = "/api/v1/machine/healthcheck";

/// Content type of streamed responses
pub const NDJSON: &str = "application/x-ndjson";

/// What a machine request does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plan,
    Apply,
    /// A plan reported as health, leaf resources only
    Healthcheck,
}

impl Mode {
    pub fn path(self) -> &'static str {
        match self {
            Self::Plan => PLAN,
            Self::Apply => APPLY,
            Self::Healthcheck => HEALTHCHECK,
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            Self::Plan | Self::Healthcheck => Stage::Plan,
            Self::Apply => Stage::Apply,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan => f.write_str("plan"),
            Self::Apply => f.write_str("apply"),
            Self::Healthcheck => f.write_str("healthcheck"),
        }
    }
}

/// Body of a machine request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineRequest {
    pub location: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Phase of a node event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Run {
    Started,
    Finished,
}

/// A node starting or finishing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub stage: Stage,
    pub run: Run,
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Status once finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
    /// Set by health checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
}

/// One line of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    Edges(Vec<Edge>),
    Event(Event),
    Summary(Summary),
    Error(String),
}

impl Frame {
    /// The frame as one JSON line, newline included
    pub fn to_line(&self) -> String {
        // frames are plain data; serialisation cannot fail
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| format!("Invalid frame: {}", line.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dag::EdgeKind;
    use declarative::Status;
    use serde_json::json;

    #[test]
    fn test_edges_frame_shape() {
        let frame = Frame::Edges(vec![Edge::new("root", "root/task.a", EdgeKind::Parent)]);
        let value: serde_json::Value = serde_json::from_str(&frame.to_line()).unwrap();
        assert_eq!(
            value,
            json!({"edges": [{"source": "root", "dest": "root/task.a", "kind": "parent"}]})
        );
    }

    #[test]
    fn test_event_frame_shape() {
        let frame = Frame::Event(Event {
            stage: Stage::Apply,
            run: Run::Finished,
            id: NodeId::from("root/task.a"),
            kind: Some("task".into()),
            group: None,
            details: Some(Status::fatal("boom").details()),
            health: None,
        });
        let line = frame.to_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"]["stage"], "APPLY");
        assert_eq!(value["event"]["run"], "FINISHED");
        assert_eq!(value["event"]["details"]["level"], "FATAL");
        assert_eq!(value["event"]["details"]["error"], "boom");
        assert!(value["event"].get("group").is_none());

        assert_eq!(Frame::parse(&line).unwrap(), frame);
    }

    #[test]
    fn test_request_params_default() {
        let request: MachineRequest = serde_json::from_str(r#"{"location": "/etc/keel/main.toml"}"#).unwrap();
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Frame::parse("{\"nope\": 1}").is_err());
    }
}

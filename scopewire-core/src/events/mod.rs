//! Lifecycle events published by the pipeline controller.
//!
//! Subscribers get one [`PipelineStateEvent`] per state transition through a
//! `tokio::sync::broadcast` channel, so any number of observers (console,
//! UI bridge, supervisor deciding whether to reconnect) can follow along.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one pipeline.
///
/// ```text
/// Idle ──start──► Running ──stop / peer closed──► Draining ──► Stopped
///   │                │
///   └─connect error──┴─socket or sink error──► Failed(reason)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "lowercase")]
pub enum PipelineState {
    /// Created, never started.
    Idle,
    /// Socket connected and all stages active.
    Running,
    /// Stop requested or stream ended; queued work is still flowing.
    Draining,
    /// All stages exited cleanly.
    Stopped,
    /// A stage hit an unrecoverable error.
    Failed(String),
}

impl PipelineState {
    /// `true` once no stage is running and `start()` may be called again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Idle | PipelineState::Stopped | PipelineState::Failed(_)
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineState::Failed(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            PipelineState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Running => f.write_str("running"),
            PipelineState::Draining => f.write_str("draining"),
            PipelineState::Stopped => f.write_str("stopped"),
            PipelineState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Emitted on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStateEvent {
    /// Monotonically increasing across the controller's lifetime.
    pub seq: u64,
    pub state: PipelineState,
    /// Optional human-readable context (peer address, cause of drain).
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_state_serializes_with_reason() {
        let event = PipelineStateEvent {
            seq: 4,
            state: PipelineState::Failed("connection reset".into()),
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize state event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["state"]["kind"], "failed");
        assert_eq!(json["state"]["reason"], "connection reset");

        let round_trip: PipelineStateEvent =
            serde_json::from_value(json).expect("deserialize state event");
        assert_eq!(round_trip.state.failure_reason(), Some("connection reset"));
    }

    #[test]
    fn unit_states_serialize_lowercase() {
        let json = serde_json::to_value(PipelineState::Draining).unwrap();
        assert_eq!(json["kind"], "draining");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(PipelineState::Idle.is_terminal());
        assert!(PipelineState::Stopped.is_terminal());
        assert!(PipelineState::Failed("x".into()).is_terminal());
        assert!(!PipelineState::Running.is_terminal());
        assert!(!PipelineState::Draining.is_terminal());
        assert_eq!(PipelineState::Failed("eof".into()).to_string(), "failed: eof");
    }
}

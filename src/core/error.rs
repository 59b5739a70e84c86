use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::framework::GraphState;

#[derive(Debug, Error)]
pub enum LprError {
    #[error("Failed to create stage '{stage}' from factory '{factory}'")]
    StageCreation { stage: String, factory: String },
    #[error("Failed to link {upstream} -> {downstream}: {reason}")]
    Link {
        upstream: String,
        downstream: String,
        reason: String,
    },
    #[error("Failed to set property '{property}' on stage '{stage}': {reason}")]
    Property {
        stage: String,
        property: String,
        reason: String,
    },
    #[error("Graph refused state change to {state:?}: {reason}")]
    StateChange { state: GraphState, reason: String },
    #[error("Error from {source_stage}: {cause} ({detail})")]
    Runtime {
        source_stage: String,
        cause: String,
        detail: String,
    },
    #[error("Buffer carries no batch metadata")]
    MissingBatchMetadata,
    #[error("Run did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Failed to persist {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backend error: {0}")]
    Backend(String),
}

impl LprError {
    /// Construction-time errors: the graph cannot be built, nothing useful can run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LprError::StageCreation { .. }
                | LprError::Link { .. }
                | LprError::Property { .. }
                | LprError::Backend(_)
        )
    }

    pub(crate) fn link(upstream: &str, downstream: &str, reason: impl Into<String>) -> Self {
        LprError::Link {
            upstream: upstream.to_string(),
            downstream: downstream.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<json5::Error> for LprError {
    fn from(e: json5::Error) -> Self {
        LprError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_errors_are_fatal() {
        let err = LprError::StageCreation {
            stage: "stream-muxer".to_string(),
            factory: "nvstreammux".to_string(),
        };
        assert!(err.is_fatal());
        assert!(LprError::link("video-convert", "stream-muxer", "no pad").is_fatal());
    }

    #[test]
    fn test_run_errors_are_contained() {
        assert!(!LprError::Timeout(Duration::from_secs(10)).is_fatal());
        assert!(!LprError::MissingBatchMetadata.is_fatal());
        let err = LprError::StateChange {
            state: GraphState::Playing,
            reason: "rejected".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_link_error_names_both_stages() {
        let msg = LprError::link("lpr-inference", "fakesink", "caps").to_string();
        assert!(msg.contains("lpr-inference"));
        assert!(msg.contains("fakesink"));
    }
}

//! Media framework seams.
//!
//! The engine only configures and connects stages, consumes bus messages and
//! reads batch metadata; everything else belongs to the framework behind these
//! traits. `backend::gst` implements them over GStreamer, `core::mock` in memory.

use std::fmt;
use std::time::Duration;

use crate::core::metadata::BatchMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Source,
    Decoder,
    Converter,
    Multiplexer,
    Inference,
    Compositor,
    Encoder,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Null,
    Ready,
    Paused,
    Playing,
}

/// Result of a successful state change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Success,
    Async,
    NoPreroll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Int(v) => write!(f, "{}", v),
            PropValue::Bool(v) => write!(f, "{}", v),
            PropValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(v)
    }
}

impl From<u32> for PropValue {
    fn from(v: u32) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    EndOfStream,
    Error {
        source: String,
        cause: String,
        detail: String,
    },
    Warning {
        source: String,
        cause: String,
        detail: String,
    },
}

/// What the tap callback tells the framework to do with the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Buffer consumed here, drop it from further processing.
    Drop,
    /// Pass the buffer downstream unmodified.
    Pass,
}

pub trait MetaBuffer {
    fn batch_meta(&self) -> Option<BatchMeta>;
}

pub trait Pad: Clone + Send + Sync + 'static {
    type Buffer: MetaBuffer + ?Sized;

    fn name(&self) -> String;

    /// Name of the negotiated media type, e.g. `video/x-raw`.
    fn media_type(&self) -> Option<String>;

    fn is_linked(&self) -> bool;

    fn link(&self, sink: &Self) -> Result<(), String>;

    fn add_buffer_probe<F>(&self, probe: F)
    where
        F: Fn(&Self::Buffer) -> ProbeReturn + Send + Sync + 'static;
}

pub trait Stage: Clone + Send + Sync + 'static {
    type Pad: Pad;

    fn name(&self) -> String;

    fn set_property(&self, key: &str, value: &PropValue) -> Result<(), String>;

    fn static_pad(&self, name: &str) -> Option<Self::Pad>;

    fn request_pad(&self, name: &str) -> Option<Self::Pad>;

    /// Link this stage's output to `downstream`'s input.
    fn link(&self, downstream: &Self) -> Result<(), String>;

    fn connect_pad_added<F>(&self, callback: F)
    where
        F: Fn(&Self::Pad) + Send + Sync + 'static;
}

pub trait Graph: Send + Sync + 'static {
    type Stage: Stage;

    fn add(&self, stage: &Self::Stage) -> Result<(), String>;

    fn set_state(&self, state: GraphState) -> Result<StateChange, String>;

    /// Block until any pending state change completes; `None` waits forever.
    fn wait_state(&self, timeout: Option<Duration>) -> GraphState;

    fn current_state(&self) -> GraphState;

    /// Next EndOfStream / Error / Warning message, or `None` after `timeout`.
    fn pop_message(&self, timeout: Duration) -> Option<BusMessage>;
}

pub trait Backend: Send + Sync + 'static {
    type Pad: Pad;
    type Stage: Stage<Pad = Self::Pad>;
    type Graph: Graph<Stage = Self::Stage>;

    fn make_stage(&self, kind: StageKind, factory: &str, name: &str)
        -> Result<Self::Stage, String>;

    fn new_graph(&self, name: &str) -> Self::Graph;
}

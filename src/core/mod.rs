pub mod batch;
pub mod config;
pub mod error;
pub mod framework;
pub mod graph_builder;
pub mod link_resolver;
pub mod metadata;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod persister;
pub mod run_controller;
pub mod tap;

pub use batch::{enumerate_inputs, BatchDriver, BatchSummary};
pub use config::{GraphStrategy, InferenceRole, PipelineConfig, RenderConfig};
pub use error::LprError;
pub use graph_builder::{GraphBuilder, ProcessingGraph};
pub use metadata::{BatchMeta, LabelResult, MetadataWalker};
pub use persister::{GateDecision, ResultGate};
pub use run_controller::{RunContext, RunController, RunOutcome, RunReport};

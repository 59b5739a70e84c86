use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::core::config::{GraphStrategy, PipelineConfig};
use crate::core::error::LprError;
use crate::core::framework::{Backend, BusMessage, Graph, GraphState, Pad, PropValue, Stage};
use crate::core::graph_builder::{GraphBuilder, ProcessingGraph};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Eos,
    Error {
        source: String,
        cause: String,
        detail: String,
    },
    Timeout(Duration),
    StartFailed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Eos)
    }

    pub fn error(&self) -> Option<LprError> {
        match self {
            RunOutcome::Eos => None,
            RunOutcome::Error {
                source,
                cause,
                detail,
            } => Some(LprError::Runtime {
                source_stage: source.clone(),
                cause: cause.clone(),
                detail: detail.clone(),
            }),
            RunOutcome::Timeout(limit) => Some(LprError::Timeout(*limit)),
            RunOutcome::StartFailed(reason) => Some(LprError::StateChange {
                state: GraphState::Playing,
                reason: reason.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Idle,
    Linked,
    Playing,
    Finished(RunOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Bound,
    Started,
    StartRejected(String),
    Message(BusMessage),
    DeadlinePassed(Duration),
    TornDown,
}

impl RunPhase {
    pub fn new() -> Self {
        RunPhase::Idle
    }

    /// Events that do not apply to the current phase leave it unchanged.
    pub fn transition(&self, event: RunEvent) -> RunPhase {
        match (self, event) {
            (RunPhase::Idle, RunEvent::Bound) => RunPhase::Linked,

            (RunPhase::Linked, RunEvent::Started) => RunPhase::Playing,
            (RunPhase::Linked, RunEvent::StartRejected(reason)) => {
                RunPhase::Finished(RunOutcome::StartFailed(reason))
            }

            (RunPhase::Playing, RunEvent::Message(message)) => match message {
                BusMessage::EndOfStream => RunPhase::Finished(RunOutcome::Eos),
                BusMessage::Error {
                    source,
                    cause,
                    detail,
                } => RunPhase::Finished(RunOutcome::Error {
                    source,
                    cause,
                    detail,
                }),
                BusMessage::Warning { .. } => RunPhase::Playing,
            },
            (RunPhase::Playing, RunEvent::DeadlinePassed(limit)) => {
                RunPhase::Finished(RunOutcome::Timeout(limit))
            }

            (_, RunEvent::TornDown) => RunPhase::Idle,

            (phase, event) => {
                debug!("Ignoring {:?} in phase {:?}", event, phase);
                phase.clone()
            }
        }
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            RunPhase::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

impl Default for RunPhase {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-item state, alive from bind until teardown.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub input: PathBuf,
    /// Input file stem, names the rendered output.
    pub basename: String,
    pub deadline: Instant,
}

impl RunContext {
    pub fn new(input: &Path, timeout: Duration) -> Self {
        let basename = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".to_string());
        Self {
            input: input.to_path_buf(),
            basename,
            deadline: Instant::now() + timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub input: PathBuf,
    pub outcome: RunOutcome,
    /// Result copies written during the run.
    pub saved: Vec<PathBuf>,
    pub elapsed: Duration,
    /// Graph state observed after teardown.
    pub final_state: GraphState,
}

/// Returns the graph to Null however the run ends.
struct Teardown<'a, B: Backend> {
    graph: &'a ProcessingGraph<B>,
    done: bool,
}

impl<'a, B: Backend> Teardown<'a, B> {
    fn new(graph: &'a ProcessingGraph<B>) -> Self {
        Self { graph, done: false }
    }

    fn run(&mut self) -> (GraphState, Vec<PathBuf>) {
        self.done = true;
        let graph = self.graph.graph();
        if let Err(e) = graph.set_state(GraphState::Null) {
            error!("❌ Failed to stop graph: {}", e);
        }
        let state = graph.wait_state(None);
        if state != GraphState::Null {
            warn!("⚠️ Graph settled in {:?} instead of Null", state);
        }
        self.graph.resolver().reset();
        (state, self.graph.tap().finish())
    }
}

impl<B: Backend> Drop for Teardown<'_, B> {
    fn drop(&mut self) {
        if !self.done {
            self.run();
        }
    }
}

/// Drives one input through the graph: bind, play, wait, tear down.
pub struct RunController<B: Backend> {
    backend: B,
    config: PipelineConfig,
    cached: Option<ProcessingGraph<B>>,
    phase: RunPhase,
}

impl<B: Backend> RunController<B> {
    pub fn new(backend: B, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            cached: None,
            phase: RunPhase::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    /// Builds the graph up front so construction errors surface before any item runs.
    pub fn prepare(&mut self) -> Result<(), LprError> {
        if self.cached.is_none() {
            self.cached = Some(GraphBuilder::new(&self.backend, &self.config).build()?);
        }
        Ok(())
    }

    /// Only construction errors are returned; everything else lands in the report.
    pub fn run(&mut self, input: &Path) -> Result<RunReport, LprError> {
        let graph = match self.cached.take() {
            Some(graph) => graph,
            None => GraphBuilder::new(&self.backend, &self.config).build()?,
        };

        let result = self.run_on(&graph, input);

        if self.config.strategy == GraphStrategy::Reuse {
            self.cached = Some(graph);
        }
        result
    }

    fn run_on(&mut self, graph: &ProcessingGraph<B>, input: &Path) -> Result<RunReport, LprError> {
        let started = Instant::now();
        let timeout = self.config.run_timeout();
        let context = RunContext::new(input, timeout);
        info!("▶️ Processing {}", input.display());

        let mut teardown = Teardown::new(graph);
        self.bind(graph, &context)?;
        self.advance(RunEvent::Bound);

        match graph.graph().set_state(GraphState::Playing) {
            Ok(change) => {
                debug!("Play requested: {:?}", change);
                self.advance(RunEvent::Started);
                self.pump(graph, &context, timeout);
            }
            Err(reason) => {
                error!("❌ Failed to start graph for {}: {}", input.display(), reason);
                self.advance(RunEvent::StartRejected(reason));
            }
        }

        let outcome = self
            .phase
            .outcome()
            .cloned()
            .unwrap_or(RunOutcome::Timeout(timeout));
        let (final_state, saved) = teardown.run();
        self.advance(RunEvent::TornDown);

        match outcome.error() {
            None => info!("✅ Finished {} ({} saved)", input.display(), saved.len()),
            Some(e) => warn!("⚠️ Item {} failed: {}", input.display(), e),
        }
        Ok(RunReport {
            input: context.input,
            outcome,
            saved,
            elapsed: started.elapsed(),
            final_state,
        })
    }

    fn bind(&self, graph: &ProcessingGraph<B>, context: &RunContext) -> Result<(), LprError> {
        set_location(graph.source(), &context.input)?;

        if let (Some(render), Some(sink)) = (&self.config.render, graph.render_sink()) {
            let target = render.output_dir.join(format!("{}.jpg", context.basename));
            set_location(sink, &target)?;
        }

        let decoder_sink = graph.decoder().static_pad("sink");
        if !decoder_sink.map(|p| p.is_linked()).unwrap_or(false) {
            graph
                .source()
                .link(graph.decoder())
                .map_err(|e| LprError::link(&graph.source().name(), &graph.decoder().name(), e))?;
        }

        graph.tap().begin(context.input.clone());
        Ok(())
    }

    fn pump(&mut self, graph: &ProcessingGraph<B>, context: &RunContext, timeout: Duration) {
        let deadline = context.deadline;
        while self.phase == RunPhase::Playing {
            let now = Instant::now();
            if now >= deadline {
                error!("⏱️ No end of stream within {:?}, treating as stalled", timeout);
                self.advance(RunEvent::DeadlinePassed(timeout));
                break;
            }
            let Some(message) = graph.graph().pop_message(deadline - now) else {
                continue;
            };
            match &message {
                BusMessage::EndOfStream => debug!("End of stream"),
                BusMessage::Error {
                    source,
                    cause,
                    detail,
                } => error!("❌ Error from {}: {} ({})", source, cause, detail),
                BusMessage::Warning {
                    source,
                    cause,
                    detail,
                } => warn!("⚠️ Warning from {}: {} ({})", source, cause, detail),
            }
            self.advance(RunEvent::Message(message));
        }
    }

    fn advance(&mut self, event: RunEvent) {
        self.phase = self.phase.transition(event);
    }
}

fn set_location<S: Stage>(stage: &S, path: &Path) -> Result<(), LprError> {
    let value = PropValue::Str(path.to_string_lossy().into_owned());
    stage
        .set_property("location", &value)
        .map_err(|reason| LprError::Property {
            stage: stage.name(),
            property: "location".to_string(),
            reason,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::{MockBackend, MockOutcome, MockScript};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PipelineConfig) {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::plate_recognition();
        config.output_dir = dir.path().join("out");
        config.run_timeout_secs = 1;
        config.inter_item_delay_ms = 0;
        fs::create_dir_all(&config.output_dir).unwrap();
        (dir, config)
    }

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"jpeg").unwrap();
        path
    }

    fn ended_null(backend: &MockBackend) -> bool {
        backend
            .transitions()
            .last()
            .map(|(_, state)| *state == GraphState::Null)
            .unwrap_or(false)
    }

    #[test]
    fn test_phase_transitions() {
        let phase = RunPhase::new()
            .transition(RunEvent::Bound)
            .transition(RunEvent::Started);
        assert_eq!(phase, RunPhase::Playing);

        let warned = phase.transition(RunEvent::Message(BusMessage::Warning {
            source: "decoder".into(),
            cause: "slow".into(),
            detail: String::new(),
        }));
        assert_eq!(warned, RunPhase::Playing);

        let done = warned.transition(RunEvent::Message(BusMessage::EndOfStream));
        assert_eq!(done.outcome(), Some(&RunOutcome::Eos));
        assert_eq!(done.transition(RunEvent::TornDown), RunPhase::Idle);
    }

    #[test]
    fn test_out_of_order_events_ignored() {
        assert_eq!(RunPhase::Idle.transition(RunEvent::Started), RunPhase::Idle);
        let rejected = RunPhase::Linked.transition(RunEvent::StartRejected("no".into()));
        assert_eq!(
            rejected.transition(RunEvent::Message(BusMessage::EndOfStream)),
            rejected
        );
    }

    #[test]
    fn test_eos_run_saves_and_tears_down() {
        let (dir, config) = setup();
        let input = touch(&dir, "car1.jpg");
        let backend = MockBackend::new();
        backend.script(&input, MockScript::plate("XYZ789", 0.92));

        let mut controller = RunController::new(backend.clone(), config.clone());
        let report = controller.run(&input).unwrap();

        assert_eq!(report.outcome, RunOutcome::Eos);
        assert_eq!(report.saved, vec![config.output_dir.join("XYZ789.jpg")]);
        assert_eq!(report.final_state, GraphState::Null);
        assert_eq!(controller.phase(), &RunPhase::Idle);
        assert!(ended_null(&backend));
    }

    #[test]
    fn test_error_run_is_contained() {
        let (dir, config) = setup();
        let input = touch(&dir, "broken.jpg");
        let backend = MockBackend::new();
        backend.script(
            &input,
            MockScript::new()
                .with_warning("late buffer")
                .with_outcome(MockOutcome::Error("decode failed".into())),
        );

        let mut controller = RunController::new(backend.clone(), config);
        let report = controller.run(&input).unwrap();

        match &report.outcome {
            RunOutcome::Error { source, cause, .. } => {
                assert_eq!(source, "image-decoder");
                assert_eq!(cause, "decode failed");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(report.saved.is_empty());
        assert!(ended_null(&backend));
    }

    #[test]
    fn test_stalled_run_times_out() {
        let (dir, config) = setup();
        let input = touch(&dir, "stuck.jpg");
        let backend = MockBackend::new();
        backend.script(&input, MockScript::new().with_outcome(MockOutcome::Hang));

        let mut controller = RunController::new(backend.clone(), config);
        let report = controller.run(&input).unwrap();

        assert_eq!(report.outcome, RunOutcome::Timeout(Duration::from_secs(1)));
        assert!(report.elapsed >= Duration::from_secs(1));
        assert_eq!(report.final_state, GraphState::Null);
        assert!(ended_null(&backend));
    }

    #[test]
    fn test_rejected_start_still_tears_down() {
        let (dir, config) = setup();
        let input = touch(&dir, "bad.jpg");
        let backend = MockBackend::new();
        backend.script(&input, MockScript::new().with_outcome(MockOutcome::RejectStart));

        let mut controller = RunController::new(backend.clone(), config);
        let report = controller.run(&input).unwrap();

        assert!(matches!(report.outcome, RunOutcome::StartFailed(_)));
        assert!(matches!(
            report.outcome.error(),
            Some(LprError::StateChange { .. })
        ));
        assert_eq!(report.final_state, GraphState::Null);
    }

    #[test]
    fn test_rebuild_per_item_builds_fresh_graphs() {
        let (dir, config) = setup();
        let backend = MockBackend::new();
        let mut controller = RunController::new(backend.clone(), config);
        for (name, text) in [("a.jpg", "AAA111"), ("b.jpg", "BBB222")] {
            let input = touch(&dir, name);
            backend.script(&input, MockScript::plate(text, 0.9));
            assert!(controller.run(&input).unwrap().outcome.is_success());
        }
        assert_eq!(backend.graphs_built(), 2);
    }

    #[test]
    fn test_reuse_relinks_same_graph() {
        let (dir, mut config) = setup();
        config.strategy = GraphStrategy::Reuse;
        let backend = MockBackend::new();
        let mut controller = RunController::new(backend.clone(), config.clone());
        controller.prepare().unwrap();

        for (name, text) in [("a.jpg", "AAA111"), ("b.jpg", "BBB222")] {
            let input = touch(&dir, name);
            backend.script(&input, MockScript::plate(text, 0.9));
            let report = controller.run(&input).unwrap();
            assert!(report.outcome.is_success());
            assert_eq!(report.saved.len(), 1);
        }
        assert_eq!(backend.graphs_built(), 1);
        assert!(config.output_dir.join("BBB222.jpg").exists());
    }

    #[test]
    fn test_render_sink_location_follows_input() {
        let (dir, mut config) = setup();
        config.render = Some(crate::core::config::RenderConfig {
            output_dir: dir.path().join("rendered"),
            ..Default::default()
        });
        config.strategy = GraphStrategy::Reuse;
        let input = touch(&dir, "car7.png");
        let backend = MockBackend::new();
        backend.script(&input, MockScript::plate("CAR7", 0.8));

        let mut controller = RunController::new(backend, config);
        controller.run(&input).unwrap();

        let graph = controller.cached.as_ref().unwrap();
        assert_eq!(
            graph.render_sink().unwrap().property("location"),
            Some(PropValue::Str(
                dir.path().join("rendered").join("car7.jpg").to_string_lossy().into_owned()
            ))
        );
    }

    #[test]
    fn test_construction_error_is_returned() {
        let (dir, config) = setup();
        let backend = MockBackend::new();
        backend.fail_factory("nvinfer");
        let mut controller = RunController::new(backend, config);

        let err = controller.run(&touch(&dir, "x.jpg")).unwrap_err();
        assert!(err.is_fatal());
    }
}

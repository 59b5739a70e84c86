//! In-memory framework for tests, compiled only under `cfg(test)` or the `mock` feature.
//!
//! Scripts are keyed by the source location: which pads the decoder exposes,
//! which buffers reach the tap, and how the run ends.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::framework::{
    Backend, BusMessage, Graph, GraphState, MetaBuffer, Pad, ProbeReturn, PropValue, Stage,
    StageKind, StateChange,
};
use crate::core::metadata::{BatchMeta, ClassifierResult, FrameResult, LabelResult, ObjectResult};

#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    EndOfStream,
    Error(String),
    /// Nothing ever reaches the bus.
    Hang,
    /// The graph refuses to start.
    RejectStart,
}

#[derive(Debug, Clone)]
pub struct MockScript {
    pub pads: Vec<String>,
    pub buffers: Vec<MockBuffer>,
    pub warnings: Vec<String>,
    pub outcome: MockOutcome,
}

impl MockScript {
    pub fn new() -> Self {
        Self {
            pads: vec!["video/x-raw".to_string()],
            buffers: Vec::new(),
            warnings: Vec::new(),
            outcome: MockOutcome::EndOfStream,
        }
    }

    /// One frame, one object, one classifier with a single reading.
    pub fn plate(text: &str, confidence: f32) -> Self {
        Self::new().with_buffer(MockBuffer::labels(&[(text, confidence)]))
    }

    pub fn with_pads(mut self, pads: &[&str]) -> Self {
        self.pads = pads.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_buffer(mut self, buffer: MockBuffer) -> Self {
        self.buffers.push(buffer);
        self
    }

    pub fn with_warning(mut self, warning: &str) -> Self {
        self.warnings.push(warning.to_string());
        self
    }

    pub fn with_outcome(mut self, outcome: MockOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

impl Default for MockScript {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockBuffer {
    pub meta: Option<BatchMeta>,
}

impl MockBuffer {
    pub fn with_meta(meta: BatchMeta) -> Self {
        Self { meta: Some(meta) }
    }

    pub fn without_meta() -> Self {
        Self { meta: None }
    }

    pub fn labels(readings: &[(&str, f32)]) -> Self {
        Self::with_meta(BatchMeta {
            frames: vec![FrameResult {
                frame_num: 0,
                objects: vec![ObjectResult {
                    object_id: 0,
                    class_id: 0,
                    confidence: 1.0,
                    classifiers: vec![ClassifierResult {
                        component_id: 1,
                        labels: readings
                            .iter()
                            .map(|(text, prob)| LabelResult::new(*text, *prob))
                            .collect(),
                    }],
                }],
            }],
        })
    }
}

impl MetaBuffer for MockBuffer {
    fn batch_meta(&self) -> Option<BatchMeta> {
        self.meta.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Src,
    Sink,
}

type MockProbe = Arc<dyn Fn(&MockBuffer) -> ProbeReturn + Send + Sync>;
type PadAddedCallback = Arc<dyn Fn(&MockPad) + Send + Sync>;

struct PadInner {
    name: String,
    direction: Direction,
    media_type: Option<String>,
    peer: Mutex<Option<Weak<PadInner>>>,
    probes: Mutex<Vec<MockProbe>>,
}

#[derive(Clone)]
pub struct MockPad(Arc<PadInner>);

impl MockPad {
    fn create(name: &str, direction: Direction, media_type: Option<&str>) -> Self {
        MockPad(Arc::new(PadInner {
            name: name.to_string(),
            direction,
            media_type: media_type.map(str::to_string),
            peer: Mutex::new(None),
            probes: Mutex::new(Vec::new()),
        }))
    }

    pub fn source(name: &str, media_type: Option<&str>) -> Self {
        Self::create(name, Direction::Src, media_type)
    }

    pub fn sink(name: &str) -> Self {
        Self::create(name, Direction::Sink, None)
    }

    pub fn peer_name(&self) -> Option<String> {
        self.peer().map(|p| p.name.clone())
    }

    fn peer(&self) -> Option<Arc<PadInner>> {
        self.0.peer.lock().ok()?.as_ref().and_then(Weak::upgrade)
    }

    fn unlink(&self) {
        if let Some(peer) = self.peer() {
            if let Ok(mut slot) = peer.peer.lock() {
                *slot = None;
            }
        }
        if let Ok(mut slot) = self.0.peer.lock() {
            *slot = None;
        }
    }

    fn probes(&self) -> Vec<MockProbe> {
        self.0.probes.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Pad for MockPad {
    type Buffer = MockBuffer;

    fn name(&self) -> String {
        self.0.name.clone()
    }

    fn media_type(&self) -> Option<String> {
        self.0.media_type.clone()
    }

    fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    fn link(&self, sink: &Self) -> Result<(), String> {
        if self.0.direction != Direction::Src || sink.0.direction != Direction::Sink {
            return Err(format!("wrong direction: {} -> {}", self.0.name, sink.0.name));
        }
        if self.is_linked() || sink.is_linked() {
            return Err(format!("{} or {} already linked", self.0.name, sink.0.name));
        }
        let mut src_peer = self.0.peer.lock().map_err(|e| e.to_string())?;
        let mut sink_peer = sink.0.peer.lock().map_err(|e| e.to_string())?;
        *src_peer = Some(Arc::downgrade(&sink.0));
        *sink_peer = Some(Arc::downgrade(&self.0));
        Ok(())
    }

    fn add_buffer_probe<F>(&self, probe: F)
    where
        F: Fn(&MockBuffer) -> ProbeReturn + Send + Sync + 'static,
    {
        if let Ok(mut probes) = self.0.probes.lock() {
            probes.push(Arc::new(probe));
        }
    }
}

struct StageInner {
    name: String,
    kind: StageKind,
    factory: String,
    properties: Mutex<HashMap<String, PropValue>>,
    static_pads: Vec<MockPad>,
    request_pads: Mutex<Vec<MockPad>>,
    dynamic_pads: Mutex<Vec<MockPad>>,
    pad_added: Mutex<Vec<PadAddedCallback>>,
}

#[derive(Clone)]
pub struct MockStage(Arc<StageInner>);

impl MockStage {
    fn create(kind: StageKind, factory: &str, name: &str) -> Self {
        let static_pads = match kind {
            StageKind::Source => vec![MockPad::source("src", None)],
            StageKind::Decoder | StageKind::Sink => vec![MockPad::sink("sink")],
            StageKind::Multiplexer => vec![MockPad::source("src", Some("video/x-raw"))],
            _ => vec![MockPad::sink("sink"), MockPad::source("src", Some("video/x-raw"))],
        };
        MockStage(Arc::new(StageInner {
            name: name.to_string(),
            kind,
            factory: factory.to_string(),
            properties: Mutex::new(HashMap::new()),
            static_pads,
            request_pads: Mutex::new(Vec::new()),
            dynamic_pads: Mutex::new(Vec::new()),
            pad_added: Mutex::new(Vec::new()),
        }))
    }

    pub fn kind(&self) -> StageKind {
        self.0.kind
    }

    pub fn factory(&self) -> &str {
        &self.0.factory
    }

    pub fn property(&self, key: &str) -> Option<PropValue> {
        self.0.properties.lock().ok()?.get(key).cloned()
    }

    pub fn request_pad_count(&self) -> usize {
        self.0.request_pads.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn all_pads(&self) -> Vec<MockPad> {
        let mut pads = self.0.static_pads.clone();
        if let Ok(requested) = self.0.request_pads.lock() {
            pads.extend(requested.iter().cloned());
        }
        if let Ok(dynamic) = self.0.dynamic_pads.lock() {
            pads.extend(dynamic.iter().cloned());
        }
        pads
    }

    fn expose_pad(&self, media_type: &str) -> MockPad {
        let pad = {
            let mut dynamic = match self.0.dynamic_pads.lock() {
                Ok(d) => d,
                Err(poisoned) => poisoned.into_inner(),
            };
            let pad = MockPad::source(&format!("src_{}", dynamic.len()), Some(media_type));
            dynamic.push(pad.clone());
            pad
        };
        let callbacks = self.0.pad_added.lock().map(|c| c.clone()).unwrap_or_default();
        for callback in callbacks {
            callback(&pad);
        }
        pad
    }

    fn video_linked(&self) -> bool {
        self.0
            .dynamic_pads
            .lock()
            .map(|pads| pads.iter().any(|p| p.is_linked()))
            .unwrap_or(false)
    }

    fn remove_dynamic_pads(&self) {
        if let Ok(mut dynamic) = self.0.dynamic_pads.lock() {
            for pad in dynamic.drain(..) {
                pad.unlink();
            }
        }
    }
}

impl Stage for MockStage {
    type Pad = MockPad;

    fn name(&self) -> String {
        self.0.name.clone()
    }

    fn set_property(&self, key: &str, value: &PropValue) -> Result<(), String> {
        let mut props = self.0.properties.lock().map_err(|e| e.to_string())?;
        props.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn static_pad(&self, name: &str) -> Option<MockPad> {
        self.0.static_pads.iter().find(|p| p.0.name == name).cloned()
    }

    fn request_pad(&self, name: &str) -> Option<MockPad> {
        if self.0.kind != StageKind::Multiplexer || !name.starts_with("sink_") {
            return None;
        }
        let mut requested = self.0.request_pads.lock().ok()?;
        if requested.iter().any(|p| p.0.name == name) {
            return None;
        }
        let pad = MockPad::sink(name);
        requested.push(pad.clone());
        Some(pad)
    }

    fn link(&self, downstream: &Self) -> Result<(), String> {
        let src = self
            .static_pad("src")
            .ok_or_else(|| format!("{} has no src pad", self.0.name))?;
        let sink = downstream
            .static_pad("sink")
            .ok_or_else(|| format!("{} has no sink pad", downstream.0.name))?;
        src.link(&sink)
    }

    fn connect_pad_added<F>(&self, callback: F)
    where
        F: Fn(&MockPad) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.0.pad_added.lock() {
            callbacks.push(Arc::new(callback));
        }
    }
}

struct GraphInner {
    name: String,
    backend: Arc<BackendInner>,
    stages: Mutex<Vec<MockStage>>,
    state: Mutex<GraphState>,
    bus_tx: Mutex<Sender<BusMessage>>,
    bus_rx: Mutex<Receiver<BusMessage>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub struct MockGraph(Arc<GraphInner>);

impl MockGraph {
    pub fn stages(&self) -> Vec<MockStage> {
        self.0.stages.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn stage(&self, name: &str) -> Option<MockStage> {
        self.stages().into_iter().find(|s| s.0.name == name)
    }

    fn first_of(&self, kind: StageKind) -> Option<MockStage> {
        self.stages().into_iter().find(|s| s.0.kind == kind)
    }

    fn record(&self, state: GraphState) {
        if let Ok(mut s) = self.0.state.lock() {
            *s = state;
        }
        if let Ok(mut log) = self.0.backend.transitions.lock() {
            log.push((self.0.name.clone(), state));
        }
    }

    fn start(&self) -> Result<StateChange, String> {
        let source = self.first_of(StageKind::Source).ok_or("graph has no source")?;
        let decoder = self.first_of(StageKind::Decoder).ok_or("graph has no decoder")?;
        let location = source
            .property("location")
            .map(|v| PathBuf::from(v.to_string()))
            .ok_or("source location not set")?;

        let script = self
            .0
            .backend
            .scripts
            .lock()
            .ok()
            .and_then(|s| s.get(&location).cloned())
            .unwrap_or_else(|| {
                MockScript::new()
                    .with_pads(&[])
                    .with_outcome(MockOutcome::Error(format!("no script for {:?}", location)))
            });

        if script.outcome == MockOutcome::RejectStart {
            return Err(format!("{} rejected its configuration", decoder.name()));
        }

        let stages = self.stages();
        let bus = self.0.bus_tx.lock().map_err(|e| e.to_string())?.clone();
        let graph_name = self.0.name.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-streaming", graph_name))
            .spawn(move || stream(script, decoder, stages, bus, graph_name))
            .map_err(|e| e.to_string())?;

        if let Ok(mut worker) = self.0.worker.lock() {
            *worker = Some(handle);
        }
        self.record(GraphState::Playing);
        Ok(StateChange::Async)
    }

    fn stop(&self, target: GraphState) {
        let handle = self.0.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        if let Some(decoder) = self.first_of(StageKind::Decoder) {
            decoder.remove_dynamic_pads();
        }
        if let Ok(rx) = self.0.bus_rx.lock() {
            while rx.try_recv().is_ok() {}
        }
        self.record(target);
    }
}

fn stream(
    script: MockScript,
    decoder: MockStage,
    stages: Vec<MockStage>,
    bus: Sender<BusMessage>,
    graph_name: String,
) {
    for media in &script.pads {
        decoder.expose_pad(media);
    }

    for warning in &script.warnings {
        let _ = bus.send(BusMessage::Warning {
            source: graph_name.clone(),
            cause: warning.clone(),
            detail: String::new(),
        });
    }

    if !decoder.video_linked() {
        // not-linked: nothing flows, nothing finishes
        return;
    }

    let probes: Vec<MockProbe> = stages
        .iter()
        .flat_map(|s| s.all_pads())
        .flat_map(|p| p.probes())
        .collect();
    for buffer in &script.buffers {
        for probe in &probes {
            probe(buffer);
        }
    }

    let message = match script.outcome {
        MockOutcome::EndOfStream => BusMessage::EndOfStream,
        MockOutcome::Error(cause) => BusMessage::Error {
            source: decoder.name(),
            cause,
            detail: format!("{}/{}", graph_name, decoder.name()),
        },
        MockOutcome::Hang | MockOutcome::RejectStart => return,
    };
    let _ = bus.send(message);
}

impl Graph for MockGraph {
    type Stage = MockStage;

    fn add(&self, stage: &MockStage) -> Result<(), String> {
        let mut stages = self.0.stages.lock().map_err(|e| e.to_string())?;
        if stages.iter().any(|s| s.0.name == stage.0.name) {
            return Err(format!("name '{}' is not unique in graph", stage.0.name));
        }
        stages.push(stage.clone());
        Ok(())
    }

    fn set_state(&self, state: GraphState) -> Result<StateChange, String> {
        let current = self.current_state();
        if current == state {
            return Ok(StateChange::Success);
        }
        match state {
            GraphState::Playing => self.start(),
            other => {
                self.stop(other);
                Ok(StateChange::Success)
            }
        }
    }

    fn wait_state(&self, _timeout: Option<Duration>) -> GraphState {
        self.current_state()
    }

    fn current_state(&self) -> GraphState {
        self.0.state.lock().map(|s| *s).unwrap_or(GraphState::Null)
    }

    fn pop_message(&self, timeout: Duration) -> Option<BusMessage> {
        let rx = self.0.bus_rx.lock().ok()?;
        rx.recv_timeout(timeout).ok()
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        if let Some(handle) = self.0.worker.lock().ok().and_then(|mut w| w.take()) {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct BackendInner {
    scripts: Mutex<HashMap<PathBuf, MockScript>>,
    failing_factories: Mutex<HashSet<String>>,
    graphs_built: AtomicUsize,
    transitions: Mutex<Vec<(String, GraphState)>>,
}

#[derive(Clone, Default)]
pub struct MockBackend(Arc<BackendInner>);

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, location: impl AsRef<Path>, script: MockScript) {
        if let Ok(mut scripts) = self.0.scripts.lock() {
            scripts.insert(location.as_ref().to_path_buf(), script);
        }
    }

    pub fn fail_factory(&self, factory: &str) {
        if let Ok(mut failing) = self.0.failing_factories.lock() {
            failing.insert(factory.to_string());
        }
    }

    pub fn graphs_built(&self) -> usize {
        self.0.graphs_built.load(Ordering::SeqCst)
    }

    /// Every state a graph of this backend reached, in order.
    pub fn transitions(&self) -> Vec<(String, GraphState)> {
        self.0.transitions.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Backend for MockBackend {
    type Pad = MockPad;
    type Stage = MockStage;
    type Graph = MockGraph;

    fn make_stage(&self, kind: StageKind, factory: &str, name: &str) -> Result<MockStage, String> {
        let failing = self
            .0
            .failing_factories
            .lock()
            .map(|f| f.contains(factory))
            .unwrap_or(false);
        if failing {
            return Err(format!("no such element factory '{}'", factory));
        }
        Ok(MockStage::create(kind, factory, name))
    }

    fn new_graph(&self, name: &str) -> MockGraph {
        let id = self.0.graphs_built.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        MockGraph(Arc::new(GraphInner {
            name: format!("{}-{}", name, id),
            backend: Arc::clone(&self.0),
            stages: Mutex::new(Vec::new()),
            state: Mutex::new(GraphState::Null),
            bus_tx: Mutex::new(tx),
            bus_rx: Mutex::new(rx),
            worker: Mutex::new(None),
        }))
    }
}

use std::sync::Arc;

use log::{debug, info};

use crate::core::config::{PipelineConfig, RenderConfig};
use crate::core::error::LprError;
use crate::core::framework::{Backend, Graph, Pad, ProbeReturn, PropValue, Stage, StageKind};
use crate::core::link_resolver::LinkResolver;
use crate::core::persister::ResultGate;
use crate::core::tap::ResultTap;

pub const FILE_SOURCE: &str = "filesrc";
pub const DECODER: &str = "decodebin";
pub const VIDEO_CONVERT: &str = "videoconvert";
pub const STREAM_MUX: &str = "nvstreammux";
pub const INFERENCE: &str = "nvinfer";
pub const GPU_CONVERT: &str = "nvvideoconvert";
pub const OSD: &str = "nvdsosd";
pub const CAPS_FILTER: &str = "capsfilter";
pub const JPEG_ENCODER: &str = "jpegenc";
pub const FAKE_SINK: &str = "fakesink";
pub const FILE_SINK: &str = "filesink";

/// Built graph plus the handles the run controller needs.
pub struct ProcessingGraph<B: Backend> {
    graph: B::Graph,
    source: B::Stage,
    decoder: B::Stage,
    render_sink: Option<B::Stage>,
    resolver: Arc<LinkResolver<B::Pad>>,
    tap: Arc<ResultTap>,
    stage_names: Vec<String>,
}

impl<B: Backend> ProcessingGraph<B> {
    pub fn graph(&self) -> &B::Graph {
        &self.graph
    }

    pub fn source(&self) -> &B::Stage {
        &self.source
    }

    pub fn decoder(&self) -> &B::Stage {
        &self.decoder
    }

    /// File sink of the render chain, if the graph renders.
    pub fn render_sink(&self) -> Option<&B::Stage> {
        self.render_sink.as_ref()
    }

    pub fn resolver(&self) -> &LinkResolver<B::Pad> {
        &self.resolver
    }

    pub fn tap(&self) -> &ResultTap {
        &self.tap
    }

    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }
}

struct RenderChain<S> {
    compositor: S,
    stages: Vec<S>,
    sink: S,
}

pub struct GraphBuilder<'a, B: Backend> {
    backend: &'a B,
    config: &'a PipelineConfig,
}

impl<'a, B: Backend> GraphBuilder<'a, B> {
    pub fn new(backend: &'a B, config: &'a PipelineConfig) -> Self {
        Self { backend, config }
    }

    pub fn build(&self) -> Result<ProcessingGraph<B>, LprError> {
        info!(
            "🏗️ Building graph: {} inference stage(s), render: {}",
            self.config.inference.len(),
            self.config.render.is_some()
        );
        let graph = self.backend.new_graph("lpr-pipeline");

        let source = self.make(StageKind::Source, FILE_SOURCE, "file-source")?;
        let decoder = self.make(StageKind::Decoder, DECODER, "image-decoder")?;
        let converter = self.make(StageKind::Converter, VIDEO_CONVERT, "video-convert")?;
        let muxer = self.make_muxer()?;

        let mut inference = Vec::with_capacity(self.config.inference.len());
        for role in &self.config.inference {
            let stage = self.make(StageKind::Inference, INFERENCE, &role.name)?;
            set(
                &stage,
                "config-file-path",
                role.config_path.to_string_lossy().into_owned(),
            )?;
            inference.push(stage);
        }

        let render = match &self.config.render {
            Some(render) => Some(self.make_render_chain(render)?),
            None => None,
        };
        let tail: Vec<B::Stage> = match &render {
            Some(chain) => chain.stages.clone(),
            None => vec![self.make(StageKind::Sink, FAKE_SINK, "fakesink")?],
        };

        let mut all: Vec<&B::Stage> = vec![&source, &decoder, &converter, &muxer];
        all.extend(inference.iter());
        all.extend(tail.iter());
        for stage in &all {
            graph
                .add(stage)
                .map_err(|e| LprError::Backend(format!("cannot add {}: {}", stage.name(), e)))?;
        }
        let stage_names: Vec<String> = all.iter().map(|s| s.name()).collect();

        link_converter_to_muxer(&converter, &muxer)?;

        let mut chain: Vec<&B::Stage> = vec![&muxer];
        chain.extend(inference.iter());
        chain.extend(tail.iter());
        for pair in chain.windows(2) {
            pair[0]
                .link(pair[1])
                .map_err(|e| LprError::link(&pair[0].name(), &pair[1].name(), e))?;
            debug!("Linked {} -> {}", pair[0].name(), pair[1].name());
        }

        let converter_sink = converter
            .static_pad("sink")
            .ok_or_else(|| LprError::link(&decoder.name(), &converter.name(), "converter has no sink pad"))?;
        let resolver = Arc::new(LinkResolver::new(converter_sink));
        let on_pad = Arc::clone(&resolver);
        decoder.connect_pad_added(move |pad| {
            on_pad.on_pad_added(pad);
        });

        let (tap_pad, mode) = match (&render, inference.last()) {
            (Some(chain), _) => (chain.compositor.static_pad("sink"), ProbeReturn::Pass),
            (None, Some(last)) => (last.static_pad("src"), ProbeReturn::Drop),
            (None, None) => return Err(LprError::Config("no inference stage configured".into())),
        };
        let tap_pad = tap_pad.ok_or_else(|| LprError::Backend("tap point has no pad".into()))?;
        let gate = ResultGate::with_threshold(&self.config.output_dir, self.config.confidence_threshold);
        let tap = Arc::new(ResultTap::new(gate, mode));
        let probe_tap = Arc::clone(&tap);
        tap_pad.add_buffer_probe(move |buffer| probe_tap.on_buffer(buffer));
        debug!("Installed buffer probe on {} ({:?})", tap_pad.name(), mode);

        info!("✅ Graph ready: {}", stage_names.join(" → "));
        Ok(ProcessingGraph {
            graph,
            source,
            decoder,
            render_sink: render.map(|chain| chain.sink),
            resolver,
            tap,
            stage_names,
        })
    }

    fn make(&self, kind: StageKind, factory: &str, name: &str) -> Result<B::Stage, LprError> {
        self.backend
            .make_stage(kind, factory, name)
            .map_err(|reason| {
                debug!("Stage creation failed: {}", reason);
                LprError::StageCreation {
                    stage: name.to_string(),
                    factory: factory.to_string(),
                }
            })
    }

    fn make_muxer(&self) -> Result<B::Stage, LprError> {
        let mux = &self.config.mux;
        let muxer = self.make(StageKind::Multiplexer, STREAM_MUX, "stream-muxer")?;
        set(&muxer, "width", mux.width)?;
        set(&muxer, "height", mux.height)?;
        set(&muxer, "batch-size", mux.batch_size)?;
        set(&muxer, "batched-push-timeout", mux.batched_push_timeout_us)?;
        set(&muxer, "live-source", mux.live_source)?;
        Ok(muxer)
    }

    fn make_render_chain(&self, render: &RenderConfig) -> Result<RenderChain<B::Stage>, LprError> {
        let pre_osd = self.make(StageKind::Converter, GPU_CONVERT, "convertor")?;
        let compositor = self.make(StageKind::Compositor, OSD, "onscreendisplay")?;
        let post_osd = self.make(StageKind::Converter, GPU_CONVERT, "convertor2")?;

        let mut stages = vec![pre_osd, compositor.clone(), post_osd];
        if let Some(caps) = &render.caps {
            let filter = self.make(StageKind::Converter, CAPS_FILTER, "capsfilter")?;
            set(&filter, "caps", caps.as_str())?;
            stages.push(filter);
        }

        let encoder = self.make(StageKind::Encoder, JPEG_ENCODER, "jpegenc")?;
        set(&encoder, "quality", render.jpeg_quality)?;
        let sink = self.make(StageKind::Sink, FILE_SINK, "filesink")?;
        set(&sink, "sync", false)?;
        set(&sink, "async", false)?;
        stages.push(encoder);
        stages.push(sink.clone());

        Ok(RenderChain {
            compositor,
            stages,
            sink,
        })
    }
}

fn set<S: Stage>(stage: &S, key: &str, value: impl Into<PropValue>) -> Result<(), LprError> {
    stage
        .set_property(key, &value.into())
        .map_err(|reason| LprError::Property {
            stage: stage.name(),
            property: key.to_string(),
            reason,
        })
}

/// The muxer has no static input; batch size 1 means exactly one requested slot.
fn link_converter_to_muxer<S: Stage>(converter: &S, muxer: &S) -> Result<(), LprError> {
    let upstream = converter.name();
    let downstream = muxer.name();
    let sink = muxer
        .request_pad("sink_0")
        .ok_or_else(|| LprError::link(&upstream, &downstream, "no request pad sink_0"))?;
    let src = converter
        .static_pad("src")
        .ok_or_else(|| LprError::link(&upstream, &downstream, "converter has no src pad"))?;
    src.link(&sink)
        .map_err(|e| LprError::link(&upstream, &downstream, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::MockBackend;

    fn names(graph: &ProcessingGraph<MockBackend>) -> Vec<&str> {
        graph.stage_names().iter().map(String::as_str).collect()
    }

    #[test]
    fn test_build_plate_recognition_graph() {
        let backend = MockBackend::new();
        let config = PipelineConfig::plate_recognition();
        let graph = GraphBuilder::new(&backend, &config).build().unwrap();

        assert_eq!(
            names(&graph),
            vec![
                "file-source",
                "image-decoder",
                "video-convert",
                "stream-muxer",
                "lpr-inference",
                "fakesink"
            ]
        );
        assert!(graph.render_sink().is_none());
        assert_eq!(graph.tap().mode(), ProbeReturn::Drop);

        let mock = graph.graph();
        let muxer = mock.stage("stream-muxer").unwrap();
        assert_eq!(muxer.property("width"), Some(PropValue::Int(720)));
        assert_eq!(muxer.property("batched-push-timeout"), Some(PropValue::Int(4_000_000)));
        assert_eq!(muxer.property("live-source"), Some(PropValue::Bool(false)));
        assert_eq!(muxer.request_pad_count(), 1);

        let lpr = mock.stage("lpr-inference").unwrap();
        assert_eq!(
            lpr.property("config-file-path"),
            Some(PropValue::Str("models/lpr_config.txt".into()))
        );
        assert!(lpr.static_pad("src").unwrap().is_linked());
    }

    #[test]
    fn test_source_and_decoder_left_unlinked() {
        let backend = MockBackend::new();
        let config = PipelineConfig::plate_recognition();
        let graph = GraphBuilder::new(&backend, &config).build().unwrap();

        assert!(!graph.decoder().static_pad("sink").unwrap().is_linked());
        let convert = graph.graph().stage("video-convert").unwrap();
        assert!(!convert.static_pad("sink").unwrap().is_linked());
        assert!(convert.static_pad("src").unwrap().is_linked());
    }

    #[test]
    fn test_build_cascade_render_graph() {
        let backend = MockBackend::new();
        let config = PipelineConfig::cascade();
        let graph = GraphBuilder::new(&backend, &config).build().unwrap();

        assert_eq!(
            names(&graph)[4..].to_vec(),
            vec![
                "primary-inference",
                "secondary-inference",
                "tertiary-inference",
                "convertor",
                "onscreendisplay",
                "convertor2",
                "capsfilter",
                "jpegenc",
                "filesink"
            ]
        );
        assert_eq!(graph.tap().mode(), ProbeReturn::Pass);
        let sink = graph.render_sink().unwrap();
        assert_eq!(sink.property("sync"), Some(PropValue::Bool(false)));
        let filter = graph.graph().stage("capsfilter").unwrap();
        assert_eq!(
            filter.property("caps"),
            Some(PropValue::Str("video/x-raw, format=I420".into()))
        );
    }

    #[test]
    fn test_missing_factory_names_stage() {
        let backend = MockBackend::new();
        backend.fail_factory(STREAM_MUX);
        let config = PipelineConfig::plate_recognition();

        match GraphBuilder::new(&backend, &config).build() {
            Err(LprError::StageCreation { stage, factory }) => {
                assert_eq!(stage, "stream-muxer");
                assert_eq!(factory, "nvstreammux");
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("build should fail"),
        }
    }
}

//! GStreamer 适配层

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use log::{debug, info};

use crate::core::error::LprError;
use crate::core::framework::{
    Backend, BusMessage, Graph, GraphState, MetaBuffer, Pad, ProbeReturn, PropValue, Stage,
    StageKind, StateChange,
};
use crate::core::metadata::BatchMeta;

#[derive(Clone)]
pub struct GstPad(gst::Pad);

impl Pad for GstPad {
    type Buffer = gst::BufferRef;

    fn name(&self) -> String {
        self.0.name().to_string()
    }

    /// Negotiated caps when available, otherwise what the pad could produce.
    fn media_type(&self) -> Option<String> {
        let caps = self.0.current_caps().unwrap_or_else(|| self.0.query_caps(None));
        caps.structure(0).map(|s| s.name().to_string())
    }

    fn is_linked(&self) -> bool {
        self.0.is_linked()
    }

    fn link(&self, sink: &Self) -> Result<(), String> {
        self.0
            .link(&sink.0)
            .map(|_| ())
            .map_err(|e| format!("{:?}", e))
    }

    fn add_buffer_probe<F>(&self, probe: F)
    where
        F: Fn(&gst::BufferRef) -> ProbeReturn + Send + Sync + 'static,
    {
        self.0.add_probe(gst::PadProbeType::BUFFER, move |_, info| {
            let Some(gst::PadProbeData::Buffer(ref buffer)) = info.data else {
                return gst::PadProbeReturn::Ok;
            };
            match probe(buffer) {
                ProbeReturn::Drop => gst::PadProbeReturn::Drop,
                ProbeReturn::Pass => gst::PadProbeReturn::Ok,
            }
        });
    }
}

#[derive(Clone)]
pub struct GstStage(gst::Element);

impl GstStage {
    pub fn element(&self) -> &gst::Element {
        &self.0
    }
}

impl Stage for GstStage {
    type Pad = GstPad;

    fn name(&self) -> String {
        self.0.name().to_string()
    }

    fn set_property(&self, key: &str, value: &PropValue) -> Result<(), String> {
        let pspec = self
            .0
            .find_property(key)
            .ok_or_else(|| format!("no property '{}'", key))?;
        if !pspec.flags().contains(gst::glib::ParamFlags::WRITABLE) {
            return Err(format!("property '{}' is not writable", key));
        }
        // string form covers enums, caps and numbers alike
        let text = value.to_string();
        let parsed = gst::glib::Value::deserialize(&text, pspec.value_type())
            .map_err(|e| format!("cannot parse '{}' as {}: {}", text, pspec.value_type(), e))?;
        self.0.set_property_from_value(key, &parsed);
        Ok(())
    }

    fn static_pad(&self, name: &str) -> Option<GstPad> {
        self.0.static_pad(name).map(GstPad)
    }

    fn request_pad(&self, name: &str) -> Option<GstPad> {
        self.0.request_pad_simple(name).map(GstPad)
    }

    fn link(&self, downstream: &Self) -> Result<(), String> {
        self.0.link(&downstream.0).map_err(|e| e.to_string())
    }

    fn connect_pad_added<F>(&self, callback: F)
    where
        F: Fn(&GstPad) + Send + Sync + 'static,
    {
        self.0.connect_pad_added(move |_, pad| callback(&GstPad(pad.clone())));
    }
}

pub struct GstGraph {
    pipeline: gst::Pipeline,
    bus: Option<gst::Bus>,
}

fn to_gst_state(state: GraphState) -> gst::State {
    match state {
        GraphState::Null => gst::State::Null,
        GraphState::Ready => gst::State::Ready,
        GraphState::Paused => gst::State::Paused,
        GraphState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> GraphState {
    match state {
        gst::State::Ready => GraphState::Ready,
        gst::State::Paused => GraphState::Paused,
        gst::State::Playing => GraphState::Playing,
        _ => GraphState::Null,
    }
}

fn clock_time(timeout: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(timeout.as_nanos().min(u64::MAX as u128) as u64)
}

fn origin(message: &gst::Message) -> String {
    message
        .src()
        .map(|s| s.path_string().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl Graph for GstGraph {
    type Stage = GstStage;

    fn add(&self, stage: &GstStage) -> Result<(), String> {
        self.pipeline.add(&stage.0).map_err(|e| e.to_string())
    }

    fn set_state(&self, state: GraphState) -> Result<StateChange, String> {
        match self.pipeline.set_state(to_gst_state(state)) {
            Ok(gst::StateChangeSuccess::Success) => Ok(StateChange::Success),
            Ok(gst::StateChangeSuccess::Async) => Ok(StateChange::Async),
            Ok(gst::StateChangeSuccess::NoPreroll) => Ok(StateChange::NoPreroll),
            Err(e) => Err(e.to_string()),
        }
    }

    fn wait_state(&self, timeout: Option<Duration>) -> GraphState {
        let (result, current, pending) = self.pipeline.state(timeout.map(clock_time));
        debug!("State query: {:?}, current {:?}, pending {:?}", result, current, pending);
        from_gst_state(current)
    }

    fn current_state(&self) -> GraphState {
        from_gst_state(self.pipeline.current_state())
    }

    fn pop_message(&self, timeout: Duration) -> Option<BusMessage> {
        let bus = self.bus.as_ref()?;
        let message = bus.timed_pop_filtered(
            clock_time(timeout),
            &[
                gst::MessageType::Eos,
                gst::MessageType::Error,
                gst::MessageType::Warning,
            ],
        )?;

        use gst::MessageView;
        match message.view() {
            MessageView::Eos(..) => Some(BusMessage::EndOfStream),
            MessageView::Error(err) => Some(BusMessage::Error {
                source: origin(&message),
                cause: err.error().to_string(),
                detail: err.debug().map(|d| d.to_string()).unwrap_or_default(),
            }),
            MessageView::Warning(w) => Some(BusMessage::Warning {
                source: origin(&message),
                cause: w.error().to_string(),
                detail: w.debug().map(|d| d.to_string()).unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

impl MetaBuffer for gst::BufferRef {
    fn batch_meta(&self) -> Option<BatchMeta> {
        #[cfg(feature = "deepstream")]
        {
            super::nvds::read_batch_meta(self)
        }
        #[cfg(not(feature = "deepstream"))]
        {
            None
        }
    }
}

/// GStreamer 后端，构造时初始化 GStreamer
#[derive(Clone)]
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Result<Self, LprError> {
        gst::init().map_err(|e| LprError::Backend(format!("GStreamer init failed: {}", e)))?;
        info!("🎬 GStreamer {} initialized", gst::version_string());
        Ok(GstBackend)
    }
}

impl Backend for GstBackend {
    type Pad = GstPad;
    type Stage = GstStage;
    type Graph = GstGraph;

    fn make_stage(&self, _kind: StageKind, factory: &str, name: &str) -> Result<GstStage, String> {
        gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map(GstStage)
            .map_err(|e| e.to_string())
    }

    fn new_graph(&self, name: &str) -> GstGraph {
        let pipeline = gst::Pipeline::with_name(name);
        let bus = pipeline.bus();
        GstGraph { pipeline, bus }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_stage(factory: &str) -> Option<GstStage> {
        let backend = GstBackend::new().ok()?;
        backend.make_stage(StageKind::Sink, factory, "under-test").ok()
    }

    #[test]
    fn test_unparsable_value_is_an_error() {
        let Some(sink) = core_stage("fakesink") else {
            return;
        };
        assert!(sink.set_property("sync", &PropValue::from("maybe")).is_err());
        assert!(sink.set_property("no-such-prop", &PropValue::from(true)).is_err());
        assert!(sink.set_property("sync", &PropValue::from(false)).is_ok());
    }

    #[test]
    fn test_malformed_caps_rejected() {
        let Some(filter) = core_stage("capsfilter") else {
            return;
        };
        let bad = PropValue::from("video/x-raw, width=(int)wide");
        assert!(filter.set_property("caps", &bad).is_err());
        let good = PropValue::from("video/x-raw, format=I420");
        assert!(filter.set_property("caps", &good).is_ok());
    }
}

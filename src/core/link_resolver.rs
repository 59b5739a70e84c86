use std::sync::Mutex;

use log::{debug, error, info};

use crate::core::framework::Pad;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    AwaitingVideo,
    Linked { pad: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PadDecision {
    /// Not a video stream (audio, subtitles, ...).
    Ignored { media_type: Option<String> },
    AlreadyLinked,
    Linked,
    Failed(String),
}

/// Completes decoder → converter once the decoder exposes its video pad.
///
/// Runs on the framework's streaming thread; the converter's input pad is
/// handed over at registration time.
pub struct LinkResolver<P: Pad> {
    converter_sink: P,
    state: Mutex<LinkState>,
}

impl<P: Pad> LinkResolver<P> {
    pub fn new(converter_sink: P) -> Self {
        Self {
            converter_sink,
            state: Mutex::new(LinkState::AwaitingVideo),
        }
    }

    pub fn on_pad_added(&self, pad: &P) -> PadDecision {
        let media_type = pad.media_type();
        let is_video = media_type
            .as_deref()
            .map(|m| m.starts_with("video/"))
            .unwrap_or(false);
        if !is_video {
            debug!("Ignoring decoder pad {} ({:?})", pad.name(), media_type);
            return PadDecision::Ignored { media_type };
        }

        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.converter_sink.is_linked() {
            debug!("Converter input already linked, skipping pad {}", pad.name());
            return PadDecision::AlreadyLinked;
        }

        match pad.link(&self.converter_sink) {
            Ok(()) => {
                info!("🔗 Linked decoder pad {} to converter", pad.name());
                *state = LinkState::Linked { pad: pad.name() };
                PadDecision::Linked
            }
            Err(e) => {
                error!("❌ Failed to link decoder pad {}: {}", pad.name(), e);
                PadDecision::Failed(e)
            }
        }
    }

    pub fn state(&self) -> LinkState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reset(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = LinkState::AwaitingVideo;
    }
}

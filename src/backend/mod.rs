pub mod gst;
#[cfg(feature = "deepstream")]
pub mod nvds;

pub use self::gst::{GstBackend, GstGraph, GstPad, GstStage};

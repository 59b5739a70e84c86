//! DeepStream 批次元数据读取 (FFI)
//!
//! Layouts follow `nvdsmeta.h` / `nvll_osd_struct.h` up to the last field read;
//! trailing fields are never touched.
#![allow(dead_code)]

use std::ffi::{c_char, c_void, CStr};

use gstreamer as gst;
use gstreamer::glib::ffi::GList;
use log::warn;

use crate::core::metadata::{BatchMeta, ClassifierResult, FrameResult, LabelResult, ObjectResult};

const MAX_LABEL_SIZE: usize = 128;
/// Upper bound on any single list walk.
const MAX_LIST_LEN: usize = 4096;

#[repr(C)]
struct NvDsBaseMeta {
    batch_meta: *mut NvDsBatchMeta,
    meta_type: i32,
    u_context: *mut c_void,
    copy_func: *mut c_void,
    release_func: *mut c_void,
}

#[repr(C)]
struct NvDsBatchMeta {
    base_meta: NvDsBaseMeta,
    max_frames_in_batch: u32,
    num_frames_in_batch: u32,
    frame_meta_pool: *mut c_void,
    obj_meta_pool: *mut c_void,
    classifier_meta_pool: *mut c_void,
    display_meta_pool: *mut c_void,
    user_meta_pool: *mut c_void,
    label_info_meta_pool: *mut c_void,
    frame_meta_list: *mut GList,
}

#[repr(C)]
struct NvDsFrameMeta {
    base_meta: NvDsBaseMeta,
    pad_index: u32,
    batch_id: u32,
    frame_num: i32,
    buf_pts: u64,
    ntp_timestamp: u64,
    source_id: u32,
    num_surfaces_per_frame: i32,
    source_frame_width: u32,
    source_frame_height: u32,
    surface_type: u32,
    surface_index: u32,
    num_obj_meta: u32,
    b_infer_done: i32,
    obj_meta_list: *mut GList,
}

#[repr(C)]
struct NvBboxCoords {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

#[repr(C)]
struct NvOsdColorParams {
    red: f64,
    green: f64,
    blue: f64,
    alpha: f64,
}

#[repr(C)]
struct NvOsdRectParams {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    border_width: u32,
    border_color: NvOsdColorParams,
    has_bg_color: u32,
    reserved: u32,
    bg_color: NvOsdColorParams,
    has_color_info: i32,
    color_id: i32,
}

#[repr(C)]
struct NvOsdMaskParams {
    data: *mut f32,
    size: u32,
    threshold: f32,
    width: u32,
    height: u32,
}

#[repr(C)]
struct NvOsdFontParams {
    font_name: *mut c_char,
    font_size: u32,
    font_color: NvOsdColorParams,
}

#[repr(C)]
struct NvOsdTextParams {
    display_text: *mut c_char,
    x_offset: u32,
    y_offset: u32,
    font_params: NvOsdFontParams,
    set_bg_clr: i32,
    text_bg_clr: NvOsdColorParams,
}

#[repr(C)]
struct NvDsObjectMeta {
    base_meta: NvDsBaseMeta,
    parent: *mut NvDsObjectMeta,
    unique_component_id: i32,
    class_id: i32,
    object_id: u64,
    detector_bbox_info: NvBboxCoords,
    tracker_bbox_info: NvBboxCoords,
    confidence: f32,
    tracker_confidence: f32,
    rect_params: NvOsdRectParams,
    mask_params: NvOsdMaskParams,
    text_params: NvOsdTextParams,
    obj_label: [c_char; MAX_LABEL_SIZE],
    classifier_meta_list: *mut GList,
}

#[repr(C)]
struct NvDsClassifierMeta {
    base_meta: NvDsBaseMeta,
    num_labels: u32,
    unique_component_id: i32,
    label_info_list: *mut GList,
}

#[repr(C)]
struct NvDsLabelInfo {
    base_meta: NvDsBaseMeta,
    num_classes: u32,
    result_label: [c_char; MAX_LABEL_SIZE],
    p_result_label: *mut c_char,
    result_class_id: u32,
    label_id: u32,
    result_prob: f32,
}

#[link(name = "nvdsgst_meta")]
#[link(name = "nvds_meta")]
extern "C" {
    fn gst_buffer_get_nvds_batch_meta(buffer: *mut gst::ffi::GstBuffer) -> *mut NvDsBatchMeta;
}

/// Data pointers of a GList, stopping at `MAX_LIST_LEN` entries.
unsafe fn list_items<T>(mut node: *mut GList) -> Vec<*const T> {
    let mut items = Vec::new();
    while !node.is_null() {
        if items.len() == MAX_LIST_LEN {
            warn!("⚠️ Metadata list longer than {}, truncated", MAX_LIST_LEN);
            break;
        }
        let data = (*node).data as *const T;
        if !data.is_null() {
            items.push(data);
        }
        node = (*node).next;
    }
    items
}

unsafe fn label_text(info: &NvDsLabelInfo) -> String {
    if !info.p_result_label.is_null() {
        return CStr::from_ptr(info.p_result_label).to_string_lossy().into_owned();
    }
    let bytes: Vec<u8> = info
        .result_label
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

unsafe fn read_classifier(meta: &NvDsClassifierMeta) -> ClassifierResult {
    let labels = list_items::<NvDsLabelInfo>(meta.label_info_list)
        .into_iter()
        .map(|info| {
            let info = &*info;
            LabelResult::new(label_text(info), info.result_prob)
        })
        .collect();
    ClassifierResult {
        component_id: meta.unique_component_id,
        labels,
    }
}

unsafe fn read_object(meta: &NvDsObjectMeta) -> ObjectResult {
    ObjectResult {
        object_id: meta.object_id,
        class_id: meta.class_id,
        confidence: meta.confidence,
        classifiers: list_items::<NvDsClassifierMeta>(meta.classifier_meta_list)
            .into_iter()
            .map(|c| read_classifier(&*c))
            .collect(),
    }
}

unsafe fn read_frame(meta: &NvDsFrameMeta) -> FrameResult {
    FrameResult {
        frame_num: meta.frame_num,
        objects: list_items::<NvDsObjectMeta>(meta.obj_meta_list)
            .into_iter()
            .map(|o| read_object(&*o))
            .collect(),
    }
}

/// Copies the buffer's batch metadata into owned values; `None` without metadata.
pub fn read_batch_meta(buffer: &gst::BufferRef) -> Option<BatchMeta> {
    let raw = buffer.as_ptr() as *mut gst::ffi::GstBuffer;
    // SAFETY: the buffer is alive for the probe call and DeepStream owns the
    // metadata; every pointer is checked for null and only read.
    unsafe {
        let batch = gst_buffer_get_nvds_batch_meta(raw);
        if batch.is_null() {
            return None;
        }
        let frames = list_items::<NvDsFrameMeta>((*batch).frame_meta_list)
            .into_iter()
            .map(|f| read_frame(&*f))
            .collect();
        Some(BatchMeta { frames })
    }
}

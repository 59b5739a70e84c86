//! 批次元数据 - 推理结果树与遍历

use crate::core::error::LprError;
use crate::core::framework::MetaBuffer;

#[derive(Debug, Clone, PartialEq)]
pub struct LabelResult {
    pub text: String,
    pub confidence: f32,
}

impl LabelResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierResult {
    pub component_id: i32,
    pub labels: Vec<LabelResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectResult {
    pub object_id: u64,
    pub class_id: i32,
    pub confidence: f32,
    pub classifiers: Vec<ClassifierResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResult {
    pub frame_num: i32,
    pub objects: Vec<ObjectResult>,
}

/// Typed view of the batch metadata attached to a buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchMeta {
    pub frames: Vec<FrameResult>,
}

impl BatchMeta {
    /// Depth-first, left-to-right over frame → object → classifier → label.
    pub fn labels(&self) -> impl Iterator<Item = &LabelResult> {
        self.frames
            .iter()
            .flat_map(|frame| frame.objects.iter())
            .flat_map(|object| object.classifiers.iter())
            .flat_map(|classifier| classifier.labels.iter())
    }
}

pub struct MetadataWalker;

impl MetadataWalker {
    pub fn extract<B>(buffer: &B) -> Result<Vec<LabelResult>, LprError>
    where
        B: MetaBuffer + ?Sized,
    {
        let batch = buffer.batch_meta().ok_or(LprError::MissingBatchMetadata)?;
        Ok(batch.labels().cloned().collect())
    }
}

impl MetaBuffer for BatchMeta {
    fn batch_meta(&self) -> Option<BatchMeta> {
        Some(self.clone())
    }
}

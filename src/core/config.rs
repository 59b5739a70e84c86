use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::error::LprError;
use crate::core::persister::DEFAULT_CONFIDENCE_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStrategy {
    /// Fresh graph per item.
    #[default]
    RebuildPerItem,
    /// One graph for the whole batch, relinked after each teardown.
    Reuse,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    /// Maximum wait for batch assembly, microseconds.
    pub batched_push_timeout_us: u32,
    pub live_source: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 320,
            batch_size: 1,
            batched_push_timeout_us: 4_000_000,
            live_source: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceRole {
    pub name: String,
    pub config_path: PathBuf,
}

impl InferenceRole {
    pub fn new(name: &str, config_path: &str) -> Self {
        Self {
            name: name.to_string(),
            config_path: PathBuf::from(config_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub output_dir: PathBuf,
    pub jpeg_quality: u32,
    /// Optional caps forced before the encoder, e.g. `video/x-raw, format=I420`.
    pub caps: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("rendered"),
            jpeg_quality: 85,
            caps: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub confidence_threshold: f32,
    pub run_timeout_secs: u64,
    pub inter_item_delay_ms: u64,
    pub strategy: GraphStrategy,
    pub mux: MuxConfig,
    /// Ordered upstream to downstream; the last role produces the plate text.
    pub inference: Vec<InferenceRole>,
    pub render: Option<RenderConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::plate_recognition()
    }
}

impl PipelineConfig {
    /// Single recognition stage, results read right after inference.
    pub fn plate_recognition() -> Self {
        Self {
            input_dir: PathBuf::from("plate_images"),
            output_dir: PathBuf::from("recognized_plates"),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            run_timeout_secs: 10,
            inter_item_delay_ms: 2000,
            strategy: GraphStrategy::RebuildPerItem,
            mux: MuxConfig::default(),
            inference: vec![InferenceRole::new("lpr-inference", "models/lpr_config.txt")],
            render: None,
        }
    }

    /// Recognition plus on-screen-display rendering of every item to JPEG.
    pub fn rendered() -> Self {
        Self {
            render: Some(RenderConfig::default()),
            ..Self::plate_recognition()
        }
    }

    /// Vehicle detection → plate detection → plate recognition, rendered.
    pub fn cascade() -> Self {
        Self {
            mux: MuxConfig {
                width: 1920,
                height: 1080,
                ..MuxConfig::default()
            },
            inference: vec![
                InferenceRole::new("primary-inference", "models/traffic_config.txt"),
                InferenceRole::new("secondary-inference", "models/lpd_config.txt"),
                InferenceRole::new("tertiary-inference", "models/lpr_config.txt"),
            ],
            render: Some(RenderConfig {
                caps: Some("video/x-raw, format=I420".to_string()),
                ..RenderConfig::default()
            }),
            ..Self::plate_recognition()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, LprError> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LprError> {
        if self.inference.is_empty() {
            return Err(LprError::Config("at least one inference role is required".into()));
        }
        if self.mux.batch_size != 1 {
            return Err(LprError::Config(format!(
                "batch_size must be 1 for single-image runs, got {}",
                self.mux.batch_size
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(LprError::Config(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.run_timeout_secs == 0 {
            return Err(LprError::Config("run_timeout_secs must be positive".into()));
        }
        if let Some(render) = &self.render {
            if render.jpeg_quality > 100 {
                return Err(LprError::Config(format!(
                    "jpeg_quality {} outside 0..=100",
                    render.jpeg_quality
                )));
            }
            if render.caps.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(LprError::Config("render caps must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let plain = PipelineConfig::plate_recognition();
        assert_eq!(plain.inference.len(), 1);
        assert!(plain.render.is_none());
        assert_eq!(plain.mux.batched_push_timeout_us, 4_000_000);

        let cascade = PipelineConfig::cascade();
        assert_eq!(cascade.inference.len(), 3);
        assert_eq!(cascade.mux.width, 1920);
        assert_eq!(
            cascade.render.as_ref().and_then(|r| r.caps.as_deref()),
            Some("video/x-raw, format=I420")
        );
        assert!(cascade.validate().is_ok());
    }

    #[test]
    fn test_parse_json5_with_defaults() {
        let text = r#"{
            // reuse one graph for the whole folder
            strategy: "reuse",
            run_timeout_secs: 30,
            inter_item_delay_ms: 1000,
            output_dir: "out",
        }"#;
        let config: PipelineConfig = json5::from_str(text).unwrap();
        assert_eq!(config.strategy, GraphStrategy::Reuse);
        assert_eq!(config.run_timeout(), Duration::from_secs(30));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.mux.height, 320);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.inference.clear();
        assert!(matches!(config.validate(), Err(LprError::Config(_))));

        let mut config = PipelineConfig::default();
        config.mux.batch_size = 4;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_render_settings() {
        let mut config = PipelineConfig::rendered();
        config.render.as_mut().unwrap().jpeg_quality = 100;
        assert!(config.validate().is_ok());

        config.render.as_mut().unwrap().jpeg_quality = 101;
        assert!(matches!(config.validate(), Err(LprError::Config(_))));

        let mut config = PipelineConfig::cascade();
        config.render.as_mut().unwrap().caps = Some("  ".to_string());
        assert!(config.validate().is_err());
    }
}

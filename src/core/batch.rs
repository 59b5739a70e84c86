//! 批处理驱动 - 输入目录枚举 + 逐张运行

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use image::ImageFormat;
use log::{info, warn};

use crate::core::error::LprError;
use crate::core::framework::Backend;
use crate::core::run_controller::{RunController, RunReport};

/// Regular JPEG/PNG files directly inside `dir`, sorted by path.
pub fn enumerate_inputs(dir: &Path) -> Result<Vec<PathBuf>, LprError> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match ImageFormat::from_path(&path) {
            Ok(ImageFormat::Jpeg) | Ok(ImageFormat::Png) => inputs.push(path),
            _ => {}
        }
    }
    inputs.sort();
    Ok(inputs)
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub saved: Vec<PathBuf>,
}

impl BatchSummary {
    fn record(&mut self, report: &RunReport) {
        self.processed += 1;
        if report.outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.saved.extend(report.saved.iter().cloned());
    }
}

pub struct BatchDriver<B: Backend> {
    controller: RunController<B>,
}

impl<B: Backend> BatchDriver<B> {
    pub fn new(controller: RunController<B>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &RunController<B> {
        &self.controller
    }

    pub fn run_dir(&mut self, dir: &Path) -> Result<BatchSummary, LprError> {
        let inputs = enumerate_inputs(dir)?;
        info!("📂 Found {} image(s) in {}", inputs.len(), dir.display());
        self.run_all(&inputs)
    }

    pub fn run_one(&mut self, input: &Path) -> Result<RunReport, LprError> {
        let report = self.controller.run(input)?;
        if let Some(e) = report.outcome.error() {
            warn!("⚠️ Skipping {}: {}", input.display(), e);
        }
        Ok(report)
    }

    /// Failed items are logged and skipped; construction errors abort the batch.
    pub fn run_all(&mut self, inputs: &[PathBuf]) -> Result<BatchSummary, LprError> {
        let mut summary = BatchSummary::default();
        let delay = self.controller.config().inter_item_delay();

        for (index, input) in inputs.iter().enumerate() {
            info!("🖼️ [{}/{}] {}", index + 1, inputs.len(), input.display());
            let report = self.run_one(input)?;
            summary.record(&report);

            if index + 1 < inputs.len() && !delay.is_zero() {
                thread::sleep(delay);
            }
        }

        info!(
            "📊 Batch done: {} processed, {} ok, {} failed, {} saved",
            summary.processed,
            summary.succeeded,
            summary.failed,
            summary.saved.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::mock::{MockBackend, MockScript};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        let mut config = PipelineConfig::plate_recognition();
        config.input_dir = dir.path().join("in");
        config.output_dir = dir.path().join("out");
        config.run_timeout_secs = 1;
        config.inter_item_delay_ms = 0;
        fs::create_dir_all(&config.input_dir).unwrap();
        fs::create_dir_all(&config.output_dir).unwrap();
        config
    }

    #[test]
    fn test_enumerate_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.PNG", "a.jpg", "c.jpeg", "notes.txt", "clip.mp4"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let found: Vec<String> = enumerate_inputs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["a.jpg", "b.PNG", "c.jpeg"]);
    }

    #[test]
    fn test_same_plate_twice_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let backend = MockBackend::new();
        for (name, conf) in [("car1.jpg", 0.92), ("car2.jpg", 0.93)] {
            let path = config.input_dir.join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            backend.script(&path, MockScript::plate("XYZ789", conf));
        }

        let mut driver = BatchDriver::new(RunController::new(backend, config.clone()));
        let summary = driver.run_dir(&config.input_dir).unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(
            summary.saved,
            vec![
                config.output_dir.join("XYZ789.jpg"),
                config.output_dir.join("XYZ789_1.jpg")
            ]
        );
        assert_eq!(fs::read(config.output_dir.join("XYZ789.jpg")).unwrap(), b"car1.jpg");
        assert_eq!(fs::read(config.output_dir.join("XYZ789_1.jpg")).unwrap(), b"car2.jpg");
    }

    #[test]
    fn test_item_without_video_fails_and_batch_continues() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let backend = MockBackend::new();

        let broken = config.input_dir.join("a_audio_only.png");
        fs::write(&broken, b"x").unwrap();
        backend.script(
            &broken,
            MockScript::plate("GHOST1", 0.99).with_pads(&["audio/x-raw"]),
        );
        let good = config.input_dir.join("b_car.jpg");
        fs::write(&good, b"y").unwrap();
        backend.script(&good, MockScript::plate("GOOD42", 0.7));

        let mut driver = BatchDriver::new(RunController::new(backend, config.clone()));
        let summary = driver.run_dir(&config.input_dir).unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.saved, vec![config.output_dir.join("GOOD42.jpg")]);
        assert!(!config.output_dir.join("GHOST1.png").exists());
    }

    #[test]
    fn test_construction_error_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fs::write(config.input_dir.join("car.jpg"), b"x").unwrap();
        let backend = MockBackend::new();
        backend.fail_factory("nvstreammux");

        let mut driver = BatchDriver::new(RunController::new(backend, config.clone()));
        let err = driver.run_dir(&config.input_dir).unwrap_err();
        assert!(matches!(err, LprError::StageCreation { .. }));
    }
}

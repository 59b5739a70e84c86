//! 车牌识别器

use std::fs;
use std::path::Path;

use log::info;

use crate::core::batch::{BatchDriver, BatchSummary};
use crate::core::config::PipelineConfig;
use crate::core::error::LprError;
use crate::core::framework::Backend;
use crate::core::run_controller::{RunController, RunReport};

/// 累计统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizerStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub saved: usize,
}

/// 车牌识别器 - 目录批处理 + 结果落盘
///
/// ```ignore
/// let mut recognizer = PlateRecognizer::create(backend, PipelineConfig::default())?;
/// let summary = recognizer.process_dir(Path::new("plate_images"))?;
/// let stats = recognizer.stats();
/// ```
pub struct PlateRecognizer<B: Backend> {
    driver: BatchDriver<B>,
    stats: RecognizerStats,
}

impl<B: Backend> PlateRecognizer<B> {
    /// 校验配置、创建输出目录并预先搭建图
    pub fn create(backend: B, config: PipelineConfig) -> Result<Self, LprError> {
        crate::init_logging();
        config.validate()?;
        fs::create_dir_all(&config.output_dir)?;
        if let Some(render) = &config.render {
            fs::create_dir_all(&render.output_dir)?;
        }

        let mut controller = RunController::new(backend, config);
        controller.prepare()?;
        info!("🚗 PlateRecognizer: created");
        Ok(Self {
            driver: BatchDriver::new(controller),
            stats: RecognizerStats::default(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        self.driver.controller().config()
    }

    /// 处理目录下全部图片
    pub fn process_dir(&mut self, dir: &Path) -> Result<BatchSummary, LprError> {
        let summary = self.driver.run_dir(dir)?;
        self.stats.processed += summary.processed;
        self.stats.succeeded += summary.succeeded;
        self.stats.failed += summary.failed;
        self.stats.saved += summary.saved.len();
        Ok(summary)
    }

    /// 处理单张图片
    pub fn process_file(&mut self, path: &Path) -> Result<RunReport, LprError> {
        let report = self.driver.run_one(path)?;
        self.stats.processed += 1;
        if report.outcome.is_success() {
            self.stats.succeeded += 1;
        } else {
            self.stats.failed += 1;
        }
        self.stats.saved += report.saved.len();
        Ok(report)
    }

    pub fn stats(&self) -> RecognizerStats {
        self.stats.clone()
    }
}

impl<B: Backend> Drop for PlateRecognizer<B> {
    fn drop(&mut self) {
        info!("🗑️ PlateRecognizer: released");
    }
}

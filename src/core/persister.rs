//! 结果门控 - 置信度过滤 + 文件名去冲突 + 复制原图

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use crate::core::error::LprError;
use crate::core::metadata::LabelResult;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Rejected { confidence: f32 },
    Saved(PathBuf),
    Failed,
}

pub struct ResultGate {
    output_dir: PathBuf,
    threshold: f32,
}

impl ResultGate {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_threshold(output_dir, DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn with_threshold(output_dir: impl Into<PathBuf>, threshold: f32) -> Self {
        Self {
            output_dir: output_dir.into(),
            threshold,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn consider(&self, label: &LabelResult, source: &Path) -> GateDecision {
        if label.confidence.is_nan() || label.confidence < self.threshold {
            debug!(
                "Rejected '{}' (confidence {:.2} < {:.2})",
                label.text, label.confidence, self.threshold
            );
            return GateDecision::Rejected {
                confidence: label.confidence,
            };
        }

        let target = resolve_target(&self.output_dir, &sanitize_label(&label.text), source);
        match copy_preserving(source, &target) {
            Ok(()) => {
                info!(
                    "💾 Saved image as: {} (confidence: {:.2})",
                    target.file_name().unwrap_or_default().to_string_lossy(),
                    label.confidence
                );
                GateDecision::Saved(target)
            }
            Err(e) => {
                error!("❌ {}", e);
                GateDecision::Failed
            }
        }
    }
}

/// Trims surrounding whitespace and replaces spaces with underscores.
pub fn sanitize_label(text: &str) -> String {
    text.trim().replace(' ', "_")
}

/// First free `<stem><ext>`, then `<stem>_1<ext>`, `<stem>_2<ext>`, ...
pub fn resolve_target(output_dir: &Path, stem: &str, source: &Path) -> PathBuf {
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = output_dir.join(format!("{}{}", stem, ext));
    let mut counter: u64 = 1;
    while candidate.exists() {
        candidate = output_dir.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }
    candidate
}

fn copy_preserving(source: &Path, target: &Path) -> Result<(), LprError> {
    let persist_err = |source: std::io::Error| LprError::Persistence {
        path: target.to_path_buf(),
        source,
    };

    fs::copy(source, target).map_err(persist_err)?;

    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(persist_err)?;
    File::options()
        .write(true)
        .open(target)
        .and_then(|f| f.set_modified(modified))
        .map_err(persist_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.jpg");
        fs::write(&source, b"jpeg-bytes").unwrap();
        let out = dir.path().join("recognized_plates");
        fs::create_dir(&out).unwrap();
        (dir, source, out)
    }

    #[test]
    fn test_threshold_boundary() {
        let (_dir, source, out) = setup();
        let gate = ResultGate::new(&out);

        let at = gate.consider(&LabelResult::new("AT50", 0.5), &source);
        assert_eq!(at, GateDecision::Saved(out.join("AT50.jpg")));

        let below = gate.consider(&LabelResult::new("BELOW", 0.49999), &source);
        assert!(matches!(below, GateDecision::Rejected { .. }));
        assert!(!out.join("BELOW.jpg").exists());
    }

    #[test]
    fn test_nan_confidence_rejected() {
        let (_dir, source, out) = setup();
        let gate = ResultGate::new(&out);

        let decision = gate.consider(&LabelResult::new("NAN1", f32::NAN), &source);
        assert!(matches!(decision, GateDecision::Rejected { .. }));
        assert!(!out.join("NAN1.jpg").exists());
    }

    #[test]
    fn test_sanitize_replaces_spaces() {
        assert_eq!(sanitize_label("  KA 01 AB 1234 "), "KA_01_AB_1234");
        assert_eq!(sanitize_label("   "), "");

        let (_dir, source, out) = setup();
        let gate = ResultGate::new(&out);
        match gate.consider(&LabelResult::new(" MH 12 ", 0.8), &source) {
            GateDecision::Saved(path) => {
                let name = path.file_name().unwrap().to_string_lossy().to_string();
                assert_eq!(name, "MH_12.jpg");
                assert!(!name.contains(' '));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_collision_suffixes() {
        let (_dir, source, out) = setup();
        fs::write(out.join("ABC123.jpg"), b"existing").unwrap();
        let gate = ResultGate::new(&out);

        let second = gate.consider(&LabelResult::new("ABC123", 0.9), &source);
        assert_eq!(second, GateDecision::Saved(out.join("ABC123_1.jpg")));

        let third = gate.consider(&LabelResult::new("ABC123", 0.9), &source);
        assert_eq!(third, GateDecision::Saved(out.join("ABC123_2.jpg")));

        assert_eq!(fs::read(out.join("ABC123_2.jpg")).unwrap(), b"jpeg-bytes");
    }

    #[test]
    fn test_blank_labels_collide_like_any_other() {
        let (_dir, source, out) = setup();
        let gate = ResultGate::new(&out);

        let first = gate.consider(&LabelResult::new("   ", 0.9), &source);
        assert_eq!(first, GateDecision::Saved(out.join(".jpg")));

        let second = gate.consider(&LabelResult::new("", 0.9), &source);
        assert_eq!(second, GateDecision::Saved(out.join("_1.jpg")));
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let (_dir, source, out) = setup();
        let gate = ResultGate::new(&out);
        let saved = match gate.consider(&LabelResult::new("T1", 0.7), &source) {
            GateDecision::Saved(path) => path,
            other => panic!("unexpected decision: {:?}", other),
        };
        let src_mtime = fs::metadata(&source).unwrap().modified().unwrap();
        let dst_mtime = fs::metadata(&saved).unwrap().modified().unwrap();
        assert_eq!(src_mtime, dst_mtime);
    }

    #[test]
    fn test_copy_failure_is_contained() {
        let (_dir, source, out) = setup();
        let gate = ResultGate::new(out.join("missing-subdir"));
        let decision = gate.consider(&LabelResult::new("LOST", 0.9), &source);
        assert_eq!(decision, GateDecision::Failed);
    }

    #[test]
    fn test_source_without_extension() {
        let dir = TempDir::new().unwrap();
        let target = resolve_target(dir.path(), "NOEXT", Path::new("/tmp/plate"));
        assert_eq!(target, dir.path().join("NOEXT"));
    }
}

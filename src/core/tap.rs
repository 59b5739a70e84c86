//! 推理结果探针 - 在流线程上提取车牌并落盘

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, warn};

use crate::core::framework::{MetaBuffer, ProbeReturn};
use crate::core::metadata::MetadataWalker;
use crate::core::persister::{GateDecision, ResultGate};

struct ActiveItem {
    source: PathBuf,
    saved: Vec<PathBuf>,
}

/// Shared between the run controller and the buffer probe.
///
/// The controller installs the current item before starting the graph and
/// takes it back after teardown; buffers seen outside a run are ignored.
pub struct ResultTap {
    gate: ResultGate,
    mode: ProbeReturn,
    active: Mutex<Option<ActiveItem>>,
    buffers_seen: AtomicU64,
    missing_meta: AtomicU64,
}

impl ResultTap {
    pub fn new(gate: ResultGate, mode: ProbeReturn) -> Self {
        Self {
            gate,
            mode,
            active: Mutex::new(None),
            buffers_seen: AtomicU64::new(0),
            missing_meta: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ProbeReturn {
        self.mode
    }

    pub fn begin(&self, source: PathBuf) {
        let mut active = match self.active.lock() {
            Ok(a) => a,
            Err(poisoned) => poisoned.into_inner(),
        };
        *active = Some(ActiveItem {
            source,
            saved: Vec::new(),
        });
    }

    /// Files written for the item, in write order.
    pub fn finish(&self) -> Vec<PathBuf> {
        let mut active = match self.active.lock() {
            Ok(a) => a,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.take().map(|item| item.saved).unwrap_or_default()
    }

    pub fn on_buffer<B>(&self, buffer: &B) -> ProbeReturn
    where
        B: MetaBuffer + ?Sized,
    {
        self.buffers_seen.fetch_add(1, Ordering::Relaxed);

        let labels = match MetadataWalker::extract(buffer) {
            Ok(labels) => labels,
            Err(e) => {
                self.missing_meta.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Buffer probe: {}", e);
                return self.mode;
            }
        };

        let mut active = match self.active.lock() {
            Ok(a) => a,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(item) = active.as_mut() else {
            debug!("Buffer outside of a run, {} labels ignored", labels.len());
            return self.mode;
        };

        for label in &labels {
            if let GateDecision::Saved(path) = self.gate.consider(label, &item.source) {
                item.saved.push(path);
            }
        }
        self.mode
    }

    pub fn buffers_seen(&self) -> u64 {
        self.buffers_seen.load(Ordering::Relaxed)
    }

    pub fn missing_meta(&self) -> u64 {
        self.missing_meta.load(Ordering::Relaxed)
    }
}

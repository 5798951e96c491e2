use std::sync::{Arc, RwLock};

use detection_core::{Progress, RunStatus};

/// Process-wide progress record shared between the running pipeline and any
/// polling reader. The pipeline is the only writer; the record is overwritten
/// wholesale when a run starts.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<Progress>>,
}

impl ProgressTracker {
    pub fn snapshot(&self) -> Progress {
        self.inner.read().expect("progress lock poisoned").clone()
    }

    pub(crate) fn start(&self) {
        let mut progress = self.inner.write().expect("progress lock poisoned");
        *progress = Progress {
            status: RunStatus::Running,
            progress: 0,
            error: None,
        };
    }

    pub(crate) fn set_percent(&self, percent: u8) {
        let mut progress = self.inner.write().expect("progress lock poisoned");
        progress.progress = percent.min(100);
    }

    pub(crate) fn finish(&self) {
        let mut progress = self.inner.write().expect("progress lock poisoned");
        progress.status = RunStatus::Done;
        progress.progress = 100;
    }

    pub(crate) fn fail(&self, message: &str) {
        let mut progress = self.inner.write().expect("progress lock poisoned");
        progress.status = RunStatus::Error;
        progress.error = Some(message.to_string());
    }
}

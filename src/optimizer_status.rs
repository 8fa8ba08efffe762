use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total_trials: usize,
    completed_trials: usize,
    pruned_trials: usize,
    failed_trials: usize,
    best_value: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total_trials: usize,
    pub completed_trials: usize,
    pub pruned_trials: usize,
    pub failed_trials: usize,
    pub best_value: Option<f64>,
}

impl OptimizerStatusSnapshot {
    pub fn finished_trials(&self) -> usize {
        self.completed_trials + self.pruned_trials + self.failed_trials
    }
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_total(&self, total_trials: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_trials = total_trials;
        }
    }

    pub fn set_progress(
        &self,
        completed_trials: usize,
        pruned_trials: usize,
        failed_trials: usize,
        best_value: Option<f64>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.completed_trials = completed_trials;
            data.pruned_trials = pruned_trials;
            data.failed_trials = failed_trials;
            data.best_value = best_value;
        }
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total_trials: data.total_trials,
                completed_trials: data.completed_trials,
                pruned_trials: data.pruned_trials,
                failed_trials: data.failed_trials,
                best_value: data.best_value,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_trials: 0,
                completed_trials: 0,
                pruned_trials: 0,
                failed_trials: 0,
                best_value: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates_from_clones() {
        let status = OptimizerStatus::new();
        assert_eq!(status.snapshot().phase, "Initializing");

        let writer = status.clone();
        writer.set_phase("Sampling");
        writer.set_total(20);
        writer.set_progress(5, 2, 1, Some(14.2));

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, "Sampling");
        assert_eq!(snapshot.total_trials, 20);
        assert_eq!(snapshot.finished_trials(), 8);
        assert_eq!(snapshot.best_value, Some(14.2));
    }
}

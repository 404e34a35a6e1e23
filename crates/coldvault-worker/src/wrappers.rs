//! Per-item carriers used between pipeline stages.

use std::time::{Duration, Instant};

/// An item tagged with an integer priority. The priority is a label for
/// logging and admission bookkeeping only; nothing orders by it.
#[derive(Debug)]
pub struct PriorityWrapper<T> {
    pub item: T,
    pub priority: i32,
}

impl<T> PriorityWrapper<T> {
    pub fn new(item: T, priority: i32) -> Self {
        Self { item, priority }
    }
}

/// Carries an item and its outcome through pipeline stages without
/// throwing, so one item's failure reaches the terminal writer instead of
/// cancelling the surrounding run.
#[derive(Debug)]
pub struct StageResult<T> {
    pub item: T,
    pub error: Option<anyhow::Error>,
    pub started_at: Instant,
}

impl<T> StageResult<T> {
    pub fn ok(item: T, started_at: Instant) -> Self {
        Self {
            item,
            error: None,
            started_at,
        }
    }

    pub fn failed(item: T, error: anyhow::Error, started_at: Instant) -> Self {
        Self {
            item,
            error: Some(error),
            started_at,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_result_tracks_outcome() {
        let started = Instant::now();
        let ok = StageResult::ok(1u32, started);
        assert!(ok.is_ok());

        let failed = StageResult::failed(2u32, anyhow::anyhow!("boom"), started);
        assert!(!failed.is_ok());
        assert_eq!(failed.item, 2);
    }
}

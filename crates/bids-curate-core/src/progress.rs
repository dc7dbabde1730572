/// Trait for reporting progress of long passes over the dataset.
///
/// CLI implements with indicatif; tests and embedded callers use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_index_start(&self) {}
    fn on_index_progress(&self, _scans_found: usize, _current_path: &str) {}
    fn on_index_complete(&self, _total_scans: usize, _malformed: usize, _duration_secs: f64) {}
    fn on_grouping_complete(&self, _key_groups: usize, _param_groups: usize, _duration_secs: f64) {}
    fn on_apply_start(&self, _planned_moves: usize) {}
    fn on_apply_progress(&self, _moves_done: usize, _total_moves: usize) {}
    fn on_apply_complete(&self, _completed: usize, _failed: bool, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

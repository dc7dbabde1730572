use bids_curate_core::ProgressReporter;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Index phase: spinner (scan count unknown upfront)
/// - Apply phase: progress bar over the planned moves
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_chars(TICKS));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn done(message: String) {
    eprintln!("  {} {}", "✓".green(), message);
}

impl ProgressReporter for CliReporter {
    fn on_index_start(&self) {
        self.set_bar(spinner("Indexing scans..."));
    }

    fn on_index_progress(&self, scans_found: usize, _current_path: &str) {
        self.with_bar(|pb| pb.set_message(format!("Indexing... {} scans found", scans_found)));
    }

    fn on_index_complete(&self, total_scans: usize, malformed: usize, duration_secs: f64) {
        self.finish_bar();
        let malformed = if malformed > 0 {
            format!(", {} malformed", malformed).yellow().to_string()
        } else {
            String::new()
        };
        done(format!(
            "Index complete: {} scans{} in {:.2}s",
            total_scans, malformed, duration_secs
        ));
    }

    fn on_grouping_complete(&self, key_groups: usize, param_groups: usize, duration_secs: f64) {
        done(format!(
            "Grouping complete: {} key groups, {} parameter groups in {:.2}s",
            key_groups, param_groups, duration_secs
        ));
    }

    fn on_apply_start(&self, planned_moves: usize) {
        let pb = ProgressBar::new(planned_moves as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Applying [{bar:30.cyan/dim}] {pos}/{len} moves",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICKS));
        }
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_apply_progress(&self, moves_done: usize, total_moves: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total_moves as u64) {
                pb.set_length(total_moves as u64);
            }
            pb.set_position(moves_done as u64);
        });
    }

    fn on_apply_complete(&self, completed: usize, failed: bool, duration_secs: f64) {
        self.finish_bar();
        if failed {
            eprintln!(
                "  {} Apply stopped after {} moves in {:.2}s",
                "✗".red(),
                completed,
                duration_secs
            );
        } else {
            done(format!("Apply complete: {} moves in {:.2}s", completed, duration_secs));
        }
    }
}

//! Progress reporting for bulk imports.
//!
//! The CLI shows an `indicatif` bar through [`BarProgress`]; library callers
//! pass [`NoopProgress`] or their own implementation.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::types::{CodeSmellBatch, InsertReport};

pub trait ImportProgress: Send + Sync {
    /// The import is about to insert `total` batches.
    fn start(&self, total: u64);

    /// One batch was committed.
    fn inserted(&self, batch: &CodeSmellBatch, report: &InsertReport);

    fn finish(&self);
}

#[derive(Debug, Default)]
pub struct NoopProgress;

impl ImportProgress for NoopProgress {
    fn start(&self, _total: u64) {}
    fn inserted(&self, _batch: &CodeSmellBatch, _report: &InsertReport) {}
    fn finish(&self) {}
}

/// Progress bar on stderr, one tick per batch.
#[derive(Debug)]
pub struct BarProgress {
    bar: ProgressBar,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::new(0),
        }
    }

    /// A bar that draws nowhere.
    pub fn hidden() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_draw_target(ProgressDrawTarget::hidden());
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ImportProgress for BarProgress {
    fn start(&self, total: u64) {
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg:<24} [{bar:30.cyan/blue}] {pos}/{len} batches",
        )
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=> "));
        self.bar.set_style(style);
        self.bar.set_length(total);
        self.bar.reset();
    }

    fn inserted(&self, batch: &CodeSmellBatch, report: &InsertReport) {
        let short = batch.commit_id.get(..12).unwrap_or(&batch.commit_id);
        self.bar
            .set_message(format!("{}@{short} +{}", batch.repository, report.occurrence_ids.len()));
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

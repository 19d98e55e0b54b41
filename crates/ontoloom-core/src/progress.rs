//! Progress and ETA reporting for long list-processing runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::traits::StatusSink;

/// Render a remaining-time estimate in the largest sensible unit.
pub fn eta_rounded(eta_secs: f64) -> String {
    if eta_secs < 60.0 {
        format!("{:.1} secs", eta_secs)
    } else if eta_secs < 3600.0 {
        format!("{:.1} mins", eta_secs / 60.0)
    } else if eta_secs < 86400.0 {
        format!("{:.1} hours", eta_secs / 3600.0)
    } else {
        format!("{:.1} days", eta_secs / 86400.0)
    }
}

/// Reports progress through a list of known length.
///
/// Two estimates are given: one from the pace since the previous report and
/// one from the pace since the start. Skipped items are excluded from both
/// paces, since skipping is much faster than processing.
pub struct ListProgressReporter {
    name: String,
    list_len: usize,
    report_increment: usize,
    started: Instant,
    last_report: Duration,
    skip_count: usize,
    last_skip_count: usize,
    sink: Arc<dyn StatusSink>,
}

impl ListProgressReporter {
    pub fn new(name: impl Into<String>, list_len: usize, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            name: name.into(),
            list_len,
            report_increment: crate::defaults::PROGRESS_REPORT_INCREMENT,
            started: Instant::now(),
            last_report: Duration::ZERO,
            skip_count: 0,
            last_skip_count: 0,
            sink,
        }
    }

    pub fn with_report_increment(mut self, increment: usize) -> Self {
        self.report_increment = increment.max(1);
        self
    }

    pub fn record_skip(&mut self) {
        self.skip_count += 1;
    }

    pub fn skip_count(&self) -> usize {
        self.skip_count
    }

    /// Report progress at item `counter` (0-based index of the next item).
    pub fn report_progress(&mut self, counter: usize) {
        let elapsed = self.started.elapsed();
        if let Some(msg) = self.progress_message(counter, elapsed) {
            self.sink.emit_status(&msg);
        }
    }

    pub fn report_completion(&self) {
        self.sink.emit_status("Completed processing of list.");
        tracing::info!(
            subsystem = "core",
            component = "progress",
            list = %self.name,
            item_count = self.list_len,
            skip_count = self.skip_count,
            duration_ms = self.started.elapsed().as_millis() as u64,
            "List processing complete"
        );
    }

    /// Build the report for `counter` given the total elapsed time.
    ///
    /// Returns `None` when `counter` is not on a report boundary.
    pub fn progress_message(&mut self, counter: usize, elapsed: Duration) -> Option<String> {
        if counter % self.report_increment != 0 {
            return None;
        }

        let eta = if counter > 0 {
            let remaining = self.list_len.saturating_sub(counter) as f64;
            let since_last = elapsed.saturating_sub(self.last_report).as_secs_f64();
            let skips_since_last = self.skip_count - self.last_skip_count;
            self.last_skip_count = self.skip_count;
            self.last_report = elapsed;

            let done_since_last = self.report_increment.saturating_sub(skips_since_last);
            let recent = if done_since_last > 0 {
                since_last / done_since_last as f64 * remaining
            } else {
                0.0
            };

            let done_since_start = counter.saturating_sub(self.skip_count);
            let overall = if done_since_start > 0 {
                elapsed.as_secs_f64() / done_since_start as f64 * remaining
            } else {
                0.0
            };
            format!(
                "{} (based on recent), {} (based on start)",
                eta_rounded(recent),
                eta_rounded(overall)
            )
        } else {
            "ETA: Unsure yet".to_string()
        };

        Some(format!(
            "\n-----\nLIST NAME: {}\nProcessed: {} of {}\nEstimated Time Remaining: {}\nSkipped: {} items so far.\n-----\n",
            self.name, counter, self.list_len, eta, self.skip_count
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureSink(Mutex<Vec<String>>);

    impl StatusSink for CaptureSink {
        fn emit_status(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_eta_rounded_units() {
        assert_eq!(eta_rounded(12.34), "12.3 secs");
        assert_eq!(eta_rounded(90.0), "1.5 mins");
        assert_eq!(eta_rounded(7200.0), "2.0 hours");
        assert_eq!(eta_rounded(172800.0), "2.0 days");
    }

    #[test]
    fn test_first_report_is_unsure() {
        let sink = Arc::new(CaptureSink::default());
        let mut r = ListProgressReporter::new("concepts", 10, sink);
        let msg = r.progress_message(0, Duration::ZERO).unwrap();
        assert!(msg.contains("LIST NAME: concepts"));
        assert!(msg.contains("Processed: 0 of 10"));
        assert!(msg.contains("ETA: Unsure yet"));
        assert!(msg.contains("Skipped: 0 items so far."));
    }

    #[test]
    fn test_eta_from_recent_and_start_pace() {
        let sink = Arc::new(CaptureSink::default());
        let mut r = ListProgressReporter::new("concepts", 10, sink).with_report_increment(2);
        r.progress_message(0, Duration::ZERO);
        // 2 items in 4 seconds -> 2 s/item, 8 remaining -> 16 s.
        let msg = r.progress_message(2, Duration::from_secs(4)).unwrap();
        assert!(msg.contains("16.0 secs (based on recent), 16.0 secs (based on start)"));
    }

    #[test]
    fn test_skips_excluded_from_pace() {
        let sink = Arc::new(CaptureSink::default());
        let mut r = ListProgressReporter::new("concepts", 4, sink).with_report_increment(2);
        r.record_skip();
        // 1 real item in 3 seconds, 2 remaining -> 6 s.
        let msg = r.progress_message(2, Duration::from_secs(3)).unwrap();
        assert!(msg.contains("6.0 secs (based on recent)"));
        assert!(msg.contains("Skipped: 1 items so far."));
    }

    #[test]
    fn test_off_boundary_counter_is_silent() {
        let sink = Arc::new(CaptureSink::default());
        let mut r = ListProgressReporter::new("concepts", 10, sink).with_report_increment(5);
        assert!(r.progress_message(3, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_report_progress_emits_to_sink() {
        let sink = Arc::new(CaptureSink::default());
        let mut r = ListProgressReporter::new("concepts", 3, sink.clone());
        r.report_progress(0);
        r.report_completion();
        let msgs = sink.0.lock().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], "Completed processing of list.");
    }
}

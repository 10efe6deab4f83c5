//! Progress reporting for the harvester
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::harvest::{HarvestReport, RegisterOutcome, WorkerStats};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Point-in-time view of the worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HarvestProgress {
    pub records: u64,
    pub bytes: u64,
    pub faults: u64,
    pub not_found: u64,
    pub elapsed: Duration,
}

impl HarvestProgress {
    pub fn from_stats(stats: &WorkerStats, elapsed: Duration) -> Self {
        Self {
            records: stats.harvested.load(Ordering::Relaxed),
            bytes: stats.bytes.load(Ordering::Relaxed),
            faults: stats.faults.load(Ordering::Relaxed),
            not_found: stats.not_found.load(Ordering::Relaxed),
            elapsed,
        }
    }

    /// Records written per second
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records as f64 / secs
        } else {
            0.0
        }
    }
}

/// Progress reporter that displays harvest status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &HarvestProgress) {
        let msg = format!(
            "Records: {} | Size: {} | Rate: {:.0}/s | Faults: {} | Not found: {}",
            format_number(progress.records),
            format_size(progress.bytes, BINARY),
            progress.records_per_second(),
            format_number(progress.faults),
            format_number(progress.not_found),
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the harvest
pub fn print_summary(report: &HarvestReport, output_dir: &str) {
    let totals = report.totals();
    let duration_secs = report.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        totals.records as f64 / duration_secs
    } else {
        0.0
    };

    let title = if report.any_failed() {
        style("Harvest Finished With Failures").red().bold()
    } else if report.interrupted() {
        style("Harvest Interrupted").yellow().bold()
    } else {
        style("Harvest Complete").green().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    for register in &report.registers {
        let outcome = match &register.outcome {
            RegisterOutcome::Completed => style("done".to_string()).green(),
            RegisterOutcome::Interrupted => style("interrupted".to_string()).yellow(),
            RegisterOutcome::Failed(reason) => style(format!("failed: {}", reason)).red(),
        };
        println!(
            "  {} {} of {} ({})",
            style(format!("{}:", register.register)).bold(),
            format_number(register.totals.records),
            format_number(register.index_len as u64),
            outcome
        );
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Records:").bold(), format_number(totals.records));
    println!("  {} {}", style("Shards:").bold(), format_number(totals.shards));
    println!("  {} {}", style("Total Size:").bold(), format_size(totals.bytes, BINARY));
    println!(
        "  {} {:.1}s ({:.0} records/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if totals.faults > 0 {
        println!("  {} {}", style("Faults:").yellow().bold(), format_number(totals.faults));
    }
    if totals.not_found > 0 {
        println!(
            "  {} {}",
            style("Not found:").yellow().bold(),
            format_number(totals.not_found)
        );
    }
    println!("  {} {}", style("Output:").bold(), output_dir);
    println!();
}

/// Print a header at the start of the harvest
pub fn print_header(source: &str, workers: usize, format: &str, output: &str) {
    println!();
    println!(
        "{} {}",
        style("gazetteer-harvester").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Format:").bold(), format);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_progress_rate() {
        let stats = WorkerStats::default();
        stats.harvested.store(500, Ordering::Relaxed);
        let progress = HarvestProgress::from_stats(&stats, Duration::from_secs(2));
        assert_eq!(progress.records_per_second(), 250.0);
        assert_eq!(HarvestProgress::default().records_per_second(), 0.0);
    }
}

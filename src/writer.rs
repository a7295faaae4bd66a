//! Resilient append-mode CSV writing.
//!
//! Several pipeline instances may append to the same output file across
//! separate runs, so opening is retried with randomized backoff and the
//! header decision is made against the actual file size at open time, never
//! an in-process flag. Two processes racing on a still-empty file can both
//! see size zero and both write a header; that race is accepted and
//! documented upstream, not solved here.

use std::fs::OpenOptions;
use std::path::Path;
use std::thread;
use std::time::Duration;

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use crate::error::PipelineError;

/// Number of tries to open a CSV file before giving up.
pub const MAX_CSV_FILE_OPEN_TRIES: u32 = 10;

/// Maximum number of seconds a single wait for file open can take.
pub const MAX_FILE_OPEN_SLEEP_SEC: f64 = 30.0;

/// Randomized backoff schedule for file-open retries.
///
/// Constructed once per run. Production code seeds from OS entropy with a
/// clock-based fallback; tests inject a fixed seed for determinism.
pub struct BackoffPolicy {
    rng: StdRng,
}

impl BackoffPolicy {
    /// Seed from the system entropy source, falling back to the wall clock
    /// when the OS RNG is unavailable.
    #[must_use]
    pub fn from_entropy() -> Self {
        let rng = StdRng::from_rng(OsRng).unwrap_or_else(|_| {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.subsec_nanos());
            StdRng::seed_from_u64(u64::from(nanos))
        });
        Self { rng }
    }

    /// Deterministic policy for tests.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seconds to wait before the next open attempt.
    ///
    /// `None` (the first backoff) is always exactly one second. Later values
    /// derive from the previous one scaled by a random multiplier, truncated
    /// to tenths; anything past [`MAX_FILE_OPEN_SLEEP_SEC`] is replaced with
    /// a fresh small value of at least 0.1 s. The sequence is not
    /// monotonic and never exceeds the ceiling.
    pub fn open_backoff(&mut self, prev: Option<f64>) -> f64 {
        let Some(prev) = prev else {
            return 1.0;
        };

        let multiplier: f64 = self.rng.gen();
        let sleep = (prev * multiplier * 100.0).trunc() / 10.0;
        if sleep > MAX_FILE_OPEN_SLEEP_SEC {
            ((multiplier * 100.0).trunc() / 10.0).max(0.1)
        } else {
            sleep
        }
    }
}

/// Append one row to a shared CSV file, writing the header first when the
/// file is empty.
///
/// Returns `Ok(false)` without side effects when `path` or `row` is empty,
/// or when the file could not be opened within
/// [`MAX_CSV_FILE_OPEN_TRIES`] attempts; both are logged as errors. The
/// header is skipped when `header` is empty.
///
/// # Errors
/// A write failure after a successful open is propagated to the caller; the
/// file handle is closed on every exit path. Fatal for this record, not the
/// run.
pub fn write_row(
    path: &Path,
    header: &[String],
    row: &[String],
    policy: &mut BackoffPolicy,
) -> Result<bool, PipelineError> {
    if path.as_os_str().is_empty() || row.is_empty() {
        error!("Empty parameter passed to write_row");
        return Ok(false);
    }

    let mut file = None;
    let mut backoff_secs = None;
    for tries in 0..MAX_CSV_FILE_OPEN_TRIES {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => {
                file = Some(f);
                break;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Exception caught while trying to open CSV file");
            }
        }

        // Back off and try again, unless this was the last attempt
        if tries < MAX_CSV_FILE_OPEN_TRIES - 1 {
            let secs = policy.open_backoff(backoff_secs);
            backoff_secs = Some(secs);
            info!(seconds = secs, "Sleeping before trying to open CSV file again");
            thread::sleep(Duration::from_secs_f64(secs));
        }
    }

    let Some(file) = file else {
        error!(path = %path.display(), "Unable to open CSV file for writing");
        return Ok(false);
    };

    // Size is checked against the real file, not an in-memory flag, so the
    // header stays correct across separate pipeline instances.
    let needs_header = !header.is_empty() && file.metadata()?.len() == 0;

    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if needs_header {
        csv_writer.write_record(header)?;
    }
    csv_writer.write_record(row)?;
    csv_writer.flush()?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_first_backoff_is_one_second() {
        let mut policy = BackoffPolicy::with_seed(42);
        assert!((policy.open_backoff(None) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_backoff_never_exceeds_ceiling() {
        let mut policy = BackoffPolicy::with_seed(7);
        let mut prev = policy.open_backoff(None);
        for _ in 0..1000 {
            let next = policy.open_backoff(Some(prev));
            assert!(next <= MAX_FILE_OPEN_SLEEP_SEC, "backoff {next} over ceiling");
            assert!(next >= 0.0);
            prev = next.max(0.1);
        }
    }

    #[test]
    fn test_backoff_large_previous_is_replaced_with_small_value() {
        let mut policy = BackoffPolicy::with_seed(3);
        for _ in 0..100 {
            let next = policy.open_backoff(Some(10_000.0));
            assert!((0.1..=MAX_FILE_OPEN_SLEEP_SEC).contains(&next), "backoff {next}");
        }
    }

    #[test]
    fn test_empty_parameters_fail_fast() {
        let mut policy = BackoffPolicy::with_seed(0);
        let header = strings(&["a"]);
        let row = strings(&["1"]);

        assert!(!write_row(Path::new(""), &header, &row, &mut policy).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        assert!(!write_row(&path, &header, &[], &mut policy).unwrap());
        assert!(!path.exists(), "fail-fast must not create the file");
    }

    #[test]
    fn test_header_written_exactly_once_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lidar_plot.csv");
        let header = strings(&["site", "value"]);

        // Each call simulates a fresh pipeline launch against the same file
        for i in 0..5 {
            let mut policy = BackoffPolicy::with_seed(i);
            let row = strings(&["plot", &i.to_string()]);
            assert!(write_row(&path, &header, &row, &mut policy).unwrap());
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 6, "1 header + 5 data lines: {contents}");
        assert_eq!(lines[0], "site,value");
        assert_eq!(
            lines.iter().filter(|l| **l == "site,value").count(),
            1,
            "header must appear exactly once"
        );
    }

    #[test]
    fn test_no_header_requested_writes_data_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut policy = BackoffPolicy::with_seed(0);

        assert!(write_row(&path, &[], &strings(&["a", "b"]), &mut policy).unwrap());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_rows_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut policy = BackoffPolicy::with_seed(0);

        let row = strings(&["Range 1, Column 2", "5"]);
        assert!(write_row(&path, &strings(&["site", "value"]), &row, &mut policy).unwrap());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"Range 1, Column 2\""), "{contents}");
    }
}

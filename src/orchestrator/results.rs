//! Append-only result logs

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::RunSummary;
use crate::config::FleetConfig;
use crate::error::Result;

/// `<run>_time.txt` gets the fleet's max duration per run; `<run>_rerun.txt`
/// gets the walker drop percentage when the expected total is known.
pub struct ResultSink {
    time_log: PathBuf,
    rerun_log: PathBuf,
    expected_walkers: Option<u64>,
}

impl ResultSink {
    pub fn new(time_log: PathBuf, rerun_log: PathBuf, expected_walkers: Option<u64>) -> Self {
        Self {
            time_log,
            rerun_log,
            expected_walkers,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(
            config.time_log_path(),
            config.rerun_log_path(),
            config.expected_walkers,
        )
    }

    pub fn record(&self, summary: &RunSummary) -> Result<()> {
        append_line(&self.time_log, &summary.max_elapsed_secs.to_string())?;

        if let Some(expected) = self.expected_walkers {
            let rate = drop_rate(expected, summary.finished_sum);
            append_line(&self.rerun_log, &rate.to_string())?;
            tracing::info!("drop rate: {}%", rate);
        }
        Ok(())
    }
}

/// Percentage of expected walkers that never reported finishing
pub fn drop_rate(expected: u64, finished: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    expected.saturating_sub(finished) as f64 / expected as f64 * 100.0
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

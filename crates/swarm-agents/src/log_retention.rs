//! Background compaction for the daily-rotated log files `tracing-appender`
//! writes. Runs once at startup and then on a fixed interval: gzips any
//! rotated file older than `compress_after_days`, deletes any (compressed
//! or not) older than `delete_after_days`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

pub struct RetentionPolicy {
    pub compress_after_days: u64,
    pub delete_after_days: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            compress_after_days: 7,
            delete_after_days: 30,
        }
    }
}

/// Spawn the periodic compaction loop. Errors are logged, never fatal — a
/// failed sweep just tries again next interval.
pub fn spawn(log_dir: PathBuf, policy: RetentionPolicy) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = sweep(&log_dir, &policy) {
                tracing::warn!(error = %e, "log retention sweep failed");
            }
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    });
}

fn sweep(log_dir: &Path, policy: &RetentionPolicy) -> std::io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let now = std::time::SystemTime::now();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let age_days = age_in_days(now, entry.metadata()?.modified()?);

        if age_days >= policy.delete_after_days {
            std::fs::remove_file(&path)?;
            continue;
        }

        if age_days >= policy.compress_after_days && path.extension().and_then(|e| e.to_str()) != Some("gz") {
            compress(&path)?;
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn age_in_days(now: std::time::SystemTime, modified: std::time::SystemTime) -> u64 {
    now.duration_since(modified)
        .unwrap_or_default()
        .as_secs()
        / 86_400
}

fn compress(path: &Path) -> std::io::Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let gz_path = path.with_extension(format!(
        "{}.gz",
        path.extension().and_then(|e| e.to_str()).unwrap_or("log")
    ));
    let writer = BufWriter::new(File::create(&gz_path)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

//! Logbook - append-only record of finished runs
//!
//! One file per day under a `logs/` directory, one timestamped block per
//! run. Reading back goes through the decoder chain because older log files
//! on legacy hosts may not be UTF-8.

use anyhow::{Context, Result};
use chrono::Local;
use encoding_rs::{IBM866, UTF_8, WINDOWS_1251};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::runner::{ExecutionResult, OutputDecoder};

/// Appends run results to daily log files and reads them back.
#[derive(Debug, Clone)]
pub struct Logbook {
    dir: PathBuf,
}

impl Logbook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the daily files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn today_path(&self) -> PathBuf {
        let file_name = Local::now().format("log_%Y%m%d.txt").to_string();
        self.dir.join(file_name)
    }

    /// Append one finished run. Creates the directory and the daily file on
    /// first use.
    pub async fn append(&self, command_name: &str, result: &ExecutionResult) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create log directory {:?}", self.dir))?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut block = format!("=== {timestamp} ===\nCommand: {command_name}\n");
        block.push_str(&format!(
            "Status: {}\n",
            if result.success() {
                "SUCCESS".to_string()
            } else if result.timed_out {
                "TIMEOUT".to_string()
            } else {
                format!("ERROR (code {})", result.return_code)
            }
        ));
        block.push_str(&format!("Result:\n{}\n", result.stdout));
        if !result.stderr.is_empty() {
            block.push_str(&format!("Errors:\n{}\n", result.stderr));
        }
        block.push('\n');

        let path = self.today_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open log file {path:?}"))?;
        file.write_all(block.as_bytes())
            .await
            .with_context(|| format!("Failed to write log file {path:?}"))?;

        debug!("Logged result for '{}' to {:?}", command_name, path);
        Ok(())
    }

    /// Read back today's log, decoding with a UTF-8-first fallback chain.
    /// Returns `None` when no log exists for today.
    pub async fn read_today(&self) -> Result<Option<String>> {
        let path = self.today_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read log file {path:?}"))
            }
        };

        let decoder = OutputDecoder::new(vec![UTF_8, WINDOWS_1251, IBM866]);
        Ok(Some(decoder.decode(Some(&raw))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FAILURE_SENTINEL;

    fn ok_result(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            stderr: String::new(),
            return_code: 0,
            timed_out: false,
        }
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let logbook = Logbook::new(tmp.path().join("logs"));

        logbook.append("Echo", &ok_result("hello")).await.unwrap();
        logbook
            .append(
                "Slow thing",
                &ExecutionResult {
                    stdout: String::new(),
                    stderr: "Timed out after 1 seconds".to_string(),
                    return_code: FAILURE_SENTINEL,
                    timed_out: true,
                },
            )
            .await
            .unwrap();

        let content = logbook.read_today().await.unwrap().unwrap();
        assert!(content.contains("Command: Echo"));
        assert!(content.contains("Status: SUCCESS"));
        assert!(content.contains("hello"));
        assert!(content.contains("Command: Slow thing"));
        assert!(content.contains("Status: TIMEOUT"));
        assert!(content.contains("Errors:\nTimed out after 1 seconds"));
    }

    #[tokio::test]
    async fn missing_log_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let logbook = Logbook::new(tmp.path().join("logs"));
        assert_eq!(logbook.read_today().await.unwrap(), None);
    }
}

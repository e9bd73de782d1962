//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::time::{Duration, Instant};

/// Number of live processes whose argv contains `arg` exactly.
///
/// Zombies have an empty cmdline and are not counted.
pub fn processes_with_arg(arg: &str) -> usize {
    let Ok(entries) = fs::read_dir("/proc") else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()))
        .filter_map(|e| fs::read(e.path().join("cmdline")).ok())
        .filter(|cmdline| cmdline.split(|b| *b == 0).any(|part| part == arg.as_bytes()))
        .count()
}

/// Polls until no live process carries `arg`, or `within` elapses.
pub async fn wait_until_gone(arg: &str, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if processes_with_arg(arg) == 0 {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Parsed lines of a JSON-lines file; empty if the file does not exist.
pub fn json_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("invalid JSON line"))
        .collect()
}

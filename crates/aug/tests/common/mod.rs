//! Shared helpers for the integration tests.

use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicU32, Ordering},
};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Writes a script to a unique temp file and returns its path.
pub fn write_script(name: &str, code: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("aug_test_{}_{name}_{n}.aug", std::process::id()));
    fs::write(&path, code).expect("failed to write temp script");
    path
}

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use tempfile::TempDir;
use vellum::{StoreOptions, Synchronous, PAGE_SIZE};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

pub fn store_path(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tmpdir");
    let path = dir.path().join(name);
    (dir, path)
}

pub fn options(pages: usize) -> StoreOptions {
    StoreOptions::default()
        .memory_budget((pages * PAGE_SIZE) as u64)
        .synchronous(Synchronous::Normal)
}

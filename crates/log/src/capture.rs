//! In-memory ring of recent log lines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::Level;

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

/// Starts keeping the newest `capacity` lines; zero stops capturing.
pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(4096))));
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub(crate) fn capture_enabled() -> bool {
    CAPTURE_ENABLED.load(Ordering::Relaxed)
}

/// Captured lines whose module path starts with `target_prefix`.
pub fn captured_for(target_prefix: &str) -> Vec<CapturedLog> {
    let Some(buf) = CAPTURE.get() else {
        return Vec::new();
    };
    let Ok(guard) = buf.lock() else {
        return Vec::new();
    };
    guard
        .iter()
        .filter(|entry| entry.target.starts_with(target_prefix))
        .cloned()
        .collect()
}

pub(crate) fn push(entry: CapturedLog) {
    let Some(buf) = CAPTURE.get() else {
        return;
    };
    let Ok(mut guard) = buf.lock() else {
        return;
    };
    let cap = CAPTURE_CAPACITY.load(Ordering::Relaxed);
    if cap == 0 {
        return;
    }
    guard.push_back(entry);
    while guard.len() > cap {
        let _ = guard.pop_front();
    }
}

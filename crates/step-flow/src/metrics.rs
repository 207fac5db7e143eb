use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    workflows: AtomicU64,
    steps_started: AtomicU64,
    steps_succeeded: AtomicU64,
    steps_failed: AtomicU64,
    steps_skipped: AtomicU64,
    steps_aborted: AtomicU64,
    retries: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_workflow_started() {
    increment(&COUNTERS.workflows);
}

pub fn record_step_started() {
    increment(&COUNTERS.steps_started);
}

pub fn record_step_succeeded() {
    increment(&COUNTERS.steps_succeeded);
}

pub fn record_step_failed() {
    increment(&COUNTERS.steps_failed);
}

pub fn record_step_skipped() {
    increment(&COUNTERS.steps_skipped);
}

pub fn record_step_aborted() {
    increment(&COUNTERS.steps_aborted);
}

pub fn record_retry() {
    increment(&COUNTERS.retries);
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct EngineMetricsSnapshot {
    pub workflows: u64,
    pub steps_started: u64,
    pub steps_succeeded: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
    pub steps_aborted: u64,
    pub retries: u64,
}

pub fn snapshot() -> EngineMetricsSnapshot {
    EngineMetricsSnapshot {
        workflows: COUNTERS.workflows.load(Ordering::Relaxed),
        steps_started: COUNTERS.steps_started.load(Ordering::Relaxed),
        steps_succeeded: COUNTERS.steps_succeeded.load(Ordering::Relaxed),
        steps_failed: COUNTERS.steps_failed.load(Ordering::Relaxed),
        steps_skipped: COUNTERS.steps_skipped.load(Ordering::Relaxed),
        steps_aborted: COUNTERS.steps_aborted.load(Ordering::Relaxed),
        retries: COUNTERS.retries.load(Ordering::Relaxed),
    }
}

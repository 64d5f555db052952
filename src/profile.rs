// src/profile.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wrapper profiling: a process-wide on/off switch and a registry of named
//! timers, plus the precall/postcall hook that ties them together.
//!
//! Call sites receive an `Instrumentation` by reference. The host bindings
//! use the lazily-built `Instrumentation::global()`.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::constants::{PROFILER_ENV_VAR, TIMER_NAME_SEPARATOR};

/// Configuration for the profiler
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Whether timed wrappers record from the start (default: true)
    pub enabled: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ProfilerConfig {
    /// Read `SABRIDGE_PROFILER`; "0", "off", "false" or "no" disable profiling
    pub fn from_env() -> Self {
        match std::env::var(PROFILER_ENV_VAR) {
            Ok(value) => Self {
                enabled: !matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "0" | "off" | "false" | "no"
                ),
            },
            Err(_) => Self::default(),
        }
    }
}

/// Process-wide flag gating the timing hook
#[derive(Debug)]
pub struct ProfilerSwitch {
    enabled: AtomicBool,
}

impl ProfilerSwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) -> &Self {
        self.enabled.store(true, Ordering::Relaxed);
        tracing::info!("Wrapper profiler enabled");
        self
    }

    pub fn disable(&self) -> &Self {
        self.enabled.store(false, Ordering::Relaxed);
        tracing::info!("Wrapper profiler disabled");
        self
    }
}

impl Default for ProfilerSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Default)]
struct TimerState {
    depth: usize,
    started_at: Option<Instant>,
    starts: u64,
    stops: u64,
    unmatched_stops: u64,
    count: u64,
    total: Duration,
}

/// Named accumulator of start/stop intervals
///
/// Nested starts deepen the entry; time accumulates once the outermost
/// interval closes, while every matched stop bumps `count`.
#[derive(Debug)]
pub struct TimerEntry {
    name: String,
    state: Mutex<TimerState>,
}

/// Point-in-time copy of a `TimerEntry`
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSnapshot {
    pub name: String,
    pub starts: u64,
    pub stops: u64,
    pub unmatched_stops: u64,
    pub count: u64,
    pub time: Duration,
    pub running: bool,
}

impl TimerEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(TimerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        state.starts += 1;
        if state.depth == 0 {
            state.started_at = Some(Instant::now());
        }
        state.depth += 1;
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stops += 1;
        if state.depth == 0 {
            state.unmatched_stops += 1;
            tracing::trace!("Timer '{}' stopped while idle", self.name);
            return;
        }
        state.depth -= 1;
        state.count += 1;
        if state.depth == 0 {
            if let Some(started_at) = state.started_at.take() {
                state.total += started_at.elapsed();
            }
        }
    }

    pub fn starts(&self) -> u64 {
        self.state.lock().starts
    }

    pub fn stops(&self) -> u64 {
        self.state.lock().stops
    }

    /// Completed (matched) intervals
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Accumulated wall time of closed outermost intervals
    pub fn time(&self) -> Duration {
        self.state.lock().total
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().depth > 0
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let state = self.state.lock();
        TimerSnapshot {
            name: self.name.clone(),
            starts: state.starts,
            stops: state.stops,
            unmatched_stops: state.unmatched_stops,
            count: state.count,
            time: state.total,
            running: state.depth > 0,
        }
    }
}

/// Registry of `TimerEntry` keyed by name
#[derive(Debug, Default)]
pub struct TimeRegistry {
    entries: Mutex<BTreeMap<String, Arc<TimerEntry>>>,
}

impl TimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `name`, created on first reference
    pub fn entry(&self, name: &str) -> Arc<TimerEntry> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(name) {
            return Arc::clone(entry);
        }
        tracing::trace!("Creating timer entry '{}'", name);
        let entry = Arc::new(TimerEntry::new(name));
        entries.insert(name.to_string(), Arc::clone(&entry));
        entry
    }

    /// Entry for `name` if one exists; never creates
    pub fn get(&self, name: &str) -> Option<Arc<TimerEntry>> {
        self.entries.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry. Handles obtained earlier keep working but are detached.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// One line per entry, sorted by name
    pub fn report(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();
        for entry in entries.values() {
            let snap = entry.snapshot();
            let _ = writeln!(
                out,
                "{} : count = {} , time = {:.6} (second)",
                snap.name,
                snap.count,
                snap.time.as_secs_f64()
            );
        }
        out
    }
}

/// Timer name for method `method` of scope `scope`
pub fn timer_name(scope: &str, method: &str) -> String {
    format!("{}{}{}", scope, TIMER_NAME_SEPARATOR, method)
}

/// Switch plus registry, the service behind every timed wrapper
#[derive(Debug, Default)]
pub struct Instrumentation {
    switch: ProfilerSwitch,
    registry: TimeRegistry,
}

static GLOBAL: OnceLock<Arc<Instrumentation>> = OnceLock::new();

impl Instrumentation {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            switch: ProfilerSwitch::new(config.enabled),
            registry: TimeRegistry::new(),
        }
    }

    /// Process-wide instance, configured from the environment on first use
    pub fn global() -> &'static Arc<Instrumentation> {
        GLOBAL.get_or_init(|| {
            let config = ProfilerConfig::from_env();
            tracing::info!("Initializing wrapper profiler (enabled={})", config.enabled);
            Arc::new(Self::new(config))
        })
    }

    pub fn switch(&self) -> &ProfilerSwitch {
        &self.switch
    }

    pub fn registry(&self) -> &TimeRegistry {
        &self.registry
    }

    pub fn precall(&self, name: &str) {
        if self.switch.enabled() {
            tracing::trace!("precall {}", name);
            self.registry.entry(name).start();
        }
    }

    /// Re-checks the switch; a toggle during the call can leave a start unmatched
    pub fn postcall(&self, name: &str) {
        if self.switch.enabled() {
            tracing::trace!("postcall {}", name);
            self.registry.entry(name).stop();
        }
    }

    /// Run `f` between precall and postcall. The result passes through as is,
    /// `Err` included.
    pub fn call<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        self.precall(name);
        let result = f();
        self.postcall(name);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        use tracing_subscriber::{fmt, EnvFilter};
        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }

    #[test]
    fn test_switch_defaults_on() {
        let switch = ProfilerSwitch::default();
        assert!(switch.enabled());
        assert!(!switch.disable().enabled());
        assert!(switch.enable().enabled());
    }

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_toggles_log_at_info() {
        let writer = CaptureWriter::default();
        let sink = writer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();

        let switch = ProfilerSwitch::default();
        tracing::subscriber::with_default(subscriber, || {
            switch.disable().enable();
        });

        let logged = String::from_utf8(writer.0.lock().clone()).unwrap();
        assert!(logged.contains("INFO"));
        assert!(logged.contains("Wrapper profiler disabled"));
        assert!(logged.contains("Wrapper profiler enabled"));
    }

    #[test]
    fn test_disabled_call_creates_no_entry() {
        init_tracing();
        let instr = Instrumentation::new(ProfilerConfig { enabled: false });
        let out = instr.call("Grid.fill", || 42);
        assert_eq!(out, 42);
        assert!(instr.registry().get("Grid.fill").is_none());
        assert!(instr.registry().is_empty());
    }

    #[test]
    fn test_enabled_call_records_one_interval() {
        init_tracing();
        let instr = Instrumentation::default();
        instr.call("Grid.fill", || std::thread::sleep(Duration::from_millis(2)));

        let entry = instr.registry().get("Grid.fill").unwrap();
        assert_eq!(entry.starts(), 1);
        assert_eq!(entry.stops(), 1);
        assert_eq!(entry.count(), 1);
        assert!(!entry.is_running());
        assert!(entry.time() >= Duration::from_millis(2));
    }

    #[test]
    fn test_toggle_off_mid_call_leaves_start_unmatched() {
        init_tracing();
        let instr = Instrumentation::default();
        instr.call("Grid.fill", || {
            instr.switch().disable();
        });

        let entry = instr.registry().get("Grid.fill").unwrap();
        assert_eq!(entry.starts(), 1);
        assert_eq!(entry.stops(), 0);
        assert!(entry.is_running());
    }

    #[test]
    fn test_toggle_on_mid_call_records_stray_stop() {
        let instr = Instrumentation::new(ProfilerConfig { enabled: false });
        instr.call("Grid.fill", || {
            instr.switch().enable();
        });

        let snap = instr.registry().get("Grid.fill").unwrap().snapshot();
        assert_eq!(snap.starts, 0);
        assert_eq!(snap.stops, 1);
        assert_eq!(snap.unmatched_stops, 1);
        assert_eq!(snap.count, 0);
    }

    #[test]
    fn test_errors_pass_through_unchanged() {
        let instr = Instrumentation::default();
        let out: Result<(), String> = instr.call("Grid.bad", || Err("boom".to_string()));
        assert_eq!(out, Err("boom".to_string()));
        assert_eq!(instr.registry().get("Grid.bad").unwrap().count(), 1);
    }

    #[test]
    fn test_nested_starts_accumulate_once() {
        let registry = TimeRegistry::new();
        let entry = registry.entry("Outer.run");
        entry.start();
        entry.start();
        entry.stop();
        assert!(entry.is_running());
        assert_eq!(entry.time(), Duration::ZERO);
        entry.stop();
        assert!(!entry.is_running());
        assert_eq!(entry.count(), 2);
    }

    #[test]
    fn test_entry_is_shared_by_name() {
        let registry = TimeRegistry::new();
        let a = registry.entry("S.m");
        let b = registry.entry("S.m");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["S.m".to_string()]);
    }

    #[test]
    fn test_report_and_clear() {
        let registry = TimeRegistry::new();
        registry.entry("B.second").start();
        let first = registry.entry("A.first");
        first.start();
        first.stop();

        let report = registry.report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("A.first : count = 1 , time = "));
        assert!(lines[1].starts_with("B.second : count = 0 , time = "));
        assert!(lines[0].ends_with("(second)"));

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.report().is_empty());
    }

    #[test]
    fn test_parallel_calls_serialize_accumulation() {
        let instr = Arc::new(Instrumentation::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let instr = Arc::clone(&instr);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        instr.call("Pool.work", || ());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = instr.registry().get("Pool.work").unwrap().snapshot();
        assert_eq!(snap.starts, 800);
        assert_eq!(snap.stops, 800);
        assert_eq!(snap.count, 800);
        assert!(!snap.running);
    }

    #[test]
    fn test_timer_name() {
        assert_eq!(timer_name("StaticGrid1d", "fill"), "StaticGrid1d.fill");
    }

    #[test]
    fn test_global_is_singleton() {
        let a = Instrumentation::global();
        let b = Instrumentation::global();
        assert!(Arc::ptr_eq(a, b));
    }
}

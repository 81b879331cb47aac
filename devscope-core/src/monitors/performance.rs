//! Монитор производительности: замеры, память, ресурсы и первая отрисовка.

use super::{Lifecycle, Monitor, MonitorState};
use crate::config::PerformanceConfig;
use crate::error::{lock, panic_message, DiagnosticsError};
use crate::events::{BoundedEventLog, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Снимок памяти процесса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub used_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Источник сведений о памяти.
pub trait MemoryProbe: Send + Sync {
    fn current_memory(&self) -> Option<MemoryReading>;
}

/// Память текущего процесса через `sysinfo`.
pub struct SysinfoMemoryProbe {
    system: Mutex<System>,
    pid: Pid,
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn current_memory(&self) -> Option<MemoryReading> {
        let mut system = lock(&self.system);
        system.refresh_process(self.pid);
        system.refresh_memory();
        let used_bytes = system.process(self.pid)?.memory();
        let total = system.total_memory();
        Some(MemoryReading {
            used_bytes,
            total_bytes: (total > 0).then_some(total),
        })
    }
}

/// Тайминг загруженного ресурса.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTiming {
    pub name: String,
    pub initiator: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub status: Option<u16>,
}

/// Источник таймингов ресурсов.
pub trait ResourceTimingSource: Send + Sync {
    fn resource_timings(&self) -> Vec<ResourceTiming>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Measure,
    Memory,
    Resource,
    Paint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum PerformancePayload {
    Measure { name: String, duration_ms: f64 },
    Memory(MemoryReading),
    Resource { entries: Vec<ResourceTiming> },
    Paint { name: String, elapsed_ms: f64 },
}

/// Неизменяемый замер производительности.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: PerformancePayload,
}

impl PerformanceSample {
    pub fn new(payload: PerformancePayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self.payload {
            PerformancePayload::Measure { .. } => SampleKind::Measure,
            PerformancePayload::Memory(_) => SampleKind::Memory,
            PerformancePayload::Resource { .. } => SampleKind::Resource,
            PerformancePayload::Paint { .. } => SampleKind::Paint,
        }
    }
}

type PaintListener = Box<dyn FnOnce(f64) + Send>;

#[derive(Default)]
struct FirstPaint {
    elapsed_ms: Option<f64>,
    listeners: Vec<PaintListener>,
}

struct PerformanceInner {
    lifecycle: Lifecycle,
    log: BoundedEventLog<PerformanceSample>,
    marks: Mutex<HashMap<String, Instant>>,
    probe: Arc<dyn MemoryProbe>,
    resources: Mutex<Option<Arc<dyn ResourceTimingSource>>>,
    first_paint: Mutex<FirstPaint>,
    started_at: Mutex<Option<Instant>>,
}

impl PerformanceInner {
    fn sample_memory(&self) -> Option<MemoryReading> {
        if !self.lifecycle.accepts("memory sample") {
            return None;
        }
        let reading = self.probe.current_memory()?;
        self.log
            .append(PerformanceSample::new(PerformancePayload::Memory(reading)));
        Some(reading)
    }
}

/// Монитор производительности.
pub struct PerformanceMonitor {
    inner: Arc<PerformanceInner>,
    sample_interval: Duration,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    pub fn new(settings: PerformanceConfig) -> Self {
        Self::with_probe(settings, Arc::new(SysinfoMemoryProbe::new()))
    }

    pub fn with_probe(settings: PerformanceConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            inner: Arc::new(PerformanceInner {
                lifecycle: Lifecycle::new("performance"),
                log: BoundedEventLog::new(settings.capacity),
                marks: Mutex::new(HashMap::new()),
                probe,
                resources: Mutex::new(None),
                first_paint: Mutex::new(FirstPaint::default()),
                started_at: Mutex::new(None),
            }),
            sample_interval: Duration::from_millis(settings.memory_sample_interval_ms),
            sampler: Mutex::new(None),
        }
    }

    /// Запускает монитор и, если есть tokio runtime, периодический сбор памяти.
    pub fn start(&self) -> bool {
        if !self.inner.lifecycle.activate() {
            return false;
        }
        *lock(&self.inner.started_at) = Some(Instant::now());

        if self.sample_interval.is_zero() {
            return true;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&self.inner);
                let period = self.sample_interval;
                *lock(&self.sampler) = Some(handle.spawn(sample_loop(weak, period)));
            }
            Err(_) => debug!("performance: no tokio runtime, periodic memory sampling disabled"),
        }
        true
    }

    pub fn set_resource_source(&self, source: Arc<dyn ResourceTimingSource>) {
        *lock(&self.inner.resources) = Some(source);
    }

    pub fn start_measure(&self, name: &str) {
        if !self.inner.lifecycle.accepts("start_measure") {
            return;
        }
        lock(&self.inner.marks).insert(name.to_string(), Instant::now());
    }

    /// Завершает замер. `None`, если замер не был начат.
    pub fn end_measure(&self, name: &str) -> Option<f64> {
        if !self.inner.lifecycle.accepts("end_measure") {
            return None;
        }
        let started = lock(&self.inner.marks).remove(name)?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.inner.log.append(PerformanceSample::new(PerformancePayload::Measure {
            name: name.to_string(),
            duration_ms,
        }));
        Some(duration_ms)
    }

    /// Снимает память немедленно.
    pub fn sample_memory(&self) -> Option<MemoryReading> {
        self.inner.sample_memory()
    }

    /// Добавляет готовый замер (например, из воспроизводимого журнала).
    pub fn record(&self, payload: PerformancePayload) -> bool {
        if !self.inner.lifecycle.accepts("record") {
            return false;
        }
        self.inner.log.append(PerformanceSample::new(payload));
        true
    }

    /// Снимок таймингов ресурсов. Возвращает количество записей в снимке.
    pub fn capture_resource_timings(&self) -> usize {
        if !self.inner.lifecycle.accepts("resource snapshot") {
            return 0;
        }
        let source = lock(&self.inner.resources).clone();
        let entries = source.map(|s| s.resource_timings()).unwrap_or_default();
        if entries.is_empty() {
            return 0;
        }
        let count = entries.len();
        self.inner
            .log
            .append(PerformanceSample::new(PerformancePayload::Resource { entries }));
        count
    }

    /// Отмечает первую отрисовку. Срабатывает один раз; возвращает время от старта.
    pub fn mark_first_paint(&self) -> Option<f64> {
        if !self.inner.lifecycle.accepts("first paint") {
            return None;
        }
        let elapsed_ms = lock(&self.inner.started_at)
            .map(|at| at.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let listeners = {
            let mut paint = lock(&self.inner.first_paint);
            if paint.elapsed_ms.is_some() {
                return None;
            }
            paint.elapsed_ms = Some(elapsed_ms);
            std::mem::take(&mut paint.listeners)
        };

        self.inner.log.append(PerformanceSample::new(PerformancePayload::Paint {
            name: "first-paint".to_string(),
            elapsed_ms,
        }));
        for listener in listeners {
            run_paint_listener(listener, elapsed_ms);
        }
        Some(elapsed_ms)
    }

    /// Колбэк первой отрисовки. Если она уже была, колбэк вызывается сразу.
    pub fn on_first_paint(&self, listener: impl FnOnce(f64) + Send + 'static) {
        if self.state() == MonitorState::Destroyed {
            return;
        }
        let elapsed = {
            let mut paint = lock(&self.inner.first_paint);
            match paint.elapsed_ms {
                Some(elapsed) => elapsed,
                None => {
                    paint.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        run_paint_listener(Box::new(listener), elapsed);
    }

    pub fn first_paint_ms(&self) -> Option<f64> {
        lock(&self.inner.first_paint).elapsed_ms
    }

    /// Замеры, при `kind` - только заданного вида.
    pub fn get_samples(&self, kind: Option<SampleKind>) -> Vec<PerformanceSample> {
        match kind {
            Some(kind) => self.inner.log.query(|sample| sample.kind() == kind),
            None => self.inner.log.all(),
        }
    }

    /// Всего замеров за время жизни монитора.
    pub fn total_samples(&self) -> u64 {
        self.inner.log.total_appended()
    }

    pub fn recent_samples(&self, n: usize) -> Vec<PerformanceSample> {
        self.inner.log.recent(n)
    }

    pub fn clear_samples(&self) {
        self.inner.log.clear();
    }

    pub fn on_sample(
        &self,
        listener: impl Fn(&PerformanceSample) + Send + Sync + 'static,
    ) -> Subscription {
        if self.state() == MonitorState::Destroyed {
            return Subscription::detached();
        }
        self.inner.log.subscribe(listener)
    }

    pub fn set_error_hook(&self, hook: impl Fn(&DiagnosticsError) + Send + Sync + 'static) {
        self.inner.log.set_error_hook(hook);
    }
}

fn run_paint_listener(listener: PaintListener, elapsed_ms: f64) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(elapsed_ms))) {
        warn!(
            "first paint listener panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

async fn sample_loop(monitor: Weak<PerformanceInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let Some(inner) = monitor.upgrade() else {
            break;
        };
        if inner.lifecycle.state() != MonitorState::Active {
            break;
        }
        inner.sample_memory();
    }
}

impl Monitor for PerformanceMonitor {
    fn name(&self) -> &'static str {
        self.inner.lifecycle.name()
    }

    fn state(&self) -> MonitorState {
        self.inner.lifecycle.state()
    }

    fn destroy(&self) {
        if !self.inner.lifecycle.destroy() {
            return;
        }
        if let Some(sampler) = lock(&self.sampler).take() {
            sampler.abort();
        }
        lock(&self.inner.marks).clear();
        lock(&self.inner.first_paint).listeners.clear();
        self.inner.log.clear();
        self.inner.log.unsubscribe_all();
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(sampler) = lock(&self.sampler).take() {
            sampler.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingProbe {
        reads: AtomicU64,
    }

    impl MemoryProbe for CountingProbe {
        fn current_memory(&self) -> Option<MemoryReading> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Some(MemoryReading {
                used_bytes: n * 1024,
                total_bytes: Some(1 << 30),
            })
        }
    }

    struct FixedResources;

    impl ResourceTimingSource for FixedResources {
        fn resource_timings(&self) -> Vec<ResourceTiming> {
            vec![ResourceTiming {
                name: "/bundle.js".to_string(),
                initiator: "fetch".to_string(),
                start_time: Utc::now(),
                duration_ms: 12.5,
                status: Some(200),
            }]
        }
    }

    fn manual_settings() -> PerformanceConfig {
        PerformanceConfig {
            capacity: 10,
            memory_sample_interval_ms: 0,
        }
    }

    fn monitor() -> PerformanceMonitor {
        let monitor = PerformanceMonitor::with_probe(
            manual_settings(),
            Arc::new(CountingProbe {
                reads: AtomicU64::new(0),
            }),
        );
        monitor.start();
        monitor
    }

    #[test]
    fn test_end_measure_without_start_is_none() {
        let monitor = monitor();
        assert_eq!(monitor.end_measure("never-started"), None);
        assert!(monitor.get_samples(None).is_empty());
    }

    #[test]
    fn test_measure_records_sample() {
        let monitor = monitor();
        monitor.start_measure("render");
        let duration = monitor.end_measure("render").expect("duration");
        assert!(duration >= 0.0);
        // Замер одноразовый.
        assert_eq!(monitor.end_measure("render"), None);

        let samples = monitor.get_samples(Some(SampleKind::Measure));
        assert_eq!(samples.len(), 1);
        match &samples[0].payload {
            PerformancePayload::Measure { name, duration_ms } => {
                assert_eq!(name, "render");
                assert_eq!(*duration_ms, duration);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_sample_serializes_with_kind_and_payload() {
        let sample = PerformanceSample::new(PerformancePayload::Measure {
            name: "x".to_string(),
            duration_ms: 1.5,
        });
        let json = serde_json::to_value(&sample).expect("json");
        assert_eq!(json["kind"], "measure");
        assert_eq!(json["payload"]["duration_ms"], 1.5);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_first_paint_fires_once_and_late_listeners_run_immediately() {
        let monitor = monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let early = Arc::clone(&seen);
        monitor.on_first_paint(move |ms| lock(&early).push(("early", ms)));

        let first = monitor.mark_first_paint().expect("first paint");
        assert_eq!(monitor.mark_first_paint(), None);

        let late = Arc::clone(&seen);
        monitor.on_first_paint(move |ms| lock(&late).push(("late", ms)));

        assert_eq!(*lock(&seen), vec![("early", first), ("late", first)]);
        assert_eq!(monitor.get_samples(Some(SampleKind::Paint)).len(), 1);
        assert_eq!(monitor.first_paint_ms(), Some(first));
    }

    #[test]
    fn test_resource_snapshot_from_source() {
        let monitor = monitor();
        assert_eq!(monitor.capture_resource_timings(), 0);
        monitor.set_resource_source(Arc::new(FixedResources));
        assert_eq!(monitor.capture_resource_timings(), 1);
        assert_eq!(monitor.get_samples(Some(SampleKind::Resource)).len(), 1);
    }

    #[test]
    fn test_capacity_keeps_newest_samples() {
        let monitor = monitor();
        for _ in 0..15 {
            monitor.sample_memory();
        }
        let samples = monitor.get_samples(Some(SampleKind::Memory));
        assert_eq!(samples.len(), 10);
        assert_eq!(
            samples[0].payload,
            PerformancePayload::Memory(MemoryReading {
                used_bytes: 6 * 1024,
                total_bytes: Some(1 << 30),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_memory_sampling_stops_on_destroy() {
        let probe = Arc::new(CountingProbe {
            reads: AtomicU64::new(0),
        });
        let monitor = PerformanceMonitor::with_probe(
            PerformanceConfig {
                capacity: 100,
                memory_sample_interval_ms: 100,
            },
            probe.clone(),
        );
        monitor.start();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let before = probe.reads.load(Ordering::SeqCst);
        assert!(before >= 3, "expected periodic samples, got {before}");

        monitor.destroy();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(probe.reads.load(Ordering::SeqCst), before);
        assert!(monitor.get_samples(None).is_empty());
    }

    #[test]
    fn test_destroyed_monitor_ignores_events() {
        let monitor = monitor();
        monitor.destroy();
        monitor.destroy();
        monitor.start_measure("x");
        assert_eq!(monitor.end_measure("x"), None);
        assert_eq!(monitor.mark_first_paint(), None);
        assert!(monitor.sample_memory().is_none());
        assert_eq!(monitor.state(), MonitorState::Destroyed);
    }
}

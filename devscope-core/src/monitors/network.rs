//! Монитор сетевых запросов.
//!
//! Монитор подменяет оба механизма запросов хоста обёртками. Обёртка
//! сохраняет запись при отправке запроса, передаёт запрос оригиналу и
//! дописывает статус, время окончания и длительность при завершении.
//! Завершённая запись повторно доставляется подписчикам.

use super::performance::{ResourceTiming, ResourceTimingSource};
use super::transport::{
    CallbackTransport, FetchTransport, HttpRequest, HttpResponse, ResponseCallback,
    TransportError, TransportSlots,
};
use super::{Lifecycle, Monitor, MonitorState};
use crate::config::NetworkConfig;
use crate::error::{lock, DiagnosticsError};
use crate::events::{BoundedEventLog, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Механизм, через который прошёл запрос.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Fetch,
    Callback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub request_headers: Option<Vec<(String, String)>>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub transport: TransportKind,
}

impl NetworkRecord {
    /// Запись об отправленном, ещё не завершённом запросе.
    pub fn issued(request: &HttpRequest, transport: TransportKind, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: request.url.clone(),
            method: request.method.to_uppercase(),
            status: None,
            start_time,
            end_time: None,
            duration_ms: None,
            request_headers: (!request.headers.is_empty()).then(|| request.headers.clone()),
            request_body: None,
            response_body: None,
            error: None,
            transport,
        }
    }

    /// Фиксирует завершение. Длительность всегда равна `end_time - start_time`.
    pub fn complete_at(&mut self, end_time: DateTime<Utc>) {
        let end_time = end_time.max(self.start_time);
        let micros = (end_time - self.start_time)
            .num_microseconds()
            .unwrap_or(i64::MAX);
        self.end_time = Some(end_time);
        self.duration_ms = Some(micros as f64 / 1000.0);
    }

    pub fn is_complete(&self) -> bool {
        self.end_time.is_some()
    }

    /// Запрос завершился ошибкой транспорта или статусом >= 400.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.status.map_or(false, |status| status >= 400)
    }
}

struct Installed {
    host: Arc<TransportSlots>,
    original_fetch: Arc<dyn FetchTransport>,
    original_callback: Arc<dyn CallbackTransport>,
}

struct NetworkInner {
    lifecycle: Lifecycle,
    log: BoundedEventLog<NetworkRecord>,
    settings: NetworkConfig,
    installed: Mutex<Option<Installed>>,
    failed: AtomicU64,
}

impl NetworkInner {
    fn begin(&self, request: &HttpRequest, transport: TransportKind) -> Option<String> {
        if !self.lifecycle.accepts("request") {
            return None;
        }
        let mut record = NetworkRecord::issued(request, transport, Utc::now());
        if self.settings.capture_bodies {
            record.request_body = request
                .body
                .as_deref()
                .map(|body| truncate_body(body, self.settings.max_body_bytes));
        }
        let id = record.id.clone();
        self.log.append(record);
        Some(id)
    }

    fn complete(
        &self,
        id: &str,
        result: &Result<HttpResponse, TransportError>,
    ) -> Option<NetworkRecord> {
        if !self.lifecycle.accepts("completion") {
            return None;
        }
        let capture_bodies = self.settings.capture_bodies;
        let max_body = self.settings.max_body_bytes;
        let updated = self.log.update_where(
            |record| record.id == id && !record.is_complete(),
            |record| {
                match result {
                    Ok(response) => {
                        record.status = Some(response.status);
                        if capture_bodies {
                            record.response_body = response
                                .body
                                .as_deref()
                                .map(|body| truncate_body(body, max_body));
                        }
                    }
                    Err(err) => record.error = Some(err.to_string()),
                }
                record.complete_at(Utc::now());
            },
        );

        match updated {
            Some(record) => {
                if record.is_failed() {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
                self.log.publish(&record);
                Some(record)
            }
            None => {
                debug!("network: completion for {id} dropped, record is gone");
                None
            }
        }
    }
}

/// Обрезает тело по границе символа.
fn truncate_body(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

struct InterceptingFetch {
    monitor: Weak<NetworkInner>,
    original: Arc<dyn FetchTransport>,
}

#[async_trait]
impl FetchTransport for InterceptingFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let id = self
            .monitor
            .upgrade()
            .and_then(|monitor| monitor.begin(&request, TransportKind::Fetch));

        let result = self.original.fetch(request).await;

        if let (Some(id), Some(monitor)) = (id, self.monitor.upgrade()) {
            monitor.complete(&id, &result);
        }
        result
    }
}

struct InterceptingCallback {
    monitor: Weak<NetworkInner>,
    original: Arc<dyn CallbackTransport>,
}

impl CallbackTransport for InterceptingCallback {
    fn send(&self, request: HttpRequest, on_done: ResponseCallback) {
        let id = self
            .monitor
            .upgrade()
            .and_then(|monitor| monitor.begin(&request, TransportKind::Callback));
        let monitor = self.monitor.clone();

        self.original.send(
            request,
            Box::new(move |result| {
                if let (Some(id), Some(monitor)) = (id, monitor.upgrade()) {
                    monitor.complete(&id, &result);
                }
                on_done(result);
            }),
        );
    }
}

/// Монитор сетевых запросов.
pub struct NetworkMonitor {
    inner: Arc<NetworkInner>,
}

impl NetworkMonitor {
    pub fn new(settings: NetworkConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                lifecycle: Lifecycle::new("network"),
                log: BoundedEventLog::new(settings.capacity),
                settings,
                installed: Mutex::new(None),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Запускает монитор без перехвата. Записи поступают через
    /// [`Self::begin_request`] и [`Self::complete_request`].
    pub fn start(&self) -> bool {
        self.inner.lifecycle.activate()
    }

    /// Запускает монитор и подменяет механизмы запросов хоста.
    ///
    /// Если хост уже перехвачен, монитор отключается и возвращается
    /// [`DiagnosticsError::Capture`]. Хост при этом не меняется.
    pub fn install(&self, host: &Arc<TransportSlots>) -> Result<(), DiagnosticsError> {
        if self.inner.lifecycle.state() != MonitorState::Uninitialized {
            return Err(DiagnosticsError::Capture {
                monitor: "network",
                reason: "monitor was already started".to_string(),
            });
        }

        if !host.claim() {
            self.inner.lifecycle.destroy();
            let err = DiagnosticsError::Capture {
                monitor: "network",
                reason: "request transports are already intercepted".to_string(),
            };
            warn!("{err}");
            return Err(err);
        }

        let weak = Arc::downgrade(&self.inner);
        let original_fetch = host.replace_fetch(Arc::new(InterceptingFetch {
            monitor: weak.clone(),
            original: host.fetch_transport(),
        }));
        let original_callback = host.replace_callback(Arc::new(InterceptingCallback {
            monitor: weak,
            original: host.callback_transport(),
        }));

        *lock(&self.inner.installed) = Some(Installed {
            host: Arc::clone(host),
            original_fetch,
            original_callback,
        });
        self.inner.lifecycle.activate();
        Ok(())
    }

    /// Регистрирует отправленный запрос вручную. `None`, если монитор не активен.
    pub fn begin_request(&self, request: &HttpRequest, transport: TransportKind) -> Option<String> {
        self.inner.begin(request, transport)
    }

    /// Завершает запрос, зарегистрированный через [`Self::begin_request`].
    pub fn complete_request(
        &self,
        id: &str,
        result: &Result<HttpResponse, TransportError>,
    ) -> Option<NetworkRecord> {
        self.inner.complete(id, result)
    }

    /// Добавляет уже завершённую запись (например, из воспроизводимого журнала).
    pub fn record(&self, mut record: NetworkRecord) -> bool {
        if !self.inner.lifecycle.accepts("record") {
            return false;
        }
        let settings = &self.inner.settings;
        for body in [&mut record.request_body, &mut record.response_body] {
            *body = body
                .take()
                .filter(|_| settings.capture_bodies)
                .map(|text| truncate_body(&text, settings.max_body_bytes));
        }
        if record.is_failed() {
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.log.append(record);
        true
    }

    /// Всего запросов и неудачных запросов за время жизни монитора.
    pub fn request_counts(&self) -> (u64, u64) {
        (
            self.inner.log.total_appended(),
            self.inner.failed.load(Ordering::Relaxed),
        )
    }

    pub fn get_requests(&self) -> Vec<NetworkRecord> {
        self.inner.log.all()
    }

    pub fn get_failed_requests(&self) -> Vec<NetworkRecord> {
        self.inner.log.query(NetworkRecord::is_failed)
    }

    pub fn get_request(&self, id: &str) -> Option<NetworkRecord> {
        self.inner.log.recent_matching(1, |record| record.id == id).pop()
    }

    pub fn recent_requests(&self, n: usize) -> Vec<NetworkRecord> {
        self.inner.log.recent(n)
    }

    pub fn clear_requests(&self) {
        self.inner.log.clear();
    }

    /// Подписка на отправку и завершение запросов.
    pub fn on_request(
        &self,
        listener: impl Fn(&NetworkRecord) + Send + Sync + 'static,
    ) -> Subscription {
        if self.state() == MonitorState::Destroyed {
            return Subscription::detached();
        }
        self.inner.log.subscribe(listener)
    }

    pub fn set_error_hook(&self, hook: impl Fn(&DiagnosticsError) + Send + Sync + 'static) {
        self.inner.log.set_error_hook(hook);
    }

    pub fn is_intercepting(&self) -> bool {
        lock(&self.inner.installed).is_some()
    }
}

impl Monitor for NetworkMonitor {
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
        if let Some(installed) = lock(&self.inner.installed).take() {
            installed.host.replace_fetch(installed.original_fetch);
            installed.host.replace_callback(installed.original_callback);
            installed.host.release();
        }
        self.inner.log.clear();
        self.inner.log.unsubscribe_all();
    }
}

impl ResourceTimingSource for NetworkMonitor {
    fn resource_timings(&self) -> Vec<ResourceTiming> {
        self.inner
            .log
            .query(NetworkRecord::is_complete)
            .into_iter()
            .map(|record| ResourceTiming {
                name: record.url,
                initiator: match record.transport {
                    TransportKind::Fetch => "fetch".to_string(),
                    TransportKind::Callback => "callback".to_string(),
                },
                start_time: record.start_time,
                duration_ms: record.duration_ms.unwrap_or(0.0),
                status: record.status,
            })
            .collect()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        // Хост не должен остаться с обёртками мёртвого монитора.
        self.destroy();
    }
}

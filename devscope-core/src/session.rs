//! Сессия отладки: движок ошибок и три монитора из одной конфигурации.

use crate::config::Config;
use crate::dna::{
    AiClassifier, AnalysisResponse, CaptureContext, CapturedError, ErrorDnaEngine, ErrorFilter,
    ErrorRecord,
};
use crate::error::DiagnosticsError;
use crate::events::Subscription;
use crate::graph::{
    DependencyGraphBuilder, FsSourceReader, GraphLimits, ModuleParser, RegexModuleParser,
    SourceReader,
};
use crate::monitors::{
    HttpRequest, HttpResponse, MemoryProbe, Monitor, MonitorState, NetworkMonitor, NetworkRecord,
    PerformanceMonitor, PerformancePayload, PerformanceSample, SampleKind, StateTransition,
    StateTransitionMonitor, TransitionEvent, TransportKind, TransportSlots,
};
use crate::stack::StackTraceParser;
use crate::SessionStats;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Сериализованное событие инструментированного приложения.
///
/// Используется воспроизведением JSONL-журнала демоном и HTTP-приёмом событий.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    Error {
        error: CapturedError,
        #[serde(default)]
        context: Option<CaptureContext>,
    },
    Request {
        request: HttpRequest,
        #[serde(default)]
        transport: Option<TransportKind>,
        #[serde(default)]
        response: Option<HttpResponse>,
        /// Текст ошибки транспорта, если запрос не дошёл.
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    Measure {
        name: String,
        duration_ms: f64,
    },
    State(TransitionEvent),
    Paint,
}

/// Сессия отладки.
pub struct DebugSession {
    engine: ErrorDnaEngine,
    network: Arc<NetworkMonitor>,
    performance: PerformanceMonitor,
    state: StateTransitionMonitor,
    closed: AtomicBool,
    ingested: AtomicU64,
    rejected: AtomicU64,
}

impl DebugSession {
    /// Сессия, читающая исходники с диска от `graph.source_root`.
    pub fn new(config: &Config) -> Self {
        Self::with_sources(
            config,
            Arc::new(FsSourceReader::new(&config.graph.source_root)),
            Arc::new(RegexModuleParser::new()),
        )
    }

    pub fn with_sources(
        config: &Config,
        reader: Arc<dyn SourceReader>,
        parser: Arc<dyn ModuleParser>,
    ) -> Self {
        let graphs = Arc::new(DependencyGraphBuilder::new(
            reader,
            parser,
            GraphLimits {
                max_depth: config.graph.max_depth,
                max_fan_out: config.graph.max_fan_out,
            },
        ));
        let stack_parser = StackTraceParser::new(
            config.stack.project_root.clone(),
            config.stack.dependency_markers.clone(),
        );

        let network = Arc::new(NetworkMonitor::new(config.network.clone()));
        let performance = PerformanceMonitor::new(config.performance.clone());
        performance.set_resource_source(network.clone());

        Self {
            engine: ErrorDnaEngine::new(stack_parser, graphs, config.errors.clone()),
            network,
            performance,
            state: StateTransitionMonitor::new(config.state.clone()),
            closed: AtomicBool::new(false),
            ingested: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn AiClassifier>) -> Self {
        self.engine.set_classifier(classifier);
        self
    }

    /// Заменяет источник памяти. Действует только до [`Self::start`].
    pub fn with_memory_probe(mut self, config: &Config, probe: Arc<dyn MemoryProbe>) -> Self {
        self.performance = PerformanceMonitor::with_probe(config.performance.clone(), probe);
        self.performance.set_resource_source(self.network.clone());
        self
    }

    /// Запускает мониторы. При `host` сетевой монитор перехватывает его запросы.
    ///
    /// Ошибка перехвата отключает только сетевой монитор; остальные мониторы
    /// к этому моменту уже запущены.
    pub fn start(&self, host: Option<&Arc<TransportSlots>>) -> Result<(), DiagnosticsError> {
        self.performance.start();
        self.state.start();
        match host {
            Some(host) => self.network.install(host)?,
            None => {
                self.network.start();
            }
        }
        info!("debug session started");
        Ok(())
    }

    /// Останавливает все мониторы. Идемпотентно.
    pub fn destroy(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.network.destroy();
        self.performance.destroy();
        self.state.destroy();
        info!("debug session destroyed");
    }

    pub fn monitor_states(&self) -> [(&'static str, MonitorState); 3] {
        [
            (self.network.name(), self.network.state()),
            (self.performance.name(), self.performance.state()),
            (self.state.name(), self.state.state()),
        ]
    }

    pub fn engine(&self) -> &ErrorDnaEngine {
        &self.engine
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn performance(&self) -> &PerformanceMonitor {
        &self.performance
    }

    pub fn state_monitor(&self) -> &StateTransitionMonitor {
        &self.state
    }

    // Ошибки.

    pub async fn capture_error(
        &self,
        error: CapturedError,
        context: Option<CaptureContext>,
    ) -> ErrorRecord {
        self.engine.capture_error(error, context).await
    }

    pub fn get_errors(&self, filter: Option<&ErrorFilter>) -> Vec<ErrorRecord> {
        self.engine.get_errors(filter)
    }

    pub fn get_error(&self, id: &str) -> Option<ErrorRecord> {
        self.engine.get_error(id)
    }

    pub fn resolve_error(&self, id: &str) -> Option<ErrorRecord> {
        self.engine.resolve_error(id)
    }

    pub fn delete_error(&self, id: &str) -> bool {
        self.engine.delete_error(id)
    }

    pub fn clear_errors(&self) {
        self.engine.clear_errors();
    }

    pub fn on_error(&self, listener: impl Fn(&ErrorRecord) + Send + Sync + 'static) -> Subscription {
        self.engine.on_error(listener)
    }

    pub async fn analyze_error(&self, id: &str) -> Option<AnalysisResponse> {
        self.engine.analyze_error(id).await
    }

    // Сеть.

    pub fn get_requests(&self) -> Vec<NetworkRecord> {
        self.network.get_requests()
    }

    pub fn clear_requests(&self) {
        self.network.clear_requests();
    }

    pub fn on_request(
        &self,
        listener: impl Fn(&NetworkRecord) + Send + Sync + 'static,
    ) -> Subscription {
        self.network.on_request(listener)
    }

    // Производительность.

    pub fn start_measure(&self, name: &str) {
        self.performance.start_measure(name);
    }

    pub fn end_measure(&self, name: &str) -> Option<f64> {
        self.performance.end_measure(name)
    }

    pub fn get_samples(&self, kind: Option<SampleKind>) -> Vec<PerformanceSample> {
        self.performance.get_samples(kind)
    }

    pub fn clear_samples(&self) {
        self.performance.clear_samples();
    }

    pub fn on_sample(
        &self,
        listener: impl Fn(&PerformanceSample) + Send + Sync + 'static,
    ) -> Subscription {
        self.performance.on_sample(listener)
    }

    // Состояние.

    pub fn get_transitions(&self) -> Vec<StateTransition> {
        self.state.get_transitions()
    }

    pub fn clear_transitions(&self) {
        self.state.clear_transitions();
    }

    pub fn on_transition(
        &self,
        listener: impl Fn(&StateTransition) + Send + Sync + 'static,
    ) -> Subscription {
        self.state.on_transition(listener)
    }

    /// Принимает сериализованное событие. `false`, если соответствующий монитор не активен.
    pub async fn ingest(&self, event: SessionEvent) -> bool {
        let accepted = match event {
            SessionEvent::Error { error, context } => {
                // У движка ошибок нет жизненного цикла: его закрывает сессия.
                if self.closed.load(Ordering::SeqCst) {
                    false
                } else {
                    self.engine.capture_error(error, context).await;
                    true
                }
            }
            SessionEvent::Request {
                request,
                transport,
                response,
                error,
                duration_ms,
            } => {
                let end = Utc::now();
                let elapsed = duration_ms
                    .filter(|ms| ms.is_finite() && *ms >= 0.0)
                    .map(|ms| ChronoDuration::microseconds((ms * 1000.0) as i64))
                    .unwrap_or_else(ChronoDuration::zero);
                let Some(start) = end.checked_sub_signed(elapsed) else {
                    debug!("session: request duration {duration_ms:?} out of range");
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return false;
                };
                let mut record = NetworkRecord::issued(
                    &request,
                    transport.unwrap_or(TransportKind::Fetch),
                    start,
                );
                record.request_body = request.body.clone();
                record.status = response.as_ref().map(|r| r.status);
                record.response_body = response.and_then(|r| r.body);
                record.error = error;
                record.complete_at(end);
                self.network.record(record)
            }
            SessionEvent::Measure { name, duration_ms } => self
                .performance
                .record(PerformancePayload::Measure { name, duration_ms }),
            SessionEvent::State(transition) => self.state.record_transition(transition).is_some(),
            SessionEvent::Paint => self.performance.mark_first_paint().is_some(),
        };

        if accepted {
            self.ingested.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("session: event rejected");
        }
        accepted
    }

    /// Снимок статистики сессии.
    pub fn stats(&self) -> SessionStats {
        let (errors_captured, errors_repeated) = self.engine.capture_counts();
        let (requests, failed_requests) = self.network.request_counts();
        SessionStats {
            errors_captured,
            errors_repeated,
            distinct_errors: self.engine.error_count() as u64,
            requests,
            failed_requests,
            samples: self.performance.total_samples(),
            transitions: self.state.total_transitions(),
            events_ingested: self.ingested.load(Ordering::Relaxed),
            events_rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemorySourceReader;
    use crate::monitors::MemoryReading;
    use serde_json::json;

    struct FixedProbe;

    impl MemoryProbe for FixedProbe {
        fn current_memory(&self) -> Option<MemoryReading> {
            Some(MemoryReading {
                used_bytes: 1,
                total_bytes: None,
            })
        }
    }

    fn session() -> DebugSession {
        let mut config = Config::default();
        config.performance.memory_sample_interval_ms = 0;
        let session = DebugSession::with_sources(
            &config,
            Arc::new(MemorySourceReader::new()),
            Arc::new(RegexModuleParser::new()),
        )
        .with_memory_probe(&config, Arc::new(FixedProbe));
        session.start(None).expect("start");
        session
    }

    #[test]
    fn test_session_event_deserialization() {
        let event: SessionEvent = serde_json::from_value(json!({
            "type": "state",
            "origin": "redux",
            "action_label": "add",
            "previous_state": {"n": 1},
            "next_state": {"n": 2}
        }))
        .expect("state event");
        assert!(matches!(event, SessionEvent::State(_)));

        let event: SessionEvent =
            serde_json::from_value(json!({"type": "paint"})).expect("paint event");
        assert_eq!(event, SessionEvent::Paint);

        let event: SessionEvent = serde_json::from_value(json!({
            "type": "request",
            "request": {"url": "/api", "method": "get"},
            "response": {"status": 500},
            "duration_ms": 12.0
        }))
        .expect("request event");
        assert!(matches!(event, SessionEvent::Request { .. }));
    }

    #[tokio::test]
    async fn test_ingest_routes_events_and_counts_them() {
        let session = session();

        assert!(
            session
                .ingest(SessionEvent::Error {
                    error: CapturedError::new("boom"),
                    context: None,
                })
                .await
        );
        assert!(
            session
                .ingest(SessionEvent::Error {
                    error: CapturedError::new("boom"),
                    context: None,
                })
                .await
        );
        assert!(
            session
                .ingest(SessionEvent::Request {
                    request: HttpRequest::get("/api/users"),
                    transport: None,
                    response: Some(HttpResponse::new(503)),
                    error: None,
                    duration_ms: Some(25.0),
                })
                .await
        );
        assert!(
            session
                .ingest(SessionEvent::Measure {
                    name: "render".to_string(),
                    duration_ms: 4.0,
                })
                .await
        );
        assert!(
            session
                .ingest(SessionEvent::State(TransitionEvent {
                    origin: crate::monitors::StateOrigin::Context,
                    component_name: Some("Theme".to_string()),
                    action_label: None,
                    previous_state: json!({"dark": false}),
                    next_state: json!({"dark": true}),
                }))
                .await
        );
        assert!(session.ingest(SessionEvent::Paint).await);
        assert!(!session.ingest(SessionEvent::Paint).await);

        let requests = session.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].duration_ms, Some(25.0));
        assert_eq!(requests[0].status, Some(503));

        let stats = session.stats();
        assert_eq!(stats.errors_captured, 2);
        assert_eq!(stats.errors_repeated, 1);
        assert_eq!(stats.distinct_errors, 1);
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.transitions, 1);
        assert_eq!(stats.events_ingested, 6);
        assert_eq!(stats.events_rejected, 1);
    }

    struct StaticClassifier;

    #[async_trait::async_trait]
    impl AiClassifier for StaticClassifier {
        async fn analyze(
            &self,
            _request: crate::dna::AnalysisRequest,
        ) -> Result<AnalysisResponse, DiagnosticsError> {
            Ok(AnalysisResponse {
                explanation: "null deref".to_string(),
                suggested_fix: None,
                confidence: 0.5,
                related_issues: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_session_with_classifier_analyzes_errors() {
        let session = session().with_classifier(Arc::new(StaticClassifier));
        let record = session
            .capture_error(CapturedError::new("boom"), None)
            .await;

        let analysis = session.analyze_error(&record.id).await.expect("analysis");
        assert_eq!(analysis.explanation, "null deref");
        assert!(session
            .get_error(&record.id)
            .and_then(|r| r.ai_analysis)
            .is_some());
    }

    #[tokio::test]
    async fn test_ingest_rejects_out_of_range_request_duration() {
        let session = session();

        let accepted = session
            .ingest(SessionEvent::Request {
                request: HttpRequest::get("/api/slow"),
                transport: None,
                response: Some(HttpResponse::new(200)),
                error: None,
                duration_ms: Some(1e20),
            })
            .await;

        assert!(!accepted);
        assert!(session.get_requests().is_empty());
        assert_eq!(session.stats().events_rejected, 1);

        // Отрицательная длительность считается нулевой.
        assert!(
            session
                .ingest(SessionEvent::Request {
                    request: HttpRequest::get("/api/fast"),
                    transport: None,
                    response: Some(HttpResponse::new(200)),
                    error: None,
                    duration_ms: Some(-5.0),
                })
                .await
        );
        assert_eq!(session.get_requests()[0].duration_ms, Some(0.0));
    }

    #[tokio::test]
    async fn test_destroy_stops_every_monitor() {
        let session = session();
        session.start_measure("x");
        session.destroy();
        session.destroy();

        for (_, state) in session.monitor_states() {
            assert_eq!(state, MonitorState::Destroyed);
        }
        assert_eq!(session.end_measure("x"), None);
        assert!(
            !session
                .ingest(SessionEvent::Error {
                    error: CapturedError::new("late"),
                    context: None,
                })
                .await
        );
        assert!(session.get_transitions().is_empty());
    }
}

//! Error DNA: превращение сырой ошибки в дедуплицированную запись.
//!
//! Конвейер захвата:
//! 1. стек разбирается в кадры, каноническое место - первый пользовательский кадр;
//! 2. новая ошибка сравнивается с сохранёнными по верхним кадрам;
//! 3. повтор увеличивает частоту и, возможно, поднимает severity;
//! 4. новая ошибка классифицируется, обогащается графом зависимостей и
//!    сохраняется в ограниченное LRU-хранилище.
//!
//! Блокировка хранилища не удерживается во время построения графа и
//! AI-анализа, поэтому перед вставкой поиск похожей записи повторяется.

pub mod ai;
pub mod classify;
pub mod record;
pub mod similarity;

pub use ai::{AiClassifier, AnalysisRequest, AnalysisResponse};
pub use classify::{classify, extract_component};
pub use record::{
    CaptureContext, CapturedError, ErrorFilter, ErrorKind, ErrorLocation, ErrorOrigin,
    ErrorRecord, Severity,
};
pub use similarity::{fingerprint, SimilarityPolicy};

use crate::config::ErrorsConfig;
use crate::error::{lock, DiagnosticsError};
use crate::events::{Subscribers, Subscription};
use crate::graph::{DependencyGraph, DependencyGraphBuilder};
use crate::stack::{StackFrame, StackTraceParser};
use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type ErrorStore = Arc<Mutex<LruCache<String, ErrorRecord>>>;

/// Итог захвата: запись и признак повтора.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub record: ErrorRecord,
    pub is_repeat: bool,
}

/// Движок дедупликации и оценки ошибок.
pub struct ErrorDnaEngine {
    parser: StackTraceParser,
    graphs: Arc<DependencyGraphBuilder>,
    classifier: Option<Arc<dyn AiClassifier>>,
    settings: ErrorsConfig,
    policy: SimilarityPolicy,
    store: ErrorStore,
    subscribers: Subscribers<ErrorRecord>,
    captured: AtomicU64,
    repeats: AtomicU64,
}

impl ErrorDnaEngine {
    pub fn new(
        parser: StackTraceParser,
        graphs: Arc<DependencyGraphBuilder>,
        settings: ErrorsConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(settings.max_records).unwrap_or(NonZeroUsize::MIN);
        let policy = SimilarityPolicy {
            frames: settings.similarity_frames.max(1),
            min_matching: settings.min_matching_frames.max(1),
        };
        Self {
            parser,
            graphs,
            classifier: None,
            settings,
            policy,
            store: Arc::new(Mutex::new(LruCache::new(capacity))),
            subscribers: Subscribers::new(),
            captured: AtomicU64::new(0),
            repeats: AtomicU64::new(0),
        }
    }

    /// Подключает AI-классификатор.
    pub fn with_classifier(mut self, classifier: Arc<dyn AiClassifier>) -> Self {
        self.set_classifier(classifier);
        self
    }

    pub fn set_classifier(&mut self, classifier: Arc<dyn AiClassifier>) {
        self.classifier = Some(classifier);
    }

    pub fn graphs(&self) -> &Arc<DependencyGraphBuilder> {
        &self.graphs
    }

    /// Захватывает ошибку и возвращает созданную или обновлённую запись.
    pub async fn capture_error(
        &self,
        error: CapturedError,
        context: Option<CaptureContext>,
    ) -> ErrorRecord {
        self.capture(error, context).await.record
    }

    /// То же, что [`Self::capture_error`], с признаком повтора.
    pub async fn capture(
        &self,
        error: CapturedError,
        context: Option<CaptureContext>,
    ) -> CaptureOutcome {
        let frames = error
            .stack
            .as_deref()
            .map(|stack| self.parser.parse(stack))
            .unwrap_or_default();
        let kind = classify(error.kind_hint.as_deref(), &error.message);

        if let Some(record) = self.register_repeat(kind, &error, &frames) {
            return self.finish(record, true);
        }

        let mut location = canonical_location(&frames);
        location.component = context
            .and_then(|ctx| ctx.component)
            .or_else(|| extract_component(&location.function_name));

        let dependency_graph = self.build_graph(&location).await;

        // Пока строился граф, такую же ошибку мог сохранить другой производитель.
        if let Some(record) = self.register_repeat(kind, &error, &frames) {
            return self.finish(record, true);
        }

        let now = Utc::now();
        let record = {
            let mut store = lock(&self.store);
            let mut id = fingerprint(kind, &error.message, &frames, self.policy.frames);
            if store.contains(&id) {
                let base = id.clone();
                let mut n = 1;
                while store.contains(&id) {
                    id = format!("{base}-{n}");
                    n += 1;
                }
            }

            let record = ErrorRecord {
                id: id.clone(),
                first_occurrence: now,
                last_occurrence: now,
                frequency: 1,
                severity: self.severity_for(error.origin, 1),
                resolved: false,
                kind,
                message: error.message,
                location,
                stack_frames: frames,
                dependency_graph,
                ai_analysis: None,
            };
            if let Some((evicted, _)) = store.push(id, record.clone()) {
                if evicted != record.id {
                    debug!("error store full, evicted {evicted}");
                }
            }
            record
        };

        info!(
            "new error {} ({}): {}",
            record.id,
            record.kind.as_str(),
            record.message
        );

        if self.settings.auto_analyze {
            self.spawn_analysis(&record.id);
        }

        self.finish(record, false)
    }

    fn finish(&self, record: ErrorRecord, is_repeat: bool) -> CaptureOutcome {
        self.captured.fetch_add(1, Ordering::Relaxed);
        if is_repeat {
            self.repeats.fetch_add(1, Ordering::Relaxed);
        }
        self.subscribers.notify(&record);
        CaptureOutcome { record, is_repeat }
    }

    /// Находит похожую запись и обновляет её. Блокировка снимается до уведомлений.
    fn register_repeat(
        &self,
        kind: ErrorKind,
        error: &CapturedError,
        frames: &[StackFrame],
    ) -> Option<ErrorRecord> {
        let mut store = lock(&self.store);

        // Итерация LRU идёт от недавно виденных к давним, поэтому при равном
        // last_occurrence побеждает первый найденный.
        let mut best: Option<(&String, &ErrorRecord)> = None;
        for (id, record) in store.iter() {
            if !self.is_similar(record, kind, &error.message, frames) {
                continue;
            }
            match best {
                Some((_, current)) if current.last_occurrence >= record.last_occurrence => {}
                _ => best = Some((id, record)),
            }
        }
        let id = best.map(|(id, _)| id.clone())?;

        let record = store.get_mut(&id)?;
        record.frequency += 1;
        record.last_occurrence = Utc::now();
        if !record.resolved {
            let computed = self.severity_for(error.origin, record.frequency);
            record.severity = record.severity.max(computed);
        }
        debug!("error {} repeated, frequency {}", record.id, record.frequency);
        Some(record.clone())
    }

    fn is_similar(
        &self,
        record: &ErrorRecord,
        kind: ErrorKind,
        message: &str,
        frames: &[StackFrame],
    ) -> bool {
        if frames.is_empty() && record.stack_frames.is_empty() {
            return record.kind == kind && record.message == message;
        }
        self.policy.frames_match(frames, &record.stack_frames)
    }

    /// Severity для источника ошибки с учётом порога эскалации.
    fn severity_for(&self, origin: ErrorOrigin, frequency: u64) -> Severity {
        let base = match origin {
            ErrorOrigin::Uncaught => Severity::High,
            ErrorOrigin::ComponentBoundary | ErrorOrigin::Manual => Severity::Medium,
        };
        if frequency >= self.settings.escalation_frequency {
            base.raised()
        } else {
            base
        }
    }

    async fn build_graph(&self, location: &ErrorLocation) -> DependencyGraph {
        if !location.is_known() {
            return DependencyGraph::new();
        }
        match self.graphs.try_dependency_graph(&location.file).await {
            Ok(graph) => graph,
            Err(err) => {
                let err = DiagnosticsError::Enrichment(format!(
                    "dependency graph for {}: {err}",
                    location.file
                ));
                warn!("{err}");
                DependencyGraph::new()
            }
        }
    }

    fn spawn_analysis(&self, id: &str) {
        let Some(classifier) = self.classifier.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("auto analysis skipped for {id}: no tokio runtime");
            return;
        };
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        handle.spawn(async move {
            enrich(&store, classifier.as_ref(), &id).await;
        });
    }

    /// Запускает AI-анализ записи и прикрепляет результат.
    ///
    /// `None`, если записи нет, классификатор не подключён или анализ не удался.
    pub async fn analyze_error(&self, id: &str) -> Option<AnalysisResponse> {
        let classifier = self.classifier.clone()?;
        enrich(&self.store, classifier.as_ref(), id).await
    }

    /// Записи, подходящие под фильтр, от недавно виденных к давним.
    pub fn get_errors(&self, filter: Option<&ErrorFilter>) -> Vec<ErrorRecord> {
        lock(&self.store)
            .iter()
            .map(|(_, record)| record)
            .filter(|record| filter.map_or(true, |f| f.matches(record)))
            .cloned()
            .collect()
    }

    pub fn get_error(&self, id: &str) -> Option<ErrorRecord> {
        lock(&self.store).peek(id).cloned()
    }

    /// Помечает ошибку решённой и сбрасывает severity до `low`.
    pub fn resolve_error(&self, id: &str) -> Option<ErrorRecord> {
        let mut store = lock(&self.store);
        let record = store.peek_mut(id)?;
        record.resolved = true;
        record.severity = Severity::Low;
        Some(record.clone())
    }

    pub fn delete_error(&self, id: &str) -> bool {
        lock(&self.store).pop(id).is_some()
    }

    pub fn clear_errors(&self) {
        lock(&self.store).clear();
    }

    pub fn error_count(&self) -> usize {
        lock(&self.store).len()
    }

    /// Подписка на новые и повторившиеся ошибки.
    pub fn on_error(&self, listener: impl Fn(&ErrorRecord) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(listener)
    }

    pub fn set_error_hook(&self, hook: impl Fn(&DiagnosticsError) + Send + Sync + 'static) {
        self.subscribers.set_error_hook(hook);
    }

    /// Количество захватов (включая повторы) и повторов.
    pub fn capture_counts(&self) -> (u64, u64) {
        (
            self.captured.load(Ordering::Relaxed),
            self.repeats.load(Ordering::Relaxed),
        )
    }
}

fn canonical_location(frames: &[StackFrame]) -> ErrorLocation {
    frames
        .iter()
        .find(|frame| frame.is_user_code)
        .or_else(|| frames.first())
        .map(ErrorLocation::from_frame)
        .unwrap_or_else(ErrorLocation::unknown)
}

async fn enrich(
    store: &Mutex<LruCache<String, ErrorRecord>>,
    classifier: &dyn AiClassifier,
    id: &str,
) -> Option<AnalysisResponse> {
    let request = {
        let store = lock(store);
        let record = store.peek(id)?;
        analysis_request(record)
    };

    match classifier.analyze(request).await {
        Ok(response) => {
            let mut store = lock(store);
            // Запись могли удалить, пока шёл анализ.
            let record = store.peek_mut(id)?;
            record.ai_analysis = Some(response.clone());
            debug!("attached AI analysis to {id}");
            Some(response)
        }
        Err(err) => {
            warn!("{}", DiagnosticsError::Enrichment(format!("AI analysis for {id}: {err}")));
            None
        }
    }
}

fn analysis_request(record: &ErrorRecord) -> AnalysisRequest {
    let top_frames: Vec<String> = record
        .stack_frames
        .iter()
        .take(3)
        .map(|f| format!("{} ({}:{}:{})", f.function_name, f.file, f.line, f.column))
        .collect();
    AnalysisRequest {
        kind: "error".to_string(),
        context: serde_json::json!({
            "kind": record.kind.as_str(),
            "message": record.message,
            "location": record.location,
            "component": record.location.component,
            "top_frames": top_frames,
            "frequency": record.frequency,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphLimits, MemorySourceReader, RegexModuleParser};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn engine_with(settings: ErrorsConfig, reader: MemorySourceReader) -> ErrorDnaEngine {
        let graphs = Arc::new(DependencyGraphBuilder::new(
            Arc::new(reader),
            Arc::new(RegexModuleParser::new()),
            GraphLimits::default(),
        ));
        ErrorDnaEngine::new(StackTraceParser::default(), graphs, settings)
    }

    fn engine() -> ErrorDnaEngine {
        engine_with(ErrorsConfig::default(), MemorySourceReader::new())
    }

    fn stack(frames: &[(&str, &str, u32)]) -> String {
        let mut text = String::from("Error: boom\n");
        for (function, file, line) in frames {
            text.push_str(&format!("    at {function} ({file}:{line}:5)\n"));
        }
        text
    }

    fn error(frames: &[(&str, &str, u32)]) -> CapturedError {
        CapturedError::new("boom").with_stack(stack(frames))
    }

    struct FakeClassifier {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AiClassifier for FakeClassifier {
        async fn analyze(
            &self,
            request: AnalysisRequest,
        ) -> Result<AnalysisResponse, DiagnosticsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DiagnosticsError::Enrichment("backend down".to_string()));
            }
            Ok(AnalysisResponse {
                explanation: format!("explained {}", request.context["message"]),
                suggested_fix: Some("check for null".to_string()),
                confidence: 0.8,
                related_issues: vec![],
            })
        }
    }

    #[tokio::test]
    async fn test_line_shift_dedupes() {
        let engine = engine();
        let first = engine
            .capture_error(error(&[("handler", "src/a.ts", 10)]), None)
            .await;
        let second = engine
            .capture_error(error(&[("handler", "src/a.ts", 12)]), None)
            .await;

        assert_eq!(first.id, second.id);
        assert_eq!(second.frequency, 2);
        assert!(second.last_occurrence >= first.last_occurrence);
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.capture_counts(), (2, 1));
    }

    #[tokio::test]
    async fn test_two_of_three_frames_dedupe_and_disjoint_stacks_do_not() {
        let engine = engine();
        engine
            .capture_error(
                error(&[("a", "src/a.ts", 1), ("b", "src/b.ts", 2), ("c", "src/c.ts", 3)]),
                None,
            )
            .await;
        let repeat = engine
            .capture_error(
                error(&[("x", "src/x.ts", 1), ("b", "src/b.ts", 9), ("c", "src/c.ts", 9)]),
                None,
            )
            .await;
        assert_eq!(repeat.frequency, 2);

        engine
            .capture_error(
                error(&[("p", "src/p.ts", 1), ("q", "src/q.ts", 2), ("r", "src/r.ts", 3)]),
                None,
            )
            .await;
        assert_eq!(engine.error_count(), 2);
    }

    #[tokio::test]
    async fn test_frameless_errors_match_on_kind_and_message() {
        let engine = engine();
        engine.capture_error(CapturedError::new("boom"), None).await;
        let repeat = engine.capture_error(CapturedError::new("boom"), None).await;
        assert_eq!(repeat.frequency, 2);
        assert_eq!(repeat.location, ErrorLocation::unknown());

        engine.capture_error(CapturedError::new("other"), None).await;
        assert_eq!(engine.error_count(), 2);
    }

    #[tokio::test]
    async fn test_canonical_location_prefers_user_code() {
        let engine = engine();
        let record = engine
            .capture_error(
                error(&[
                    ("dispatch", "/app/node_modules/react-dom/index.js", 100),
                    ("UserCard", "src/components/UserCard.tsx", 42),
                ]),
                None,
            )
            .await;

        assert_eq!(record.location.file, "src/components/UserCard.tsx");
        assert_eq!(record.location.line, 42);
        assert_eq!(record.location.component.as_deref(), Some("UserCard"));
        assert_eq!(record.stack_frames.len(), 2);
    }

    #[tokio::test]
    async fn test_context_component_overrides_derived() {
        let engine = engine();
        let record = engine
            .capture_error(
                error(&[("UserCard", "src/UserCard.tsx", 1)]),
                Some(CaptureContext {
                    component: Some("ProfilePage".to_string()),
                }),
            )
            .await;
        assert_eq!(record.location.component.as_deref(), Some("ProfilePage"));
    }

    #[tokio::test]
    async fn test_severity_escalates_and_resolution_lowers_it() {
        let settings = ErrorsConfig {
            escalation_frequency: 3,
            ..ErrorsConfig::default()
        };
        let engine = engine_with(settings, MemorySourceReader::new());
        let frames = [("f", "src/f.ts", 1)];

        let first = engine.capture_error(error(&frames), None).await;
        assert_eq!(first.severity, Severity::Medium);

        engine.capture_error(error(&frames), None).await;
        let third = engine.capture_error(error(&frames), None).await;
        assert_eq!(third.frequency, 3);
        assert_eq!(third.severity, Severity::High);

        let resolved = engine.resolve_error(&third.id).expect("resolved");
        assert!(resolved.resolved);
        assert_eq!(resolved.severity, Severity::Low);

        // Повтор после решения считается, но не переоткрывает запись.
        let again = engine.capture_error(error(&frames), None).await;
        assert_eq!(again.frequency, 4);
        assert!(again.resolved);
        assert_eq!(again.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_uncaught_errors_start_high() {
        let engine = engine();
        let record = engine
            .capture_error(
                CapturedError::new("fatal").with_origin(ErrorOrigin::Uncaught),
                None,
            )
            .await;
        assert_eq!(record.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_dependency_graph_is_attached() {
        let reader = MemorySourceReader::new().with_file(
            "src/Widget.tsx",
            "import React from 'react';\nexport default function Widget() {}\n",
        );
        let engine = engine_with(ErrorsConfig::default(), reader);

        let record = engine
            .capture_error(error(&[("Widget", "src/Widget.tsx", 3)]), None)
            .await;
        assert!(record.dependency_graph.contains_node("react"));

        // Отсутствующий файл даёт пустой граф, а не сбой захвата.
        let missing = engine
            .capture_error(error(&[("Other", "src/Other.tsx", 3)]), None)
            .await;
        assert!(missing.dependency_graph.is_empty());
    }

    #[tokio::test]
    async fn test_store_evicts_least_recently_seen() {
        let settings = ErrorsConfig {
            max_records: 2,
            ..ErrorsConfig::default()
        };
        let engine = engine_with(settings, MemorySourceReader::new());

        let a = engine.capture_error(error(&[("a", "src/a.ts", 1)]), None).await;
        let b = engine.capture_error(error(&[("b", "src/b.ts", 1)]), None).await;
        // Повтор `a` делает `b` самой давней.
        engine.capture_error(error(&[("a", "src/a.ts", 2)]), None).await;
        engine.capture_error(error(&[("c", "src/c.ts", 1)]), None).await;

        assert!(engine.get_error(&a.id).is_some());
        assert!(engine.get_error(&b.id).is_none());
        assert_eq!(engine.error_count(), 2);
    }

    #[tokio::test]
    async fn test_filter_delete_and_clear() {
        let engine = engine();
        let type_error = engine
            .capture_error(
                CapturedError::new("x is not a function").with_kind_hint("TypeError"),
                None,
            )
            .await;
        engine
            .capture_error(CapturedError::new("Failed to fetch"), None)
            .await;

        let only_type = ErrorFilter {
            kind: Some(ErrorKind::Type),
            ..ErrorFilter::default()
        };
        let found = engine.get_errors(Some(&only_type));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, type_error.id);
        assert_eq!(engine.get_errors(None).len(), 2);

        assert!(engine.delete_error(&type_error.id));
        assert!(!engine.delete_error(&type_error.id));
        engine.clear_errors();
        assert_eq!(engine.error_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_and_repeated_records() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = engine.on_error(move |record| lock(&sink).push(record.frequency));

        engine.capture_error(CapturedError::new("boom"), None).await;
        engine.capture_error(CapturedError::new("boom"), None).await;
        assert_eq!(*lock(&seen), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_analyze_error_attaches_response() {
        let classifier = Arc::new(FakeClassifier {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let engine = engine().with_classifier(classifier.clone());
        let record = engine.capture_error(CapturedError::new("boom"), None).await;

        let response = engine.analyze_error(&record.id).await.expect("analysis");
        assert_eq!(response.suggested_fix.as_deref(), Some("check for null"));
        let stored = engine.get_error(&record.id).expect("record");
        assert_eq!(stored.ai_analysis, Some(response));
        assert!(engine.analyze_error("missing").await.is_none());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_analysis_leaves_record_untouched() {
        let engine = engine().with_classifier(Arc::new(FakeClassifier {
            calls: AtomicUsize::new(0),
            fail: true,
        }));
        let record = engine.capture_error(CapturedError::new("boom"), None).await;
        assert!(engine.analyze_error(&record.id).await.is_none());
        assert!(engine.get_error(&record.id).expect("record").ai_analysis.is_none());

        let without = engine_with(ErrorsConfig::default(), MemorySourceReader::new());
        assert!(without.analyze_error(&record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_most_recently_seen_match_wins() {
        let engine = engine();
        let older = engine
            .capture_error(
                error(&[("p", "src/p.ts", 1), ("b", "src/b.ts", 2), ("c", "src/c.ts", 3)]),
                None,
            )
            .await;
        let newer = engine
            .capture_error(
                error(&[("q", "src/q.ts", 1), ("b", "src/b.ts", 2), ("z", "src/z.ts", 3)]),
                None,
            )
            .await;
        assert_ne!(older.id, newer.id);

        // Совпадает с обеими: с первой по верхнему кадру, со второй по двум из трёх.
        let both = || error(&[("p", "src/p.ts", 7), ("b", "src/b.ts", 2), ("z", "src/z.ts", 3)]);

        let repeat = engine.capture_error(both(), None).await;
        assert_eq!(repeat.id, newer.id);
        assert_eq!(engine.get_error(&newer.id).map(|r| r.frequency), Some(2));
        assert_eq!(engine.get_error(&older.id).map(|r| r.frequency), Some(1));

        // Повтор первой записи делает её самой свежей.
        engine
            .capture_error(
                error(&[("p", "src/p.ts", 1), ("b", "src/b.ts", 2), ("c", "src/c.ts", 3)]),
                None,
            )
            .await;
        let repeat = engine.capture_error(both(), None).await;
        assert_eq!(repeat.id, older.id);
        assert_eq!(engine.get_error(&older.id).map(|r| r.frequency), Some(3));
        assert_eq!(engine.get_error(&newer.id).map(|r| r.frequency), Some(2));
    }

    #[tokio::test]
    async fn test_auto_analyze_attaches_analysis_after_capture() {
        let classifier = Arc::new(FakeClassifier {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let engine = engine_with(
            ErrorsConfig {
                auto_analyze: true,
                ..ErrorsConfig::default()
            },
            MemorySourceReader::new(),
        )
        .with_classifier(classifier.clone());

        let record = engine.capture_error(CapturedError::new("boom"), None).await;
        assert!(record.ai_analysis.is_none());

        for _ in 0..10 {
            if engine
                .get_error(&record.id)
                .and_then(|r| r.ai_analysis)
                .is_some()
            {
                break;
            }
            tokio::task::yield_now().await;
        }

        let analysis = engine
            .get_error(&record.id)
            .and_then(|r| r.ai_analysis)
            .expect("analysis attached");
        assert_eq!(analysis.suggested_fix.as_deref(), Some("check for null"));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

        // Повтор не запускает анализ заново.
        engine.capture_error(CapturedError::new("boom"), None).await;
        tokio::task::yield_now().await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }
}

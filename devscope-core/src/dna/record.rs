//! Структуры записей об ошибках.

use super::ai::AnalysisResponse;
use crate::graph::DependencyGraph;
use crate::stack::{StackFrame, UNKNOWN_FUNCTION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Класс ошибки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Network,
    Type,
    Performance,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Type => "type",
            ErrorKind::Performance => "performance",
            ErrorKind::Runtime => "runtime",
        }
    }
}

/// Серьёзность ошибки. Порядок вариантов задаёт порядок сравнения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Следующий уровень; `Critical` остаётся `Critical`.
    pub fn raised(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

/// Откуда пришла ошибка.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOrigin {
    /// Перехвачена границей ошибок компонента.
    ComponentBoundary,
    /// Не перехвачена никем и дошла до верхнего уровня.
    Uncaught,
    /// Передана вручную через API.
    #[default]
    Manual,
}

/// Сырая ошибка от инструментированного приложения.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedError {
    /// Имя класса ошибки (`TypeError`, `NetworkError`, ...), если известно.
    #[serde(default)]
    pub kind_hint: Option<String>,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub origin: ErrorOrigin,
}

impl CapturedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind_hint: None,
            message: message.into(),
            stack: None,
            origin: ErrorOrigin::Manual,
        }
    }

    pub fn with_kind_hint(mut self, hint: impl Into<String>) -> Self {
        self.kind_hint = Some(hint.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_origin(mut self, origin: ErrorOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Дополнительный контекст захвата.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureContext {
    /// Имя компонента, если оно известно точнее, чем из стека.
    #[serde(default)]
    pub component: Option<String>,
}

/// Каноническое место ошибки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub function_name: String,
    pub component: Option<String>,
}

impl ErrorLocation {
    pub fn unknown() -> Self {
        Self {
            file: UNKNOWN_FUNCTION.to_string(),
            line: 0,
            column: 0,
            function_name: UNKNOWN_FUNCTION.to_string(),
            component: None,
        }
    }

    pub fn from_frame(frame: &StackFrame) -> Self {
        Self {
            file: frame.file.clone(),
            line: frame.line,
            column: frame.column,
            function_name: frame.function_name.clone(),
            component: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.file != UNKNOWN_FUNCTION && !self.file.is_empty()
    }
}

/// Запись об ошибке с дедупликацией.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: String,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub frequency: u64,
    pub severity: Severity,
    pub resolved: bool,
    pub kind: ErrorKind,
    pub message: String,
    pub location: ErrorLocation,
    pub stack_frames: Vec<StackFrame>,
    pub dependency_graph: DependencyGraph,
    pub ai_analysis: Option<AnalysisResponse>,
}

/// Фильтр выборки записей. Пустой фильтр пропускает всё.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorFilter {
    #[serde(default)]
    pub kind: Option<ErrorKind>,
    /// Минимальная серьёзность.
    #[serde(default)]
    pub min_severity: Option<Severity>,
    #[serde(default)]
    pub resolved: Option<bool>,
    /// Подстрока пути канонического файла.
    #[serde(default)]
    pub file: Option<String>,
}

impl ErrorFilter {
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        self.kind.map_or(true, |kind| record.kind == kind)
            && self.min_severity.map_or(true, |min| record.severity >= min)
            && self.resolved.map_or(true, |resolved| record.resolved == resolved)
            && self
                .file
                .as_deref()
                .map_or(true, |file| record.location.file.contains(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_raise() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Medium.raised(), Severity::High);
        assert_eq!(Severity::Critical.raised(), Severity::Critical);
    }

    #[test]
    fn test_captured_error_deserializes_with_defaults() {
        let err: CapturedError =
            serde_json::from_str(r#"{"message": "boom", "origin": "uncaught"}"#).expect("json");
        assert_eq!(err.message, "boom");
        assert_eq!(err.origin, ErrorOrigin::Uncaught);
        assert!(err.stack.is_none());

        let err: CapturedError = serde_json::from_str(r#"{"message": "x"}"#).expect("json");
        assert_eq!(err.origin, ErrorOrigin::Manual);
    }
}

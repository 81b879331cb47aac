//! Таксономия ошибок подсистемы диагностики.
//!
//! Ни одна из этих ошибок не должна доходить до отлаживаемого приложения:
//! монитор, которому не удалось установить перехват, отключается сам,
//! остальные ошибки только деградируют записи.

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Ошибки подсистемы диагностики.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// Монитор не может наблюдать свой сигнал (например, перехват уже установлен).
    #[error("capture failure in {monitor}: {reason}")]
    Capture {
        monitor: &'static str,
        reason: String,
    },

    /// Не удалось обогатить запись (граф зависимостей, AI-анализ).
    #[error("enrichment failure: {0}")]
    Enrichment(String),

    /// Подписчик завершился паникой.
    #[error("subscriber #{listener} panicked: {message}")]
    Subscriber { listener: u64, message: String },

    /// Ошибка чтения или разбора исходника.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Некорректная конфигурация.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Ошибки внешнего читателя исходников и парсера модулей.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse module {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Берёт блокировку, восстанавливая данные после паники другого владельца.
///
/// Колбэки подписчиков никогда не выполняются под блокировкой, поэтому
/// отравление возможно только при панике внутри самой библиотеки.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Текст полезной нагрузки паники для отчёта об ошибке подписчика.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_str_and_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_source_error_converts_into_diagnostics_error() {
        let err: DiagnosticsError = SourceError::NotFound("src/App.tsx".to_string()).into();
        assert_eq!(err.to_string(), "source file not found: src/App.tsx");
    }
}

//! DevScope: захват, классификация и корреляция runtime-аномалий
//! инструментированного клиентского приложения.
//!
//! Основные части:
//! - [`events`] - ограниченные журналы с подписчиками;
//! - [`stack`] - разбор стеков вызовов;
//! - [`graph`] - граф зависимостей исходного файла;
//! - [`dna`] - дедупликация и оценка ошибок;
//! - [`monitors`] - сеть, производительность, переходы состояния;
//! - [`session`] - сессия отладки, собирающая всё вместе;
//! - [`api`] - HTTP API снимков для слоя отображения.

pub mod api;
pub mod config;
pub mod dna;
pub mod error;
pub mod events;
pub mod graph;
pub mod monitors;
pub mod session;
pub mod stack;
pub mod utils;

pub use error::{DiagnosticsError, SourceError};
pub use session::{DebugSession, SessionEvent};

use tracing::info;

/// Статистика сессии отладки.
///
/// Снимок счётчиков за время жизни сессии: сколько ошибок захвачено и
/// сколько из них оказались повторами, сколько прошло запросов, замеров и
/// переходов состояния, сколько событий принято через ingestion.
///
/// # Примеры использования
///
/// ```no_run
/// use devscope_core::SessionStats;
///
/// let mut stats = SessionStats::new();
/// stats.errors_captured = 4;
/// stats.errors_repeated = 3;
/// stats.distinct_errors = 1;
///
/// assert_eq!(stats.average_error_frequency(), 4.0);
/// stats.log_stats();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionStats {
    /// Захваты ошибок, включая повторы
    pub errors_captured: u64,
    /// Захваты, слитые с уже известной ошибкой
    pub errors_repeated: u64,
    /// Различные ошибки в хранилище сейчас
    pub distinct_errors: u64,
    /// Запросы, прошедшие через сетевой монитор
    pub requests: u64,
    /// Запросы, завершившиеся ошибкой транспорта или статусом >= 400
    pub failed_requests: u64,
    /// Замеры производительности
    pub samples: u64,
    /// Переходы состояния
    pub transitions: u64,
    /// События, принятые через `ingest`
    pub events_ingested: u64,
    /// События, отклонённые через `ingest` (монитор не активен)
    pub events_rejected: u64,
}

impl SessionStats {
    /// Создаёт статистику с нулевыми значениями.
    pub fn new() -> Self {
        Self::default()
    }

    /// Средняя частота ошибки: захваты на одну различную ошибку.
    ///
    /// Если различных ошибок нет, возвращает 0.0.
    pub fn average_error_frequency(&self) -> f64 {
        if self.distinct_errors > 0 {
            self.errors_captured as f64 / self.distinct_errors as f64
        } else {
            0.0
        }
    }

    /// Доля неудачных запросов в диапазоне 0.0..=1.0.
    pub fn failed_request_ratio(&self) -> f64 {
        if self.requests > 0 {
            self.failed_requests as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Логирует статистику сессии на уровне `info!`.
    pub fn log_stats(&self) {
        info!(
            "Session stats: {} errors captured ({} repeats, {} distinct, avg frequency {:.2}), \
             {} requests ({} failed), {} samples, {} transitions, \
             ingested {} events ({} rejected)",
            self.errors_captured,
            self.errors_repeated,
            self.distinct_errors,
            self.average_error_frequency(),
            self.requests,
            self.failed_requests,
            self.samples,
            self.transitions,
            self.events_ingested,
            self.events_rejected
        );
    }
}

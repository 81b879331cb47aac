//! Интерфейс внешнего AI-классификатора.
//!
//! Классификатор передаётся движку при создании. Его ответы только
//! дополняют запись: сбой или отсутствие классификатора запись не меняет.

use crate::error::DiagnosticsError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Запрос на анализ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Что анализируется (`error`, ...).
    pub kind: String,
    /// Структурированный контекст: сообщение, место, верхние кадры.
    pub context: serde_json::Value,
}

/// Ответ классификатора.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub explanation: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub related_issues: Vec<String>,
}

/// Асинхронный классификатор, возвращающий структурированный текст.
#[async_trait]
pub trait AiClassifier: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResponse, DiagnosticsError>;
}

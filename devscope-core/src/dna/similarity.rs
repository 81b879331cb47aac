//! Сравнение стеков и вычисление отпечатков ошибок.

use super::record::ErrorKind;
use crate::stack::StackFrame;
use sha2::{Digest, Sha256};

/// Пороги сравнения стеков.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimilarityPolicy {
    /// Сколько верхних кадров сравнивается.
    pub frames: usize,
    /// Сколько кадров должно совпасть, если не совпал верхний.
    pub min_matching: usize,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            frames: 3,
            min_matching: 2,
        }
    }
}

impl SimilarityPolicy {
    /// Похожи ли два стека.
    ///
    /// Кадры сравниваются попозиционно по `(file, function_name)`, строка и
    /// колонка игнорируются. Стеки похожи, если совпал верхний кадр или не
    /// меньше `min_matching` из верхних `frames`. Пустые стеки этим правилом
    /// не сравниваются.
    pub fn frames_match(&self, a: &[StackFrame], b: &[StackFrame]) -> bool {
        let (Some(top_a), Some(top_b)) = (a.first(), b.first()) else {
            return false;
        };
        if top_a.same_site(top_b) {
            return true;
        }

        let agreeing = a
            .iter()
            .zip(b.iter())
            .take(self.frames)
            .filter(|(x, y)| x.same_site(y))
            .count();
        agreeing >= self.min_matching
    }
}

/// Отпечаток ошибки: первые 16 hex-символов SHA-256.
///
/// Для стека учитываются места верхних кадров и класс ошибки, для ошибки
/// без стека - класс и сообщение.
pub fn fingerprint(kind: ErrorKind, message: &str, frames: &[StackFrame], top: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());

    if frames.is_empty() {
        hasher.update(b"\0msg\0");
        hasher.update(message.as_bytes());
    } else {
        for frame in frames.iter().take(top) {
            hasher.update(b"\0");
            hasher.update(frame.file.as_bytes());
            hasher.update(b"#");
            hasher.update(frame.function_name.as_bytes());
        }
    }

    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

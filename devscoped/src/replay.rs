//! Воспроизведение журнала событий в формате JSON Lines.

use anyhow::{Context, Result};
use devscope_core::{DebugSession, SessionEvent};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Итог воспроизведения.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub accepted: usize,
    pub rejected: usize,
    /// Строки, которые не удалось разобрать как событие.
    pub malformed: usize,
}

/// Подаёт события из файла в сессию построчно.
///
/// Пустые строки и строки, начинающиеся с `#`, пропускаются. Неразобранная
/// строка не прерывает воспроизведение.
pub async fn replay_file(session: &DebugSession, path: &Path) -> Result<ReplayReport> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut report = ReplayReport::default();
    let mut line_no = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read replay file {}", path.display()))?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: SessionEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("replay: {}:{}: malformed event: {}", path.display(), line_no, e);
                report.malformed += 1;
                continue;
            }
        };
        if session.ingest(event).await {
            report.accepted += 1;
        } else {
            report.rejected += 1;
        }
    }

    info!(
        "replay: {} finished ({} accepted, {} rejected, {} malformed)",
        path.display(),
        report.accepted,
        report.rejected,
        report.malformed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscope_core::config::Config;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn session() -> DebugSession {
        let mut config = Config::default();
        config.performance.memory_sample_interval_ms = 0;
        let session = DebugSession::new(&config);
        session.start(None).expect("start");
        session
    }

    #[tokio::test]
    async fn test_replay_counts_lines() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "# recorded session").expect("write");
        writeln!(
            file,
            r#"{{"type":"error","error":{{"message":"boom","kind_hint":"TypeError"}}}}"#
        )
        .expect("write");
        writeln!(file).expect("write");
        writeln!(file, r#"{{"type":"measure","name":"render","duration_ms":3.5}}"#)
            .expect("write");
        writeln!(file, "not json").expect("write");
        writeln!(file, r#"{{"type":"paint"}}"#).expect("write");
        writeln!(file, r#"{{"type":"paint"}}"#).expect("write");

        let session = session();
        let report = replay_file(&session, file.path()).await.expect("replay");
        assert_eq!(
            report,
            ReplayReport {
                accepted: 3,
                rejected: 1,
                malformed: 1,
            }
        );
        assert_eq!(session.stats().errors_captured, 1);
    }

    #[tokio::test]
    async fn test_replay_missing_file_is_error() {
        let session = session();
        let err = replay_file(&session, Path::new("/nonexistent/devscope.jsonl"))
            .await
            .expect_err("missing file");
        assert!(err.to_string().contains("Failed to open replay file"));
    }
}

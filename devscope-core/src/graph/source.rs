//! Внешние источники для построения графа: чтение файлов и разбор модулей.

use crate::error::{lock, SourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Импорт из модуля.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpec {
    pub name: String,
    pub path: String,
    pub is_default: bool,
    pub is_type: bool,
}

/// Экспорт модуля.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSpec {
    pub name: String,
    pub is_default: bool,
    pub is_type: bool,
}

/// Результат разбора модуля.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub imports: Vec<ImportSpec>,
    pub exports: Vec<ExportSpec>,
}

/// Читатель исходных файлов.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Читает текст файла по нормализованному пути.
    async fn read_file(&self, path: &str) -> Result<String, SourceError>;
}

/// Парсер import/export выражений.
pub trait ModuleParser: Send + Sync {
    /// Разбирает текст модуля. `path` используется только для сообщений об ошибках.
    fn parse_module(&self, path: &str, source: &str) -> Result<ModuleInfo, SourceError>;
}

/// Читатель файлов с диска относительно корня проекта.
#[derive(Debug, Clone)]
pub struct FsSourceReader {
    root: PathBuf,
}

impl FsSourceReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceReader for FsSourceReader {
    async fn read_file(&self, path: &str) -> Result<String, SourceError> {
        let full = if path.starts_with('/') {
            PathBuf::from(path)
        } else {
            self.root.join(path)
        };

        match tokio::fs::read_to_string(&full).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(path.to_string()))
            }
            Err(e) => Err(SourceError::Io {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Читатель из памяти. Удобен для встроенных исходников и тестов.
#[derive(Debug, Default)]
pub struct MemorySourceReader {
    files: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
}

impl MemorySourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет файл (builder-стиль).
    pub fn with_file(self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&self, path: impl Into<String>, source: impl Into<String>) {
        lock(&self.files).insert(path.into(), source.into());
    }

    /// Количество обращений к `read_file`, включая неудачные.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for MemorySourceReader {
    async fn read_file(&self, path: &str) -> Result<String, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_fs_reader_reads_relative_to_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        let mut file = std::fs::File::create(dir.path().join("src/App.ts")).expect("create");
        file.write_all(b"export default 1;").expect("write");

        let reader = FsSourceReader::new(dir.path());
        let text = reader.read_file("src/App.ts").await.expect("read");
        assert_eq!(text, "export default 1;");

        let missing = reader.read_file("src/Missing.ts").await;
        assert_eq!(missing, Err(SourceError::NotFound("src/Missing.ts".to_string())));
    }

    #[tokio::test]
    async fn test_memory_reader_counts_reads() {
        let reader = MemorySourceReader::new().with_file("a.ts", "x");
        assert!(reader.read_file("a.ts").await.is_ok());
        assert!(reader.read_file("b.ts").await.is_err());
        assert_eq!(reader.read_count(), 2);
    }
}

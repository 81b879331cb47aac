//! Разбор текстовых стеков вызовов.
//!
//! Поддерживаются два диалекта:
//! - V8 (`at fn (file:line:col)` и `at file:line:col`);
//! - Firefox/Safari (`fn@file:line:col`).
//!
//! Строки, похожие на кадр, но без части полей, превращаются в частичный
//! кадр (строка и колонка 0, функция `unknown`). Строки, не являющиеся
//! кадрами (заголовок с сообщением, пустые), пропускаются. Разбор никогда
//! не завершается ошибкой.

use crate::utils::paths::clean_path;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Имя функции для кадров без имени.
pub const UNKNOWN_FUNCTION: &str = "unknown";

/// Маркеры каталогов зависимостей по умолчанию.
pub fn default_dependency_markers() -> Vec<String> {
    ["node_modules", "bower_components", "jspm_packages", ".vite/deps"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

static V8_WITH_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*at\s+(?P<func>.+?)\s+\((?P<loc>.*)\)\s*$").expect("valid regex"));

static V8_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*at\s+(?P<loc>\S.*?)\s*$").expect("valid regex"));

static GECKO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<func>[^@\s]*)@(?P<loc>.*?)\s*$").expect("valid regex"));

/// Safari: `global code@file:line:col`. Имя с пробелами допускается только
/// при полной позиции, иначе заголовок сообщения с `@` выглядел бы как кадр.
static SAFARI_SPACED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<func>[^@]+?)@(?P<loc>\S+:\d+:\d+)\s*$").expect("valid regex")
});

static LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>.*?):(?P<line>\d+)(?::(?P<col>\d+))?$").expect("valid regex")
});

static EVAL_INNER_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((?P<loc>[^()]*:\d+(?::\d+)?)\)").expect("valid regex"));

static URL_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<scheme>[a-zA-Z][a-zA-Z0-9+.\-]*)://(?P<host>[^/]*)").expect("valid regex")
});

static ALIAS_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[as [^\]]*\]$").expect("valid regex"));

/// Кадр стека вызовов.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub function_name: String,
    pub is_user_code: bool,
}

impl StackFrame {
    /// Совпадение кадров без учёта строки и колонки.
    pub fn same_site(&self, other: &StackFrame) -> bool {
        self.file == other.file && self.function_name == other.function_name
    }
}

/// Парсер стеков с нормализацией путей и имён функций.
#[derive(Debug, Clone)]
pub struct StackTraceParser {
    project_root: Option<String>,
    dependency_markers: Vec<String>,
}

impl Default for StackTraceParser {
    fn default() -> Self {
        Self::new(None, default_dependency_markers())
    }
}

impl StackTraceParser {
    /// Создаёт парсер.
    ///
    /// # Параметры
    ///
    /// - `project_root`: префикс, который срезается с абсолютных путей
    /// - `dependency_markers`: сегменты пути, по которым кадр считается кодом зависимости
    pub fn new(project_root: Option<String>, dependency_markers: Vec<String>) -> Self {
        let project_root = project_root
            .map(|root| clean_path(root.trim()))
            .filter(|root| !root.is_empty() && root != "/");
        Self {
            project_root,
            dependency_markers,
        }
    }

    /// Разбирает стек в последовательность кадров (внутренний кадр первым).
    pub fn parse(&self, raw: &str) -> Vec<StackFrame> {
        raw.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    /// Разбирает одну строку стека. `None` - строка не является кадром.
    pub fn parse_line(&self, line: &str) -> Option<StackFrame> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (function, location) = if let Some(caps) = V8_WITH_FUNCTION.captures(trimmed) {
            (Some(caps["func"].to_string()), caps["loc"].to_string())
        } else if let Some(caps) = V8_BARE.captures(trimmed) {
            (None, caps["loc"].to_string())
        } else if let Some(caps) = GECKO
            .captures(trimmed)
            .or_else(|| SAFARI_SPACED.captures(trimmed))
        {
            (Some(caps["func"].to_string()), caps["loc"].to_string())
        } else {
            return None;
        };

        let (file, line_no, column) = split_location(&location);
        let file = self.normalize_path(&file);
        let function_name = normalize_function_name(function.as_deref().unwrap_or(""));
        let is_user_code = self.is_user_path(&file);

        Some(StackFrame {
            file,
            line: line_no,
            column,
            function_name,
            is_user_code,
        })
    }

    /// Является ли кадр пользовательским кодом (а не кодом зависимости).
    pub fn is_user_code(&self, frame: &StackFrame) -> bool {
        self.is_user_path(&frame.file)
    }

    fn is_user_path(&self, file: &str) -> bool {
        let padded = format!("/{}/", file.trim_matches('/'));
        !self
            .dependency_markers
            .iter()
            .any(|marker| padded.contains(&format!("/{}/", marker.trim_matches('/'))))
    }

    /// Приводит путь из стека к каноническому виду относительно проекта.
    pub fn normalize_path(&self, raw: &str) -> String {
        let mut path = raw.trim().replace('\\', "/");

        if let Some(idx) = path.find(|c: char| c == '?' || c == '#') {
            path.truncate(idx);
        }

        let mut project_relative = false;
        let scheme = URL_SCHEME
            .captures(&path)
            .map(|caps| (caps["scheme"].to_ascii_lowercase(), caps[0].len()));
        if let Some((scheme, prefix_len)) = scheme {
            // file:// указывает на файловую систему, остальные схемы - на корень сервера/бандла.
            project_relative = scheme != "file";
            path = path[prefix_len..].to_string();
        }

        if let Some(rest) = path.strip_prefix("/@fs/") {
            path = format!("/{rest}");
            project_relative = false;
        }

        let mut path = clean_path(&path);

        if let Some(root) = &self.project_root {
            if let Some(rest) = path.strip_prefix(root.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest.trim_start_matches('/').to_string();
                    project_relative = false;
                }
            }
        }

        if project_relative {
            path = path.trim_start_matches('/').to_string();
        }

        path
    }
}

/// Разделяет `file:line:col`. Отсутствующие номера заменяются нулями.
fn split_location(location: &str) -> (String, u32, u32) {
    let location = location.trim();

    let location = if location.starts_with("eval at ") {
        match EVAL_INNER_LOCATION.captures(location) {
            Some(caps) => caps["loc"].to_string(),
            None => location.to_string(),
        }
    } else {
        location.to_string()
    };

    match LOCATION.captures(&location) {
        Some(caps) => {
            let line = caps["line"].parse().unwrap_or(0);
            let column = caps
                .name("col")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            (caps["file"].to_string(), line, column)
        }
        None => (location, 0, 0),
    }
}

/// Убирает обёртки бандлера и движка из имени функции.
pub fn normalize_function_name(raw: &str) -> String {
    let mut name = ALIAS_SUFFIX.replace(raw.trim(), "").to_string();

    loop {
        let before = name.len();
        for prefix in ["async ", "new ", "Object.", "Module.", "exports."] {
            if let Some(rest) = name.strip_prefix(prefix) {
                name = rest.trim_start().to_string();
            }
        }
        if name.len() == before {
            break;
        }
    }

    // Firefox: `outer/inner/<`, генераторы помечаются `*`.
    loop {
        let trimmed = name
            .trim_end_matches("/<")
            .trim_end_matches('<')
            .trim_end_matches('*')
            .trim_end_matches('/')
            .to_string();
        if trimmed.len() == name.len() {
            break;
        }
        name = trimmed;
    }
    if let Some(idx) = name.rfind('/') {
        name = name[idx + 1..].to_string();
    }

    match name.as_str() {
        "" => UNKNOWN_FUNCTION.to_string(),
        "<anonymous>" | "anonymous" => "anonymous".to_string(),
        _ => name,
    }
}

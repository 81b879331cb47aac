//! Построчный разбор import/export выражений ES-модулей.
//!
//! Это не полноценный парсер JavaScript: регулярные выражения покрывают
//! типичные формы (default, именованные, namespace, side-effect, `import type`,
//! реэкспорты, динамический `import()` и `require()`), чего достаточно для
//! построения графа зависимостей.

use super::source::{ExportSpec, ImportSpec, ModuleInfo, ModuleParser};
use crate::error::SourceError;
use once_cell::sync::Lazy;
use regex::Regex;

static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*//.*$").expect("valid regex"));

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^\s*import\s+(?P<type>type\s+)?(?P<clause>[^'";]*?)\s+from\s+['"](?P<path>[^'"]+)['"]"#,
    )
    .expect("valid regex")
});

static IMPORT_SIDE_EFFECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*import\s+['"](?P<path>[^'"]+)['"]"#).expect("valid regex")
});

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:import|require)\(\s*['"](?P<path>[^'"]+)['"]\s*\)"#).expect("valid regex")
});

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^\s*export\s+(?P<type>type\s+)?(?P<clause>\*(?:\s+as\s+\w+)?|\{[^}]*\})\s+from\s+['"](?P<path>[^'"]+)['"]"#,
    )
    .expect("valid regex")
});

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*export\s+(?P<type>type\s+)?\{(?P<names>[^}]*)\}\s*(?P<rest>from\b)?"#)
        .expect("valid regex")
});

static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*export\s+default\b").expect("valid regex"));

static EXPORT_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*export\s+(?:declare\s+)?(?P<kind>async\s+function\*?|function\*?|abstract\s+class|class|const\s+enum|const|let|var|enum|type|interface)\s+(?P<name>[A-Za-z_$][\w$]*)",
    )
    .expect("valid regex")
});

/// Парсер модулей на регулярных выражениях.
#[derive(Debug, Clone, Default)]
pub struct RegexModuleParser;

impl RegexModuleParser {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleParser for RegexModuleParser {
    fn parse_module(&self, path: &str, source: &str) -> Result<ModuleInfo, SourceError> {
        if source.contains('\0') {
            return Err(SourceError::Parse {
                path: path.to_string(),
                reason: "binary content".to_string(),
            });
        }

        let without_blocks = BLOCK_COMMENT.replace_all(source, "");
        let text = LINE_COMMENT.replace_all(&without_blocks, "");

        let mut info = ModuleInfo::default();

        for caps in IMPORT_FROM.captures_iter(&text) {
            let is_type = caps.name("type").is_some();
            let path = caps["path"].to_string();
            parse_import_clause(&caps["clause"], &path, is_type, &mut info.imports);
        }

        for caps in IMPORT_SIDE_EFFECT.captures_iter(&text) {
            info.imports.push(ImportSpec {
                name: "*".to_string(),
                path: caps["path"].to_string(),
                is_default: false,
                is_type: false,
            });
        }

        for caps in DYNAMIC_IMPORT.captures_iter(&text) {
            info.imports.push(ImportSpec {
                name: "*".to_string(),
                path: caps["path"].to_string(),
                is_default: false,
                is_type: false,
            });
        }

        for caps in EXPORT_FROM.captures_iter(&text) {
            let is_type = caps.name("type").is_some();
            let path = caps["path"].to_string();
            let clause = caps["clause"].trim();

            if let Some(rest) = clause.strip_prefix('*') {
                let name = rest
                    .trim()
                    .strip_prefix("as")
                    .map(|alias| alias.trim().to_string())
                    .unwrap_or_else(|| "*".to_string());
                info.imports.push(ImportSpec {
                    name: "*".to_string(),
                    path,
                    is_default: false,
                    is_type,
                });
                info.exports.push(ExportSpec {
                    name,
                    is_default: false,
                    is_type,
                });
                continue;
            }

            for (imported, exported, item_is_type) in braced_names(clause) {
                info.imports.push(ImportSpec {
                    name: imported,
                    path: path.clone(),
                    is_default: false,
                    is_type: is_type || item_is_type,
                });
                info.exports.push(ExportSpec {
                    is_default: exported == "default",
                    name: exported,
                    is_type: is_type || item_is_type,
                });
            }
        }

        for caps in EXPORT_LIST.captures_iter(&text) {
            if caps.name("rest").is_some() {
                // Реэкспорт уже учтён выше.
                continue;
            }
            let is_type = caps.name("type").is_some();
            for (_, exported, item_is_type) in braced_names(&caps["names"]) {
                info.exports.push(ExportSpec {
                    is_default: exported == "default",
                    name: exported,
                    is_type: is_type || item_is_type,
                });
            }
        }

        if EXPORT_DEFAULT.is_match(&text) {
            info.exports.push(ExportSpec {
                name: "default".to_string(),
                is_default: true,
                is_type: false,
            });
        }

        for caps in EXPORT_DECLARATION.captures_iter(&text) {
            let kind = &caps["kind"];
            info.exports.push(ExportSpec {
                name: caps["name"].to_string(),
                is_default: false,
                is_type: kind == "type" || kind == "interface",
            });
        }

        Ok(info)
    }
}

/// Разбирает часть между `import` и `from`.
fn parse_import_clause(clause: &str, path: &str, is_type: bool, out: &mut Vec<ImportSpec>) {
    let clause = clause.trim();
    let (head, braces) = match clause.find('{') {
        Some(idx) => (&clause[..idx], Some(&clause[idx..])),
        None => (clause, None),
    };

    for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(alias) = part.strip_prefix('*') {
            let local = alias.trim().strip_prefix("as").map(str::trim).unwrap_or("*");
            out.push(ImportSpec {
                name: local.to_string(),
                path: path.to_string(),
                is_default: false,
                is_type,
            });
        } else {
            out.push(ImportSpec {
                name: part.to_string(),
                path: path.to_string(),
                is_default: true,
                is_type,
            });
        }
    }

    if let Some(braces) = braces {
        for (imported, _, item_is_type) in braced_names(braces) {
            out.push(ImportSpec {
                is_default: imported == "default",
                name: imported,
                path: path.to_string(),
                is_type: is_type || item_is_type,
            });
        }
    }
}

/// Разбирает `{ a, b as c, type D }` в тройки (исходное имя, внешнее имя, type-only).
fn braced_names(list: &str) -> Vec<(String, String, bool)> {
    list.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (is_type, item) = match item.strip_prefix("type ") {
                Some(rest) => (true, rest.trim()),
                None => (false, item),
            };
            match item.split_once(" as ") {
                Some((original, alias)) => (original.trim().to_string(), alias.trim().to_string(), is_type),
                None => (item.to_string(), item.to_string(), is_type),
            }
        })
        .collect()
}

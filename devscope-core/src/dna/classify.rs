//! Классификация ошибок и извлечение имени компонента.

use super::record::ErrorKind;

const NETWORK_MARKERS: &[&str] = &[
    "failed to fetch",
    "networkerror",
    "network error",
    "network request failed",
    "load failed",
    "cors",
    "econnrefused",
    "econnreset",
    "etimedout",
    "timeout of",
    "status code",
    "xmlhttprequest",
];

const PERFORMANCE_MARKERS: &[&str] = &[
    "maximum call stack",
    "too much recursion",
    "maximum update depth",
    "out of memory",
    "allocation failed",
    "heap limit",
    "long task",
];

const TYPE_MARKERS: &[&str] = &[
    "is not a function",
    "is not defined",
    "is not iterable",
    "is not a constructor",
    "cannot read properties of",
    "cannot read property",
    "cannot set properties of",
    "undefined is not an object",
    "null is not an object",
];

// Отдельные слова сообщения: `useFetchData` не содержит слова `fetch`.
const NETWORK_WORDS: &[&str] = &["network", "fetch"];
const PERFORMANCE_WORDS: &[&str] = &["performance", "timeout"];
const TYPE_WORDS: &[&str] = &["type"];

/// Встроенные конструкторы, которые не являются компонентами.
const NON_COMPONENT_NAMES: &[&str] = &[
    "Object", "Array", "Promise", "Function", "Error", "Module", "JSON", "Map", "Set", "Reflect",
];

/// Определяет класс ошибки по имени класса и сообщению.
///
/// Сетевые признаки проверяются первыми: браузер сообщает о сбое `fetch`
/// как о `TypeError("Failed to fetch")`. Затем идут признаки
/// производительности (в том числе `timeout`) и только потом слово `type`.
/// `RangeError` без признаков переполнения стека считается обычной ошибкой
/// выполнения.
pub fn classify(kind_hint: Option<&str>, message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    let hint = kind_hint.map(str::to_lowercase);

    if let Some(hint) = hint.as_deref() {
        if hint.contains("network") || hint.contains("fetch") || hint == "aborterror" {
            return ErrorKind::Network;
        }
    }
    if contains_any(&message, NETWORK_MARKERS) || has_word(&message, NETWORK_WORDS) {
        return ErrorKind::Network;
    }

    if let Some(hint) = hint.as_deref() {
        if hint == "typeerror" || hint == "referenceerror" {
            return ErrorKind::Type;
        }
        if hint == "rangeerror" && contains_any(&message, PERFORMANCE_MARKERS) {
            return ErrorKind::Performance;
        }
    }

    if contains_any(&message, PERFORMANCE_MARKERS) || has_word(&message, PERFORMANCE_WORDS) {
        ErrorKind::Performance
    } else if contains_any(&message, TYPE_MARKERS) || has_word(&message, TYPE_WORDS) {
        ErrorKind::Type
    } else {
        ErrorKind::Runtime
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn has_word(haystack: &str, words: &[&str]) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| words.contains(&token))
}

/// Имя компонента по имени функции кадра.
///
/// Компонентом считается PascalCase-имя (в том числе с суффиксом
/// `Component`) или хук вида `useSomething`. Для `Header.render`
/// берётся первый сегмент.
pub fn extract_component(function_name: &str) -> Option<String> {
    let head = function_name.split('.').next()?.trim();
    if head.is_empty() {
        return None;
    }

    if is_hook_name(head) {
        return Some(head.to_string());
    }

    let mut chars = head.chars();
    let first = chars.next()?;
    let pascal = first.is_ascii_uppercase()
        && head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && head.chars().any(|c| c.is_ascii_lowercase());
    if pascal && !NON_COMPONENT_NAMES.contains(&head) {
        Some(head.to_string())
    } else {
        None
    }
}

fn is_hook_name(name: &str) -> bool {
    name.strip_prefix("use")
        .and_then(|rest| rest.chars().next())
        .map_or(false, |c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_hint() {
        assert_eq!(classify(Some("TypeError"), "boom"), ErrorKind::Type);
        assert_eq!(classify(Some("NetworkError"), "boom"), ErrorKind::Network);
        assert_eq!(
            classify(Some("RangeError"), "Maximum call stack size exceeded"),
            ErrorKind::Performance
        );
        assert_eq!(classify(Some("RangeError"), "Invalid array length"), ErrorKind::Runtime);
    }

    #[test]
    fn test_failed_fetch_type_error_is_network() {
        assert_eq!(classify(Some("TypeError"), "Failed to fetch"), ErrorKind::Network);
        assert_eq!(classify(Some("TypeError"), "x is not iterable"), ErrorKind::Type);
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(classify(None, "Failed to fetch"), ErrorKind::Network);
        assert_eq!(
            classify(None, "Cannot read properties of undefined (reading 'x')"),
            ErrorKind::Type
        );
        assert_eq!(
            classify(None, "Maximum update depth exceeded"),
            ErrorKind::Performance
        );
        assert_eq!(classify(None, "something odd"), ErrorKind::Runtime);
    }

    #[test]
    fn test_classify_by_bare_keywords() {
        assert_eq!(classify(None, "network unreachable"), ErrorKind::Network);
        assert_eq!(classify(None, "fetch aborted by user"), ErrorKind::Network);
        assert_eq!(classify(None, "unexpected type for prop"), ErrorKind::Type);
        assert_eq!(classify(None, "performance budget exceeded"), ErrorKind::Performance);
        assert_eq!(classify(None, "Request timeout"), ErrorKind::Performance);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        assert_eq!(
            classify(Some("TypeError"), "useFetchData is not a function"),
            ErrorKind::Type
        );
        assert_eq!(classify(None, "prototype chain broken"), ErrorKind::Runtime);
    }

    #[test]
    fn test_network_keyword_wins_over_type_keyword() {
        assert_eq!(classify(None, "fetch returned wrong type"), ErrorKind::Network);
        assert_eq!(classify(None, "timeout while checking type"), ErrorKind::Performance);
    }

    #[test]
    fn test_extract_component() {
        assert_eq!(extract_component("UserProfile"), Some("UserProfile".to_string()));
        assert_eq!(
            extract_component("HeaderComponent.render"),
            Some("HeaderComponent".to_string())
        );
        assert_eq!(extract_component("useFetchData"), Some("useFetchData".to_string()));
        assert_eq!(extract_component("user"), None);
        assert_eq!(extract_component("handleClick"), None);
        assert_eq!(extract_component("Object"), None);
        assert_eq!(extract_component("URL"), None);
        assert_eq!(extract_component("unknown"), None);
    }
}

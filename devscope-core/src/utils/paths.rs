//! Утилиты для работы с путями исходников.
//!
//! Пути из стеков и import-выражений приходят в разных формах (URL,
//! Windows-разделители, `./` и `../`). Здесь они приводятся к единому
//! виду с `/` в качестве разделителя.

/// Убирает сегменты `.` и `..`, дублирующиеся разделители и приводит `\` к `/`.
///
/// Абсолютный путь остаётся абсолютным; `..` в начале относительного пути
/// сохраняется, так как его некуда поднять.
pub fn clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Директория файла (`src/a/b.ts` -> `src/a`). Для файла без директории - пустая строка.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Присоединяет относительный путь к директории и нормализует результат.
pub fn join(dir: &str, relative: &str) -> String {
    if relative.starts_with('/') || dir.is_empty() {
        clean_path(relative)
    } else {
        clean_path(&format!("{dir}/{relative}"))
    }
}

/// Имя файла без директории.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Есть ли у последнего сегмента пути расширение.
pub fn has_extension(path: &str) -> bool {
    let name = file_name(path);
    matches!(name.rfind('.'), Some(idx) if idx > 0 && idx + 1 < name.len())
}

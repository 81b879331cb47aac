//! Граф зависимостей исходного файла.
//!
//! Граф строится обходом в ширину от заданного файла: для каждого файла
//! читается текст, разбираются import/export, относительные импорты
//! разрешаются в файлы и раскрываются дальше, пакеты и алиасы остаются
//! листьями. Глубина и число импортов на файл ограничены конфигурацией.
//!
//! Результаты кэшируются на всё время жизни построителя. Файлы считаются
//! неизменными в рамках сессии отладки, поэтому кэш сбрасывается только
//! явным вызовом [`DependencyGraphBuilder::clear_cache`].

pub mod parser;
pub mod source;

pub use parser::RegexModuleParser;
pub use source::{
    ExportSpec, FsSourceReader, ImportSpec, MemorySourceReader, ModuleInfo, ModuleParser,
    SourceReader,
};

use crate::error::{lock, SourceError};
use crate::utils::paths::{clean_path, file_name, has_extension, join, parent_dir};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Расширения, которые пробуются для импорта без расширения.
pub const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Тип узла графа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    File,
    Package,
    Module,
}

/// Тип ребра графа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Import,
    Export,
    Uses,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub path: String,
}

impl DependencyNode {
    pub fn file(path: &str) -> Self {
        Self {
            id: path.to_string(),
            kind: NodeKind::File,
            name: file_name(path).to_string(),
            path: path.to_string(),
        }
    }

    pub fn package(name: &str) -> Self {
        Self {
            id: name.to_string(),
            kind: NodeKind::Package,
            name: name.to_string(),
            path: name.to_string(),
        }
    }

    pub fn module(id: &str, name: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Module,
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

/// Ориентированный граф зависимостей.
///
/// Узлы уникальны по `id`, рёбра упорядочены по добавлению и ссылаются
/// только на узлы этого же графа.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Добавляет узел, если узла с таким `id` ещё нет.
    pub fn add_node(&mut self, node: DependencyNode) -> bool {
        if self.contains_node(&node.id) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Добавляет ребро. Ребро с отсутствующим концом или дубликат отклоняется.
    pub fn add_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> bool {
        if !self.contains_node(source) || !self.contains_node(target) {
            return false;
        }
        let edge = DependencyEdge {
            source: source.to_string(),
            target: target.to_string(),
            kind,
        };
        if self.edges.contains(&edge) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    /// Исходящие рёбра узла.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &DependencyEdge> {
        let id = id.to_string();
        self.edges.iter().filter(move |edge| edge.source == id)
    }
}

/// Параметры обхода.
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub max_depth: usize,
    pub max_fan_out: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_fan_out: 50,
        }
    }
}

#[derive(Clone)]
struct CachedGraph {
    graph: DependencyGraph,
    root_error: Option<SourceError>,
}

/// Построитель графа зависимостей с кэшем по файлам.
pub struct DependencyGraphBuilder {
    reader: Arc<dyn SourceReader>,
    parser: Arc<dyn ModuleParser>,
    limits: GraphLimits,
    graphs: Mutex<HashMap<String, CachedGraph>>,
    modules: Mutex<HashMap<String, Result<ModuleInfo, SourceError>>>,
}

impl DependencyGraphBuilder {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        parser: Arc<dyn ModuleParser>,
        limits: GraphLimits,
    ) -> Self {
        Self {
            reader,
            parser,
            limits,
            graphs: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> GraphLimits {
        self.limits
    }

    /// Граф зависимостей файла.
    ///
    /// Ошибка чтения или разбора любого файла, включая корневой, делает его
    /// листом; построение целиком не прерывается.
    pub async fn get_dependency_graph(&self, file_path: &str) -> DependencyGraph {
        self.cached_or_build(file_path).await.graph
    }

    /// То же, что [`Self::get_dependency_graph`], но ошибка корневого файла
    /// возвращается вызывающему.
    pub async fn try_dependency_graph(
        &self,
        file_path: &str,
    ) -> Result<DependencyGraph, SourceError> {
        let cached = self.cached_or_build(file_path).await;
        match cached.root_error {
            Some(err) => Err(err),
            None => Ok(cached.graph),
        }
    }

    /// Импорты файла из того же кэша разбора.
    pub async fn get_imports(&self, file_path: &str) -> Result<Vec<ImportSpec>, SourceError> {
        Ok(self.load_module(&clean_path(file_path)).await?.imports)
    }

    /// Экспорты файла из того же кэша разбора.
    pub async fn get_exports(&self, file_path: &str) -> Result<Vec<ExportSpec>, SourceError> {
        Ok(self.load_module(&clean_path(file_path)).await?.exports)
    }

    /// Сбрасывает кэш графов и результатов разбора.
    pub fn clear_cache(&self) {
        lock(&self.graphs).clear();
        lock(&self.modules).clear();
        debug!("dependency graph cache cleared");
    }

    pub fn cached_graph_count(&self) -> usize {
        lock(&self.graphs).len()
    }

    async fn cached_or_build(&self, file_path: &str) -> CachedGraph {
        let root = clean_path(file_path);
        if let Some(cached) = lock(&self.graphs).get(&root).cloned() {
            return cached;
        }

        let built = self.build(&root).await;
        lock(&self.graphs).insert(root, built.clone());
        built
    }

    async fn build(&self, root: &str) -> CachedGraph {
        let mut graph = DependencyGraph::new();
        graph.add_node(DependencyNode::file(root));

        let mut root_error = None;
        let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(root.to_string(), 0)]);

        while let Some((file, depth)) = queue.pop_front() {
            if depth >= self.limits.max_depth {
                continue;
            }

            let info = match self.load_module(&file).await {
                Ok(info) => info,
                Err(err) => {
                    debug!("dependency graph: {file} stays a leaf: {err}");
                    if file == root {
                        root_error = Some(err);
                    }
                    continue;
                }
            };

            for export in &info.exports {
                let id = format!("{file}#{}", export.name);
                graph.add_node(DependencyNode::module(&id, &export.name, &file));
                graph.add_edge(&file, &id, EdgeKind::Export);
            }

            for import in info.imports.iter().take(self.limits.max_fan_out) {
                let (node, expandable) = self.resolve_import(&file, &import.path).await;
                let target = node.id.clone();
                graph.add_node(node);
                let kind = if import.is_type {
                    EdgeKind::Uses
                } else {
                    EdgeKind::Import
                };
                graph.add_edge(&file, &target, kind);

                if expandable && visited.insert(target.clone()) {
                    queue.push_back((target, depth + 1));
                }
            }
        }

        CachedGraph { graph, root_error }
    }

    /// Разрешает спецификатор импорта в узел. Второй элемент - можно ли раскрывать узел.
    async fn resolve_import(&self, importer: &str, specifier: &str) -> (DependencyNode, bool) {
        if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
        {
            let base = join(parent_dir(importer), specifier);
            if has_extension(&base) {
                return (DependencyNode::file(&base), true);
            }

            for candidate in candidate_paths(&base) {
                if self.load_module(&candidate).await.is_ok() {
                    return (DependencyNode::file(&candidate), true);
                }
            }
            // Не нашли реальный файл: оставляем неразрешённый путь листом.
            return (DependencyNode::file(&base), false);
        }

        if is_alias(specifier) {
            return (DependencyNode::module(specifier, specifier, specifier), false);
        }

        (DependencyNode::package(&package_name(specifier)), false)
    }

    async fn load_module(&self, path: &str) -> Result<ModuleInfo, SourceError> {
        if let Some(cached) = lock(&self.modules).get(path).cloned() {
            return cached;
        }

        let result = match self.reader.read_file(path).await {
            Ok(text) => self.parser.parse_module(path, &text),
            Err(err) => Err(err),
        };

        lock(&self.modules).insert(path.to_string(), result.clone());
        result
    }
}

fn candidate_paths(base: &str) -> Vec<String> {
    let mut candidates: Vec<String> = CANDIDATE_EXTENSIONS
        .iter()
        .map(|ext| format!("{base}.{ext}"))
        .collect();
    candidates.extend(
        CANDIDATE_EXTENSIONS
            .iter()
            .map(|ext| format!("{base}/index.{ext}")),
    );
    candidates
}

fn is_alias(specifier: &str) -> bool {
    specifier.starts_with("@/") || specifier.starts_with("~/") || specifier.starts_with('#')
}

/// Имя пакета из спецификатора (`lodash/fp` -> `lodash`, `@scope/pkg/sub` -> `@scope/pkg`).
fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match (parts.next(), parts.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => format!("{scope}/{name}"),
        (Some(name), _) => name.to_string(),
        (None, _) => specifier.to_string(),
    }
}

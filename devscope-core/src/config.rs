use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::stack::default_dependency_markers;

/// Конфигурация сессии отладки.
///
/// Все секции необязательны: отсутствующее поле получает значение по умолчанию,
/// поэтому пустой YAML-документ - корректная конфигурация.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub errors: ErrorsConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_network_capacity")]
    pub capacity: usize,
    /// Сохранять тела запросов и ответов.
    #[serde(default = "default_capture_bodies")]
    pub capture_bodies: bool,
    /// Тела длиннее этого порога обрезаются.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_network_capacity() -> usize {
    1000
}

fn default_capture_bodies() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            capacity: default_network_capacity(),
            capture_bodies: default_capture_bodies(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_performance_capacity")]
    pub capacity: usize,
    /// Период снятия памяти процесса. 0 отключает периодический сбор.
    #[serde(default = "default_memory_sample_interval_ms")]
    pub memory_sample_interval_ms: u64,
}

fn default_performance_capacity() -> usize {
    500
}

fn default_memory_sample_interval_ms() -> u64 {
    5000
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            capacity: default_performance_capacity(),
            memory_sample_interval_ms: default_memory_sample_interval_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_capacity")]
    pub capacity: usize,
}

fn default_state_capacity() -> usize {
    1000
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            capacity: default_state_capacity(),
        }
    }
}

/// Параметры дедупликации и эскалации ошибок.
#[derive(Debug, Deserialize, Clone)]
pub struct ErrorsConfig {
    /// Ёмкость хранилища записей; при переполнении вытесняется давно не виденная.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Сколько верхних кадров сравнивается при поиске похожей ошибки.
    #[serde(default = "default_similarity_frames")]
    pub similarity_frames: usize,
    /// Сколько из верхних кадров должно совпасть, если не совпал первый.
    #[serde(default = "default_min_matching_frames")]
    pub min_matching_frames: usize,
    /// Частота, начиная с которой severity поднимается на уровень.
    #[serde(default = "default_escalation_frequency")]
    pub escalation_frequency: u64,
    /// Запускать AI-анализ автоматически для новых записей.
    #[serde(default)]
    pub auto_analyze: bool,
}

fn default_max_records() -> usize {
    1000
}

fn default_similarity_frames() -> usize {
    3
}

fn default_min_matching_frames() -> usize {
    2
}

fn default_escalation_frequency() -> u64 {
    10
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            similarity_frames: default_similarity_frames(),
            min_matching_frames: default_min_matching_frames(),
            escalation_frequency: default_escalation_frequency(),
            auto_analyze: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_fan_out")]
    pub max_fan_out: usize,
    /// Корень, от которого читаются исходники.
    #[serde(default = "default_source_root")]
    pub source_root: String,
}

fn default_max_depth() -> usize {
    2
}

fn default_max_fan_out() -> usize {
    50
}

fn default_source_root() -> String {
    ".".to_string()
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_fan_out: default_max_fan_out(),
            source_root: default_source_root(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StackConfig {
    /// Префикс, который срезается с путей в кадрах стека.
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default = "default_dependency_markers")]
    pub dependency_markers: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            dependency_markers: default_dependency_markers(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {path}"))?;
        Self::from_yaml(&data).with_context(|| format!("invalid config at {path}"))
    }

    /// Разбирает и проверяет конфигурацию из YAML-строки.
    pub fn from_yaml(data: &str) -> Result<Self> {
        // Пустой документ serde_yaml разбирает как null, а не как пустой map.
        let cfg: Config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(data).context("failed to parse YAML config")?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, capacity) in [
            ("network.capacity", self.network.capacity),
            ("performance.capacity", self.performance.capacity),
            ("state.capacity", self.state.capacity),
            ("errors.max_records", self.errors.max_records),
        ] {
            ensure!(capacity > 0, "{name} must be positive (got {capacity})");
            ensure!(
                capacity <= 1_000_000,
                "{name} must be <= 1000000 to keep memory bounded (got {capacity})"
            );
        }

        self.errors.validate()?;
        self.graph.validate()?;
        self.stack.validate()?;
        self.api.validate()?;

        Ok(())
    }
}

impl ErrorsConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.similarity_frames > 0,
            "errors.similarity_frames must be positive (got {})",
            self.similarity_frames
        );
        ensure!(
            self.min_matching_frames > 0,
            "errors.min_matching_frames must be positive (got {})",
            self.min_matching_frames
        );
        ensure!(
            self.min_matching_frames <= self.similarity_frames,
            "errors.min_matching_frames ({}) must be <= errors.similarity_frames ({})",
            self.min_matching_frames,
            self.similarity_frames
        );
        ensure!(
            self.escalation_frequency >= 2,
            "errors.escalation_frequency must be >= 2 (got {})",
            self.escalation_frequency
        );
        Ok(())
    }
}

impl GraphConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_depth <= 16,
            "graph.max_depth must be <= 16 (got {})",
            self.max_depth
        );
        ensure!(
            self.max_fan_out > 0,
            "graph.max_fan_out must be positive (got {})",
            self.max_fan_out
        );
        ensure!(
            !self.source_root.trim().is_empty(),
            "graph.source_root must not be empty"
        );
        Ok(())
    }
}

impl StackConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.dependency_markers.iter().all(|m| !m.trim().is_empty()),
            "stack.dependency_markers must not contain empty entries"
        );
        Ok(())
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled {
            self.listen_addr
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("api.listen_addr is not a socket address: {}", self.listen_addr))?;
        }
        Ok(())
    }
}

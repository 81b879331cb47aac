//! Монитор переходов состояния (redux, context, состояние хуков).

use super::{Lifecycle, Monitor, MonitorState};
use crate::config::StateConfig;
use crate::error::DiagnosticsError;
use crate::events::{BoundedEventLog, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Источник перехода.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateOrigin {
    Redux,
    Context,
    HookState,
    Custom,
}

/// Разница состояний по ключам верхнего уровня.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub added: Map<String, Value>,
    /// Удалённые ключи с их прежними значениями.
    pub removed: Map<String, Value>,
    pub updated: Map<String, Value>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Вычисляет разницу двух состояний.
///
/// Объекты сравниваются по ключам верхнего уровня без рекурсии. Прочие
/// значения сравниваются целиком: при неравенстве новое значение попадает
/// в `updated` под ключом `value`.
pub fn diff_states(previous: &Value, next: &Value) -> StateDiff {
    let mut diff = StateDiff::default();

    match (previous, next) {
        (Value::Object(prev), Value::Object(next)) => {
            for (key, value) in next {
                match prev.get(key) {
                    None => {
                        diff.added.insert(key.clone(), value.clone());
                    }
                    Some(old) if old != value => {
                        diff.updated.insert(key.clone(), value.clone());
                    }
                    Some(_) => {}
                }
            }
            for (key, value) in prev {
                if !next.contains_key(key) {
                    diff.removed.insert(key.clone(), value.clone());
                }
            }
        }
        (prev, next) if prev != next => {
            diff.updated.insert("value".to_string(), next.clone());
        }
        _ => {}
    }

    diff
}

/// Переход состояния до нормализации.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub origin: StateOrigin,
    #[serde(default)]
    pub component_name: Option<String>,
    #[serde(default)]
    pub action_label: Option<String>,
    #[serde(default)]
    pub previous_state: Value,
    #[serde(default)]
    pub next_state: Value,
}

/// Неизменяемая запись о переходе.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub origin: StateOrigin,
    pub component_name: Option<String>,
    pub action_label: Option<String>,
    pub previous_state: Value,
    pub next_state: Value,
    pub diff: StateDiff,
}

/// Монитор переходов состояния.
pub struct StateTransitionMonitor {
    lifecycle: Lifecycle,
    log: BoundedEventLog<StateTransition>,
}

impl StateTransitionMonitor {
    pub fn new(settings: StateConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("state"),
            log: BoundedEventLog::new(settings.capacity),
        }
    }

    pub fn start(&self) -> bool {
        self.lifecycle.activate()
    }

    /// Записывает переход. `None`, если монитор не активен.
    pub fn record_transition(&self, event: TransitionEvent) -> Option<StateTransition> {
        if !self.lifecycle.accepts("transition") {
            return None;
        }
        let diff = diff_states(&event.previous_state, &event.next_state);
        let transition = StateTransition {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            origin: event.origin,
            component_name: event.component_name,
            action_label: event.action_label,
            previous_state: event.previous_state,
            next_state: event.next_state,
            diff,
        };
        self.log.append(transition.clone());
        Some(transition)
    }

    /// Записывает переход произвольных сериализуемых состояний.
    pub fn track<S: Serialize>(
        &self,
        origin: StateOrigin,
        component_name: Option<&str>,
        action_label: Option<&str>,
        previous: &S,
        next: &S,
    ) -> Option<StateTransition> {
        let (previous_state, next_state) =
            match (serde_json::to_value(previous), serde_json::to_value(next)) {
                (Ok(previous), Ok(next)) => (previous, next),
                (Err(err), _) | (_, Err(err)) => {
                    warn!("state: failed to serialize state: {err}");
                    return None;
                }
            };
        self.record_transition(TransitionEvent {
            origin,
            component_name: component_name.map(str::to_string),
            action_label: action_label.map(str::to_string),
            previous_state,
            next_state,
        })
    }

    pub fn get_transitions(&self) -> Vec<StateTransition> {
        self.log.all()
    }

    pub fn get_transitions_by_component(&self, component: &str) -> Vec<StateTransition> {
        self.log
            .query(|t| t.component_name.as_deref() == Some(component))
    }

    pub fn get_transitions_by_origin(&self, origin: StateOrigin) -> Vec<StateTransition> {
        self.log.query(|t| t.origin == origin)
    }

    /// Всего переходов за время жизни монитора.
    pub fn total_transitions(&self) -> u64 {
        self.log.total_appended()
    }

    pub fn recent_transitions(&self, n: usize) -> Vec<StateTransition> {
        self.log.recent(n)
    }

    pub fn clear_transitions(&self) {
        self.log.clear();
    }

    pub fn on_transition(
        &self,
        listener: impl Fn(&StateTransition) + Send + Sync + 'static,
    ) -> Subscription {
        if self.state() == MonitorState::Destroyed {
            return Subscription::detached();
        }
        self.log.subscribe(listener)
    }

    pub fn set_error_hook(&self, hook: impl Fn(&DiagnosticsError) + Send + Sync + 'static) {
        self.log.set_error_hook(hook);
    }
}

impl Monitor for StateTransitionMonitor {
    fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    fn state(&self) -> MonitorState {
        self.lifecycle.state()
    }

    fn destroy(&self) {
        if !self.lifecycle.destroy() {
            return;
        }
        self.log.clear();
        self.log.unsubscribe_all();
    }
}

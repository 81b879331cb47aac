//! Мониторы событий инструментированного приложения.
//!
//! Каждый монитор владеет собственным [`BoundedEventLog`](crate::events::BoundedEventLog)
//! и проходит жизненный цикл `Uninitialized -> Active -> Destroyed`. События
//! принимаются только в состоянии `Active`; в остальных состояниях
//! изменяющие вызовы молча игнорируются.

pub mod network;
pub mod performance;
pub mod state;
pub mod transport;

pub use network::{NetworkMonitor, NetworkRecord, TransportKind};
pub use performance::{
    MemoryProbe, MemoryReading, PerformanceMonitor, PerformancePayload, PerformanceSample,
    ResourceTiming, ResourceTimingSource, SampleKind, SysinfoMemoryProbe,
};
pub use state::{
    diff_states, StateDiff, StateOrigin, StateTransition, StateTransitionMonitor, TransitionEvent,
};
pub use transport::{
    CallbackTransport, FetchTransport, HttpRequest, HttpResponse, ResponseCallback,
    TransportError, TransportSlots,
};

use crate::error::lock;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info};

/// Состояние жизненного цикла монитора.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Uninitialized,
    Active,
    Destroyed,
}

/// Общий интерфейс мониторов для сессии.
pub trait Monitor: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> MonitorState;

    /// Останавливает монитор, очищает журнал и отписывает всех. Идемпотентно.
    fn destroy(&self);
}

/// Переходы жизненного цикла.
pub(crate) struct Lifecycle {
    name: &'static str,
    state: Mutex<MonitorState>,
}

impl Lifecycle {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(MonitorState::Uninitialized),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn state(&self) -> MonitorState {
        *lock(&self.state)
    }

    /// `Uninitialized -> Active`. Возвращает `true`, если переход состоялся.
    pub(crate) fn activate(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != MonitorState::Uninitialized {
            debug!("{}: start ignored in state {:?}", self.name, *state);
            return false;
        }
        *state = MonitorState::Active;
        info!("{} monitor started", self.name);
        true
    }

    /// Переводит в `Destroyed`. Возвращает `true` только при первом вызове.
    pub(crate) fn destroy(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == MonitorState::Destroyed {
            return false;
        }
        *state = MonitorState::Destroyed;
        info!("{} monitor destroyed", self.name);
        true
    }

    /// Принимает ли монитор события. Отказ логируется на уровне `debug`.
    pub(crate) fn accepts(&self, operation: &str) -> bool {
        let state = self.state();
        if state == MonitorState::Active {
            return true;
        }
        debug!("{}: {operation} ignored in state {state:?}", self.name);
        false
    }
}

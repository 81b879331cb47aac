//! HTTP API снимков сессии отладки для слоя отображения.
//!
//! Только чтение и управление записями: ошибки, запросы, замеры, переходы
//! состояния, граф зависимостей. События инструментированного приложения
//! принимаются через `POST /api/events`.

mod server;

pub use server::{ApiServer, ApiServerHandle, ApiState};

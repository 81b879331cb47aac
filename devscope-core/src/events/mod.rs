//! Общая инфраструктура событий: ограниченные журналы и подписчики.
//!
//! Каждый монитор владеет своим [`BoundedEventLog`]; движок ошибок
//! использует [`Subscribers`] напрямую поверх собственного хранилища.

pub mod bounded_log;
pub mod subscribers;

pub use bounded_log::BoundedEventLog;
pub use subscribers::{ErrorHook, Listener, Subscribers, Subscription};

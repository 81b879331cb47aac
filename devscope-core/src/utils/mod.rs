//! Вспомогательные утилиты.

pub mod paths;

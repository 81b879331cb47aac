//! Список подписчиков с изоляцией сбоев.
//!
//! Колбэки вызываются синхронно, в порядке регистрации. Итерация идёт по
//! снимку списка, поэтому подписка или отписка из самого колбэка безопасна.
//! Паника в колбэке перехватывается и не мешает остальным подписчикам.

use crate::error::{lock, panic_message, DiagnosticsError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Колбэк подписчика. Получает запись только для чтения.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Побочный канал для отчётов о сбоях подписчиков.
pub type ErrorHook = Arc<dyn Fn(&DiagnosticsError) + Send + Sync>;

struct ListenerList<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Handle подписки.
///
/// Удаление слушателя происходит только через [`Subscription::unsubscribe`];
/// простой drop handle оставляет подписку активной.
#[must_use = "keep the handle to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    remove: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl Subscription {
    /// Идентификатор слушателя внутри его списка.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Удаляет слушателя. Повторная отписка невозможна по построению.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove(self.id);
        }
    }

    /// Handle, который ни на что не подписан (например, у уничтоженного монитора).
    pub(crate) fn detached() -> Self {
        Self { id: 0, remove: None }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Набор подписчиков на записи типа `T`.
pub struct Subscribers<T> {
    list: Arc<Mutex<ListenerList<T>>>,
    error_hook: Mutex<Option<ErrorHook>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            list: Arc::new(Mutex::new(ListenerList {
                next_id: 1,
                listeners: Vec::new(),
            })),
            error_hook: Mutex::new(None),
        }
    }

    /// Регистрирует слушателя в конец списка.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut list = lock(&self.list);
            let id = list.next_id;
            list.next_id += 1;
            list.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerList<T>>> = Arc::downgrade(&self.list);
        Subscription {
            id,
            remove: Some(Box::new(move |id| {
                if let Some(list) = weak.upgrade() {
                    lock(&list).listeners.retain(|(listener_id, _)| *listener_id != id);
                }
            })),
        }
    }

    /// Устанавливает побочный канал для отчётов о сбоях подписчиков.
    pub fn set_error_hook(&self, hook: impl Fn(&DiagnosticsError) + Send + Sync + 'static) {
        *lock(&self.error_hook) = Some(Arc::new(hook));
    }

    /// Удаляет всех слушателей.
    pub fn clear(&self) {
        lock(&self.list).listeners.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.list).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Доставляет запись всем слушателям. Возвращает количество сбоев.
    pub fn notify(&self, record: &T) -> usize {
        let snapshot: Vec<(u64, Listener<T>)> = lock(&self.list).listeners.clone();
        let mut failures = 0;

        for (id, listener) in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(record))) {
                failures += 1;
                let err = DiagnosticsError::Subscriber {
                    listener: id,
                    message: panic_message(payload.as_ref()),
                };
                warn!("{err}");
                self.report(&err);
            }
        }

        failures
    }

    fn report(&self, err: &DiagnosticsError) {
        let hook = lock(&self.error_hook).clone();
        if let Some(hook) = hook {
            // Сбой в самом обработчике ошибок тоже не должен выйти наружу.
            if catch_unwind(AssertUnwindSafe(|| hook(err))).is_err() {
                warn!("subscriber error hook panicked");
            }
        }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listeners_called_in_registration_order() {
        let subscribers = Subscribers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let _sub = subscribers.subscribe(move |value: &u32| {
                seen.lock().unwrap().push(format!("{tag}{value}"));
            });
        }

        subscribers.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated_and_reported() {
        let subscribers = Subscribers::<u32>::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(AtomicUsize::new(0));

        let _bad = subscribers.subscribe(|_: &u32| panic!("listener exploded"));
        let delivered_clone = delivered.clone();
        let _good = subscribers.subscribe(move |_: &u32| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        });
        let reported_clone = reported.clone();
        subscribers.set_error_hook(move |err| {
            assert!(err.to_string().contains("listener exploded"));
            reported_clone.fetch_add(1, Ordering::SeqCst);
        });

        let failures = subscribers.notify(&1);

        assert_eq!(failures, 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let subscribers = Subscribers::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        let first = subscribers.subscribe(move |_: &u32| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        let _second = subscribers.subscribe(move |_: &u32| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        first.unsubscribe();
        subscribers.notify(&0);

        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn test_unsubscribe_after_list_dropped_is_harmless() {
        let subscribers = Subscribers::<u32>::new();
        let sub = subscribers.subscribe(|_: &u32| {});
        drop(subscribers);
        sub.unsubscribe();
    }
}

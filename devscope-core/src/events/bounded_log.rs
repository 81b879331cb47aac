//! Ограниченный журнал событий с вытеснением старейших записей.
//!
//! Журнал хранит не более `capacity` записей в порядке добавления. При
//! переполнении вытесняется ровно одна самая старая запись. После каждого
//! добавления запись доставляется подписчикам.
//!
//! Доставка сериализована через очередь ожидающих записей: если колбэк
//! подписчика сам добавляет запись в этот же журнал, новая запись встаёт в
//! очередь и будет доставлена сразу после текущей. Так подписчики всегда
//! видят записи в порядке добавления, а повторный вход не блокируется.

use super::subscribers::{Subscribers, Subscription};
use crate::error::{lock, DiagnosticsError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct LogState<T> {
    records: VecDeque<T>,
    pending: VecDeque<T>,
    delivering: bool,
}

/// Журнал фиксированной ёмкости с уведомлением подписчиков.
pub struct BoundedEventLog<T> {
    capacity: usize,
    state: Mutex<LogState<T>>,
    subscribers: Subscribers<T>,
    appended: AtomicU64,
}

impl<T: Clone + Send + 'static> BoundedEventLog<T> {
    /// Создаёт журнал. Ёмкость 0 трактуется как 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LogState {
                records: VecDeque::with_capacity(capacity.min(1024)),
                pending: VecDeque::new(),
                delivering: false,
            }),
            subscribers: Subscribers::new(),
            appended: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Добавляет запись и уведомляет подписчиков.
    pub fn append(&self, record: T) {
        self.appended.fetch_add(1, Ordering::Relaxed);
        let deliver_now = {
            let mut state = lock(&self.state);
            if state.records.len() >= self.capacity {
                state.records.pop_front();
            }
            state.records.push_back(record.clone());
            self.enqueue(&mut state, record)
        };

        if deliver_now {
            self.drain_pending();
        }
    }

    /// Ставит запись в очередь доставки. `true`, если очередь нужно разобрать сейчас.
    fn enqueue(&self, state: &mut LogState<T>, record: T) -> bool {
        if self.subscribers.is_empty() && !state.delivering {
            return false;
        }
        state.pending.push_back(record);

        if state.delivering {
            false
        } else {
            state.delivering = true;
            true
        }
    }

    fn drain_pending(&self) {
        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.pending.pop_front() {
                    Some(record) => record,
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };
            self.subscribers.notify(&next);
        }
    }

    /// Сколько записей добавлено за всё время, включая вытесненные.
    pub fn total_appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Все записи в порядке добавления.
    pub fn all(&self) -> Vec<T> {
        lock(&self.state).records.iter().cloned().collect()
    }

    /// Записи, удовлетворяющие предикату, в порядке добавления.
    pub fn query(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        lock(&self.state)
            .records
            .iter()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    /// Последние `n` записей в порядке добавления.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let state = lock(&self.state);
        let skip = state.records.len().saturating_sub(n);
        state.records.iter().skip(skip).cloned().collect()
    }

    /// Последние `n` записей, удовлетворяющих предикату, в порядке добавления.
    pub fn recent_matching(&self, n: usize, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        let state = lock(&self.state);
        let mut matched: Vec<T> = state
            .records
            .iter()
            .rev()
            .filter(|record| predicate(record))
            .take(n)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Изменяет самую свежую запись, удовлетворяющую предикату.
    ///
    /// Подписчики не уведомляются. Возвращает копию изменённой записи или
    /// `None`, если запись уже вытеснена.
    pub fn update_where(
        &self,
        predicate: impl Fn(&T) -> bool,
        update: impl FnOnce(&mut T),
    ) -> Option<T> {
        let mut state = lock(&self.state);
        let record = state.records.iter_mut().rev().find(|record| predicate(record))?;
        update(record);
        Some(record.clone())
    }

    /// Очищает журнал без уведомления подписчиков.
    pub fn clear(&self) {
        lock(&self.state).records.clear();
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(listener)
    }

    pub fn set_error_hook(&self, hook: impl Fn(&DiagnosticsError) + Send + Sync + 'static) {
        self.subscribers.set_error_hook(hook);
    }

    /// Повторно доставляет запись подписчикам, не добавляя её в журнал.
    ///
    /// Идёт через ту же очередь, что и `append`: вызов из колбэка подписчика
    /// доставляется после уже ожидающих записей.
    pub(crate) fn publish(&self, record: &T) {
        let deliver_now = {
            let mut state = lock(&self.state);
            self.enqueue(&mut state, record.clone())
        };
        if deliver_now {
            self.drain_pending();
        }
    }

    pub(crate) fn unsubscribe_all(&self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_overflow_keeps_newest_records_in_order() {
        let log = BoundedEventLog::new(3);
        for i in 0..10 {
            log.append(i);
        }
        assert_eq!(log.all(), vec![7, 8, 9]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.total_appended(), 10);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = BoundedEventLog::new(0);
        log.append("a");
        log.append("b");
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.all(), vec!["b"]);
    }

    #[test]
    fn test_query_and_recent_accessors() {
        let log = BoundedEventLog::new(10);
        for i in 1..=6 {
            log.append(i);
        }
        assert_eq!(log.query(|v| v % 2 == 0), vec![2, 4, 6]);
        assert_eq!(log.recent(2), vec![5, 6]);
        assert_eq!(log.recent(100), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(log.recent_matching(2, |v| v % 2 == 1), vec![3, 5]);
    }

    #[test]
    fn test_subscribers_see_records_after_store() {
        let log = Arc::new(BoundedEventLog::new(5));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        let seen_clone = seen.clone();
        let _sub = log.subscribe(move |value: &u32| {
            // Запись уже должна лежать в журнале к моменту уведомления.
            assert_eq!(log_clone.recent(1), vec![*value]);
            seen_clone.lock().unwrap().push(*value);
        });

        log.append(1);
        log.append(2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_clear_does_not_notify() {
        let log = BoundedEventLog::new(5);
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let _sub = log.subscribe(move |_: &u32| *count_clone.lock().unwrap() += 1);

        log.append(1);
        log.clear();

        assert!(log.is_empty());
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_reentrant_append_is_delivered_in_order() {
        let log = Arc::new(BoundedEventLog::new(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        let seen_clone = seen.clone();
        let _sub = log.subscribe(move |value: &u32| {
            seen_clone.lock().unwrap().push(*value);
            if *value == 1 {
                log_clone.append(100);
            }
        });

        log.append(1);
        log.append(2);

        assert_eq!(log.all(), vec![1, 100, 2]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 100, 2]);
    }

    #[test]
    fn test_publish_from_subscriber_waits_for_queued_appends() {
        let log = Arc::new(BoundedEventLog::new(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        let seen_clone = seen.clone();
        let _sub = log.subscribe(move |value: &u32| {
            seen_clone.lock().unwrap().push(*value);
            if *value == 1 {
                log_clone.append(100);
                log_clone.publish(&200);
            }
        });

        log.append(1);
        log.publish(&300);

        assert_eq!(log.all(), vec![1, 100]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 100, 200, 300]);
        assert_eq!(log.total_appended(), 2);
    }

    #[test]
    fn test_panicking_subscriber_does_not_corrupt_log() {
        let log = BoundedEventLog::new(2);
        let _bad = log.subscribe(|_: &u32| panic!("bad subscriber"));

        log.append(1);
        log.append(2);
        log.append(3);

        assert_eq!(log.all(), vec![2, 3]);
    }

    #[test]
    fn test_update_where_mutates_newest_match() {
        let log = BoundedEventLog::new(5);
        log.append((1, "a"));
        log.append((1, "b"));
        log.append((2, "c"));

        let updated = log.update_where(|(k, _)| *k == 1, |record| record.1 = "z");

        assert_eq!(updated, Some((1, "z")));
        assert_eq!(log.all(), vec![(1, "a"), (1, "z"), (2, "c")]);
        assert!(log.update_where(|(k, _)| *k == 9, |_| {}).is_none());
    }
}

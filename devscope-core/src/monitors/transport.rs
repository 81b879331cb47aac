//! Механизмы запросов хоста и слоты для их подмены.
//!
//! У хоста два механизма: асинхронный ([`FetchTransport`]) и с колбэком
//! ([`CallbackTransport`]). Хост держит текущие реализации в
//! [`TransportSlots`] и всегда вызывает их через слоты, поэтому монитор
//! может подменить реализацию обёрткой и позже вернуть оригинал.

use crate::error::lock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Сбой запроса на стороне хоста.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("request aborted")]
    Aborted,
}

/// Асинхронный механизм запросов.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Колбэк завершения запроса.
pub type ResponseCallback = Box<dyn FnOnce(Result<HttpResponse, TransportError>) + Send>;

/// Механизм запросов с колбэком завершения.
pub trait CallbackTransport: Send + Sync {
    fn send(&self, request: HttpRequest, on_done: ResponseCallback);
}

/// Текущие реализации механизмов запросов хоста.
pub struct TransportSlots {
    fetch: Mutex<Arc<dyn FetchTransport>>,
    callback: Mutex<Arc<dyn CallbackTransport>>,
    intercepted: AtomicBool,
}

impl TransportSlots {
    pub fn new(fetch: Arc<dyn FetchTransport>, callback: Arc<dyn CallbackTransport>) -> Self {
        Self {
            fetch: Mutex::new(fetch),
            callback: Mutex::new(callback),
            intercepted: AtomicBool::new(false),
        }
    }

    /// Выполняет запрос через текущую асинхронную реализацию.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let transport = self.fetch_transport();
        transport.fetch(request).await
    }

    /// Отправляет запрос через текущую реализацию с колбэком.
    pub fn send(&self, request: HttpRequest, on_done: ResponseCallback) {
        let transport = self.callback_transport();
        transport.send(request, on_done);
    }

    pub fn fetch_transport(&self) -> Arc<dyn FetchTransport> {
        Arc::clone(&lock(&self.fetch))
    }

    pub fn callback_transport(&self) -> Arc<dyn CallbackTransport> {
        Arc::clone(&lock(&self.callback))
    }

    pub fn is_intercepted(&self) -> bool {
        self.intercepted.load(Ordering::SeqCst)
    }

    /// Занимает слоты под перехват. `false`, если они уже заняты.
    pub(crate) fn claim(&self) -> bool {
        self.intercepted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.intercepted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn replace_fetch(&self, next: Arc<dyn FetchTransport>) -> Arc<dyn FetchTransport> {
        std::mem::replace(&mut *lock(&self.fetch), next)
    }

    pub(crate) fn replace_callback(
        &self,
        next: Arc<dyn CallbackTransport>,
    ) -> Arc<dyn CallbackTransport> {
        std::mem::replace(&mut *lock(&self.callback), next)
    }
}

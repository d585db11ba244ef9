//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.).

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use draftkit_sync_protocol::{
    FullPullResponse, PullRequest, PullResponse, PushRequest, PushSummary,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
/// This allows using different HTTP libraries (reqwest, hyper, ureq, etc.)
/// or even non-HTTP transports (WebSocket, gRPC).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the status code and response body.
    fn post(&self, url: &str, auth_token: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Uses JSON encoding for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    /// Auth token sent with every request.
    auth_token: String,
    /// HTTP client implementation.
    client: C,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("Failed to encode request: {}", e)))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let (status, response_body) =
            self.client.post(&url, &self.auth_token, body).map_err(|e| {
                self.set_error(&e);
                self.connected.store(false, Ordering::SeqCst);
                SyncError::transport_retryable(e)
            })?;

        match status {
            200 => {
                self.clear_error();
                serde_json::from_slice(&response_body)
                    .map_err(|e| SyncError::Protocol(format!("Failed to decode response: {}", e)))
            }
            401 | 403 => Err(SyncError::Unauthorized(body_message(&response_body))),
            400..=499 => Err(SyncError::Validation(body_message(&response_body))),
            _ => {
                let message = body_message(&response_body);
                self.set_error(&message);
                Err(SyncError::Server(message))
            }
        }
    }
}

fn body_message(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.is_empty() {
        "no response body".to_string()
    } else {
        text.into_owned()
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, request: &PushRequest) -> SyncResult<PushSummary> {
        self.post_json("/sync/push", request)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_json("/sync/pull", request)
    }

    fn full_pull(&self) -> SyncResult<FullPullResponse> {
        self.post_json("/sync/pull", &PullRequest::full())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the status code and response body.
    fn handle_post(&self, path: &str, auth_token: &str, body: &[u8]) -> (u16, Vec<u8>);
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, auth_token: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, auth_token, &body))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use draftkit_sync_protocol::{
    FullPullResponse, PullRequest, PullResponse, PushRequest, PushSummary,
};

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, mock for testing, loopback for integration tests, etc.).
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of queued changes to the server.
    fn push(&self, request: &PushRequest) -> SyncResult<PushSummary>;

    /// Pulls a delta of remote changes since the supplied watermark.
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Fetches the complete authoritative data set.
    fn full_pull(&self) -> SyncResult<FullPullResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
#[derive(Debug)]
pub struct MockTransport {
    connected: std::sync::atomic::AtomicBool,
    push_response: std::sync::Mutex<Option<PushSummary>>,
    pull_response: std::sync::Mutex<Option<PullResponse>>,
    full_pull_response: std::sync::Mutex<Option<FullPullResponse>>,
    fail_next_push: std::sync::Mutex<Option<String>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: std::sync::atomic::AtomicBool::new(true),
            push_response: std::sync::Mutex::new(None),
            pull_response: std::sync::Mutex::new(None),
            full_pull_response: std::sync::Mutex::new(None),
            fail_next_push: std::sync::Mutex::new(None),
        }
    }

    /// Sets the push response.
    pub fn set_push_response(&self, response: PushSummary) {
        *self.push_response.lock().unwrap() = Some(response);
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_response.lock().unwrap() = Some(response);
    }

    /// Sets the full pull response.
    pub fn set_full_pull_response(&self, response: FullPullResponse) {
        *self.full_pull_response.lock().unwrap() = Some(response);
    }

    /// Makes the next push fail with a retryable transport error.
    pub fn fail_next_push(&self, message: impl Into<String>) {
        *self.fail_next_push.lock().unwrap() = Some(message.into());
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected
            .store(connected, std::sync::atomic::Ordering::SeqCst);
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, _request: &PushRequest) -> SyncResult<PushSummary> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        if let Some(message) = self.fail_next_push.lock().unwrap().take() {
            return Err(SyncError::transport_retryable(message));
        }
        self.push_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Protocol("No mock push response set".into()))
    }

    fn pull(&self, _request: &PullRequest) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pull_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Protocol("No mock pull response set".into()))
    }

    fn full_pull(&self) -> SyncResult<FullPullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.full_pull_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Protocol("No mock full pull response set".into()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());

        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let request = PushRequest::new(Vec::new());
        let result = transport.push(&request);
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn mock_transport_push() {
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::empty());

        let request = PushRequest::new(Vec::new());
        let summary = transport.push(&request).unwrap();
        assert_eq!(summary.total, 0);
    }

    #[test]
    fn mock_transport_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.set_push_response(PushSummary::empty());
        transport.fail_next_push("connection reset");

        let request = PushRequest::new(Vec::new());
        let first = transport.push(&request);
        assert!(matches!(first, Err(SyncError::Transport { .. })));

        let second = transport.push(&request);
        assert!(second.is_ok());
    }
}

//! Main sync server.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::SyncHandler;
use draftkit_sync_protocol::{FullPullResponse, PullReply, PullRequest, PushRequest, PushSummary};

/// The sync server.
///
/// Every request carries an auth token; the server resolves it to a
/// user id before any handler runs. With auth disabled (tests, local
/// development) the token is taken as the user id directly.
///
/// # Example
///
/// ```
/// use draftkit_sync_server::{ServerConfig, SyncServer};
/// use draftkit_sync_protocol::PushRequest;
///
/// let server = SyncServer::new(ServerConfig::default());
/// let summary = server.handle_push("user-1", &PushRequest::new(Vec::new())).unwrap();
/// assert_eq!(summary.total, 0);
/// ```
pub struct SyncServer {
    handler: SyncHandler,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        let validator = if config.require_auth {
            config.auth_secret.clone().map(|secret| {
                TokenValidator::new(
                    AuthConfig::new(secret).with_expiry(config.token_expiry),
                )
            })
        } else {
            None
        };
        Self {
            handler: SyncHandler::new(config),
            validator,
        }
    }

    /// Issues an auth token for a user. Only available with auth enabled.
    pub fn issue_token(&self, user_id: &str) -> ServerResult<String> {
        self.validator
            .as_ref()
            .map(|v| v.create_token(user_id))
            .ok_or_else(|| ServerError::Internal("auth is not enabled".into()))
    }

    /// Resolves an auth token to a user id.
    pub fn authorize(&self, token: &str) -> ServerResult<String> {
        match &self.validator {
            Some(validator) => validator.validate_token(token),
            None if token.is_empty() => {
                Err(ServerError::Unauthorized("missing user identity".into()))
            }
            None => Ok(token.to_string()),
        }
    }

    /// Handles a push request for the given token.
    pub fn handle_push(&self, token: &str, request: &PushRequest) -> ServerResult<PushSummary> {
        let user_id = self.authorize(token)?;
        self.handler.handle_push(&user_id, request)
    }

    /// Handles a pull request for the given token, full or delta per
    /// `full_sync`.
    pub fn handle_pull(&self, token: &str, request: &PullRequest) -> ServerResult<PullReply> {
        let user_id = self.authorize(token)?;
        self.handler.handle_pull(&user_id, request)
    }

    /// Handles a full pull for the given token.
    pub fn handle_full_pull(&self, token: &str) -> ServerResult<FullPullResponse> {
        let user_id = self.authorize(token)?;
        self.handler.handle_full_pull(&user_id)
    }

    /// Number of entities stored for a user, tombstones included.
    pub fn entity_count(&self, user_id: &str) -> usize {
        self.handler.entity_count(user_id)
    }
}

//! Per-connection session
//!
//! A session owns the connection metadata (origin, login state) and runs
//! each inbound frame through decode → route → provider resolution → auth
//! check → handler → encode. Frames are independent; the caller may run many
//! `handle_frame` calls concurrently.
//!
//! ```text
//! Connecting --open()--> Active --close()--> Closed
//! ```
//!
//! Once `Closed`, no more results are produced, including for actions that
//! were already in flight.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::local_digest;
use crate::logging::UsageLogger;
use crate::protocol::params::DigestParams;
use crate::protocol::{
    decode_action, decode_params, encode_result, Action, ActionCode, ResultFrame, WireError,
};
use crate::provider::ProviderDirectory;
use crate::registry::HandleRegistry;
use crate::service::{
    reply_bytes, ActionContext, ActionError, ActionResult, Service as _, ServiceSet,
};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Active,
    Closed,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionStatus::Connecting,
            1 => SessionStatus::Active,
            _ => SessionStatus::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionStatus::Connecting => 0,
            SessionStatus::Active => 1,
            SessionStatus::Closed => 2,
        }
    }
}

/// Connection metadata shared with handlers
#[derive(Debug)]
pub struct SessionState {
    id: Uuid,
    origin: String,
    /// Providers this session has logged in to
    authenticated: DashSet<String>,
    /// Handle ids registered on behalf of this session
    owned: DashSet<String>,
    status: AtomicU8,
}

impl SessionState {
    pub fn new(origin: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            authenticated: DashSet::new(),
            owned: DashSet::new(),
            status: AtomicU8::new(SessionStatus::Connecting.as_u8()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Client origin, opaque to the dispatcher
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: SessionStatus) -> SessionStatus {
        SessionStatus::from_u8(self.status.swap(status.as_u8(), Ordering::AcqRel))
    }

    pub fn authenticate(&self, provider_id: &str) {
        self.authenticated.insert(provider_id.to_string());
    }

    pub fn logout(&self, provider_id: &str) {
        self.authenticated.remove(provider_id);
    }

    pub fn is_authenticated(&self, provider_id: &str) -> bool {
        self.authenticated.contains(provider_id)
    }

    /// Record a handle this session created. Returns false when the session
    /// has already closed, in which case the caller must drop the handle.
    pub fn track(&self, handle_id: &str) -> bool {
        self.owned.insert(handle_id.to_string());
        self.status() != SessionStatus::Closed
    }

    pub fn untrack(&self, handle_id: &str) {
        self.owned.remove(handle_id);
    }

    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    /// Remove and return every tracked handle id.
    fn drain_owned(&self) -> Vec<String> {
        let ids: Vec<String> = self.owned.iter().map(|id| id.key().clone()).collect();
        for id in &ids {
            self.owned.remove(id);
        }
        ids
    }
}

/// One client connection
pub struct Session {
    state: Arc<SessionState>,
    services: Arc<ServiceSet>,
    directory: Arc<ProviderDirectory>,
    registry: Arc<HandleRegistry>,
    usage: UsageLogger,
    opened_at: Instant,
}

impl Session {
    pub fn new(
        origin: String,
        services: Arc<ServiceSet>,
        directory: Arc<ProviderDirectory>,
        registry: Arc<HandleRegistry>,
        usage: UsageLogger,
    ) -> Self {
        Self {
            state: Arc::new(SessionState::new(origin)),
            services,
            directory,
            registry,
            usage,
            opened_at: Instant::now(),
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Start accepting actions.
    pub async fn open(&self) {
        if self.state.set_status(SessionStatus::Active) == SessionStatus::Connecting {
            info!(session = %self.state.id, origin = %self.state.origin, "Session opened");
            self.usage
                .log_connection_opened(&self.state.id.to_string(), &self.state.origin)
                .await;
        }
    }

    /// Stop producing results and release the handles this session
    /// created. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.state.set_status(SessionStatus::Closed) != SessionStatus::Closed {
            let released = self.release_owned();
            let duration_ms = self.opened_at.elapsed().as_millis() as u64;
            info!(session = %self.state.id, duration_ms, released, "Session closed");
            self.usage
                .log_connection_closed(&self.state.id.to_string(), &self.state.origin, duration_ms)
                .await;
        }
    }

    fn release_owned(&self) -> usize {
        let ids = self.state.drain_owned();
        for id in &ids {
            self.registry.remove(id);
        }
        ids.len()
    }

    /// Process one inbound frame and return the encoded result, or `None`
    /// when the session is not active.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.state.status() != SessionStatus::Active {
            return None;
        }

        let result = match decode_action(frame) {
            Ok(action) => self.run(action).await,
            Err(e) => {
                let id = e.id.unwrap_or_default();
                warn!(session = %self.state.id, id = %id, code = %e.code, "Rejected frame: {}", e.message);
                ResultFrame {
                    id,
                    outcome: Err(WireError {
                        code: e.code,
                        message: e.message,
                    }),
                }
            }
        };

        if self.state.status() == SessionStatus::Closed {
            debug!(session = %self.state.id, id = %result.id, "Dropping result for closed session");
            return None;
        }
        Some(encode_result(&result))
    }

    async fn run(&self, action: Action) -> ResultFrame {
        let started = Instant::now();
        let code = action.code;
        let provider_id = action.provider_id.clone();
        let id = action.id.clone();
        debug!(
            session = %self.state.id,
            id = %id,
            action = %code,
            provider = ?provider_id,
            "Dispatching action"
        );

        let outcome = self.dispatch(action).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let error_code = outcome.as_ref().err().map(|e| e.code());
        if let Err(e) = &outcome {
            warn!(
                session = %self.state.id,
                id = %id,
                action = %code,
                provider = ?provider_id,
                code = %e.code(),
                "Action failed: {}",
                e
            );
        }
        self.usage
            .log_action(
                &self.state.id.to_string(),
                &self.state.origin,
                code.as_str(),
                provider_id.as_deref(),
                error_code.as_ref().map(|c| c.as_str()),
                duration_ms,
            )
            .await;

        ResultFrame {
            id,
            outcome: outcome.map_err(|e| e.to_wire()),
        }
    }

    /// Route one decoded action to its service.
    pub async fn dispatch(&self, action: Action) -> ActionResult {
        let service = self
            .services
            .route(action.code)
            .ok_or_else(|| ActionError::not_implemented(action.code))?;

        let provider = if action.code.requires_provider() {
            let provider_id = action.provider_id.as_deref().ok_or_else(|| {
                ActionError::ProviderNotFound(format!(
                    "Action '{}' requires a provider",
                    action.code
                ))
            })?;
            let provider = self.directory.resolve(provider_id).ok_or_else(|| {
                ActionError::ProviderNotFound(format!("Provider '{provider_id}' not found"))
            })?;

            if provider.info().requires_login
                && action.code.requires_auth()
                && !self.state.is_authenticated(provider.id())
            {
                return Err(ActionError::NotAuthenticated(format!(
                    "Session is not logged in to provider '{}'",
                    provider.id()
                )));
            }
            Some(provider)
        } else {
            None
        };

        if action.code == ActionCode::Digest {
            if let Some(output) = Self::fast_digest(&action.data) {
                return reply_bytes(output);
            }
        }

        let ctx = ActionContext {
            code: action.code,
            data: action.data,
            provider,
            registry: self.registry.clone(),
            directory: self.directory.clone(),
            session: self.state.clone(),
            usage: self.usage.clone(),
        };
        service.handle(ctx).await
    }

    /// In-process digest; `None` falls through to the provider path.
    fn fast_digest(data: &[u8]) -> Option<Vec<u8>> {
        let params: DigestParams = decode_params(data).ok()?;
        local_digest(params.algorithm.name(), &params.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyUsage;
    use crate::protocol::params::{
        AlgorithmObject, AlgorithmParams, GenerateKeyParams, HandleRef, LoginParams,
        ReleaseParams,
    };
    use crate::registry::KeyHandle;
    use crate::protocol::{decode_result, encode_action, encode_data, ErrorCode};
    use crate::service::test_support::{directory, TEST_PIN};
    use crate::service::{ServerService, Service, SubtleService};

    fn session(services: ServiceSet) -> Session {
        Session::new(
            "https://app.example".into(),
            Arc::new(services),
            directory(),
            Arc::new(HandleRegistry::new(100)),
            UsageLogger::new("test".into()),
        )
    }

    fn action<T: serde::Serialize>(code: ActionCode, provider: Option<&str>, params: &T) -> Vec<u8> {
        encode_action(&Action {
            id: "1".into(),
            code,
            provider_id: provider.map(str::to_string),
            data: encode_data(params).unwrap(),
        })
    }

    async fn send(session: &Session, frame: Vec<u8>) -> ResultFrame {
        decode_result(&session.handle_frame(&frame).await.unwrap()).unwrap()
    }

    fn error_code(frame: &ResultFrame) -> ErrorCode {
        frame.outcome.as_ref().unwrap_err().code
    }

    #[tokio::test]
    async fn test_no_results_outside_active() {
        let session = session(ServiceSet::standard().unwrap());
        let frame = action(ActionCode::ServerPing, None, &());
        assert!(session.handle_frame(&frame).await.is_none());

        session.open().await;
        assert!(session.handle_frame(&frame).await.is_some());

        session.close().await;
        assert_eq!(session.state().status(), SessionStatus::Closed);
        assert!(session.handle_frame(&frame).await.is_none());
    }

    #[tokio::test]
    async fn test_unrouted_code_is_not_implemented() {
        let session = session(ServiceSet::new(vec![Arc::new(ServerService)]).unwrap());
        session.open().await;
        let result = send(&session, action(ActionCode::Sign, Some("software"), &())).await;
        assert_eq!(error_code(&result), ErrorCode::ActionNotImplemented);
        assert!(result
            .outcome
            .unwrap_err()
            .message
            .contains("crypto/subtle/sign"));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let session = session(ServiceSet::standard().unwrap());
        session.open().await;
        let result = send(&session, action(ActionCode::KeyStorageKeys, Some("pkcs11"), &())).await;
        assert_eq!(error_code(&result), ErrorCode::ProviderNotFound);
        let result = send(&session, action(ActionCode::KeyStorageKeys, None, &())).await;
        assert_eq!(error_code(&result), ErrorCode::ProviderNotFound);
    }

    #[tokio::test]
    async fn test_token_requires_login() {
        let session = session(ServiceSet::standard().unwrap());
        session.open().await;

        let keys = action(ActionCode::KeyStorageKeys, Some("token"), &());
        let result = send(&session, keys.clone()).await;
        assert_eq!(error_code(&result), ErrorCode::NotAuthenticated);

        // digest is exempt
        let digest = DigestParams {
            algorithm: AlgorithmParams::named("SHA-1"),
            data: b"abc".to_vec(),
        };
        let result = send(&session, action(ActionCode::Digest, Some("token"), &digest)).await;
        assert!(result.outcome.is_ok());

        let login = LoginParams {
            pin: TEST_PIN.into(),
        };
        let result = send(&session, action(ActionCode::ProviderLogin, Some("token"), &login)).await;
        assert!(result.outcome.is_ok());
        let result = send(&session, keys).await;
        assert!(result.outcome.is_ok());
    }

    #[tokio::test]
    async fn test_digest_paths_agree() {
        let session = session(ServiceSet::standard().unwrap());
        session.open().await;
        let params = DigestParams {
            algorithm: AlgorithmParams::named("SHA-384"),
            data: b"keyward".to_vec(),
        };

        let fast = send(&session, action(ActionCode::Digest, Some("software"), &params)).await;

        let ctx = ActionContext {
            code: ActionCode::Digest,
            data: encode_data(&params).unwrap(),
            provider: session.directory.resolve("software"),
            registry: session.registry.clone(),
            directory: session.directory.clone(),
            session: session.state.clone(),
            usage: session.usage.clone(),
        };
        let slow = SubtleService.handle(ctx).await.unwrap();

        assert_eq!(fast.outcome.unwrap(), slow);
    }

    #[tokio::test]
    async fn test_garbage_frame_gets_an_error_result() {
        let session = session(ServiceSet::standard().unwrap());
        session.open().await;
        let result = send(&session, vec![0x93, 0x01, 0x02, 0x03]).await;
        assert_eq!(result.id, "");
        assert_eq!(error_code(&result), ErrorCode::BadParameters);
    }

    fn generate_aes() -> GenerateKeyParams {
        GenerateKeyParams {
            algorithm: AlgorithmParams::Object(AlgorithmObject {
                name: "AES-GCM".into(),
                length: Some(128),
                ..Default::default()
            }),
            extractable: false,
            key_usages: vec![KeyUsage::Encrypt],
        }
    }

    #[tokio::test]
    async fn test_close_releases_session_handles() {
        let registry = Arc::new(HandleRegistry::new(2));
        let services = Arc::new(ServiceSet::standard().unwrap());
        let directory = directory();
        let open = || {
            Session::new(
                "https://app.example".into(),
                services.clone(),
                directory.clone(),
                registry.clone(),
                UsageLogger::new("test".into()),
            )
        };

        for _ in 0..2 {
            let session = open();
            session.open().await;
            let result = send(&session, action(ActionCode::GenerateKey, Some("software"), &generate_aes())).await;
            assert!(result.outcome.is_ok());
            assert_eq!(session.state().owned_count(), 1);
            session.close().await;
        }
        assert!(registry.is_empty());

        let session = open();
        session.open().await;
        let first = send(&session, action(ActionCode::GenerateKey, Some("software"), &generate_aes())).await;
        let key: KeyHandle = rmp_serde::from_slice(&first.outcome.unwrap()).unwrap();
        let second = send(&session, action(ActionCode::GenerateKey, Some("software"), &generate_aes())).await;
        assert!(second.outcome.is_ok());

        // released handles stop counting against the session
        let release = ReleaseParams {
            handles: vec![HandleRef::Id(key.id)],
        };
        let result = send(&session, action(ActionCode::ServerRelease, None, &release)).await;
        assert!(result.outcome.is_ok());
        assert_eq!(session.state().owned_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_handles_from_other_sessions_survive_close() {
        let registry = Arc::new(HandleRegistry::new(10));
        let services = Arc::new(ServiceSet::standard().unwrap());
        let keeper = Session::new(
            "https://a.example".into(),
            services.clone(),
            directory(),
            registry.clone(),
            UsageLogger::new("test".into()),
        );
        let leaver = Session::new(
            "https://b.example".into(),
            services,
            directory(),
            registry.clone(),
            UsageLogger::new("test".into()),
        );
        keeper.open().await;
        leaver.open().await;

        let kept = send(&keeper, action(ActionCode::GenerateKey, Some("software"), &generate_aes())).await;
        let kept: KeyHandle = rmp_serde::from_slice(&kept.outcome.unwrap()).unwrap();
        send(&leaver, action(ActionCode::GenerateKey, Some("software"), &generate_aes())).await;
        assert_eq!(registry.len(), 2);

        leaver.close().await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get_key(&kept.id).is_ok());
    }
}

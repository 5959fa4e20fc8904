use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, CredentialSlot};
use crate::config::Config;
use crate::models::{AuthResponse, User};

use super::callback::{extract_callback_code, History};
use super::storage::CredentialStorage;

/// Storage key holding the session token
pub const TOKEN_STORAGE_KEY: &str = "@dowhile:token";

/// Buffer size for the background completion channel.
/// At most a restore and a sign-in are normally in flight.
const CHANNEL_BUFFER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum AuthOperation {
    SignIn,
    RestoreSession,
}

impl fmt::Display for AuthOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthOperation::SignIn => write!(f, "Sign-in"),
            AuthOperation::RestoreSession => write!(f, "Session restore"),
        }
    }
}

/// Failure of a background auth operation, surfaced to consumers.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[error("{operation} failed: {message}")]
pub struct AuthError {
    pub operation: AuthOperation,
    pub message: String,
}

impl AuthError {
    fn from_api(operation: AuthOperation, err: &ApiError) -> Self {
        Self {
            operation,
            message: err.user_message(),
        }
    }
}

/// Read-only view of the session handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionState {
    pub user: Option<User>,
    pub sign_in_url: String,
    pub error: Option<AuthError>,
}

impl SessionState {
    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }
}

/// Completions of background requests, applied by `AuthSession`.
enum AuthEvent {
    SignedIn {
        epoch: u64,
        result: Result<AuthResponse, ApiError>,
    },
    ProfileLoaded {
        epoch: u64,
        result: Result<User, ApiError>,
    },
}

impl AuthEvent {
    fn epoch(&self) -> u64 {
        match self {
            AuthEvent::SignedIn { epoch, .. } | AuthEvent::ProfileLoaded { epoch, .. } => *epoch,
        }
    }
}

/// State shared between the manager and every `SessionHandle`.
struct Shared {
    storage: Arc<dyn CredentialStorage>,
    credential: CredentialSlot,
    state_tx: watch::Sender<SessionState>,
    // Bumped on sign-out; results from an older epoch are dropped.
    // Held while applying a result so sign-out cannot interleave.
    epoch: Mutex<u64>,
}

impl Shared {
    fn current_epoch(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sign_out(&self) {
        let mut epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        *epoch += 1;

        self.state_tx.send_modify(|state| {
            state.user = None;
            state.error = None;
        });

        if let Err(e) = self.storage.remove(TOKEN_STORAGE_KEY) {
            warn!(error = %e, storage = self.storage.name(), "Failed to remove stored token");
        }

        self.credential.clear();
        info!("Signed out");
    }

    fn apply(&self, event: AuthEvent) {
        let epoch = self.epoch.lock().unwrap_or_else(|e| e.into_inner());
        if event.epoch() != *epoch {
            debug!("Discarding result of request started before sign-out");
            return;
        }

        match event {
            AuthEvent::SignedIn { result: Ok(auth), .. } => {
                let AuthResponse { token, user } = auth;

                if let Err(e) = self.storage.set(TOKEN_STORAGE_KEY, &token) {
                    warn!(error = %e, storage = self.storage.name(), "Failed to persist token");
                }

                self.credential.set(token);

                info!(login = %user.login, "Signed in");
                self.state_tx.send_modify(|state| {
                    state.user = Some(user);
                    state.error = None;
                });
            }
            AuthEvent::SignedIn { result: Err(e), .. } => {
                error!(error = %e, "Sign-in failed");
                let err = AuthError::from_api(AuthOperation::SignIn, &e);
                self.state_tx.send_modify(|state| state.error = Some(err));
            }
            AuthEvent::ProfileLoaded { result: Ok(user), .. } => {
                debug!(login = %user.login, "Session restored");
                self.state_tx.send_modify(|state| {
                    state.user = Some(user);
                    state.error = None;
                });
            }
            AuthEvent::ProfileLoaded { result: Err(e), .. } => {
                warn!(error = %e, "Failed to restore session");
                let err = AuthError::from_api(AuthOperation::RestoreSession, &e);
                // A sign-in that already completed takes precedence
                self.state_tx.send_if_modified(|state| {
                    if state.user.is_some() {
                        return false;
                    }
                    state.error = Some(err);
                    true
                });
            }
        }
    }
}

/// Cloneable consumer view of the session: current user, sign-in URL,
/// last error and the sign-out action.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.shared.state_tx.borrow().user.clone()
    }

    pub fn sign_in_url(&self) -> String {
        self.shared.state_tx.borrow().sign_in_url.clone()
    }

    pub fn error(&self) -> Option<AuthError> {
        self.shared.state_tx.borrow().error.clone()
    }

    /// Receiver notified after every applied change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn sign_out(&self) {
        self.shared.sign_out();
    }
}

/// Manages the GitHub sign-in session.
///
/// Network calls run as spawned tokio tasks and report back over a channel;
/// results are applied by `process_events`, `next_event` or `settle`, one at
/// a time, so the last completion wins. Must be created inside a tokio
/// runtime.
pub struct AuthSession {
    api: ApiClient,
    history: Arc<dyn History>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<AuthEvent>,
    events_rx: mpsc::Receiver<AuthEvent>,
    pending: usize,
}

impl AuthSession {
    /// Create a session manager without touching storage or the location
    pub fn new(
        config: &Config,
        storage: Arc<dyn CredentialStorage>,
        history: Arc<dyn History>,
    ) -> Result<Self, ApiError> {
        let credential = CredentialSlot::new();
        let api = ApiClient::new(&config.api_base_url, credential.clone())?;

        let (state_tx, _) = watch::channel(SessionState {
            user: None,
            sign_in_url: config.sign_in_url()?,
            error: None,
        });

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);

        debug!(api = %api.base_url(), storage = storage.name(), "Auth session created");

        Ok(Self {
            api,
            history,
            shared: Arc::new(Shared {
                storage,
                credential,
                state_tx,
                epoch: Mutex::new(0),
            }),
            events_tx,
            events_rx,
            pending: 0,
        })
    }

    /// Create the manager, restore any stored session and complete a pending
    /// OAuth callback. Returns before any network request finishes.
    pub fn start(
        config: &Config,
        storage: Arc<dyn CredentialStorage>,
        history: Arc<dyn History>,
    ) -> Result<Self, ApiError> {
        let mut session = Self::new(config, storage, history)?;
        session.restore_session();
        session.complete_oauth_callback();
        Ok(session)
    }

    /// API client carrying the session credential, for further backend calls
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.shared.state_tx.borrow().user.clone()
    }

    pub fn sign_in_url(&self) -> String {
        self.shared.state_tx.borrow().sign_in_url.clone()
    }

    pub fn error(&self) -> Option<AuthError> {
        self.shared.state_tx.borrow().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Number of background requests whose results have not been applied
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Load the stored token and, if present, fetch the matching profile
    /// in the background.
    pub fn restore_session(&mut self) {
        let token = match self.shared.storage.get(TOKEN_STORAGE_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                debug!("No stored session token");
                return;
            }
            Err(e) => {
                warn!(error = %e, storage = self.shared.storage.name(), "Failed to read stored token");
                return;
            }
        };

        self.shared.credential.set(token);
        debug!("Stored token found, fetching profile");

        let api = self.api.clone();
        let epoch = self.shared.current_epoch();
        self.spawn(async move {
            AuthEvent::ProfileLoaded {
                epoch,
                result: api.profile().await,
            }
        });
    }

    /// If the current location is a GitHub callback, strip the code from it
    /// and sign in. Returns whether a callback was found.
    pub fn complete_oauth_callback(&mut self) -> bool {
        let location = self.history.location();
        let Some(callback) = extract_callback_code(&location) else {
            return false;
        };

        debug!("OAuth callback detected");
        self.history.push_state(&callback.clean_url);
        self.sign_in(&callback.code);
        true
    }

    /// Exchange an OAuth code for a session in the background
    pub fn sign_in(&mut self, code: &str) {
        if code.is_empty() {
            warn!("Ignoring sign-in with empty OAuth code");
            return;
        }

        let api = self.api.clone();
        let code = code.to_string();
        let epoch = self.shared.current_epoch();
        self.spawn(async move {
            AuthEvent::SignedIn {
                epoch,
                result: api.authenticate(&code).await,
            }
        });
    }

    pub fn sign_out(&self) {
        self.shared.sign_out();
    }

    /// Apply every completion that has already arrived, without waiting
    pub fn process_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    /// Wait for the next background request to finish and apply it.
    /// Returns `false` immediately when nothing is in flight.
    pub async fn next_event(&mut self) -> bool {
        if self.pending == 0 {
            return false;
        }
        match self.events_rx.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }

    /// Wait until every background request has finished and been applied
    pub async fn settle(&mut self) {
        while self.next_event().await {}
    }

    fn apply(&mut self, event: AuthEvent) {
        self.pending = self.pending.saturating_sub(1);
        self.shared.apply(event);
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = AuthEvent> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        self.pending += 1;
        tokio::spawn(async move {
            let event = task.await;
            Self::send_event(&tx, event).await;
        });
    }

    /// Helper to send a completion, logging if the session is gone
    async fn send_event(tx: &mpsc::Sender<AuthEvent>, event: AuthEvent) {
        if tx.send(event).await.is_err() {
            debug!("Auth session dropped before request completed, discarding result");
        }
    }
}

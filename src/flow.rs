//! # OAuth Flow Controller
//!
//! Orchestrates start → redirect → resume → exchange for one authorization
//! attempt. The redirect is a process-level suspension: the pre-redirect
//! and post-redirect halves are independent executions that communicate
//! only through the [`TransactionStore`], never through in-memory
//! continuation state.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use metrics::counter;
use scopeguard::defer;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::models::{Connection, ConnectionStatus};
use crate::pkce;
use crate::rpc::{ExchangeRequest, LifecycleRpc, RpcError};
use crate::transaction::{PendingAuthorization, TransactionStatus, TransactionStore};

/// Where the controller currently is in the per-transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    Starting,
    AwaitingRedirect,
    Resuming,
    Exchanging,
    Connected,
    Failed,
}

/// Returned by [`OAuthFlowController::start`]; the caller performs the
/// navigation, after which this process may unload entirely.
#[derive(Debug)]
pub struct StartedFlow {
    /// Provider authorization page to navigate to
    pub authorize_url: Url,
    /// Nonce the eventual callback must echo
    pub state: String,
}

/// User-facing failure classes for a resumed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeFailure {
    /// The provider declined authorization (`error` query parameter)
    ProviderDenied {
        error: String,
        description: Option<String>,
    },
    /// The verifier was gone from storage at callback time
    SessionExpired,
    /// The remote exchange call failed
    ExchangeFailed { message: String },
}

impl std::fmt::Display for ResumeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeFailure::ProviderDenied { error, description } => match description {
                Some(desc) => write!(f, "authorization declined: {error}: {desc}"),
                None => write!(f, "authorization declined: {error}"),
            },
            ResumeFailure::SessionExpired => {
                write!(f, "authorization session expired, restart the connection flow")
            }
            ResumeFailure::ExchangeFailed { message } => {
                write!(f, "token exchange failed: {message}")
            }
        }
    }
}

/// Outcome of inspecting a page load for an authorization response.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The URL carried no `state` parameter; nothing to do
    NotACallback,
    /// The callback did not match the stored nonce; discarded silently
    Ignored { cleaned_url: Url },
    /// Exchange succeeded; the connection is now active server-side
    Connected {
        connector_id: Uuid,
        connector_name: String,
        scopes: Vec<String>,
        cleaned_url: Url,
    },
    /// A user-facing failure; storage has been cleared
    Failed {
        failure: ResumeFailure,
        cleaned_url: Url,
    },
}

/// Failures from `start`, `refresh_token`, and `disconnect`.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The start response's authorization URL advertises a challenge that
    /// does not match the issued verifier
    #[error("authorization URL challenge does not match the issued verifier")]
    ChallengeMismatch,
}

/// Query parameters of an authorization response.
#[derive(Debug)]
struct CallbackParams {
    state: String,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    /// `None` when the URL carries no `state` parameter, i.e. this page
    /// load is not an authorization callback.
    fn from_url(url: &Url) -> Option<Self> {
        let mut state = None;
        let mut code = None;
        let mut error = None;
        let mut error_description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "state" => state = Some(value.into_owned()),
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        state.map(|state| Self {
            state,
            code,
            error,
            error_description,
        })
    }
}

/// Remove the authorization response parameters from a URL, keeping any
/// unrelated query parameters. The stripped URL is handed back so the
/// caller can replace the visible address before anything else happens.
pub fn strip_callback_params(url: &Url) -> Url {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            !matches!(key.as_ref(), "code" | "state" | "error" | "error_description")
        })
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    cleaned.set_query(None);
    if !retained.is_empty() {
        cleaned.query_pairs_mut().extend_pairs(retained);
    }
    cleaned
}

/// Orchestrates the authorization-code flow for one client tab.
pub struct OAuthFlowController {
    rpc: Arc<dyn LifecycleRpc>,
    store: Arc<TransactionStore>,
    redirect_uri: Url,
    phase: Mutex<FlowPhase>,
}

impl OAuthFlowController {
    pub fn new(rpc: Arc<dyn LifecycleRpc>, store: Arc<TransactionStore>, redirect_uri: Url) -> Self {
        Self {
            rpc,
            store,
            redirect_uri,
            phase: Mutex::new(FlowPhase::Idle),
        }
    }

    /// Current position in the state machine.
    pub fn phase(&self) -> FlowPhase {
        *self.phase.lock().unwrap()
    }

    fn set_phase(&self, phase: FlowPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    /// Start an authorization attempt for a connector.
    ///
    /// Persists the nonce, verifier, and connector id, then hands back the
    /// authorization URL for the caller to navigate to. Calling again while
    /// an attempt is pending supersedes it; the stale callback will fail
    /// the nonce match and be discarded.
    #[instrument(skip(self))]
    pub async fn start(&self, connector_id: Uuid) -> Result<StartedFlow, FlowError> {
        self.set_phase(FlowPhase::Starting);
        counter!("oauth_flow_started_total").increment(1);

        let started = match self
            .rpc
            .start_authorization(connector_id, &self.redirect_uri)
            .await
        {
            Ok(started) => started,
            Err(err) => {
                self.set_phase(FlowPhase::Failed);
                counter!("oauth_flow_failed_total").increment(1);
                return Err(err.into());
            }
        };

        let (verifier, authorize_url) = match started.code_verifier {
            Some(verifier) => {
                // Cross-check the advertised challenge before navigating; a
                // corrupted start response must not start a flow.
                let advertised = started
                    .authorization_url
                    .query_pairs()
                    .find(|(key, _)| key == "code_challenge")
                    .map(|(_, value)| value.into_owned());
                if let Some(challenge) = advertised {
                    if challenge != pkce::derive_challenge(&verifier) {
                        warn!(%connector_id, "challenge mismatch in start-authorization response");
                        self.set_phase(FlowPhase::Failed);
                        counter!("oauth_flow_failed_total").increment(1);
                        return Err(FlowError::ChallengeMismatch);
                    }
                }
                (verifier, started.authorization_url)
            }
            None => {
                // Verifier generation delegated to the client.
                let verifier = pkce::generate_verifier();
                let mut url = started.authorization_url;
                url.query_pairs_mut()
                    .append_pair("code_challenge", &pkce::derive_challenge(&verifier))
                    .append_pair("code_challenge_method", "S256");
                (verifier, url)
            }
        };

        self.store.begin(PendingAuthorization {
            state: started.state.clone(),
            verifier,
            connector_id,
            redirect_uri: self.redirect_uri.clone(),
            created_at: Utc::now(),
        });
        self.set_phase(FlowPhase::AwaitingRedirect);
        info!(%connector_id, "authorization flow started");

        Ok(StartedFlow {
            authorize_url,
            state: started.state,
        })
    }

    /// Inspect a page-load URL for an authorization response and, when one
    /// is present, drive it to a terminal outcome.
    ///
    /// Every failure is converted into a typed outcome; the callback
    /// parameters are stripped from the returned URL whether or not
    /// processing succeeds, and storage is cleared on every terminal path.
    #[instrument(skip_all)]
    pub async fn resume(&self, current_url: &Url) -> ResumeOutcome {
        let Some(params) = CallbackParams::from_url(current_url) else {
            return ResumeOutcome::NotACallback;
        };
        let cleaned_url = strip_callback_params(current_url);
        self.set_phase(FlowPhase::Resuming);

        // Every path from here is terminal for the pending attempt.
        let store = Arc::clone(&self.store);
        defer! { store.clear(); }

        let nonce_matches = self.store.state().is_some_and(|stored| {
            bool::from(stored.as_bytes().ct_eq(params.state.as_bytes()))
        });
        if !nonce_matches {
            // Silent: do not confirm whether a transaction existed.
            counter!("oauth_callback_rejected_total").increment(1);
            self.store.resolve(TransactionStatus::Failed);
            self.set_phase(FlowPhase::Idle);
            debug!("discarding authorization callback with unknown state");
            return ResumeOutcome::Ignored { cleaned_url };
        }

        if let Some(error) = params.error {
            self.store.resolve(TransactionStatus::Failed);
            self.set_phase(FlowPhase::Failed);
            counter!("oauth_flow_failed_total").increment(1);
            return ResumeOutcome::Failed {
                failure: ResumeFailure::ProviderDenied {
                    error,
                    description: params.error_description,
                },
                cleaned_url,
            };
        }

        let Some(verifier) = self.store.verifier() else {
            self.store.resolve(TransactionStatus::Failed);
            self.set_phase(FlowPhase::Failed);
            counter!("oauth_flow_failed_total").increment(1);
            return ResumeOutcome::Failed {
                failure: ResumeFailure::SessionExpired,
                cleaned_url,
            };
        };

        let Some(code) = params.code else {
            self.store.resolve(TransactionStatus::Failed);
            self.set_phase(FlowPhase::Failed);
            counter!("oauth_flow_failed_total").increment(1);
            return ResumeOutcome::Failed {
                failure: ResumeFailure::ExchangeFailed {
                    message: "authorization response carried no code".to_string(),
                },
                cleaned_url,
            };
        };

        self.set_phase(FlowPhase::Exchanging);
        match self
            .rpc
            .exchange_authorization(ExchangeRequest {
                code,
                state: params.state,
                code_verifier: verifier,
            })
            .await
        {
            Ok(outcome) => {
                self.store.resolve(TransactionStatus::Completed);
                self.set_phase(FlowPhase::Connected);
                counter!("oauth_flow_completed_total").increment(1);
                info!(
                    connector_id = %outcome.connector_id,
                    connector = %outcome.connector_name,
                    "authorization flow completed"
                );
                ResumeOutcome::Connected {
                    connector_id: outcome.connector_id,
                    connector_name: outcome.connector_name,
                    scopes: outcome.scopes,
                    cleaned_url,
                }
            }
            Err(err) => {
                self.store.resolve(TransactionStatus::Failed);
                self.set_phase(FlowPhase::Failed);
                counter!("oauth_flow_failed_total").increment(1);
                warn!(error = %err, "token exchange failed");
                ResumeOutcome::Failed {
                    failure: ResumeFailure::ExchangeFailed {
                        message: err.to_string(),
                    },
                    cleaned_url,
                }
            }
        }
    }

    /// Ask the remote layer to refresh a connection's credentials.
    ///
    /// The realtime synchronizer observes the updated `expiresAt`/`status`;
    /// no local cache is written here.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self, connection_id: Uuid, force: bool) -> Result<(), FlowError> {
        self.rpc.refresh_token(connection_id, force).await?;
        Ok(())
    }

    /// Set the connection's status to revoked server-side. The record is
    /// retained for audit; the synchronizer (or the repository's optimistic
    /// update) reflects the change locally.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection_id: Uuid) -> Result<Connection, FlowError> {
        let connection = self
            .rpc
            .update_connection_status(connection_id, ConnectionStatus::Revoked)
            .await?;
        Ok(connection)
    }
}

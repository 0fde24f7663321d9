//! OAuth transaction store
//!
//! Session-scoped storage for the single in-flight authorization attempt,
//! holding exactly three keys: the state nonce, the PKCE verifier, and the
//! target connector id. The store is deliberately in-memory only so a stale
//! transaction can never be replayed across a process restart. One slot,
//! single writer: beginning a new transaction supersedes whatever was
//! pending.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::pkce;

/// Resolution state of an authorization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Started,
    Completed,
    Failed,
}

/// Audit record of one authorization attempt.
///
/// Carries only a hash of the verifier; the verifier itself never leaves
/// the pending slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTransaction {
    /// Anti-CSRF state nonce round-tripped through the redirect
    pub state: String,
    /// Hex SHA-256 of the PKCE verifier
    pub code_verifier_hash: String,
    /// Connector the attempt targets
    pub connector_id: Uuid,
    /// Redirect URI the attempt was started with
    pub redirect_uri: Url,
    /// Resolution state
    pub status: TransactionStatus,
    /// When the attempt started
    pub created_at: DateTime<Utc>,
    /// When the attempt resolved, if it has
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Everything a freshly started attempt writes into the store
#[derive(Debug)]
pub struct PendingAuthorization {
    pub state: String,
    pub verifier: Zeroizing<String>,
    pub connector_id: Uuid,
    pub redirect_uri: Url,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Slots {
    state: Option<String>,
    verifier: Option<Zeroizing<String>>,
    connector_id: Option<Uuid>,
    record: Option<OAuthTransaction>,
}

/// Single-slot, session-scoped store for the in-flight authorization
#[derive(Debug, Default)]
pub struct TransactionStore {
    slots: Mutex<Slots>,
    last: Mutex<Option<OAuthTransaction>>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new transaction, superseding any pending one.
    ///
    /// The superseded attempt (if any) is recorded as failed; its callback
    /// will no longer match the stored nonce and will be discarded.
    pub fn begin(&self, pending: PendingAuthorization) {
        let record = OAuthTransaction {
            state: pending.state.clone(),
            code_verifier_hash: pkce::verifier_hash(&pending.verifier),
            connector_id: pending.connector_id,
            redirect_uri: pending.redirect_uri,
            status: TransactionStatus::Started,
            created_at: pending.created_at,
            resolved_at: None,
        };

        let mut slots = self.slots.lock().unwrap();
        if let Some(mut superseded) = slots.record.take() {
            tracing::debug!(
                connector_id = %superseded.connector_id,
                "superseding pending authorization"
            );
            superseded.status = TransactionStatus::Failed;
            superseded.resolved_at = Some(Utc::now());
            *self.last.lock().unwrap() = Some(superseded);
        } else {
            *self.last.lock().unwrap() = Some(record.clone());
        }

        slots.state = Some(pending.state);
        slots.verifier = Some(pending.verifier);
        slots.connector_id = Some(pending.connector_id);
        slots.record = Some(record);
    }

    /// The pending state nonce, if an attempt is awaiting its callback.
    pub fn state(&self) -> Option<String> {
        self.slots.lock().unwrap().state.clone()
    }

    /// The pending PKCE verifier.
    pub fn verifier(&self) -> Option<Zeroizing<String>> {
        self.slots.lock().unwrap().verifier.clone()
    }

    /// The pending target connector.
    pub fn connector_id(&self) -> Option<Uuid> {
        self.slots.lock().unwrap().connector_id
    }

    /// Drop only the verifier key, leaving the rest of the attempt in
    /// place. A later callback will then resolve as an expired session.
    pub fn clear_verifier(&self) {
        self.slots.lock().unwrap().verifier.take();
    }

    /// Resolve the pending attempt, recording the outcome and clearing all
    /// three keys. No-op when nothing is pending.
    pub fn resolve(&self, status: TransactionStatus) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(mut record) = slots.record.take() {
            record.status = status;
            record.resolved_at = Some(Utc::now());
            *self.last.lock().unwrap() = Some(record);
        }
        slots.state.take();
        slots.verifier.take();
        slots.connector_id.take();
    }

    /// Clear all three keys. Idempotent; called on every terminal outcome
    /// so a completed or failed attempt cannot be replayed.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap();
        // Dropping the Zeroizing verifier wipes its bytes.
        slots.state.take();
        slots.verifier.take();
        slots.connector_id.take();
        slots.record.take();
    }

    /// The most recently begun or resolved transaction record.
    pub fn last_transaction(&self) -> Option<OAuthTransaction> {
        self.last.lock().unwrap().clone()
    }

    /// Whether an attempt is currently awaiting its callback.
    pub fn has_pending(&self) -> bool {
        self.slots.lock().unwrap().state.is_some()
    }
}

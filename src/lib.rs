//! # Switchboard Core Library
//!
//! Connection lifecycle management for a connector dashboard: the OAuth
//! authorization flow with PKCE, the connection repository façade, a
//! realtime synchronizer that mirrors server-side state into an in-memory
//! cache, a connector health monitor, and the notification dispatcher.
//!
//! Persistent storage, token issuance, and the serverless functions that
//! perform the actual exchanges are remote collaborators reached through
//! the contracts in [`rpc`].

pub mod config;
pub mod flow;
pub mod health;
pub mod logging;
pub mod models;
pub mod notify;
pub mod pkce;
pub mod prefs;
pub mod realtime;
pub mod repository;
pub mod rpc;
pub mod transaction;

//! Rust SDK for the FishPi community realtime surfaces.
//!
//! The crate is organized by surface:
//! - `chatroom`: the broadcast chat room channel and its REST calls.
//! - `chat`: per-peer private chat channels and their registry.
//! - `notice`: the system notification channel.
//! - `realtime`: socket state machine, event router, and the generic channel.
//! - `api`: REST envelope handling shared by all channels.
//! - `retry`: shared retry, backoff, and timeout utilities.

/// REST transport and envelope helpers.
pub mod api;
/// Private chat channels and the peer registry.
pub mod chat;
/// Broadcast chat room channel.
pub mod chatroom;
/// Top-level client.
pub mod client;
/// Client configuration and protocol defaults.
pub mod config;
/// System notification channel.
pub mod notice;
/// Realtime transport, routing, and channel plumbing.
pub mod realtime;
/// Retry and timeout helpers used across the SDK.
pub mod retry;

mod wire;

pub use client::FishPi;
pub use config::{ClientConfig, RealtimeDefaults, Via};

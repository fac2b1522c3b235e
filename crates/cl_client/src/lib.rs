//! cl_client — the Cipherlink client core.
//!
//! Owns the handshake state machine, the per-process session map, and the
//! relay client. The relay is reached through the [`relay::RelayApi`] trait
//! so tests can drive the state machine against an in-process relay.
//!
//! # Module layout
//! - `relay`     — relay API trait + reqwest implementation
//! - `sessions`  — conversation → session key / sequence counter handle
//! - `handshake` — two-flight signed-ECDH state machine
//! - `client`    — send/receive orchestration over an established session
//! - `error`     — unified error type

pub mod client;
pub mod error;
pub mod handshake;
pub mod relay;
pub mod sessions;

pub use client::Client;
pub use error::ClientError;
pub use handshake::{FailureReason, HandshakeState};
pub use sessions::SessionMap;

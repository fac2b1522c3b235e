//! cl_store — password-protected local key store.
//!
//! Persists, under a password, (a) the identity signing private half,
//! (b) active exchange privates, (c) cached session keys, so a restart can
//! resume encrypted conversations.
//!
//! The vault is unlocked once at the start of a session; the handshake
//! receives the unlocked handle and never prompts for a password mid-flow.
//! Every stored blob carries its own 16-byte salt and 12-byte iv; the
//! wrapping key is PBKDF2-derived per blob.

pub mod db;
pub mod error;
pub mod vault;

pub use db::Store;
pub use error::StoreError;
pub use vault::Vault;

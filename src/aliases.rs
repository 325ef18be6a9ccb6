// src/aliases.rs
//! Re-exports secure-gate's ergonomic secret types
//!
//! These are the canonical secret containers used throughout encrypted-db-codec.
//! Everything that holds key material or a decrypted field value in bulk goes
//! through one of these, so it is zeroed on drop.

pub use secure_gate::dynamic_alias;

// Dynamic secrets
dynamic_alias!(SecretBytes, Vec<u8>); // key components, derived keys, challenge responses
dynamic_alias!(PasswordText, String); // master password as typed by the user

/// Copies a secret buffer into a fresh secret (secure-gate types are not `Clone`)
pub fn duplicate(secret: &SecretBytes) -> SecretBytes {
    SecretBytes::new(secret.expose_secret().clone())
}

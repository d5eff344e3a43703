//! Carepass field encryption.
//!
//! Hospital columns other than the facility name are stored as
//! AES-256-GCM tokens under a single process-wide key supplied through
//! configuration. Tokens are `base64(nonce || ciphertext)` so they fit in a
//! TEXT column.

pub mod encrypt;
pub mod keys;

pub use encrypt::FieldCipher;

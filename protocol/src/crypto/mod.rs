//! Cryptographic foundation of the scheme: arbitrary-precision modular
//! arithmetic, safe-prime group generation, RSA key material, and the
//! SHA-256 digest helpers the protocol stages share.

pub mod bigmath;
pub mod hash;
pub mod keys;
pub mod scheme;

pub use keys::RsaKey;
pub use scheme::SchemeParams;

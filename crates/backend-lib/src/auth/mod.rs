// ============================
// repogate-lib/src/auth/mod.rs
// ============================
//! Authentication core: Argon2 credentials, memory admission, and
//! coalescing of identical concurrent attempts.

pub mod codec;
pub mod coalesce;
pub mod denial;
pub mod fingerprint;
pub mod gateway;
pub mod limiter;
pub mod secret;
pub mod store;

pub use codec::{decode, encode, CredentialCodec, CredentialHash, DecodedHash, HashParameters, Variant};
pub use coalesce::{AuthCoalescer, Verdict};
pub use denial::DenialCache;
pub use fingerprint::{Fingerprint, RotatingNonce};
pub use gateway::{AuthGateway, GatewayOptions};
pub use limiter::{Reservation, ResourceLimiter};
pub use secret::generate_secret;
pub use store::{CredentialStore, MemoryCredentialStore, StoredCredential, WILDCARD_HOST};

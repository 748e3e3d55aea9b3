// ============================
// repogate-lib/src/auth/codec.rs
// ============================
//! Argon2 credential hashing and verification.
//!
//! Hashes are kept in the canonical text form
//! `$argon2<variant>$v=<version>$m=<memoryKB>,t=<iterations>,p=<parallelism>$<salt>$<hash>`
//! with unpadded standard base64 for salt and hash. The host secret (pepper)
//! is never part of the encoding and must be supplied at verification time.
use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use repogate_common::{decode_lenient, BASE64};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::secret::fill_random;
use crate::error::AuthError;

/// Salt length used when generating new hashes
pub const SALT_LEN: usize = 8;
/// Length of every Argon2 output handled here
pub const HASH_LEN: usize = 32;
/// Memory cost of newly generated hashes, in KiB
pub const DEFAULT_MEMORY_KIB: u32 = 8192;
/// Iterations of newly generated hashes
pub const DEFAULT_ITERATIONS: u32 = 15;
/// Lanes of newly generated hashes
pub const DEFAULT_PARALLELISM: u32 = 2;
/// Argon2 version 1.3
pub const VERSION_13: u32 = 0x13;
/// Argon2 version 1.0
pub const VERSION_10: u32 = 0x10;
/// Bytes reserved per verification on top of the Argon2 blocks
pub const RESERVATION_OVERHEAD: u64 = 8 * 1024;

const PREFIX: &str = "$argon2";

/// Argon2 flavour named in the hash prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    D,
    I,
    Id,
}

impl Variant {
    /// Token used after `$argon2` in the encoding
    pub fn token(self) -> &'static str {
        match self {
            Variant::D => "d",
            Variant::I => "i",
            Variant::Id => "id",
        }
    }

    fn algorithm(self) -> Algorithm {
        match self {
            Variant::D => Algorithm::Argon2d,
            Variant::I => Algorithm::Argon2i,
            Variant::Id => Algorithm::Argon2id,
        }
    }
}

impl FromStr for Variant {
    type Err = AuthError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "d" => Ok(Variant::D),
            "i" => Ok(Variant::I),
            "id" => Ok(Variant::Id),
            other => Err(malformed(format!("unknown variant `{other}`"))),
        }
    }
}

/// Everything needed to rerun Argon2 except the password and the secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashParameters {
    pub variant: Variant,
    pub version: u32,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

impl HashParameters {
    /// Bytes to reserve from the memory budget before running these parameters
    pub fn reservation_cost(&self) -> u64 {
        u64::from(self.memory_kib) * 1024 + RESERVATION_OVERHEAD
    }

    /// Check that Argon2 can run these parameters at all.
    ///
    /// Salt length is left to Argon2 itself.
    pub fn validate(&self) -> Result<(Version, Params), AuthError> {
        let version = match self.version {
            VERSION_10 => Version::V0x10,
            VERSION_13 => Version::V0x13,
            other => return Err(malformed(format!("unsupported version {other}"))),
        };
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(HASH_LEN),
        )
        .map_err(|err| malformed(format!("invalid parameters: {err}")))?;
        Ok((version, params))
    }

    fn hasher<'k>(&self, secret: &'k [u8]) -> Result<Argon2<'k>, AuthError> {
        let (version, params) = self.validate()?;
        Ok(Argon2::new_with_secret(
            secret,
            self.variant.algorithm(),
            version,
            params,
        )?)
    }

    /// Run Argon2 over `password` with `secret` injected.
    fn execute(
        &self,
        password: &[u8],
        secret: &[u8],
    ) -> Result<Zeroizing<[u8; HASH_LEN]>, AuthError> {
        let mut output = Zeroizing::new([0u8; HASH_LEN]);
        self.hasher(secret)?
            .hash_password_into(password, &self.salt, &mut output[..])?;
        Ok(output)
    }
}

/// A parsed credential hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHash {
    pub params: HashParameters,
    pub hash: [u8; HASH_LEN],
}

impl DecodedHash {
    /// Recompute the hash for `password` and compare in constant time.
    pub fn verify(&self, password: &[u8], secret: &[u8]) -> Result<bool, AuthError> {
        let computed = self.params.execute(password, secret)?;
        Ok(computed[..].ct_eq(&self.hash[..]).into())
    }

    /// Re-encode into the canonical text form
    pub fn encode(&self) -> String {
        encode(&self.params, &self.hash)
    }
}

/// Stored credential in canonical text form
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialHash(String);

impl CredentialHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<DecodedHash, AuthError> {
        decode(&self.0)
    }
}

impl FromStr for CredentialHash {
    type Err = AuthError;

    fn from_str(encoded: &str) -> Result<Self, Self::Err> {
        decode(encoded)?;
        Ok(Self(encoded.to_string()))
    }
}

impl fmt::Display for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Salt and digest stay out of debug output.
impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.splitn(5, '$').take(4).collect::<Vec<_>>().join("$");
        write!(f, "CredentialHash({shown}$..)")
    }
}

/// Generates and verifies credential hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialCodec {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Default for CredentialCodec {
    fn default() -> Self {
        Self::with_params(DEFAULT_MEMORY_KIB, DEFAULT_ITERATIONS, DEFAULT_PARALLELISM)
    }
}

impl CredentialCodec {
    /// Codec generating Argon2id hashes with the given costs
    pub const fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Reservation needed by one run of this codec's own parameters
    pub fn expected_cost(&self) -> u64 {
        u64::from(self.memory_kib) * 1024 + RESERVATION_OVERHEAD
    }

    /// Hash `password` under a fresh random salt.
    ///
    /// The result is verified before it is returned; a mismatch means the
    /// Argon2 path itself is broken and fails the call.
    pub fn generate(&self, password: &[u8], secret: &[u8]) -> Result<CredentialHash, AuthError> {
        let mut salt = vec![0u8; SALT_LEN];
        fill_random(&mut salt)?;
        let params = HashParameters {
            variant: Variant::Id,
            version: VERSION_13,
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
            salt,
        };
        let output = params.execute(password, secret)?;
        let encoded = encode(&params, &output[..]);

        if !self.verify(&encoded, password, secret)? {
            tracing::error!("freshly generated credential failed self-verification");
            return Err(AuthError::SelfVerification);
        }
        Ok(CredentialHash(encoded))
    }

    /// Check `password` against an encoded hash.
    pub fn verify(&self, encoded: &str, password: &[u8], secret: &[u8]) -> Result<bool, AuthError> {
        decode(encoded)?.verify(password, secret)
    }
}

/// Parse the canonical text form.
pub fn decode(encoded: &str) -> Result<DecodedHash, AuthError> {
    let rest = encoded
        .strip_prefix(PREFIX)
        .ok_or_else(|| malformed("missing `$argon2` prefix"))?;
    let mut fields = rest.split('$');

    let variant: Variant = next_field(&mut fields, "variant")?.parse()?;
    let version = keyed(next_field(&mut fields, "version")?, "v")?;

    let mut costs = next_field(&mut fields, "parameters")?.split(',');
    let memory_kib = keyed(costs.next().unwrap_or_default(), "m")?;
    let iterations = keyed(costs.next().unwrap_or_default(), "t")?;
    let parallelism = keyed(costs.next().unwrap_or_default(), "p")?;
    if costs.next().is_some() {
        return Err(malformed("unexpected extra parameter"));
    }

    let salt = decode_lenient(next_field(&mut fields, "salt")?)
        .map_err(|err| malformed(format!("salt: {err}")))?;
    let digest = decode_lenient(next_field(&mut fields, "hash")?)
        .map_err(|err| malformed(format!("hash: {err}")))?;
    if fields.next().is_some() {
        return Err(malformed("trailing fields after hash"));
    }
    let hash: [u8; HASH_LEN] = digest
        .as_slice()
        .try_into()
        .map_err(|_| malformed(format!("hash must be {HASH_LEN} bytes, got {}", digest.len())))?;

    let params = HashParameters {
        variant,
        version,
        memory_kib,
        iterations,
        parallelism,
        salt,
    };
    params.validate()?;
    Ok(DecodedHash { params, hash })
}

/// Produce the canonical text form. The secret is never part of it.
pub fn encode(params: &HashParameters, hash: &[u8]) -> String {
    format!(
        "{PREFIX}{}$v={}$m={},t={},p={}${}${}",
        params.variant.token(),
        params.version,
        params.memory_kib,
        params.iterations,
        params.parallelism,
        BASE64.encode(&params.salt),
        BASE64.encode(hash),
    )
}

fn next_field<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    name: &str,
) -> Result<&'a str, AuthError> {
    match fields.next() {
        Some(field) if !field.is_empty() => Ok(field),
        _ => Err(malformed(format!("missing {name} field"))),
    }
}

fn keyed(field: &str, key: &str) -> Result<u32, AuthError> {
    let value = field
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or_else(|| malformed(format!("expected `{key}=` in `{field}`")))?;
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!("`{key}` is not an unsigned integer")));
    }
    if value.len() > 1 && value.starts_with('0') {
        return Err(malformed(format!("`{key}` has a leading zero")));
    }
    value
        .parse()
        .map_err(|_| malformed(format!("`{key}` is out of range")))
}

fn malformed(reason: impl Into<String>) -> AuthError {
    AuthError::Format(reason.into())
}

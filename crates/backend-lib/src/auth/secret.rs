// ============================
// crates/backend-lib/src/auth/secret.rs
// ============================
use base64::Engine as _;
/** Secure randomness for host secrets, salts and nonces.
Everything here draws straight from the operating system. */
use rand::{rngs::OsRng, TryRngCore};
use repogate_common::BASE64;
use zeroize::Zeroizing;

use crate::error::AuthError;

/// Size of a freshly generated host secret (pepper) in bytes
pub const SECRET_BYTES: usize = 1024;

/// Fill `buffer` from the OS entropy source.
pub fn fill_random(buffer: &mut [u8]) -> Result<(), AuthError> {
    OsRng
        .try_fill_bytes(buffer)
        .map_err(|err| AuthError::Entropy(err.to_string()))
}

/** Generate a new host secret
# Returns
The secret as unpadded standard base64, ready for the `hosts.<name>.secret`
configuration key */
pub fn generate_secret() -> Result<String, AuthError> {
    let mut buffer = Zeroizing::new(vec![0u8; SECRET_BYTES]);
    fill_random(&mut buffer)?;
    Ok(BASE64.encode(buffer.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repogate_common::decode_lenient;

    #[test]
    fn test_secret_generation() {
        let first = generate_secret().unwrap();
        let second = generate_secret().unwrap();
        assert_ne!(first, second);

        let decoded = decode_lenient(&first).unwrap();
        assert_eq!(decoded.len(), SECRET_BYTES);
        assert!(!first.ends_with('='));
    }
}

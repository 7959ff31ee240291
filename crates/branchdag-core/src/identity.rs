//! Author identity: secp256k1 key pairs and checksummed addresses.
//!
//! An address is the Base58Check encoding of version byte
//! [`ADDRESS_VERSION`] followed by the first 20 bytes of
//! `SHA-256(SEC1-compressed public key)`. The 4-byte Base58Check checksum
//! lets [`verify_address`] reject typos before any key material is touched.
//!
//! Signatures are 64-byte fixed-width ECDSA (r || s) over SHA-256 of the
//! message, hex-encoded wherever they appear in a node.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// Version byte prefixed to the public-key hash before Base58Check encoding.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Number of public-key hash bytes carried by an address.
pub const ADDRESS_HASH_LEN: usize = 20;

/// Errors from address and key handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("address {address:?} is not valid Base58Check")]
    InvalidChecksum { address: String },

    #[error("address {address:?} does not match public key")]
    AddressMismatch { address: String },

    #[error("invalid public key: {0}")]
    InvalidPubKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signature does not verify")]
    SignatureMismatch,
}

/// A signing identity. The address is derived once at construction.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    address: String,
}

impl Keypair {
    /// Generate a fresh key pair from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Load a key pair from a 32-byte secret scalar.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidPubKey`] if the bytes are not a valid
    /// non-zero scalar.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, IdentityError> {
        let signing =
            SigningKey::from_slice(secret).map_err(|e| IdentityError::InvalidPubKey(e.to_string()))?;
        Ok(Self::from_signing_key(signing))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        let address = address_from_pubkey(&encode_pubkey(signing.verifying_key()));
        Self { signing, address }
    }

    /// The checksummed address of this identity.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// SEC1-compressed public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_pubkey(self.signing.verifying_key())
    }

    /// Hex form of [`Keypair::public_key_bytes`], as carried in nodes.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Sign `message`, returning the 64-byte fixed-width signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(message);
        signature.to_bytes().to_vec()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn encode_pubkey(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

fn pubkey_hash(pubkey: &[u8]) -> [u8; ADDRESS_HASH_LEN] {
    let digest = Sha256::digest(pubkey);
    let mut out = [0_u8; ADDRESS_HASH_LEN];
    out.copy_from_slice(&digest[..ADDRESS_HASH_LEN]);
    out
}

/// Derive the checksummed address for raw public key bytes.
#[must_use]
pub fn address_from_pubkey(pubkey: &[u8]) -> String {
    bs58::encode(pubkey_hash(pubkey))
        .with_check_version(ADDRESS_VERSION)
        .into_string()
}

/// Check that `address` is well-formed Base58Check with the expected version
/// and payload length.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidChecksum`] otherwise.
pub fn verify_address(address: &str) -> Result<(), IdentityError> {
    let invalid = || IdentityError::InvalidChecksum {
        address: address.to_owned(),
    };
    let decoded = bs58::decode(address)
        .with_check(Some(ADDRESS_VERSION))
        .into_vec()
        .map_err(|_| invalid())?;
    // Decoded bytes still carry the version prefix.
    if decoded.len() != ADDRESS_HASH_LEN + 1 {
        return Err(invalid());
    }
    Ok(())
}

/// Check that `address` is valid and was derived from `pubkey`.
///
/// # Errors
///
/// [`IdentityError::InvalidChecksum`] for a malformed address,
/// [`IdentityError::AddressMismatch`] when it belongs to another key.
pub fn verify_address_for_pubkey(address: &str, pubkey: &[u8]) -> Result<(), IdentityError> {
    verify_address(address)?;
    if address_from_pubkey(pubkey) != address {
        return Err(IdentityError::AddressMismatch {
            address: address.to_owned(),
        });
    }
    Ok(())
}

/// Verify a fixed-width signature over `message`.
///
/// # Errors
///
/// [`IdentityError::InvalidPubKey`] / [`IdentityError::InvalidSignature`] for
/// undecodable inputs, [`IdentityError::SignatureMismatch`] when the
/// signature is well-formed but wrong.
pub fn verify_signature(pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), IdentityError> {
    let key = VerifyingKey::from_sec1_bytes(pubkey)
        .map_err(|e| IdentityError::InvalidPubKey(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    key.verify(message, &signature)
        .map_err(|_| IdentityError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_keypair(byte: u8) -> Keypair {
        Keypair::from_secret_bytes(&[byte; 32]).expect("valid scalar")
    }

    #[test]
    fn derived_address_verifies() {
        let kp = fixed_keypair(7);
        verify_address(kp.address()).expect("address should verify");
        verify_address_for_pubkey(kp.address(), &kp.public_key_bytes()).expect("binding");
    }

    #[test]
    fn address_is_deterministic_per_key() {
        assert_eq!(fixed_keypair(7).address(), fixed_keypair(7).address());
        assert_ne!(fixed_keypair(7).address(), fixed_keypair(8).address());
    }

    #[test]
    fn corrupted_address_fails_checksum() {
        let kp = fixed_keypair(7);
        let mut chars: Vec<char> = kp.address().chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let corrupted: String = chars.into_iter().collect();

        let err = verify_address(&corrupted).expect_err("checksum should fail");
        assert!(matches!(err, IdentityError::InvalidChecksum { .. }));
    }

    #[test]
    fn garbage_address_fails_checksum() {
        assert!(verify_address("not-base58-0OIl").is_err());
        assert!(verify_address("").is_err());
    }

    #[test]
    fn other_key_does_not_match_address() {
        let a = fixed_keypair(1);
        let b = fixed_keypair(2);
        let err = verify_address_for_pubkey(a.address(), &b.public_key_bytes())
            .expect_err("should mismatch");
        assert!(matches!(err, IdentityError::AddressMismatch { .. }));
    }

    #[test]
    fn sign_and_verify() {
        let kp = fixed_keypair(3);
        let sig = kp.sign(b"payload");
        assert_eq!(sig.len(), 64);
        verify_signature(&kp.public_key_bytes(), b"payload", &sig).expect("valid signature");
        assert_eq!(
            verify_signature(&kp.public_key_bytes(), b"other", &sig),
            Err(IdentityError::SignatureMismatch)
        );
    }

    #[test]
    fn malformed_inputs_are_decode_errors() {
        let kp = fixed_keypair(3);
        let sig = kp.sign(b"payload");
        assert!(matches!(
            verify_signature(&[1, 2, 3], b"payload", &sig),
            Err(IdentityError::InvalidPubKey(_))
        ));
        assert!(matches!(
            verify_signature(&kp.public_key_bytes(), b"payload", &sig[..10]),
            Err(IdentityError::InvalidSignature(_))
        ));
    }

    #[test]
    fn zero_secret_is_rejected() {
        assert!(Keypair::from_secret_bytes(&[0; 32]).is_err());
    }
}

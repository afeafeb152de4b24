//! ECDSA key management over secp256k1.
//!
//! The consensus engine is agnostic to the signature scheme: it only ever
//! calls [`SigningPublicKey::verify`]. These wrappers pin the wire layout
//! (33-byte compressed SEC1 public keys, 64-byte `r ‖ s` signatures) so
//! every participant hashes and compares the same bytes.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{PUBLIC_KEY_BYTES, SIGNATURE_BYTES};
use crate::Hash;

/// A secp256k1 public key in compressed SEC1 form (33 bytes).
///
/// Inner bytes are `pub(crate)` to prevent external construction of
/// unvalidated keys. Use [`SigningKeypair::generate`] or deserialization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SigningPublicKey(pub(crate) Vec<u8>);

/// A secp256k1 signing secret key (32 bytes), zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningSecretKey(pub(crate) Vec<u8>);

/// A fixed-width ECDSA signature: `r` (32 bytes) followed by `s` (32 bytes).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Signature(pub(crate) Vec<u8>);

impl Signature {
    /// Create an empty signature (events are unsigned until [`sign`ed](SigningKeypair::sign)).
    pub fn empty() -> Self {
        Signature(vec![])
    }

    /// Rebuild a signature from its `r` and `s` halves (the wire form).
    pub fn from_scalars(r: [u8; 32], s: [u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(SIGNATURE_BYTES);
        bytes.extend_from_slice(&r);
        bytes.extend_from_slice(&s);
        Signature(bytes)
    }

    /// Access the raw `r ‖ s` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the `(r, s)` scalar pair, or `None` for an empty or
    /// malformed signature.
    pub fn scalars(&self) -> Option<([u8; 32], [u8; 32])> {
        if self.0.len() != SIGNATURE_BYTES {
            return None;
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&self.0[..32]);
        s.copy_from_slice(&self.0[32..]);
        Some((r, s))
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        // Allow empty signatures (not-yet-signed events) and full r‖s pairs.
        // Reject anything else to keep comparisons fixed-width.
        if !bytes.is_empty() && bytes.len() != SIGNATURE_BYTES {
            return Err(serde::de::Error::custom(format!(
                "invalid ECDSA signature: expected {} bytes, got {}",
                SIGNATURE_BYTES,
                bytes.len()
            )));
        }
        Ok(Signature(bytes))
    }
}

/// A secp256k1 signing keypair.
///
/// Implements [`Clone`] because the host shares one identity between event
/// creation and the node loop. The secret key is zeroized on drop.
#[derive(Clone)]
pub struct SigningKeypair {
    pub public: SigningPublicKey,
    pub secret: SigningSecretKey,
}

impl SigningKeypair {
    /// Generate a new random secp256k1 keypair.
    pub fn generate() -> Self {
        let sk = SigningKey::random(&mut rand::rngs::OsRng);
        let pk = VerifyingKey::from(&sk);
        SigningKeypair {
            public: SigningPublicKey(pk.to_encoded_point(true).as_bytes().to_vec()),
            secret: SigningSecretKey(sk.to_bytes().to_vec()),
        }
    }

    /// Sign a message, producing a fixed-width `r ‖ s` signature.
    ///
    /// If the internal secret key is somehow corrupted, logs an error and
    /// returns an empty signature instead of panicking. An empty signature
    /// always fails verification, so no security property is lost.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sk = match SigningKey::from_slice(&self.secret.0) {
            Ok(sk) => sk,
            Err(_) => {
                tracing::error!("SigningKeypair::sign called with corrupted secret key");
                return Signature::empty();
            }
        };
        let sig: EcdsaSignature = sk.sign(message);
        Signature(sig.to_bytes().to_vec())
    }

    /// Create a keypair from raw bytes, validating both halves.
    pub fn from_bytes(public: Vec<u8>, secret: Vec<u8>) -> Option<Self> {
        VerifyingKey::from_sec1_bytes(&public).ok()?;
        SigningKey::from_slice(&secret).ok()?;
        Some(SigningKeypair {
            public: SigningPublicKey(public),
            secret: SigningSecretKey(secret),
        })
    }
}

impl SigningPublicKey {
    /// Access the raw compressed SEC1 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verify an `r ‖ s` signature against this public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let pk = match VerifyingKey::from_sec1_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match EcdsaSignature::from_slice(&signature.0) {
            Ok(s) => s,
            Err(_) => return false,
        };
        pk.verify(message, &sig).is_ok()
    }

    /// Derive a compact fingerprint (BLAKE3 hash of the public key).
    pub fn fingerprint(&self) -> Hash {
        crate::hash_domain(b"braid.signing.fingerprint", &self.0)
    }

    /// Lowercase-hex rendering, the participant key used in config files
    /// and logs.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Check if this public key has the correct size.
    pub fn is_valid_size(&self) -> bool {
        self.0.len() == PUBLIC_KEY_BYTES
    }
}

impl Serialize for SigningPublicKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for SigningPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        // Validate key size on deserialization to prevent malformed keys
        if bytes.len() != PUBLIC_KEY_BYTES {
            return Err(serde::de::Error::custom(format!(
                "invalid secp256k1 public key: expected {} bytes, got {}",
                PUBLIC_KEY_BYTES,
                bytes.len()
            )));
        }
        Ok(SigningPublicKey(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_KEY_BYTES: usize = 32;

    #[test]
    fn sign_and_verify() {
        let kp = SigningKeypair::generate();
        let msg = b"braid test message";
        let sig = kp.sign(msg);
        assert!(kp.public.verify(msg, &sig));
        assert!(!kp.public.verify(b"wrong message", &sig));
    }

    #[test]
    fn signature_fixed_width() {
        let kp = SigningKeypair::generate();
        let sig = kp.sign(b"test");
        assert_eq!(sig.as_bytes().len(), SIGNATURE_BYTES);
    }

    #[test]
    fn key_sizes() {
        let kp = SigningKeypair::generate();
        assert!(kp.public.is_valid_size());
        assert_eq!(kp.public.0.len(), PUBLIC_KEY_BYTES);
        assert_eq!(kp.secret.0.len(), SECRET_KEY_BYTES);
    }

    #[test]
    fn scalars_roundtrip() {
        let kp = SigningKeypair::generate();
        let sig = kp.sign(b"scalars");
        let (r, s) = sig.scalars().unwrap();
        let rebuilt = Signature::from_scalars(r, s);
        assert_eq!(sig, rebuilt);
        assert!(kp.public.verify(b"scalars", &rebuilt));
    }

    #[test]
    fn scalars_of_empty_is_none() {
        assert!(Signature::empty().scalars().is_none());
    }

    #[test]
    fn verify_with_empty_signature_fails() {
        let kp = SigningKeypair::generate();
        assert!(!kp.public.verify(b"test message", &Signature::empty()));
    }

    #[test]
    fn from_bytes_rejects_invalid() {
        assert!(SigningKeypair::from_bytes(vec![0; 10], vec![0; 10]).is_none());
    }

    #[test]
    fn from_bytes_roundtrip() {
        let kp = SigningKeypair::generate();
        let restored =
            SigningKeypair::from_bytes(kp.public.as_bytes().to_vec(), kp.secret.0.clone()).unwrap();
        let sig = restored.sign(b"roundtrip");
        assert!(kp.public.verify(b"roundtrip", &sig));
    }

    #[test]
    fn fingerprint_deterministic_and_unique() {
        let kp1 = SigningKeypair::generate();
        let kp2 = SigningKeypair::generate();
        assert_eq!(kp1.public.fingerprint(), kp1.public.fingerprint());
        assert_ne!(kp1.public.fingerprint(), kp2.public.fingerprint());
    }

    #[test]
    fn signature_deserialize_rejects_wrong_size() {
        let bad_bytes: Vec<u8> = vec![0u8; 100];
        let encoded = crate::serialize(&bad_bytes).unwrap();
        let result: Result<Signature, _> = crate::deserialize(&encoded);
        assert!(result.is_err());
    }

    #[test]
    fn signature_deserialize_accepts_empty() {
        let encoded = crate::serialize(&Signature::empty()).unwrap();
        let result: Result<Signature, _> = crate::deserialize(&encoded);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn public_key_deserialize_rejects_wrong_size() {
        let bad_bytes: Vec<u8> = vec![0u8; 100];
        let encoded = crate::serialize(&bad_bytes).unwrap();
        let result: Result<SigningPublicKey, _> = crate::deserialize(&encoded);
        assert!(result.is_err());
    }

    #[test]
    fn hex_rendering_matches_bytes() {
        let kp = SigningKeypair::generate();
        assert_eq!(kp.public.to_hex(), hex::encode(kp.public.as_bytes()));
    }
}

//! Cryptographic key pairs, signatures and aggregation.
//!
//! Two schemes are supported:
//! - ED25519 for fast single-signer use
//! - BLS12-381 (min_pk) for the aggregated quorum and timeout certificates
//!
//! Quorum certificates aggregate signatures over a single shared message;
//! timeout certificates aggregate signatures over one message per signer
//! (each signer commits to its own newest-QC view), verified with
//! [`verify_aggregate_multi`].

use sbor::prelude::*;
use std::fmt;

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub enum KeyType {
    /// ED25519 - fast, no aggregation.
    Ed25519,
    /// BLS12-381 - supports signature aggregation.
    Bls12381,
}

/// A signing key pair.
#[derive(Clone)]
pub enum KeyPair {
    /// ED25519 key pair.
    Ed25519(ed25519_dalek::SigningKey),
    /// BLS12-381 key pair.
    Bls12381(blst::min_pk::SecretKey),
}

impl KeyPair {
    /// Generate a new random Ed25519 keypair.
    pub fn generate_ed25519() -> Self {
        let mut csprng = rand::rngs::OsRng;
        KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Generate a new random BLS12-381 keypair.
    pub fn generate_bls() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        let sk = blst::min_pk::SecretKey::key_gen(&ikm, &[])
            .expect("32 bytes of key material always suffice for key_gen");
        KeyPair::Bls12381(sk)
    }

    /// Derive a keypair from a seed (for testing and simulation).
    pub fn from_seed(key_type: KeyType, seed: &[u8; 32]) -> Self {
        match key_type {
            KeyType::Ed25519 => KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(seed)),
            KeyType::Bls12381 => {
                let sk = blst::min_pk::SecretKey::key_gen(seed, &[])
                    .expect("32 bytes of key material always suffice for key_gen");
                KeyPair::Bls12381(sk)
            }
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        match self {
            KeyPair::Ed25519(signing_key) => {
                use ed25519_dalek::Signer;
                Signature::Ed25519(signing_key.sign(message).to_bytes().to_vec())
            }
            KeyPair::Bls12381(sk) => {
                Signature::Bls12381(sk.sign(message, &[], &[]).to_bytes().to_vec())
            }
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Ed25519(signing_key) => {
                PublicKey::Ed25519(signing_key.verifying_key().to_bytes())
            }
            KeyPair::Bls12381(sk) => PublicKey::Bls12381(sk.sk_to_pk().to_bytes().to_vec()),
        }
    }
}

/// A public key for signature verification.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum PublicKey {
    /// ED25519 public key (32 bytes).
    Ed25519([u8; 32]),
    /// BLS12-381 public key (48 bytes compressed).
    Bls12381(Vec<u8>),
}

impl PublicKey {
    /// Verify a single signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match (self, signature) {
            (PublicKey::Ed25519(pk_bytes), Signature::Ed25519(sig_bytes)) => {
                use ed25519_dalek::Verifier;
                let Ok(pk) = ed25519_dalek::VerifyingKey::from_bytes(pk_bytes) else {
                    return false;
                };
                let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
                    return false;
                };
                let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
                pk.verify(message, &sig).is_ok()
            }
            (PublicKey::Bls12381(pk_bytes), Signature::Bls12381(sig_bytes)) => {
                let Ok(pk) = blst::min_pk::PublicKey::from_bytes(pk_bytes) else {
                    return false;
                };
                let Ok(sig) = blst::min_pk::Signature::from_bytes(sig_bytes) else {
                    return false;
                };
                sig.verify(true, message, &[], &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
            }
            // Mismatched scheme
            _ => false,
        }
    }

    /// Aggregate multiple BLS public keys into one.
    pub fn aggregate_bls(pubkeys: &[PublicKey]) -> Result<Self, AggregateError> {
        let bls_pks = collect_bls_pubkeys(pubkeys)?;
        let refs: Vec<&blst::min_pk::PublicKey> = bls_pks.iter().collect();
        let agg = blst::min_pk::AggregatePublicKey::aggregate(&refs, false)
            .map_err(|_| AggregateError::AggregationFailed)?;
        Ok(PublicKey::Bls12381(agg.to_public_key().to_bytes().to_vec()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Ed25519(bytes) => {
                write!(f, "PublicKey::Ed25519({}..)", &hex::encode(bytes)[..8])
            }
            PublicKey::Bls12381(bytes) => {
                write!(f, "PublicKey::Bls12381({}..)", &hex::encode(bytes)[..8])
            }
        }
    }
}

/// A cryptographic signature.
#[derive(Clone, PartialEq, Eq, BasicSbor)]
pub enum Signature {
    /// ED25519 signature (64 bytes).
    Ed25519(Vec<u8>),
    /// BLS12-381 signature (96 bytes compressed).
    Bls12381(Vec<u8>),
}

impl Signature {
    /// A zero placeholder signature, used by the genesis certificate and in
    /// tests.
    pub fn zero() -> Self {
        Signature::Ed25519(vec![0u8; 64])
    }

    /// Get the signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Signature::Ed25519(bytes) | Signature::Bls12381(bytes) => bytes.as_slice(),
        }
    }

    /// Aggregate multiple BLS signatures into one.
    pub fn aggregate_bls(signatures: &[Signature]) -> Result<Self, AggregateError> {
        if signatures.is_empty() {
            return Err(AggregateError::Empty);
        }
        let bls_sigs: Vec<blst::min_pk::Signature> = signatures
            .iter()
            .filter_map(|s| match s {
                Signature::Bls12381(bytes) => blst::min_pk::Signature::from_bytes(bytes).ok(),
                _ => None,
            })
            .collect();
        if bls_sigs.len() != signatures.len() {
            return Err(AggregateError::MixedTypes);
        }
        let refs: Vec<&blst::min_pk::Signature> = bls_sigs.iter().collect();
        let agg = blst::min_pk::AggregateSignature::aggregate(&refs, true)
            .map_err(|_| AggregateError::AggregationFailed)?;
        Ok(Signature::Bls12381(agg.to_signature().to_bytes().to_vec()))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Ed25519(bytes) => {
                write!(f, "Signature::Ed25519({}..)", &hex::encode(bytes)[..16])
            }
            Signature::Bls12381(bytes) => {
                write!(f, "Signature::Bls12381({}..)", &hex::encode(bytes)[..16])
            }
        }
    }
}

/// Verify an aggregated BLS signature where every signer signed the same
/// message (quorum certificates).
pub fn verify_aggregate(message: &[u8], signature: &Signature, pubkeys: &[PublicKey]) -> bool {
    match PublicKey::aggregate_bls(pubkeys) {
        Ok(agg_pk) => agg_pk.verify(message, signature),
        Err(_) => false,
    }
}

/// Verify an aggregated BLS signature where signer `i` signed `messages[i]`
/// (timeout certificates). `messages` and `pubkeys` must be index-aligned.
pub fn verify_aggregate_multi(
    messages: &[Vec<u8>],
    signature: &Signature,
    pubkeys: &[PublicKey],
) -> bool {
    if messages.len() != pubkeys.len() || messages.is_empty() {
        return false;
    }
    let Signature::Bls12381(sig_bytes) = signature else {
        return false;
    };
    let Ok(sig) = blst::min_pk::Signature::from_bytes(sig_bytes) else {
        return false;
    };
    let Ok(bls_pks) = collect_bls_pubkeys(pubkeys) else {
        return false;
    };
    let pk_refs: Vec<&blst::min_pk::PublicKey> = bls_pks.iter().collect();
    let msg_refs: Vec<&[u8]> = messages.iter().map(|m| m.as_slice()).collect();
    sig.aggregate_verify(true, &msg_refs, &[], &pk_refs, true) == blst::BLST_ERROR::BLST_SUCCESS
}

fn collect_bls_pubkeys(
    pubkeys: &[PublicKey],
) -> Result<Vec<blst::min_pk::PublicKey>, AggregateError> {
    if pubkeys.is_empty() {
        return Err(AggregateError::Empty);
    }
    let bls_pks: Vec<blst::min_pk::PublicKey> = pubkeys
        .iter()
        .filter_map(|pk| match pk {
            PublicKey::Bls12381(bytes) => blst::min_pk::PublicKey::from_bytes(bytes).ok(),
            _ => None,
        })
        .collect();
    if bls_pks.len() != pubkeys.len() {
        return Err(AggregateError::MixedTypes);
    }
    Ok(bls_pks)
}

/// Errors that can occur during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    /// Empty list provided.
    #[error("cannot aggregate an empty list")]
    Empty,

    /// Mixed key/signature types.
    #[error("cannot aggregate mixed ED25519 and BLS material")]
    MixedTypes,

    /// Aggregation operation failed.
    #[error("aggregation failed")]
    AggregationFailed,
}

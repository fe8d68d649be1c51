use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use zeroize::Zeroize;

use crate::hash::keccak256;
use crate::CryptoError;

// ── Signature ────────────────────────────────────────────────────────────────

/// A recoverable secp256k1 signature in Ethereum wire layout: `r ‖ s ‖ v`
/// with `v ∈ {27, 28}`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 65 {
            return Err(CryptoError::InvalidSignature);
        }
        let v = bytes[64];
        if v != 27 && v != 28 {
            return Err(CryptoError::BadRecoveryId(v));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, v })
    }

    /// Recover the 20-byte signer address from a 32-byte message hash.
    pub fn recover(&self, msg_hash: &[u8; 32]) -> Result<[u8; 20], CryptoError> {
        let mut rs = [0u8; 64];
        rs[..32].copy_from_slice(&self.r);
        rs[32..].copy_from_slice(&self.s);
        let sig = EcdsaSignature::from_slice(&rs).map_err(|_| CryptoError::InvalidSignature)?;
        let recid =
            RecoveryId::from_byte(self.v - 27).ok_or(CryptoError::BadRecoveryId(self.v))?;
        let key = VerifyingKey::recover_from_prehash(msg_hash, &sig, recid)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(address_of(&key))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(v={}, r={:02x}{:02x}…)", self.v, self.r[0], self.r[1])
    }
}

// ── Keypair ──────────────────────────────────────────────────────────────────

/// secp256k1 ECDSA keypair. Signing is deterministic (RFC 6979), so the
/// same key and message hash always produce the same signature bytes.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Create from a 32-byte secret. Fails on zero or out-of-range scalars.
    pub fn from_seed(seed: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&seed).into()).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { signing_key })
    }

    /// The Ethereum-style address: last 20 bytes of keccak256 over the
    /// uncompressed public key without its 0x04 tag byte.
    pub fn address(&self) -> [u8; 20] {
        address_of(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte message hash, producing a recoverable signature.
    pub fn sign_hash(&self, msg_hash: &[u8; 32]) -> Result<Signature, CryptoError> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(msg_hash)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Signature { r, s, v: 27 + recid.to_byte() })
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.signing_key.to_bytes() == other.signing_key.to_bytes()
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({})", hex_prefix(&self.address()))
    }
}

fn address_of(key: &VerifyingKey) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    addr
}

fn hex_prefix(addr: &[u8; 20]) -> String {
    addr[..4].iter().map(|b| format!("{b:02x}")).collect()
}

//! secp256k1 key pairs and BIP-340 Schnorr signatures.

use bip39::Mnemonic;
use bitcoin::Network;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{self, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use std::fmt;
use thiserror::Error;

use crate::bech32::Bech32Error;
use crate::{hex, nip19};

const NOSTR_COIN_TYPE: u32 = 1237;

#[derive(Debug, Error)]
pub enum KeysError {
    #[error("invalid private key hex string")]
    InvalidHexString,

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("signature failed self-verification")]
    SigningFailed,

    #[error(transparent)]
    Bech32(#[from] Bech32Error),
}

/// A secp256k1 private key together with its x-only public key.
///
/// Immutable once built. `Debug` never prints the secret half.
#[derive(Clone)]
pub struct KeyPair {
    keypair: secp256k1::Keypair,
    public_key: XOnlyPublicKey,
}

impl KeyPair {
    /// Fresh key from the OS random source.
    pub fn generate() -> Self {
        loop {
            let candidate: [u8; 32] = rand::random();
            if let Ok(key) = Self::from_secret_bytes(&candidate) {
                return key;
            }
        }
    }

    /// Import a 64-character hex private key. Fails on malformed hex,
    /// odd length, or a scalar outside the curve order.
    pub fn from_hex(private_key_hex: &str) -> Result<Self, KeysError> {
        let trimmed = private_key_hex.trim();
        if trimmed.len() % 2 != 0 {
            return Err(KeysError::InvalidHexString);
        }
        let bytes = hex::decode_array::<32>(trimmed)
            .map_err(|_| KeysError::InvalidHexString)?
            .ok_or(KeysError::InvalidHexString)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Import an `nsec` bech32 private key.
    pub fn from_nsec(nsec: &str) -> Result<Self, KeysError> {
        let bytes = nip19::decode_nsec(nsec)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Accept either hex or `nsec` input.
    pub fn parse(secret: &str) -> Result<Self, KeysError> {
        let trimmed = secret.trim();
        if trimmed.starts_with(nip19::SECRET_KEY_PREFIX) {
            Self::from_nsec(trimmed)
        } else {
            Self::from_hex(trimmed)
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeysError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeysError::InvalidHexString)?;
        let keypair = secp256k1::Keypair::from_secret_key(&secp, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// NIP-06 derivation: `m/44'/1237'/<account>'/0/0` from a BIP-39 mnemonic.
    pub fn from_mnemonic(mnemonic: &str, account: u32) -> Result<Self, KeysError> {
        let parsed = Mnemonic::parse(mnemonic.trim())
            .map_err(|error| KeysError::InvalidMnemonic(error.to_string()))?;
        let seed = parsed.to_seed("");

        let secp = Secp256k1::new();
        let master = Xpriv::new_master(Network::Bitcoin, &seed)
            .map_err(|error| KeysError::Derivation(error.to_string()))?;

        let path = DerivationPath::from(vec![
            hardened(44)?,
            hardened(NOSTR_COIN_TYPE)?,
            hardened(account)?,
            normal(0)?,
            normal(0)?,
        ]);

        let derived = master
            .derive_priv(&secp, &path)
            .map_err(|error| KeysError::Derivation(error.to_string()))?;
        Self::from_secret_bytes(&derived.private_key.secret_bytes())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key.serialize()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    pub fn npub(&self) -> Result<String, KeysError> {
        Ok(nip19::encode_npub(&self.public_key())?)
    }

    pub fn nsec(&self) -> Result<String, KeysError> {
        Ok(nip19::encode_nsec(&self.keypair.secret_bytes())?)
    }

    /// Schnorr-sign a 32-byte digest. The signature is verified against our
    /// own public key before it is returned.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<[u8; 64], KeysError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest);
        let aux: [u8; 32] = rand::random();
        let signature = secp.sign_schnorr_with_aux_rand(&message, &self.keypair, &aux);

        secp.verify_schnorr(&signature, &message, &self.public_key)
            .map_err(|_| KeysError::SigningFailed)?;
        Ok(signature.serialize())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Verify a BIP-340 signature over `digest` against an x-only public key
/// (even-Y convention). Malformed signature or key bytes verify as `false`.
pub fn verify(signature: &[u8], digest: &[u8; 32], public_key: &[u8]) -> bool {
    let Ok(signature) = schnorr::Signature::from_slice(signature) else {
        return false;
    };
    let Ok(public_key) = XOnlyPublicKey::from_slice(public_key) else {
        return false;
    };
    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&signature, &Message::from_digest(*digest), &public_key)
        .is_ok()
}

fn hardened(index: u32) -> Result<ChildNumber, KeysError> {
    ChildNumber::from_hardened_idx(index).map_err(|error| KeysError::Derivation(error.to_string()))
}

fn normal(index: u32) -> Result<ChildNumber, KeysError> {
    ChildNumber::from_normal_idx(index).map_err(|error| KeysError::Derivation(error.to_string()))
}

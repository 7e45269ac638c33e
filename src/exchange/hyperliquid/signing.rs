//! L1 action signing for the Hyperliquid exchange endpoint.
//!
//! An action is msgpack-encoded, hashed together with its nonce into a
//! `connectionId`, wrapped in a phantom `Agent` struct and signed as EIP-712
//! typed data with secp256k1.

use crate::error::{ArbError, Result};
use k256::ecdsa::SigningKey;
use serde::Serialize;
use sha3::{Digest, Keccak256};

/// Chain id of the typed-data domain for L1 actions (not the EVM chain id).
const L1_CHAIN_ID: u64 = 1337;

/// `source` of the phantom agent on mainnet.
const MAINNET_SOURCE: &str = "a";

/// ECDSA signature in the `{r, s, v}` shape the exchange endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

/// Holds the API wallet key and signs exchange actions.
pub struct ActionSigner {
    key: SigningKey,
    address: String,
}

impl std::fmt::Debug for ActionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ActionSigner {
    /// Parse a hex private key (with or without `0x`).
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
        let bytes = hex::decode(key_hex)
            .map_err(|e| ArbError::Config(format!("hyperliquid private key is not hex: {e}")))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| ArbError::Config(format!("hyperliquid private key is invalid: {e}")))?;
        let address = derive_address(&key);
        Ok(Self { key, address })
    }

    /// Lowercase `0x` address of the signing key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign `action` for submission with `nonce` (milliseconds).
    pub fn sign_action<T: Serialize>(&self, action: &T, nonce: u64) -> Result<ActionSignature> {
        let connection_id = action_hash(action, nonce)?;
        self.sign_typed(&agent_signing_hash(&connection_id))
    }

    fn sign_typed(&self, hash: &[u8; 32]) -> Result<ActionSignature> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash)
            .map_err(|e| ArbError::Config(format!("ECDSA sign failed: {e}")))?;

        Ok(ActionSignature {
            r: format!("0x{}", hex::encode(signature.r().to_bytes())),
            s: format!("0x{}", hex::encode(signature.s().to_bytes())),
            v: recovery_id.to_byte() + 27,
        })
    }
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn derive_address(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// `keccak(msgpack(action) || nonce_be || 0x00)`; the trailing zero marks
/// "no vault address".
fn action_hash<T: Serialize>(action: &T, nonce: u64) -> Result<[u8; 32]> {
    let mut data = rmp_serde::to_vec_named(action)
        .map_err(|e| ArbError::Config(format!("action encoding failed: {e}")))?;
    data.extend_from_slice(&nonce.to_be_bytes());
    data.push(0x00);
    Ok(keccak256(&data))
}

fn u256_from_u64(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

fn domain_separator() -> [u8; 32] {
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    ));
    encoded.extend_from_slice(&keccak256(b"Exchange"));
    encoded.extend_from_slice(&keccak256(b"1"));
    encoded.extend_from_slice(&u256_from_u64(L1_CHAIN_ID));
    encoded.extend_from_slice(&[0u8; 32]);
    keccak256(&encoded)
}

fn agent_signing_hash(connection_id: &[u8; 32]) -> [u8; 32] {
    let mut agent = Vec::with_capacity(3 * 32);
    agent.extend_from_slice(&keccak256(b"Agent(string source,bytes32 connectionId)"));
    agent.extend_from_slice(&keccak256(MAINNET_SOURCE.as_bytes()));
    agent.extend_from_slice(connection_id);
    let struct_hash = keccak256(&agent);

    let mut message = Vec::with_capacity(2 + 64);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(&domain_separator());
    message.extend_from_slice(&struct_hash);
    keccak256(&message)
}

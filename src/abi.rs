//! Minimal ABI plumbing for the Rocket Pool registry calls
//!
//! The oracle only needs a handful of fixed-shape view calls, so call data is
//! encoded by hand: a 4-byte selector followed by 32-byte argument words.
//! Return data decoding covers the four shapes those calls produce
//! (address, bool, uint256, dynamic bytes).

use alloy_primitives::{keccak256, Address, B256, U256};
use anyhow::Result;

/// Compute the 4-byte function selector for a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Encode a call: selector followed by the given 32-byte argument words.
pub fn encode_call(signature: &str, args: &[[u8; 32]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    data
}

/// Left-pad an address into a 32-byte argument word.
pub fn word_from_address(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

/// Encode a u64 into a 32-byte big-endian argument word.
pub fn word_from_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Storage-registry key for resolving a contract address by name.
///
/// Rocket storage keys contract addresses under
/// `keccak256("contract.address" ++ name)`.
pub fn contract_address_key(name: &str) -> B256 {
    let mut buf = Vec::with_capacity(16 + name.len());
    buf.extend_from_slice(b"contract.address");
    buf.extend_from_slice(name.as_bytes());
    keccak256(&buf)
}

/// Decode an address return value (low 20 bytes of the first word).
pub fn decode_address(data: &[u8]) -> Result<Address> {
    if data.len() < 32 {
        anyhow::bail!("Return data too short for address: {} bytes", data.len());
    }
    Ok(Address::from_slice(&data[12..32]))
}

/// Decode a bool return value.
pub fn decode_bool(data: &[u8]) -> Result<bool> {
    if data.len() < 32 {
        anyhow::bail!("Return data too short for bool: {} bytes", data.len());
    }
    Ok(U256::from_be_slice(&data[..32]) == U256::from(1))
}

/// Decode a uint256 return value into a u64.
///
/// The counts the oracle reads (node count, minipool count) always fit.
pub fn decode_u64(data: &[u8]) -> Result<u64> {
    if data.len() < 32 {
        anyhow::bail!("Return data too short for uint256: {} bytes", data.len());
    }
    let value = U256::from_be_slice(&data[..32]);
    u64::try_from(value).map_err(|_| anyhow::anyhow!("uint256 return value exceeds u64: {}", value))
}

/// Decode a dynamic `bytes` return value.
///
/// Layout: word 0 holds the offset of the length word, the length word is
/// followed by the payload padded to a 32-byte boundary.
pub fn decode_bytes(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 64 {
        anyhow::bail!("Return data too short for bytes: {} bytes", data.len());
    }
    let offset = u64::try_from(U256::from_be_slice(&data[..32]))
        .map_err(|_| anyhow::anyhow!("bytes offset out of range"))? as usize;
    if data.len() < offset + 32 {
        anyhow::bail!("bytes offset {} past end of return data", offset);
    }
    let len = u64::try_from(U256::from_be_slice(&data[offset..offset + 32]))
        .map_err(|_| anyhow::anyhow!("bytes length out of range"))? as usize;
    let start = offset + 32;
    if data.len() < start + len {
        anyhow::bail!(
            "bytes payload truncated: expected {} bytes after offset {}",
            len,
            offset
        );
    }
    Ok(data[start..start + len].to_vec())
}

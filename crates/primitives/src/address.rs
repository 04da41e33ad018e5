//! Base58Check addresses and WIF secret keys.

use walletd_consensus::{ChainParams, Network};

use crate::hash::sha256d;
use crate::script::{p2pkh_hash, p2pkh_script, p2sh_hash, p2sh_script};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid payload length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid checksum"),
            AddressError::UnknownPrefix => write!(f, "address prefix does not match network"),
        }
    }
}

impl std::error::Error for AddressError {}

/// Decodes `address` into the output script it pays, rejecting addresses
/// that belong to another network.
pub fn address_to_script_pubkey(
    address: &str,
    params: &ChainParams,
) -> Result<Vec<u8>, AddressError> {
    let payload = base58check_decode(address)?;
    let pubkey_prefix = params.pubkey_address_prefix;
    let script_prefix = params.script_address_prefix;

    if let Some(hash) = payload.strip_prefix(pubkey_prefix) {
        return Ok(p2pkh_script(&hash20(hash)?));
    }
    if let Some(hash) = payload.strip_prefix(script_prefix) {
        return Ok(p2sh_script(&hash20(hash)?));
    }

    Err(AddressError::UnknownPrefix)
}

pub fn script_pubkey_to_address(script: &[u8], params: &ChainParams) -> Option<String> {
    let (prefix, hash) = if let Some(hash) = p2pkh_hash(script) {
        (params.pubkey_address_prefix, hash)
    } else if let Some(hash) = p2sh_hash(script) {
        (params.script_address_prefix, hash)
    } else {
        return None;
    };
    let mut payload = Vec::with_capacity(prefix.len() + hash.len());
    payload.extend_from_slice(prefix);
    payload.extend_from_slice(&hash);
    Some(base58check_encode(&payload))
}

fn hash20(bytes: &[u8]) -> Result<[u8; 20], AddressError> {
    <[u8; 20]>::try_from(bytes).map_err(|_| AddressError::InvalidLength)
}

fn wif_prefix(network: Network) -> u8 {
    match network {
        Network::Mainnet => 0x80,
        Network::Testnet | Network::Regtest => 0xEF,
    }
}

pub fn secret_key_to_wif(secret: &[u8; 32], network: Network, compressed: bool) -> String {
    let mut payload = Vec::with_capacity(1 + secret.len() + usize::from(compressed));
    payload.push(wif_prefix(network));
    payload.extend_from_slice(secret);
    if compressed {
        payload.push(0x01);
    }
    base58check_encode(&payload)
}

pub fn wif_to_secret_key(wif: &str, network: Network) -> Result<([u8; 32], bool), AddressError> {
    let payload = base58check_decode(wif)?;
    if payload.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    if payload[0] != wif_prefix(network) {
        return Err(AddressError::UnknownPrefix);
    }

    let compressed = match payload.len() {
        33 => false,
        34 if payload[33] == 0x01 => true,
        _ => return Err(AddressError::InvalidLength),
    };
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&payload[1..33]);
    Ok((secret, compressed))
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let value = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

fn base58_value(byte: u8) -> Option<u8> {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}

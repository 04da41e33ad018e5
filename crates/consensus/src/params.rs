//! Per-network chain parameters.

use crate::constants::{COINBASE_MATURITY, CURRENT_BLOCK_VERSION, MAX_FUTURE_BLOCK_TIME};
use crate::money::Amount;
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet => 1,
            Network::Regtest => 2,
        }
    }
}

/// Fields of the genesis header. The header itself is assembled by the
/// primitives crate so that its hash is computed the same way as any other.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GenesisParams {
    pub version: i32,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// A pinned position the best chain must pass through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CheckpointParams {
    pub height: i64,
    pub hash: Hash256,
    pub parent: Hash256,
    pub filter_header: Hash256,
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub genesis: GenesisParams,
    /// Compact encoding of the easiest target a header may claim.
    pub pow_limit_bits: u32,
    pub checkpoint: Option<CheckpointParams>,
    pub coinbase_maturity: i32,
    pub max_future_block_time: i64,
    pub pubkey_address_prefix: &'static [u8],
    pub script_address_prefix: &'static [u8],
    pub default_fee_per_kb: Amount,
    pub min_relay_fee_per_kb: Amount,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_params(),
        Network::Testnet => testnet_params(),
        Network::Regtest => regtest_params(),
    }
}

fn mainnet_params() -> ChainParams {
    ChainParams {
        network: Network::Mainnet,
        genesis: GenesisParams {
            version: 1,
            merkle_root: GENESIS_MERKLE_ROOT,
            time: 1_600_000_000,
            bits: 0x1d00_ffff,
            nonce: 0,
        },
        pow_limit_bits: 0x1d00_ffff,
        checkpoint: None,
        coinbase_maturity: COINBASE_MATURITY,
        max_future_block_time: MAX_FUTURE_BLOCK_TIME,
        pubkey_address_prefix: &[0x00],
        script_address_prefix: &[0x05],
        default_fee_per_kb: 1_000,
        min_relay_fee_per_kb: 1_000,
    }
}

fn testnet_params() -> ChainParams {
    ChainParams {
        network: Network::Testnet,
        genesis: GenesisParams {
            version: 1,
            merkle_root: GENESIS_MERKLE_ROOT,
            time: 1_600_000_600,
            bits: 0x1d00_ffff,
            nonce: 0,
        },
        pow_limit_bits: 0x1d00_ffff,
        checkpoint: None,
        coinbase_maturity: COINBASE_MATURITY,
        max_future_block_time: MAX_FUTURE_BLOCK_TIME,
        pubkey_address_prefix: &[0x6f],
        script_address_prefix: &[0xc4],
        default_fee_per_kb: 1_000,
        min_relay_fee_per_kb: 1_000,
    }
}

fn regtest_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        genesis: GenesisParams {
            version: CURRENT_BLOCK_VERSION,
            merkle_root: GENESIS_MERKLE_ROOT,
            time: 1_600_001_200,
            bits: 0x207f_ffff,
            nonce: 2,
        },
        pow_limit_bits: 0x207f_ffff,
        checkpoint: None,
        coinbase_maturity: COINBASE_MATURITY,
        max_future_block_time: MAX_FUTURE_BLOCK_TIME,
        pubkey_address_prefix: &[0x6f],
        script_address_prefix: &[0xc4],
        default_fee_per_kb: 1_000,
        min_relay_fee_per_kb: 100,
    }
}

const GENESIS_MERKLE_ROOT: Hash256 = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hash length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (big-endian) hex hash into internal byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&hex[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

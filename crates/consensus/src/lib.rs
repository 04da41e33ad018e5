//! Chain parameters, monetary units and consensus-wide constants.

pub mod constants;
pub mod money;
pub mod params;

pub use params::{
    chain_params, hash256_from_hex, hash256_to_hex, ChainParams, CheckpointParams, GenesisParams,
    Network,
};

pub type Hash256 = [u8; 32];

pub const NULL_HASH: Hash256 = [0u8; 32];

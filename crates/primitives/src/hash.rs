use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;
use walletd_consensus::Hash256;

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    sha256(&sha256(data))
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let digest = Ripemd160::digest(sha256(data));
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

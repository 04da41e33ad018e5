use walletd_consensus::{chain_params, Network};
use walletd_pow::difficulty::{compact_to_target, hash_meets_target, target_to_compact};
use walletd_pow::validation::{validate_pow_header, PowError};
use walletd_primitives::genesis_header;

#[test]
fn compact_to_target_roundtrip() {
    let bits = 0x1d00ffff;
    let target = compact_to_target(bits).expect("target");
    let back = target_to_compact(&target);
    assert_eq!(back, bits);
}

#[test]
fn compact_target_layout() {
    let bits = 0x207fffff;
    let target = compact_to_target(bits).expect("target");
    assert!(target[..29].iter().all(|b| *b == 0));
    assert_eq!(target[29], 0xff);
    assert_eq!(target[30], 0xff);
    assert_eq!(target[31], 0x7f);
}

#[test]
fn hash_meets_target_cmp() {
    let target = [0x10u8; 32];
    let smaller = [0x00u8; 32];
    let larger = [0xffu8; 32];
    assert!(hash_meets_target(&smaller, &target));
    assert!(!hash_meets_target(&larger, &target));
}

#[test]
fn header_target_must_not_exceed_limit() {
    let params = chain_params(Network::Mainnet);
    let mut header = genesis_header(&params);
    header.bits = 0x207f_ffff;
    assert_eq!(
        validate_pow_header(&header, params.pow_limit_bits),
        Err(PowError::InvalidBits("pow target above limit"))
    );
}

#[test]
fn regtest_header_can_be_ground() {
    let params = chain_params(Network::Regtest);
    let mut header = genesis_header(&params);
    let mut found = false;
    for nonce in 0..256u32 {
        header.nonce = nonce;
        if validate_pow_header(&header, params.pow_limit_bits).is_ok() {
            found = true;
            break;
        }
    }
    assert!(found);
}

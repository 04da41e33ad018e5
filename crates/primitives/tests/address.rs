use walletd_consensus::{chain_params, Network};
use walletd_primitives::script::{p2pkh_script, p2sh_script};
use walletd_primitives::{
    address_to_script_pubkey, script_pubkey_to_address, secret_key_to_wif, wif_to_secret_key,
    AddressError,
};

#[test]
fn known_mainnet_address_decodes() {
    let params = chain_params(Network::Mainnet);
    let script = address_to_script_pubkey("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", &params)
        .expect("decode address");
    let expected_hash: [u8; 20] = [
        0x75, 0x1e, 0x76, 0xe8, 0x19, 0x91, 0x96, 0xd4, 0x54, 0x94, 0x1c, 0x45, 0xd1, 0xb3, 0xa3,
        0x23, 0xf1, 0x43, 0x3b, 0xd6,
    ];
    assert_eq!(script, p2pkh_script(&expected_hash));
    assert_eq!(
        script_pubkey_to_address(&script, &params).as_deref(),
        Some("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH")
    );
}

#[test]
fn address_is_bound_to_its_network() {
    let mainnet = chain_params(Network::Mainnet);
    let testnet = chain_params(Network::Testnet);
    let script = p2sh_script(&[0x42; 20]);
    let address = script_pubkey_to_address(&script, &testnet).expect("address");

    assert_eq!(
        address_to_script_pubkey(&address, &testnet).expect("decode"),
        script
    );
    assert_eq!(
        address_to_script_pubkey(&address, &mainnet),
        Err(AddressError::UnknownPrefix)
    );
}

#[test]
fn corrupted_address_fails_checksum() {
    let params = chain_params(Network::Mainnet);
    let result = address_to_script_pubkey("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMJ", &params);
    assert_eq!(result, Err(AddressError::InvalidChecksum));
    assert_eq!(
        address_to_script_pubkey("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAM0", &params),
        Err(AddressError::InvalidCharacter)
    );
}

#[test]
fn wif_roundtrips_both_forms() {
    let secret = [0x11u8; 32];
    for compressed in [false, true] {
        let wif = secret_key_to_wif(&secret, Network::Mainnet, compressed);
        let (decoded, was_compressed) =
            wif_to_secret_key(&wif, Network::Mainnet).expect("decode mainnet wif");
        assert_eq!(decoded, secret);
        assert_eq!(was_compressed, compressed);
    }
}

#[test]
fn wif_rejects_wrong_network() {
    let secret = [0x33u8; 32];
    let wif = secret_key_to_wif(&secret, Network::Mainnet, false);
    let err = wif_to_secret_key(&wif, Network::Regtest).unwrap_err();
    assert_eq!(err, AddressError::UnknownPrefix);
}

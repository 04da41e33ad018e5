//! Standard output script templates.

pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_PUSHDATA1: u8 = 0x4c;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptType {
    P2Pkh,
    P2Sh,
    NullData,
    Unknown,
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if script.first() == Some(&OP_RETURN) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

pub fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn p2sh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

/// Provably unspendable output carrying `data`.
pub fn op_return_script(data: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(data.len() + 3);
    script.push(OP_RETURN);
    push_data(&mut script, data);
    script
}

pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    if data.len() < OP_PUSHDATA1 as usize {
        script.push(data.len() as u8);
    } else if data.len() <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    } else {
        script.push(0x4d);
        script.extend_from_slice(&(data.len() as u16).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// Key hash paid by a P2PKH script.
pub fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if !is_p2pkh(script) {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Some(hash)
}

pub fn p2sh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if !is_p2sh(script) {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[2..22]);
    Some(hash)
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

//! Header, block and transaction types with their consensus serialization.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod script;
pub mod transaction;

pub use address::{
    address_to_script_pubkey, script_pubkey_to_address, secret_key_to_wif, wif_to_secret_key,
    AddressError,
};
pub use block::{genesis_header, Block, BlockHeader};
pub use hash::{hash160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TransactionDecodeError, TransactionEncodeError, TxIn, TxOut};

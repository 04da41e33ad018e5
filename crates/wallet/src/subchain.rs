//! Subaccount identifiers and key-derivation roles.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubaccountId(pub u32);

impl fmt::Display for SubaccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subaccount#{}", self.0)
    }
}

/// Key-derivation role scanned independently of the others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subchain {
    Internal,
    External,
    Incoming,
    Outgoing,
    Notification,
}

impl Subchain {
    pub const ALL: [Subchain; 5] = [
        Subchain::Internal,
        Subchain::External,
        Subchain::Incoming,
        Subchain::Outgoing,
        Subchain::Notification,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            Subchain::Internal => 0,
            Subchain::External => 1,
            Subchain::Incoming => 2,
            Subchain::Outgoing => 3,
            Subchain::Notification => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|subchain| subchain.as_u8() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Subchain::Internal => "internal",
            Subchain::External => "external",
            Subchain::Incoming => "incoming",
            Subchain::Outgoing => "outgoing",
            Subchain::Notification => "notification",
        }
    }
}

impl fmt::Display for Subchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage key prefix shared by per-subchain records.
pub(crate) fn subchain_key(subaccount: SubaccountId, subchain: Subchain) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[..4].copy_from_slice(&subaccount.0.to_be_bytes());
    key[4] = subchain.as_u8();
    key
}

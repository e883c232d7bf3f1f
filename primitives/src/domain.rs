//! Domain enums that cross the boundary as small integers.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Wire layout of a serialized transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransactionFormat {
    Basic = 0,
    Extended = 1,
}

impl TransactionFormat {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Basic),
            1 => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TransactionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

/// Kind of account that sent or receives a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AccountType {
    Basic = 0,
    Vesting = 1,
    #[serde(rename = "htlc")]
    Htlc = 2,
    Staking = 3,
}

impl AccountType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Basic),
            1 => Some(Self::Vesting),
            2 => Some(Self::Htlc),
            3 => Some(Self::Staking),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Vesting => write!(f, "vesting"),
            Self::Htlc => write!(f, "htlc"),
            Self::Staking => write!(f, "staking"),
        }
    }
}

//! Peer-facing JSON shapes.
//!
//! The transport itself (HTTP POST between nodes) lives outside this crate;
//! the ledger core only serializes and deserializes the envelope and the
//! block/transaction records that ride in its `data` field.

use crate::block::{Block, TxSet};
use crate::error::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// The envelope every peer message travels in: `{status, data, coin}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: Status,
    pub data: T,
    pub coin: String,
}

impl<T: Serialize + DeserializeOwned> Envelope<T> {
    pub fn ok(data: T, coin: &str) -> Self {
        Envelope {
            status: Status::Ok,
            data,
            coin: coin.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when the peer answered "ok" for the coin we speak.
    pub fn accepted(&self, coin: &str) -> bool {
        self.status == Status::Ok && self.coin == coin
    }
}

/// An error envelope carries its message in `data`.
pub fn error_envelope(message: &str, coin: &str) -> Envelope<String> {
    Envelope {
        status: Status::Error,
        data: message.to_string(),
        coin: coin.to_string(),
    }
}

/// A block as peers exchange it: the row fields, the id-keyed transfer set,
/// and the reward transaction's credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockExport {
    #[serde(flatten)]
    pub block: Block,
    pub data: TxSet,
    pub public_key: String,
    pub reward_signature: String,
}

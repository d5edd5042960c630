//! Account directory: address derivation, balances and key validation.

use crate::amount::Amount;
use crate::crypto;
use crate::error::Result;
use crate::transaction::{tx_from_row, StoredTransaction, Transaction};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Public keys whose historic addresses were encoded without their leading
/// zero bytes. Derivation must keep returning the recorded value for these
/// or the early chain stops validating.
const BROKEN_BLOCK_WINNERS: [(&str, &str); 4] = [
    (
        "PZ8Tyr4Nx8MHsRAGMpZmZ6TWY63dXWSCwCpspGFGQSaF9yVGLamBgymdf8M7FafghmP3oPzQb3W4PZsZApVa41uQrrHRVBH5p9bdoz7c6XeRQHK2TkzWR45e",
        "22SoB29oyq2JhMxtBbesL7JioEYytyC6VeFmzvBH6fRQrueSvyZfEXR5oR7ajSQ9mLERn6JKU85EAbVDNChke32",
    ),
    (
        "PZ8Tyr4Nx8MHsRAGMpZmZ6TWY63dXWSCzbRyyz5oDNDKhk5jyjg4caRjkbqegMZMrUkuBjVMuYcVfPyc3aKuLmPHS4QEDjCrNGks7Z5oPxwv4yXSv7WJnkbL",
        "AoFnv3SLujrJSa2J7FDTADGD7Eb9kv3KtNAp7YVYQEUPcLE6cC6nLvvhVqcVnRLYF5BFF38C1DyunUtmfJBhyU",
    ),
    (
        "PZ8Tyr4Nx8MHsRAGMpZmZ6TWY63dXWSCyradtFFJoaYB4QdcXyBGSXjiASMMnofsT4f5ZNaxTnNDJt91ubemn3LzgKrfQh8CBpqaphkVNoRLub2ctdMnrzG1",
        "RncXQuc7S7aWkvTUJSHEFvYoV3ntAf7bfxEHjSiZNBvQV37MzZtg44L7GAV7szZ3uV8qWqikBewa3piZMqzBqm",
    ),
    (
        "PZ8Tyr4Nx8MHsRAGMpZmZ6TWY63dXWSCyjKMBY4ihhJ2G25EVezg7KnoCBVbhdvWfqzNA4LC5R7wgu3VNfJgvqkCq9sKKZcCoCpX6Qr9cN882MoXsfGTvZoj",
        "Rq53oLzpCrb4BdJZ1jqQ2zsixV2ukxVdM4H9uvUhCGJCz1q2wagvuXV4hC6UVwK7HqAt1FenukzhVXgzyG1y32",
    ),
];

/// Derives the account address for a public key: 9 iterated binary SHA-512
/// digests of the key string, Base58 encoded. Pure: the same key always
/// yields the same address.
pub fn derive_address(public_key: &str) -> String {
    if let Some((_, address)) = BROKEN_BLOCK_WINNERS
        .iter()
        .find(|(key, _)| *key == public_key)
    {
        return address.to_string();
    }

    let mut digest = public_key.as_bytes().to_vec();
    for _ in 0..9 {
        digest = crypto::sha512(&digest).to_vec();
    }
    crypto::base58_encode(&digest)
}

/// Address format check: Base58 charset, length between 70 and 128.
pub fn valid_address(address: &str) -> bool {
    (70..=128).contains(&address.len()) && crypto::is_base58(address)
}

/// Key format check: Base58 charset only.
pub fn valid_key(key: &str) -> bool {
    crypto::is_base58(key)
}

/// Checks an ECDSA signature for a specific public key.
pub fn verify_signature(message: &str, signature: &str, public_key: &str) -> bool {
    crypto::ec_verify(message, signature, public_key)
}

/// Stateless directory over a borrowed store connection.
pub struct Accounts<'c> {
    conn: &'c Connection,
}

impl<'c> Accounts<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Accounts { conn }
    }

    /// Upserts the account for a public key. The balance is initialized to
    /// zero only on first insert and the public key is filled only while it
    /// is still empty: once revealed, it is never overwritten.
    pub fn register(&self, public_key: &str, block: &str) -> Result<()> {
        let id = derive_address(public_key);
        self.conn.execute(
            "INSERT INTO accounts (id, public_key, block, balance) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(id) DO UPDATE SET public_key = CASE
                 WHEN accounts.public_key = '' THEN excluded.public_key
                 ELSE accounts.public_key
             END",
            params![id, public_key, block],
        )?;
        Ok(())
    }

    /// Inserts just the address with an empty public key, so an account can
    /// receive funds before it ever signs anything.
    pub fn register_address(&self, address: &str, block: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO accounts (id, public_key, block, balance) VALUES (?1, '', ?2, 0)",
            params![address, block],
        )?;
        Ok(())
    }

    /// The committed balance, zero for unknown addresses.
    pub fn balance(&self, address: &str) -> Result<Amount> {
        let balance = self
            .conn
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?1",
                [address],
                |row| row.get::<_, Amount>(0),
            )
            .optional()?;
        Ok(balance.unwrap_or(Amount::ZERO))
    }

    /// The committed balance minus this address's own pending mempool
    /// debits. A zero committed balance is returned unchanged: no mempool
    /// spend is possible from it.
    pub fn pending_balance(&self, address: &str) -> Result<Amount> {
        let balance = self.balance(address)?;
        if balance.is_zero() {
            return Ok(balance);
        }
        let pending: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(val + fee), 0) FROM mempool WHERE src = ?1",
            [address],
            |row| row.get(0),
        )?;
        let pending = Amount::from_units(u64::try_from(pending).unwrap_or(0));
        Ok(balance.saturating_sub(pending))
    }

    /// The recorded public key for an address, if any has been revealed.
    pub fn public_key(&self, address: &str) -> Result<Option<String>> {
        let key = self
            .conn
            .query_row(
                "SELECT public_key FROM accounts WHERE id = ?1",
                [address],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(key.filter(|k| !k.is_empty()))
    }

    /// The most recent transactions sent or received by an address, newest
    /// first, tagged the way address queries report them.
    pub fn transactions(
        &self,
        address: &str,
        limit: u32,
        current_height: u64,
    ) -> Result<Vec<AccountTx>> {
        let limit = if (1..=100).contains(&limit) { limit } else { 100 };
        let public_key = self.public_key(address)?.unwrap_or_default();
        let mut stmt = self.conn.prepare(
            "SELECT id, public_key, block, height, dst, val, fee, signature, version, message, date
             FROM transactions WHERE dst = ?1 OR public_key = ?2
             ORDER BY height DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![address, public_key, limit], |row| {
                let tx = tx_from_row(row)?;
                Ok(StoredTransaction {
                    block: row.get("block")?,
                    height: row.get::<_, i64>("height")? as u64,
                    src: tx.src(),
                    tx,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .map(|entry| {
                let kind = match entry.tx.version {
                    0 => "mining",
                    1 if entry.tx.dst == address => "credit",
                    1 => "debit",
                    _ => "other",
                };
                AccountTx {
                    confirmations: current_height as i64 - entry.height as i64,
                    kind,
                    entry,
                }
            })
            .collect())
    }

    /// Pending mempool transactions originating from an address.
    pub fn mempool_transactions(&self, address: &str) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, public_key, height, dst, val, fee, signature, version, message, date
             FROM mempool WHERE src = ?1 ORDER BY height DESC LIMIT 100",
        )?;
        let rows = stmt
            .query_map([address], |row| tx_from_row(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// A committed transaction annotated for address history queries.
#[derive(Debug, Clone, Serialize)]
pub struct AccountTx {
    pub confirmations: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub entry: StoredTransaction,
}

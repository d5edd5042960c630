//! Block engine: assembly, validation, reorganization and the chain head.

use crate::account::{self, Accounts};
use crate::amount::Amount;
use crate::config::Config;
use crate::consensus;
use crate::crypto;
use crate::error::{ChainError, Result};
use crate::forks;
use crate::ledger::Ledger;
use crate::peer::BlockExport;
use crate::transaction::{self, Transaction, Txs, VERSION_REWARD};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// The canonical, id-keyed transaction set of a block. A BTreeMap keeps the
/// iteration order identical on every node: the set is hashed as JSON.
pub type TxSet = BTreeMap<String, Transaction>;

/// One block row. There is no parent-hash field: continuity is enforced by
/// the proof of work, which is only valid relative to the previous block's
/// id and height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub generator: String,
    pub height: u64,
    pub date: i64,
    pub nonce: String,
    pub signature: String,
    pub difficulty: u64,
    pub argon: String,
    pub transactions: u64,
}

/// The chain head is the newest block row, passed around explicitly.
pub type ChainHead = Block;

// The trust anchor. These fields are historic and must never change.
const GENESIS_PUBLIC_KEY: &str = "PZ8Tyr4Nx8MHsRAGMpZmZ6TWY63dXWSCyjGMdVDanywM3CbqvswVqysqU8XS87FcjpqNijtpRSSQ36WexRDv3rJL5X8qpGvzvznuErSRMfb2G6aNoiaT3aEJ";
const GENESIS_SIGNATURE: &str = "AN1rKvtLTWvZorbiiNk5TBYXLgxiLakra2byFef9qoz1bmRzhQheRtiWivfGSwP6r8qHJGrf8uBeKjNZP1GZvsdKUVVN2XQoL";
const GENESIS_REWARD_SIGNATURE: &str = "381yXZ3yq2AXHHdXfEm8TDHS4xJ6nkV4suXtUUvLjtvuyi17jCujtwcwXuYALM1F3Wiae2A4yJ6pXL1kTHJxZbrJNgtsKEsb";
const GENESIS_ARGON: &str = "$M1ZpVzYzSUxYVFp6cXEwWA$CA6p39MVX7bvdXdIIRMnJuelqequanFfvcxzQjlmiik";
const GENESIS_NONCE: &str = "4QRKTSJ+i9Gf9ubPo487eSi+eWOnIBt9w4Y+5J+qbh8=";
const GENESIS_DIFFICULTY: u64 = 5_555_555_555;
const GENESIS_HEIGHT: u64 = 1;
const GENESIS_BLOCK_DATE: i64 = 1_515_324_995;

/// Canonical JSON for a transaction set: keys sorted by id, fields sorted
/// alphabetically, an empty set encoded as an empty list.
pub fn tx_set_json(data: &TxSet) -> Result<String> {
    if data.is_empty() {
        return Ok("[]".to_string());
    }
    Ok(serde_json::to_string(data)?)
}

/// The payload covered by the generator's block signature.
pub fn signing_payload(
    generator: &str,
    height: u64,
    date: i64,
    nonce: &str,
    data: &TxSet,
    difficulty: u64,
    argon: &str,
) -> Result<String> {
    let json = tx_set_json(data)?;
    Ok(format!(
        "{generator}-{height}-{date}-{nonce}-{json}-{difficulty}-{argon}"
    ))
}

/// The block id: SHA-512 over the signed payload joined with the signature,
/// Base58 encoded. Ids below the repair fork are stored with their leading
/// '1' symbols trimmed, matching what the broken encoder wrote.
pub fn compute_hash(
    generator: &str,
    height: u64,
    date: i64,
    nonce: &str,
    data: &TxSet,
    signature: &str,
    difficulty: u64,
    argon: &str,
) -> Result<String> {
    let json = tx_set_json(data)?;
    let info =
        format!("{generator}-{height}-{date}-{nonce}-{json}-{signature}-{difficulty}-{argon}");
    let hash = crypto::base58_encode(&crypto::sha512(info.as_bytes()));
    if height < forks::BASE58_REPAIR {
        Ok(hash.trim_start_matches('1').to_string())
    } else {
        Ok(hash)
    }
}

/// Stateless block engine over the shared ledger handle.
pub struct Chain<'a> {
    ledger: &'a Ledger,
    config: &'a Config,
}

impl<'a> Chain<'a> {
    pub fn new(ledger: &'a Ledger, config: &'a Config) -> Self {
        Chain { ledger, config }
    }

    /// The current chain head. The first call on an empty store installs
    /// the genesis block; if that fails the chain is unusable and the error
    /// is fatal.
    pub fn current(&self) -> Result<ChainHead> {
        if let Some(block) = self.ledger.read(head_row)? {
            return Ok(block);
        }
        self.genesis()?;
        self.ledger
            .read(head_row)?
            .ok_or_else(|| ChainError::Bootstrap("no chain head after genesis".to_string()))
    }

    /// The block before the head.
    pub fn prev(&self) -> Result<Option<Block>> {
        self.ledger.read(|conn| {
            let block = conn
                .query_row(
                    "SELECT * FROM blocks ORDER BY height DESC LIMIT 1 OFFSET 1",
                    [],
                    block_from_row,
                )
                .optional()?;
            Ok(block)
        })
    }

    pub fn get(&self, height: u64) -> Result<Option<Block>> {
        self.ledger.read(|conn| {
            let block = conn
                .query_row(
                    "SELECT * FROM blocks WHERE height = ?1",
                    [height as i64],
                    block_from_row,
                )
                .optional()?;
            Ok(block)
        })
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Block>> {
        self.ledger.read(|conn| {
            let block = conn
                .query_row("SELECT * FROM blocks WHERE id = ?1", [id], block_from_row)
                .optional()?;
            Ok(block)
        })
    }

    /// The difficulty a new block on top of the head must carry.
    pub fn difficulty(&self) -> Result<u64> {
        let head = self.current()?;
        self.ledger.read(|conn| difficulty_on(conn, &head))
    }

    /// The difficulty in force at a specific historic block.
    pub fn difficulty_at(&self, height: u64) -> Result<u64> {
        let block = self
            .get(height)?
            .ok_or_else(|| ChainError::Validation(format!("unknown height {height}")))?;
        self.ledger.read(|conn| difficulty_on(conn, &block))
    }

    /// Maximum number of transactions a new block may carry.
    pub fn max_transactions(&self) -> Result<u64> {
        self.ledger.read(max_transactions_on)
    }

    /// Candidate check for an incoming block: argon shape, key format,
    /// difficulty recomputation and the proof of work.
    pub fn check(
        &self,
        public_key: &str,
        nonce: &str,
        argon: &str,
        difficulty: u64,
    ) -> Result<()> {
        if argon.len() < 20 {
            return Err(ChainError::Validation(format!(
                "invalid block argon - {argon}"
            )));
        }
        if !account::valid_key(public_key) {
            return Err(ChainError::Validation(format!(
                "invalid public key - {public_key}"
            )));
        }
        let expected = self.difficulty()?;
        if difficulty != expected {
            return Err(ChainError::Validation(format!(
                "invalid difficulty - {difficulty} - {expected}"
            )));
        }
        let head = self.current()?;
        if !consensus::check_pow(
            public_key,
            nonce,
            argon,
            difficulty,
            &head.id,
            head.height,
            self.config.testnet,
        ) {
            return Err(ChainError::Validation(
                "proof of work check failed".to_string(),
            ));
        }
        Ok(())
    }

    /// Adds a block to the chain. The caller provides the fields exactly as
    /// they travel between peers; everything is re-derived and re-verified
    /// here, and the row mutations run inside one exclusive ledger
    /// transaction; a block's transactions are never partially committed.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        height: u64,
        public_key: &str,
        nonce: &str,
        data: &TxSet,
        date: i64,
        signature: &str,
        difficulty: u64,
        reward_signature: &str,
        argon: &str,
    ) -> Result<()> {
        let generator = account::derive_address(public_key);
        let hash = compute_hash(
            &generator, height, date, nonce, data, signature, difficulty, argon,
        )?;

        let payload = signing_payload(&generator, height, date, nonce, data, difficulty, argon)?;
        if !account::verify_signature(&payload, signature, public_key) {
            warn!(block = %hash, "block signature check failed");
            return Err(ChainError::Validation(
                "block signature check failed".to_string(),
            ));
        }

        // Structural and balance validation runs before the write lock.
        self.ledger
            .read(|conn| parse_block_on(conn, &hash, height, data, true))?;

        self.ledger.exclusive(|conn| {
            // The reward transaction credits the generator and debits no one.
            let reward = consensus::reward_for(height, data.values());
            let mut reward_tx = Transaction {
                date,
                dst: generator.clone(),
                fee: Amount::ZERO,
                id: String::new(),
                message: String::new(),
                public_key: public_key.to_string(),
                signature: reward_signature.to_string(),
                val: reward,
                version: VERSION_REWARD,
            };
            reward_tx.id = transaction::compute_id(&reward_tx);
            if !account::verify_signature(
                &transaction::signing_payload(&reward_tx),
                reward_signature,
                public_key,
            ) {
                warn!(block = %hash, "reward signature check failed");
                return Err(ChainError::Validation(
                    "reward signature check failed".to_string(),
                ));
            }

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO blocks
                     (id, generator, height, date, nonce, signature, difficulty, argon, transactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    hash,
                    generator,
                    height as i64,
                    date,
                    nonce,
                    signature,
                    difficulty as i64,
                    argon,
                    data.len() as i64
                ],
            )?;
            if inserted != 1 {
                return Err(ChainError::Integrity(format!(
                    "block {hash} could not be inserted"
                )));
            }

            Txs::new(conn).apply(&hash, height, &reward_tx)?;
            parse_block_on(conn, &hash, height, data, false)?;
            Ok(())
        })?;

        info!(block = %hash, height, transactions = data.len(), "block added");
        Ok(())
    }

    /// Forges a new block on this node from the local mempool.
    pub fn forge(
        &self,
        nonce: &str,
        argon: &str,
        public_key: &str,
        private_key: &str,
    ) -> Result<()> {
        let head = self.current()?;
        let difficulty = self.difficulty()?;
        if !consensus::check_pow(
            public_key,
            nonce,
            argon,
            difficulty,
            &head.id,
            head.height,
            self.config.testnet,
        ) {
            return Err(ChainError::Validation(
                "forge failed - invalid argon".to_string(),
            ));
        }

        let height = head.height + 1;
        let date = Utc::now().timestamp();
        if date <= head.date {
            return Err(ChainError::Validation(
                "forge failed - date older than last block".to_string(),
            ));
        }

        let max = self.max_transactions()?;
        let picked = self
            .ledger
            .read(|conn| Txs::new(conn).mempool_select(max, head.height))?;
        let data: TxSet = picked.into_iter().map(|tx| (tx.id.clone(), tx)).collect();

        let generator = account::derive_address(public_key);
        let payload = signing_payload(&generator, height, date, nonce, &data, difficulty, argon)?;
        let signature = crypto::ec_sign(&payload, private_key)?;

        let reward_tx = Transaction {
            date,
            dst: generator,
            fee: Amount::ZERO,
            id: String::new(),
            message: String::new(),
            public_key: public_key.to_string(),
            signature: String::new(),
            val: consensus::reward_for(height, data.values()),
            version: VERSION_REWARD,
        };
        let reward_signature = transaction::sign(&reward_tx, private_key)?;

        self.add(
            height,
            public_key,
            nonce,
            &data,
            date,
            &signature,
            difficulty,
            &reward_signature,
            argon,
        )
    }

    /// Deletes every block at or above the given height, reversing their
    /// transactions newest-first. Genesis is never deleted. Any failure
    /// rolls the whole operation back, leaving the chain untouched.
    pub fn delete_from(&self, height: u64) -> Result<()> {
        let height = height.max(2);
        let removed = self.ledger.exclusive(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM blocks WHERE height >= ?1 ORDER BY height DESC")?;
            let blocks = stmt
                .query_map([height as i64], block_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if blocks.is_empty() {
                return Err(ChainError::Validation(format!(
                    "no blocks at or above height {height}"
                )));
            }
            let txs = Txs::new(conn);
            for block in &blocks {
                txs.reverse(&block.id)?;
                let deleted = conn.execute("DELETE FROM blocks WHERE id = ?1", [&block.id])?;
                if deleted != 1 {
                    return Err(ChainError::Integrity(format!(
                        "block {} could not be removed",
                        block.id
                    )));
                }
            }
            Ok(blocks.len())
        })?;
        info!(from = height, count = removed, "blocks reversed and removed");
        Ok(())
    }

    /// Reverses and deletes a single block by id, all or nothing.
    pub fn delete_by_id(&self, id: &str) -> Result<()> {
        self.ledger.exclusive(|conn| {
            let block = conn
                .query_row("SELECT * FROM blocks WHERE id = ?1", [id], block_from_row)
                .optional()?
                .ok_or_else(|| ChainError::Validation(format!("unknown block id {id}")))?;
            let txs = Txs::new(conn);
            txs.reverse(&block.id)?;
            let deleted = conn.execute("DELETE FROM blocks WHERE id = ?1", [&block.id])?;
            if deleted != 1 {
                return Err(ChainError::Integrity(format!(
                    "block {} could not be removed",
                    block.id
                )));
            }
            Ok(())
        })?;
        info!(block = %id, "block reversed and removed");
        Ok(())
    }

    /// Removes the last `count` blocks from the head.
    pub fn pop(&self, count: u64) -> Result<()> {
        let head = self.current()?;
        self.delete_from(head.height.saturating_sub(count) + 1)
    }

    /// Installs the hardcoded genesis block on an empty chain. The historic
    /// fields are inserted directly; the stored id is still the canonical
    /// block hash of those fields, so the proof-of-work linkage holds from
    /// block 2 on.
    fn genesis(&self) -> Result<()> {
        info!("chain is empty, installing the genesis block");
        let data = TxSet::new();
        let generator = account::derive_address(GENESIS_PUBLIC_KEY);
        let hash = compute_hash(
            &generator,
            GENESIS_HEIGHT,
            GENESIS_BLOCK_DATE,
            GENESIS_NONCE,
            &data,
            GENESIS_SIGNATURE,
            GENESIS_DIFFICULTY,
            GENESIS_ARGON,
        )?;
        let mut reward_tx = Transaction {
            date: GENESIS_BLOCK_DATE,
            dst: generator.clone(),
            fee: Amount::ZERO,
            id: String::new(),
            message: String::new(),
            public_key: GENESIS_PUBLIC_KEY.to_string(),
            signature: GENESIS_REWARD_SIGNATURE.to_string(),
            val: consensus::reward_for(GENESIS_HEIGHT, data.values()),
            version: VERSION_REWARD,
        };
        reward_tx.id = transaction::compute_id(&reward_tx);

        self.ledger
            .exclusive(|conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO blocks
                         (id, generator, height, date, nonce, signature, difficulty, argon, transactions)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        hash,
                        generator,
                        GENESIS_HEIGHT as i64,
                        GENESIS_BLOCK_DATE,
                        GENESIS_NONCE,
                        GENESIS_SIGNATURE,
                        GENESIS_DIFFICULTY as i64,
                        GENESIS_ARGON,
                        0
                    ],
                )?;
                if inserted != 1 {
                    return Err(ChainError::Integrity(
                        "genesis block could not be inserted".to_string(),
                    ));
                }
                Txs::new(conn).apply(&hash, GENESIS_HEIGHT, &reward_tx)?;
                Ok(())
            })
            .map_err(|e| ChainError::Bootstrap(format!("could not add the genesis block: {e}")))
    }

    /// Exports a block with its transaction set and reward credentials, in
    /// the shape peers exchange.
    pub fn export(&self, id: Option<&str>, height: Option<u64>) -> Result<BlockExport> {
        let block = match (id, height) {
            (_, Some(h)) => self.get(h)?,
            (Some(i), None) => self.get_by_id(i)?,
            (None, None) => {
                return Err(ChainError::Validation(
                    "export needs a block id or height".to_string(),
                ))
            }
        }
        .ok_or_else(|| ChainError::Validation("unknown block".to_string()))?;

        let (transfers, reward) = self.ledger.read(|conn| {
            let txs = Txs::new(conn);
            Ok((txs.for_block(&block.id)?, txs.reward_of(&block.id)?))
        })?;
        let (public_key, reward_signature) = reward.ok_or_else(|| {
            ChainError::Integrity(format!("block {} has no reward transaction", block.id))
        })?;
        let data: TxSet = transfers
            .into_iter()
            .map(|tx| (tx.id.clone(), tx))
            .collect();
        Ok(BlockExport {
            block,
            data,
            public_key,
            reward_signature,
        })
    }

    /// Validates and applies a peer-exported block on top of the head.
    pub fn accept(&self, export: &BlockExport) -> Result<()> {
        self.check(
            &export.public_key,
            &export.block.nonce,
            &export.block.argon,
            export.block.difficulty,
        )?;
        self.add(
            export.block.height,
            &export.public_key,
            &export.block.nonce,
            &export.data,
            export.block.date,
            &export.block.signature,
            export.block.difficulty,
            &export.reward_signature,
            &export.block.argon,
        )
    }
}

/// Structural and balance validation of a block's transaction set; applies
/// the set when `dry_run` is false.
fn parse_block_on(
    conn: &Connection,
    block_id: &str,
    height: u64,
    data: &TxSet,
    dry_run: bool,
) -> Result<()> {
    // No transactions means all are valid.
    if data.is_empty() {
        return Ok(());
    }
    let max = max_transactions_on(conn)?;
    if data.len() as u64 > max {
        return Err(ChainError::Validation(format!(
            "block holds {} transactions, limit is {max}",
            data.len()
        )));
    }

    let txs = Txs::new(conn);
    let accounts = Accounts::new(conn);
    let mut required: HashMap<String, Amount> = HashMap::new();
    for tx in data.values() {
        let src = tx.src();
        transaction::check(tx, height)?;
        let total = required
            .get(&src)
            .copied()
            .unwrap_or(Amount::ZERO)
            .try_add(tx.val)?
            .try_add(tx.fee)?;
        required.insert(src, total);
        if txs.exists(&tx.id)? {
            return Err(ChainError::Integrity(format!(
                "transaction {} is already on chain",
                tx.id
            )));
        }
    }
    for (src, total) in &required {
        if accounts.balance(src)? < *total {
            return Err(ChainError::Integrity(format!(
                "insufficient balance for {src}"
            )));
        }
    }

    if !dry_run {
        for tx in data.values() {
            txs.apply(block_id, height, tx)?;
        }
    }
    Ok(())
}

/// The difficulty a block on top of `current` must carry.
fn difficulty_on(conn: &Connection, current: &Block) -> Result<u64> {
    // Forced difficulty right after the resistance fork, a chain-continuity
    // fix.
    if current.height == forks::RESISTANCE + 1 {
        return Ok(forks::RESISTANCE_DIFFICULTY);
    }
    // The first blocks inherit the referenced block's difficulty unchanged.
    if current.height < consensus::RETARGET_START {
        return Ok(current.difficulty);
    }
    let limit = consensus::retarget_limit(current.height);
    let window_date: i64 = conn
        .query_row(
            "SELECT date FROM blocks WHERE height <= ?1 ORDER BY height DESC LIMIT 1 OFFSET ?2",
            params![current.height as i64, limit as i64],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| {
            ChainError::Integrity(format!(
                "missing retarget window below height {}",
                current.height
            ))
        })?;
    Ok(consensus::retarget(
        current.difficulty,
        current.date,
        window_date,
        limit,
    ))
}

fn max_transactions_on(conn: &Connection) -> Result<u64> {
    let head_height: i64 =
        conn.query_row("SELECT COALESCE(MAX(height), 0) FROM blocks", [], |row| {
            row.get(0)
        })?;
    let limit = head_height.saturating_sub(100);
    let average: f64 = conn.query_row(
        "SELECT COALESCE(AVG(transactions), 0) FROM blocks WHERE height > ?1",
        [limit],
        |row| row.get(0),
    )?;
    Ok(consensus::max_transactions(average))
}

fn head_row(conn: &Connection) -> Result<Option<Block>> {
    let block = conn
        .query_row(
            "SELECT * FROM blocks ORDER BY height DESC LIMIT 1",
            [],
            block_from_row,
        )
        .optional()?;
    Ok(block)
}

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get("id")?,
        generator: row.get("generator")?,
        height: row.get::<_, i64>("height")? as u64,
        date: row.get("date")?,
        nonce: row.get("nonce")?,
        signature: row.get("signature")?,
        difficulty: row.get::<_, i64>("difficulty")? as u64,
        argon: row.get("argon")?,
        transactions: row.get::<_, i64>("transactions")? as u64,
    })
}

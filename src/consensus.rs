//! Consensus rules: proof-of-work, difficulty retargeting, rewards and the
//! block-size rule.
//!
//! The proof of work is what links a block to its predecessor: the argon
//! proof is only valid relative to the current block's id and height, so the
//! chain needs no parent-hash field. Do not add one.

use crate::amount::Amount;
use crate::crypto;
use crate::forks;
use crate::transaction::Transaction;
use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};

/// Argon parameters are hardcoded so a proof can never smuggle weaker ones
/// in through its encoded form.
const ARGON_PREFIX: &str = "$argon2i$v=19$m=16384,t=4,p=4";
/// Memory-hard parameters in force above the resistance fork.
const ARGON_PREFIX_RESISTANCE: &str = "$argon2i$v=19$m=524288,t=1,p=1";

/// Positions of the 2-hex-char substrings harvested from the final digest
/// when deriving the deadline.
const DEADLINE_OFFSETS: [usize; 8] = [10, 15, 20, 23, 31, 40, 45, 55];

/// A proof wins a block iff its deadline lands in (0, 240] seconds.
pub const DEADLINE_WINDOW: u128 = 240;

/// Window length for the difficulty retarget.
const RETARGET_WINDOW: u64 = 20;

/// The string an argon proof must cover. Binding the previous block's id
/// into the base is the chain's only continuity mechanism.
pub fn pow_base(public_key: &str, nonce: &str, prev_id: &str, difficulty: u64) -> String {
    format!("{public_key}-{nonce}-{prev_id}-{difficulty}")
}

/// The full encoded argon hash for a stored proof fragment, picking the
/// parameter set in force at the previous block's height.
pub fn argon_encoded(argon: &str, prev_height: u64) -> String {
    if prev_height > forks::RESISTANCE {
        format!("{ARGON_PREFIX_RESISTANCE}{argon}")
    } else {
        format!("{ARGON_PREFIX}{argon}")
    }
}

/// Checks whether the given arguments win a block on top of the current
/// chain head. On the test network any proof that verifies against the base
/// is accepted; on the main network the derived deadline must also land in
/// the acceptance window.
pub fn check_pow(
    public_key: &str,
    nonce: &str,
    argon: &str,
    difficulty: u64,
    prev_id: &str,
    prev_height: u64,
    testnet: bool,
) -> bool {
    let encoded = argon_encoded(argon, prev_height);
    let base = pow_base(public_key, nonce, prev_id, difficulty);

    let Ok(parsed) = PasswordHash::new(&encoded) else {
        return false;
    };
    if Argon2::default()
        .verify_password(base.as_bytes(), &parsed)
        .is_err()
    {
        return false;
    }

    // All verified proofs are valid on testnet.
    if testnet {
        return true;
    }

    let result = deadline(&base, &encoded, difficulty);
    result > 0 && result <= DEADLINE_WINDOW
}

/// Derives the deadline for a proof: 5 rounds of binary SHA-512 over
/// base+argon, one hex-encoded round, then 8 fixed two-char substrings read
/// as decimal bytes, concatenated, stripped of leading zeros and divided by
/// the difficulty.
pub fn deadline(base: &str, argon_encoded: &str, difficulty: u64) -> u128 {
    let mut hash = format!("{base}{argon_encoded}").into_bytes();
    for _ in 0..5 {
        hash = crypto::sha512(&hash).to_vec();
    }
    let hash = hex::encode(crypto::sha512(&hash));

    let mut duration = String::new();
    for offset in DEADLINE_OFFSETS {
        let pair = &hash[offset * 2..offset * 2 + 2];
        let byte = u8::from_str_radix(pair, 16).unwrap_or(0);
        duration.push_str(&byte.to_string());
    }

    // At most 24 decimal digits, so the value always fits in a u128.
    let duration = duration.trim_start_matches('0');
    let value: u128 = duration.parse().unwrap_or(0);
    value / u128::from(difficulty.max(1))
}

/// Retargets the difficulty from the average block time over the trailing
/// window. The higher the difficulty number, the easier it is to win a
/// block.
///
/// The two adjustments are evaluated independently, not as if/else: inside
/// the (220, 260) band both fire and cancel out, leaving the difficulty
/// unchanged.
pub fn retarget(current_difficulty: u64, current_date: i64, window_date: i64, limit: u64) -> u64 {
    let elapsed = current_date.saturating_sub(window_date).max(0) as u64;
    let average = elapsed.div_ceil(limit.max(1));

    let step = current_difficulty / 20;
    let mut difficulty = current_difficulty;
    if average > 220 {
        difficulty = difficulty.saturating_add(step);
    }
    if average < 260 {
        difficulty = difficulty.saturating_sub(step);
    }
    difficulty.clamp(forks::MIN_DIFFICULTY, forks::MAX_DIFFICULTY)
}

/// Number of trailing blocks the retarget window covers at a given height.
/// A full window needs height > 20: differencing over 20 intervals reads
/// the block 20 heights back.
pub fn retarget_limit(height: u64) -> u64 {
    if height <= RETARGET_WINDOW {
        height.saturating_sub(1)
    } else {
        RETARGET_WINDOW
    }
}

/// Heights below this inherit the referenced block's difficulty unchanged.
pub const RETARGET_START: u64 = 10;

/// The block reward: 1000 base coins reduced by 1% per completed reward
/// epoch (floored at zero), plus all transaction fees in the set.
pub fn reward_for<'a>(height: u64, txs: impl IntoIterator<Item = &'a Transaction>) -> Amount {
    let epochs = height / forks::REWARD_EPOCH;
    let base = if epochs >= 100 {
        Amount::ZERO
    } else {
        Amount::from_units(Amount::from_coins(1_000).units() / 100 * (100 - epochs))
    };
    txs.into_iter()
        .map(|tx| tx.fee)
        .fold(base, |total, fee| {
            total.checked_add(fee).unwrap_or(Amount::from_units(u64::MAX))
        })
}

/// Maximum transactions per block given the average count over the last 100
/// blocks: 100 until the average exceeds it, then 10% headroom on top.
pub fn max_transactions(average: f64) -> u64 {
    if average <= 100.0 {
        100
    } else {
        (average * 1.1).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::SaltString;
    use argon2::{Algorithm, Params, PasswordHasher, Version};

    /// Produces the stored proof fragment for a base, the way a miner would.
    fn make_argon(base: &str, prev_height: u64) -> String {
        let params = if prev_height > forks::RESISTANCE {
            Params::new(524_288, 1, 1, None).unwrap()
        } else {
            Params::new(16_384, 4, 4, None).unwrap()
        };
        let argon = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);
        let salt = SaltString::generate(&mut rand_core::OsRng);
        let encoded = argon
            .hash_password(base.as_bytes(), &salt)
            .unwrap()
            .to_string();
        let prefix = if prev_height > forks::RESISTANCE {
            ARGON_PREFIX_RESISTANCE
        } else {
            ARGON_PREFIX
        };
        encoded.strip_prefix(prefix).unwrap().to_string()
    }

    #[test]
    fn test_pow_accepts_matching_proof_on_testnet() {
        let base = pow_base("pubkey", "nonce", "prev-id", 5_555_555_555);
        let argon = make_argon(&base, 1);
        assert!(check_pow(
            "pubkey",
            "nonce",
            &argon,
            5_555_555_555,
            "prev-id",
            1,
            true
        ));
    }

    #[test]
    fn test_pow_rejects_foreign_proof() {
        let base = pow_base("pubkey", "nonce", "prev-id", 5_555_555_555);
        let argon = make_argon(&base, 1);
        // Any change to the base invalidates the proof.
        assert!(!check_pow(
            "pubkey",
            "other-nonce",
            &argon,
            5_555_555_555,
            "prev-id",
            1,
            true
        ));
        assert!(!check_pow(
            "pubkey",
            "nonce",
            &argon,
            5_555_555_555,
            "other-prev-id",
            1,
            true
        ));
    }

    #[test]
    fn test_pow_rejects_malformed_fragment() {
        assert!(!check_pow(
            "pubkey",
            "nonce",
            "not an argon fragment",
            1_000,
            "prev-id",
            1,
            true
        ));
    }

    #[test]
    fn test_deadline_is_deterministic() {
        let first = deadline("base-string", "$argon$fragment", 1_000);
        let second = deadline("base-string", "$argon$fragment", 1_000);
        assert_eq!(first, second);
        // A larger difficulty can only shorten the deadline.
        assert!(deadline("base-string", "$argon$fragment", 1_000_000) <= first);
    }

    #[test]
    fn test_retarget_band_cancels_exactly() {
        // Average 240 sits inside (220, 260): both adjustments fire and the
        // difficulty is unchanged from the referenced block.
        let unchanged = retarget(5_555_555_555, 4_800, 0, 20);
        assert_eq!(unchanged, 5_555_555_555);
    }

    #[test]
    fn test_retarget_slow_blocks_raise_difficulty() {
        // Average 300 sits above the band: only the +5% branch fires.
        let raised = retarget(1_000_000, 6_000, 0, 20);
        assert_eq!(raised, 1_050_000);
    }

    #[test]
    fn test_retarget_fast_blocks_lower_difficulty() {
        // Average 100 sits below the band: only the -5% branch fires.
        let lowered = retarget(1_000_000, 2_000, 0, 20);
        assert_eq!(lowered, 950_000);
    }

    #[test]
    fn test_retarget_clamps() {
        assert_eq!(retarget(1_000, 2_000, 0, 20), forks::MIN_DIFFICULTY);
        assert_eq!(
            retarget(forks::MAX_DIFFICULTY, 6_000, 0, 20),
            forks::MAX_DIFFICULTY
        );
    }

    #[test]
    fn test_reward_schedule() {
        assert_eq!(reward_for(1, std::iter::empty()).to_string(), "1000.00000000");
        // One completed epoch: -1%.
        assert_eq!(
            reward_for(forks::REWARD_EPOCH, std::iter::empty()).to_string(),
            "990.00000000"
        );
        assert_eq!(
            reward_for(forks::REWARD_EPOCH * 50, std::iter::empty()).to_string(),
            "500.00000000"
        );
        // One hundred epochs exhaust the base reward entirely.
        assert_eq!(
            reward_for(forks::REWARD_EPOCH * 100, std::iter::empty()).to_string(),
            "0.00000000"
        );
        assert_eq!(
            reward_for(forks::REWARD_EPOCH * 200, std::iter::empty()).to_string(),
            "0.00000000"
        );
    }

    #[test]
    fn test_reward_includes_fees() {
        let tx = Transaction {
            date: forks::GENESIS_DATE,
            dst: String::new(),
            fee: "0.02500000".parse().unwrap(),
            id: String::new(),
            message: String::new(),
            public_key: String::new(),
            signature: String::new(),
            val: "10.00000000".parse().unwrap(),
            version: 1,
        };
        assert_eq!(reward_for(1, [&tx]).to_string(), "1000.02500000");
    }

    #[test]
    fn test_max_transactions_rule() {
        assert_eq!(max_transactions(80.0), 100);
        assert_eq!(max_transactions(100.0), 100);
        assert_eq!(max_transactions(150.0), 165);
    }
}

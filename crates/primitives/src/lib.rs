//! Shared primitive types for the votad chain-state store.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub type Hash256 = [u8; 32];

pub const COIN: i64 = 100_000_000;
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Asset tag carried by outputs that move the chain's native coin.
pub const NATIVE_ASSET: &str = "NATIVE";

pub fn money_range(value: i64) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

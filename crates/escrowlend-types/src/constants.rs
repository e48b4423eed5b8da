//! System-wide constants for the EscrowLend engine.

/// Basis-point denominator: `10_000` bps = 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Maximum loan-to-value ratio, in basis points (80%).
///
/// Protocol constant. Not configurable per escrow or per deployment.
pub const MAX_LTV_BPS: u16 = 8_000;

/// Number of compliance verification tiers (levels 0..=3).
pub const VERIFICATION_TIERS: usize = 4;

/// Default per-transaction limit for each verification level, in the value
/// asset's smallest unit. Level 3 is unlimited.
pub const DEFAULT_TIER_LIMITS: [u128; VERIFICATION_TIERS] = [1_000, 25_000, 250_000, u128::MAX];

/// AML risk scores run 0..=100.
pub const MAX_RISK_SCORE: u8 = 100;

/// Default risk score at or above which a party is flagged.
pub const DEFAULT_RISK_FLAG_THRESHOLD: u8 = 70;

/// Default number of ledger events retained in memory before the oldest
/// are dropped (the hash chain keeps its head).
pub const DEFAULT_JOURNAL_CAPACITY: usize = 100_000;

/// Domain separator for the event hash chain.
pub const EVENT_HASH_DOMAIN: &[u8] = b"escrowlend:event:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "EscrowLend";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TALLY - CONSENSUS MODULE
//
// Stake-weighted block producer selection.
// Weight = own stake + delegated stake (1 unit = 1 unit of weight).
// Producer is drawn from [0, total_stake) and located by a cumulative
// scan in validator-id order, so a fixed RNG gives a fixed producer.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod registry;

pub use registry::{Delegation, ValidatorRegistry, ValidatorSummary};

/// Validator identifier (same namespace as account ids).
pub type ValidatorId = String;

/// Share of every validator reward paid to each of its delegators,
/// in basis points (1_000 = 10%).
pub const DELEGATION_REWARD_SHARE_BPS: u32 = 1_000;

/// Basis-point denominator.
pub const BPS_DENOMINATOR: u32 = 10_000;

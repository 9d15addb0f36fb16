use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tally_core::{Amount, CoreError};

use crate::{ValidatorId, BPS_DENOMINATOR, DELEGATION_REWARD_SHARE_BPS};

/// A delegator's single active delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub validator: ValidatorId,
    /// Amount of the most recent delegation call
    pub amount: Amount,
}

/// Read-only view of one validator for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSummary {
    pub id: ValidatorId,
    pub stake: Amount,
    pub reward: Amount,
    pub delegators: Vec<String>,
}

fn default_share_bps() -> u32 {
    DELEGATION_REWARD_SHARE_BPS
}

/// Stake accounting, delegation and reward ledger.
///
/// Owned by whoever wires a node together and handed to the ledger service
/// at construction; there is no process-wide instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRegistry {
    /// Effective stake (own + delegated), keyed by validator.
    /// BTreeMap fixes the cumulative scan order used by selection.
    stakes: BTreeMap<ValidatorId, Amount>,
    /// delegator → active delegation
    delegations: BTreeMap<String, Delegation>,
    /// validator or delegator → accumulated reward
    rewards: BTreeMap<String, Amount>,
    #[serde(default = "default_share_bps")]
    delegation_share_bps: u32,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self {
            stakes: BTreeMap::new(),
            delegations: BTreeMap::new(),
            rewards: BTreeMap::new(),
            delegation_share_bps: DELEGATION_REWARD_SHARE_BPS,
        }
    }

    /// Registry paying delegators `bps` basis points of each reward.
    pub fn with_delegation_share(bps: u32) -> Result<Self, CoreError> {
        if bps > BPS_DENOMINATOR {
            return Err(CoreError::InvalidAmount(format!(
                "delegation share {} bps exceeds {}",
                bps, BPS_DENOMINATOR
            )));
        }
        Ok(Self {
            delegation_share_bps: bps,
            ..Self::new()
        })
    }

    pub fn delegation_share_bps(&self) -> u32 {
        self.delegation_share_bps
    }

    /// Make `validator` known with zero stake. Known zero-stake validators
    /// are only picked by the uniform fallback. Returns true if newly added.
    pub fn register(&mut self, validator: &str) -> bool {
        if self.stakes.contains_key(validator) {
            return false;
        }
        self.stakes.insert(validator.to_string(), 0);
        true
    }

    /// Add `amount` to `validator`'s stake. Returns the new stake.
    pub fn stake(&mut self, validator: &str, amount: Amount) -> Result<Amount, CoreError> {
        if amount == 0 {
            return Err(CoreError::InvalidAmount(
                "stake amount must be positive".to_string(),
            ));
        }
        let entry = self.stakes.entry(validator.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(*entry)
    }

    /// Delegate `amount` to an existing validator.
    ///
    /// Fails with `UnknownValidator` if `validator` has no stake entry. A
    /// delegator has one active relation; delegating again overwrites it,
    /// while the previously delegated amount stays with the old validator.
    pub fn try_delegate(
        &mut self,
        delegator: &str,
        validator: &str,
        amount: Amount,
    ) -> Result<Amount, CoreError> {
        if amount == 0 {
            return Err(CoreError::InvalidAmount(
                "delegation amount must be positive".to_string(),
            ));
        }
        let stake = self
            .stakes
            .get_mut(validator)
            .ok_or_else(|| CoreError::UnknownValidator(validator.to_string()))?;
        *stake = stake.saturating_add(amount);
        let new_stake = *stake;

        self.delegations.insert(
            delegator.to_string(),
            Delegation {
                validator: validator.to_string(),
                amount,
            },
        );
        Ok(new_stake)
    }

    /// Lenient delegation: an unknown validator or zero amount is a logged
    /// no-op. Returns whether the delegation took effect.
    pub fn delegate(&mut self, delegator: &str, validator: &str, amount: Amount) -> bool {
        match self.try_delegate(delegator, validator, amount) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Delegation {} -> {} ignored: {}", delegator, validator, e);
                false
            }
        }
    }

    /// Stake-weighted producer choice.
    ///
    /// Draws a point in [0, total_stake) and returns the first validator
    /// whose cumulative stake exceeds it. With zero total stake, picks
    /// uniformly among known validators; with none, returns `None`.
    pub fn select_validator<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ValidatorId> {
        if self.stakes.is_empty() {
            return None;
        }

        let total = self.total_stake();
        if total == 0 {
            let pick = rng.gen_range(0..self.stakes.len());
            return self.stakes.keys().nth(pick).cloned();
        }

        let point = rng.gen_range(0..total);
        let mut cumulative: Amount = 0;
        for (id, stake) in &self.stakes {
            cumulative = cumulative.saturating_add(*stake);
            if point < cumulative {
                return Some(id.clone());
            }
        }
        None
    }

    /// Forget every accumulated reward. Stakes and delegations stay.
    /// Used before replaying rewards over a replacement chain.
    pub fn clear_rewards(&mut self) {
        self.rewards.clear();
    }

    /// Credit `amount` to `validator`, then the delegation share of `amount`
    /// to every delegator pointed at it. Returns the delegator payouts.
    pub fn reward(&mut self, validator: &str, amount: Amount) -> Vec<(String, Amount)> {
        let entry = self.rewards.entry(validator.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);

        let share = amount.saturating_mul(self.delegation_share_bps as Amount)
            / BPS_DENOMINATOR as Amount;
        let delegators = self.delegators_of(validator);
        let mut payouts = Vec::with_capacity(delegators.len());
        for delegator in delegators {
            let entry = self.rewards.entry(delegator.clone()).or_insert(0);
            *entry = entry.saturating_add(share);
            payouts.push((delegator, share));
        }
        payouts
    }

    /// Delegators whose active delegation points at `validator`.
    pub fn delegators_of(&self, validator: &str) -> Vec<String> {
        self.delegations
            .iter()
            .filter(|(_, d)| d.validator == validator)
            .map(|(delegator, _)| delegator.clone())
            .collect()
    }

    pub fn stake_of(&self, validator: &str) -> Amount {
        self.stakes.get(validator).copied().unwrap_or(0)
    }

    pub fn reward_of(&self, id: &str) -> Amount {
        self.rewards.get(id).copied().unwrap_or(0)
    }

    pub fn delegation_of(&self, delegator: &str) -> Option<&Delegation> {
        self.delegations.get(delegator)
    }

    pub fn is_validator(&self, id: &str) -> bool {
        self.stakes.contains_key(id)
    }

    pub fn total_stake(&self) -> Amount {
        self.stakes
            .values()
            .fold(0, |acc: Amount, s| acc.saturating_add(*s))
    }

    pub fn stakes(&self) -> &BTreeMap<ValidatorId, Amount> {
        &self.stakes
    }

    pub fn delegations(&self) -> &BTreeMap<String, Delegation> {
        &self.delegations
    }

    pub fn rewards(&self) -> &BTreeMap<String, Amount> {
        &self.rewards
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn summaries(&self) -> Vec<ValidatorSummary> {
        self.stakes
            .iter()
            .map(|(id, stake)| ValidatorSummary {
                id: id.clone(),
                stake: *stake,
                reward: self.reward_of(id),
                delegators: self.delegators_of(id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_stake_is_additive() {
        let mut r = ValidatorRegistry::new();
        assert_eq!(r.stake("v1", 10).unwrap(), 10);
        assert_eq!(r.stake("v1", 5).unwrap(), 15);
        assert_eq!(r.total_stake(), 15);
    }

    #[test]
    fn test_zero_stake_rejected() {
        let mut r = ValidatorRegistry::new();
        assert!(matches!(r.stake("v1", 0), Err(CoreError::InvalidAmount(_))));
        assert!(r.is_empty());
    }

    #[test]
    fn test_delegate_to_unknown_is_noop() {
        let mut r = ValidatorRegistry::new();
        assert!(!r.delegate("d", "ghost", 20));
        assert!(r.delegations().is_empty());
        assert!(r.stakes().is_empty());
        assert_eq!(
            r.try_delegate("d", "ghost", 20),
            Err(CoreError::UnknownValidator("ghost".into()))
        );
    }

    #[test]
    fn test_delegate_adds_effective_stake() {
        let mut r = ValidatorRegistry::new();
        r.stake("v", 100).unwrap();
        assert!(r.delegate("d", "v", 20));
        assert_eq!(r.stake_of("v"), 120);
        assert_eq!(r.delegation_of("d").unwrap().validator, "v");
    }

    #[test]
    fn test_redelegation_overwrites_relation() {
        let mut r = ValidatorRegistry::new();
        r.stake("a", 10).unwrap();
        r.stake("b", 10).unwrap();
        r.delegate("d", "a", 5);
        r.delegate("d", "b", 7);

        assert_eq!(r.delegations().len(), 1);
        assert_eq!(r.delegation_of("d").unwrap().validator, "b");
        assert_eq!(r.delegators_of("a"), Vec::<String>::new());
        assert_eq!(r.delegators_of("b"), vec!["d".to_string()]);
        // Stake already delegated to `a` is not withdrawn.
        assert_eq!(r.stake_of("a"), 15);
        assert_eq!(r.stake_of("b"), 17);
    }

    #[test]
    fn test_reward_split_to_delegators() {
        let mut r = ValidatorRegistry::new();
        r.stake("V", 100).unwrap();
        r.delegate("D", "V", 20);

        let payouts = r.reward("V", 100);
        assert_eq!(r.reward_of("V"), 100);
        assert_eq!(r.reward_of("D"), 10);
        assert_eq!(payouts, vec![("D".to_string(), 10)]);
    }

    #[test]
    fn test_reward_share_configurable() {
        let mut r = ValidatorRegistry::with_delegation_share(2_500).unwrap();
        r.stake("V", 1).unwrap();
        r.delegate("D1", "V", 1);
        r.delegate("D2", "V", 1);
        r.reward("V", 40);
        assert_eq!(r.reward_of("D1"), 10);
        assert_eq!(r.reward_of("D2"), 10);
        assert!(ValidatorRegistry::with_delegation_share(10_001).is_err());
    }

    #[test]
    fn test_rewards_accumulate() {
        let mut r = ValidatorRegistry::new();
        r.stake("V", 1).unwrap();
        r.reward("V", 3);
        r.reward("V", 4);
        assert_eq!(r.reward_of("V"), 7);
    }

    #[test]
    fn test_clear_rewards_keeps_stake_and_delegations() {
        let mut r = ValidatorRegistry::new();
        r.stake("V", 50).unwrap();
        r.delegate("D", "V", 10);
        r.reward("V", 100);
        assert_eq!(r.reward_of("D"), 10);

        r.clear_rewards();
        assert!(r.rewards().is_empty());
        assert_eq!(r.stake_of("V"), 60);
        assert_eq!(r.delegators_of("V"), vec!["D".to_string()]);
    }

    #[test]
    fn test_select_none_when_empty() {
        let r = ValidatorRegistry::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(r.select_validator(&mut rng), None);
    }

    #[test]
    fn test_select_single_validator() {
        let mut r = ValidatorRegistry::new();
        r.stake("only", 5).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            assert_eq!(r.select_validator(&mut rng).as_deref(), Some("only"));
        }
    }

    #[test]
    fn test_select_zero_stake_falls_back_to_uniform() {
        let mut r = ValidatorRegistry::new();
        r.register("a");
        r.register("b");
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen_a = 0;
        for _ in 0..2_000 {
            match r.select_validator(&mut rng).as_deref() {
                Some("a") => seen_a += 1,
                Some("b") => {}
                other => panic!("unexpected pick {:?}", other),
            }
        }
        assert!((800..1_200).contains(&seen_a), "seen_a = {}", seen_a);
    }

    #[test]
    fn test_zero_stake_validator_never_wins_weighted_draw() {
        let mut r = ValidatorRegistry::new();
        r.register("idle");
        r.stake("busy", 1).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..500 {
            assert_eq!(r.select_validator(&mut rng).as_deref(), Some("busy"));
        }
    }

    #[test]
    fn test_select_reproducible_for_fixed_seed() {
        let mut r = ValidatorRegistry::new();
        r.stake("A", 10).unwrap();
        r.stake("B", 30).unwrap();
        r.stake("C", 60).unwrap();

        let picks = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50)
                .map(|_| r.select_validator(&mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
    }

    #[test]
    fn test_select_converges_to_stake_ratio() {
        let mut r = ValidatorRegistry::new();
        r.stake("A", 10).unwrap();
        r.stake("B", 30).unwrap();
        r.stake("C", 60).unwrap();

        let mut rng = StdRng::seed_from_u64(2024);
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        const DRAWS: u32 = 100_000;
        for _ in 0..DRAWS {
            let pick = r.select_validator(&mut rng).unwrap();
            *counts.entry(pick).or_insert(0) += 1;
        }

        for (id, expected) in [("A", 0.10), ("B", 0.30), ("C", 0.60)] {
            let ratio = counts[id] as f64 / DRAWS as f64;
            assert!(
                (ratio - expected).abs() < 0.01,
                "{} selected {:.4}, expected {:.2}",
                id,
                ratio,
                expected
            );
        }
    }

    #[test]
    fn test_summaries() {
        let mut r = ValidatorRegistry::new();
        r.stake("V", 100).unwrap();
        r.delegate("D", "V", 20);
        r.reward("V", 50);
        let s = r.summaries();
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].stake, 120);
        assert_eq!(s[0].reward, 50);
        assert_eq!(s[0].delegators, vec!["D".to_string()]);
    }

    #[test]
    fn test_registry_json_defaults_share() {
        let raw = r#"{"stakes":{"V":5},"delegations":{},"rewards":{}}"#;
        let r: ValidatorRegistry = serde_json::from_str(raw).unwrap();
        assert_eq!(r.delegation_share_bps(), DELEGATION_REWARD_SHARE_BPS);
        assert_eq!(r.stake_of("V"), 5);
    }
}

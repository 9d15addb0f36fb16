use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tally_consensus::{ValidatorRegistry, BPS_DENOMINATOR, DELEGATION_REWARD_SHARE_BPS};
use tally_core::Amount;
use tally_network::DEFAULT_MAX_MESSAGE_BYTES;

use crate::NodeError;

/// Serde adapter for u128 ↔ TOML: serialize as string, deserialize from string or integer.
/// TOML has no 128-bit integers, so large amounts round-trip through strings.
mod u128_toml {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(val: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&val.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        use serde::de::{self, Visitor};
        struct U128Visitor;

        impl<'de> Visitor<'de> for U128Visitor {
            type Value = u128;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a u128 as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                if v >= 0 {
                    Ok(v as u128)
                } else {
                    Err(E::custom("negative value for u128"))
                }
            }
        }

        d.deserialize_any(U128Visitor)
    }
}

/// One-off credit sealed by the first block this node produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisConfig {
    pub mint_to: String,
    #[serde(with = "u128_toml")]
    pub mint_amount: Amount,
}

/// Validator staked at startup when no registry snapshot is on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorSeed {
    pub id: String,
    #[serde(with = "u128_toml")]
    pub stake: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub node_id: String,
    /// host:port for the peer listener
    pub listen_addr: String,
    /// Static peer list, host:port
    pub peers: Vec<String>,
    pub peer_timeout_ms: u64,
    pub max_message_bytes: usize,
    #[serde(with = "u128_toml")]
    pub block_reward: Amount,
    /// 0 = produce only on demand
    pub block_interval_ms: u64,
    /// Fixed seed for producer selection; entropy when unset
    pub selection_seed: Option<u64>,
    /// Skip peer chains that fail verification during conflict resolution
    pub verify_peer_chains: bool,
    /// Pending pool capacity; unbounded when unset
    pub max_pending: Option<usize>,
    /// Enables persistence when set
    pub data_dir: Option<PathBuf>,
    pub delegation_share_bps: u32,
    pub genesis: Option<GenesisConfig>,
    pub validators: Vec<ValidatorSeed>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "tally-node".to_string(),
            listen_addr: "127.0.0.1:5000".to_string(),
            peers: Vec::new(),
            peer_timeout_ms: 2_000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            block_reward: 10,
            block_interval_ms: 0,
            selection_seed: None,
            verify_peer_chains: true,
            max_pending: None,
            data_dir: None,
            delegation_share_bps: DELEGATION_REWARD_SHARE_BPS,
            genesis: None,
            validators: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load node config from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, NodeError> {
        let content = fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, NodeError> {
        toml::from_str(content).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), NodeError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Override fields from `TALLY_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), NodeError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as `apply_env`, reading variables through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), NodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TALLY_NODE_ID") {
            self.node_id = v;
        }
        if let Some(v) = lookup("TALLY_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("TALLY_PEERS") {
            self.peers = parse_peer_list(&v);
        }
        if let Some(v) = lookup("TALLY_PEER_TIMEOUT_MS") {
            self.peer_timeout_ms = parse_env("TALLY_PEER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TALLY_MAX_MESSAGE_BYTES") {
            self.max_message_bytes = parse_env("TALLY_MAX_MESSAGE_BYTES", &v)?;
        }
        if let Some(v) = lookup("TALLY_BLOCK_REWARD") {
            self.block_reward = parse_env("TALLY_BLOCK_REWARD", &v)?;
        }
        if let Some(v) = lookup("TALLY_BLOCK_INTERVAL_MS") {
            self.block_interval_ms = parse_env("TALLY_BLOCK_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("TALLY_SELECTION_SEED") {
            self.selection_seed = Some(parse_env("TALLY_SELECTION_SEED", &v)?);
        }
        if let Some(v) = lookup("TALLY_VERIFY_PEER_CHAINS") {
            self.verify_peer_chains = parse_env("TALLY_VERIFY_PEER_CHAINS", &v)?;
        }
        if let Some(v) = lookup("TALLY_MAX_PENDING") {
            self.max_pending = Some(parse_env("TALLY_MAX_PENDING", &v)?);
        }
        if let Some(v) = lookup("TALLY_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_id.trim().is_empty() {
            return Err(NodeError::Config("node_id cannot be empty".to_string()));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(NodeError::Config("listen_addr cannot be empty".to_string()));
        }
        if self.peer_timeout_ms == 0 {
            return Err(NodeError::Config("peer_timeout_ms must be > 0".to_string()));
        }
        if self.max_message_bytes == 0 {
            return Err(NodeError::Config("max_message_bytes must be > 0".to_string()));
        }
        if self.delegation_share_bps > BPS_DENOMINATOR {
            return Err(NodeError::Config(format!(
                "delegation_share_bps must be <= {}",
                BPS_DENOMINATOR
            )));
        }
        if self.max_pending == Some(0) {
            return Err(NodeError::Config("max_pending must be > 0 when set".to_string()));
        }
        if let Some(seed) = self.validators.iter().find(|v| v.stake == 0) {
            return Err(NodeError::Config(format!(
                "validator {} has zero stake",
                seed.id
            )));
        }
        if let Some(peer) = self.peers.iter().find(|p| p.trim().is_empty()) {
            return Err(NodeError::Config(format!("empty peer address {:?}", peer)));
        }
        if self.peers.contains(&self.listen_addr) {
            log::warn!("Peer list contains this node's own address {}", self.listen_addr);
        }
        Ok(())
    }

    /// Fresh registry with the configured share and seed validators.
    pub fn build_registry(&self) -> Result<ValidatorRegistry, NodeError> {
        let mut registry = ValidatorRegistry::with_delegation_share(self.delegation_share_bps)?;
        for seed in &self.validators {
            registry.stake(&seed.id, seed.stake)?;
        }
        Ok(registry)
    }

    pub fn selection_rng(&self) -> Box<dyn RngCore + Send> {
        match self.selection_seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        }
    }
}

/// Split a comma-separated peer list, dropping blanks.
pub fn parse_peer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, NodeError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| NodeError::Config(format!("{}={:?}: {}", key, value, e)))
}

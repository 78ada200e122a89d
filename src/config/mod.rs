use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::catalog::DAY;
use crate::flash::SettlementPolicy;
use crate::ledger::{AccountId, Amount, MAX_SUPPLY};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Accounts and knobs the context is built from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ArmoryConfig {
    pub owner: AccountId,
    pub treasury: AccountId,
    /// Identity the item shop uses on the ledger.
    pub shop: AccountId,
    /// Identity of the lending pool.
    pub pool: AccountId,
    pub max_supply: Amount,
    /// Seconds between daily allowance replenishments.
    pub replenish_period: u64,
    pub flash_policy: SettlementPolicy,
    /// Grant SPENDER to `shop` at construction.
    pub grant_shop_spender: bool,
}

impl Default for ArmoryConfig {
    fn default() -> Self {
        Self {
            owner: "owner".into(),
            treasury: "treasury".into(),
            shop: "shop".into(),
            pool: "pool".into(),
            max_supply: MAX_SUPPLY,
            replenish_period: DAY,
            flash_policy: SettlementPolicy::Guarded,
            grant_shop_spender: true,
        }
    }
}

impl ArmoryConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("owner", &self.owner),
            ("treasury", &self.treasury),
            ("shop", &self.shop),
            ("pool", &self.pool),
        ];
        if let Some((field, _)) = named.iter().find(|(_, account)| account.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("{field} must not be empty")));
        }
        if self.shop == self.pool || self.shop == self.treasury || self.pool == self.treasury {
            return Err(ConfigError::Invalid(
                "shop, pool and treasury must be distinct accounts".into(),
            ));
        }
        if self.replenish_period == 0 {
            return Err(ConfigError::Invalid("replenish_period must be > 0".into()));
        }
        if self.max_supply == 0 {
            return Err(ConfigError::Invalid("max_supply must be > 0".into()));
        }
        Ok(())
    }
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let text = r#"{ "owner": "alice", "flash_policy": "unguarded" }"#;
        let config = ArmoryConfig::from_json_str(text).unwrap();
        assert_eq!(config.owner, "alice");
        assert_eq!(config.flash_policy, SettlementPolicy::Unguarded);
        assert_eq!(config.replenish_period, DAY);
        assert_eq!(config.max_supply, MAX_SUPPLY);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ArmoryConfig::from_json_str(r#"{ "owner": "alice", "fee_bps": 5 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn shared_accounts_are_rejected() {
        let err = ArmoryConfig::from_json_str(r#"{ "shop": "pool" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = ArmoryConfig::from_json_str(r#"{ "replenish_period": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn large_supply_round_trips_through_json() {
        let config = ArmoryConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(ArmoryConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ArmoryConfig::load(Path::new("/nonexistent/armory.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/armory.json"));
    }
}

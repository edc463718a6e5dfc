use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::sync::TransitionPolicy;

// ============================================================================
// Configuration
// ============================================================================

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.message().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub withdraw: WithdrawConfig,
    pub orders: OrdersConfig,
    pub commission: CommissionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawConfig {
    /// Keep cash-on-delivery orders out of vendor balances.
    pub exclude_cod_payment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    /// Split a never-split order on its first admin status change.
    pub split_on_admin_status_change: bool,
    /// Payment methods whose digital-only sub-orders are not auto-completed.
    pub auto_complete_excluded_gateways: Vec<String>,
    /// Replaces the built-in sub-order transition whitelist when set.
    pub sub_order_status_whitelist: Option<BTreeMap<String, Vec<String>>>,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            split_on_admin_status_change: true,
            auto_complete_excluded_gateways: vec!["bacs".into(), "cheque".into(), "cod".into()],
            sub_order_status_whitelist: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionConfig {
    /// Percent of the item subtotal kept by the marketplace.
    pub admin_percentage: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            admin_percentage: Decimal::TEN,
        }
    }
}

impl MarketplaceConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration file");
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: MarketplaceConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let percentage = self.commission.admin_percentage;
        if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Validation(format!(
                "commission.admin_percentage must be between 0 and 100, got {}",
                percentage
            )));
        }

        if self
            .orders
            .auto_complete_excluded_gateways
            .iter()
            .any(|gateway| gateway.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "orders.auto_complete_excluded_gateways contains an empty gateway".into(),
            ));
        }

        self.transition_policy()?;
        Ok(())
    }

    /// The sub-order transition whitelist, built-in unless overridden.
    pub fn transition_policy(&self) -> Result<TransitionPolicy, ConfigError> {
        match &self.orders.sub_order_status_whitelist {
            Some(raw) => TransitionPolicy::from_overrides(raw).map_err(|e| {
                ConfigError::Validation(format!("orders.sub_order_status_whitelist: {}", e))
            }),
            None => Ok(TransitionPolicy::default()),
        }
    }
}

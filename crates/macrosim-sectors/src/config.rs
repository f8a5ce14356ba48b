//! Economy parameters, read from the `firms`, `households` and `banks`
//! sections of `macrosim-config.yaml`.
//!
//! Rates are per period and expressed as decimal fractions. Write them as
//! quoted strings in YAML (`"0.05"`) so they parse exactly.

use std::path::Path;

use macrosim_core::ConfigError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The three sections the demonstration economy reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Producer parameters.
    #[serde(default)]
    pub firms: FirmsConfig,

    /// Worker and consumer parameters.
    #[serde(default)]
    pub households: HouseholdsConfig,

    /// Lender parameters.
    #[serde(default)]
    pub banks: BanksConfig,
}

impl EconomyConfig {
    /// Load the economy sections from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse the economy sections from a YAML string. Other sections are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] on malformed YAML, or
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(self.firms.count > 0, "firms.count", "must be at least 1")?;
        require(
            self.households.count > 0,
            "households.count",
            "must be at least 1",
        )?;
        require(
            self.firms.initial_workforce >= 1
                && self.firms.initial_workforce <= self.firms.max_workforce,
            "firms.initial_workforce",
            "must be between 1 and firms.max_workforce",
        )?;
        require(
            is_positive(self.firms.initial_price),
            "firms.initial_price",
            "must be positive",
        )?;
        require(
            is_positive(self.firms.productivity),
            "firms.productivity",
            "must be positive",
        )?;
        require(
            is_fraction(self.firms.price_step),
            "firms.price_step",
            "must be in [0, 1)",
        )?;
        require(
            is_positive(self.households.initial_wage),
            "households.initial_wage",
            "must be positive",
        )?;
        require(
            is_positive(self.households.min_wage),
            "households.min_wage",
            "must be positive",
        )?;
        require(
            is_fraction(self.households.wage_step),
            "households.wage_step",
            "must be in [0, 1)",
        )?;
        require(
            is_fraction(self.households.propensity_to_consume)
                || self.households.propensity_to_consume == Decimal::ONE,
            "households.propensity_to_consume",
            "must be in [0, 1]",
        )?;
        require(
            self.households.goods_sample > 0,
            "households.goods_sample",
            "must be at least 1",
        )?;
        require(
            is_fraction(self.banks.interest_rate),
            "banks.interest_rate",
            "must be in [0, 1)",
        )?;
        require(
            is_fraction(self.banks.repayment_rate) && !self.banks.repayment_rate.is_zero(),
            "banks.repayment_rate",
            "must be in (0, 1)",
        )?;
        require(
            !self.banks.loan_ceiling.is_sign_negative(),
            "banks.loan_ceiling",
            "must not be negative",
        )?;
        Ok(())
    }
}

fn require(ok: bool, field: &'static str, reason: &str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: reason.to_owned(),
        })
    }
}

fn is_positive(value: Decimal) -> bool {
    value.is_sign_positive() && !value.is_zero()
}

fn is_fraction(value: Decimal) -> bool {
    !value.is_sign_negative() && value < Decimal::ONE
}

// ---------------------------------------------------------------------------
// Firms
// ---------------------------------------------------------------------------

/// Producer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmsConfig {
    /// Number of firms (default: 10).
    #[serde(default = "default_firm_count")]
    pub count: u32,

    /// Starting goods price before random dispersion (default: 10).
    #[serde(default = "default_initial_price")]
    pub initial_price: Decimal,

    /// Units of goods produced per worker per period (default: 10).
    #[serde(default = "default_productivity")]
    pub productivity: Decimal,

    /// Relative price change applied after each period (default: 0.03).
    #[serde(default = "default_price_step")]
    pub price_step: Decimal,

    /// Workers a firm tries to hire in its first period (default: 3).
    #[serde(default = "default_initial_workforce")]
    pub initial_workforce: u32,

    /// Upper bound on a firm's workforce target (default: 10).
    #[serde(default = "default_max_workforce")]
    pub max_workforce: u32,

    /// Labour offers a firm inspects per vacancy (default: 3).
    #[serde(default = "default_labour_sample")]
    pub labour_sample: u32,
}

impl Default for FirmsConfig {
    fn default() -> Self {
        Self {
            count: default_firm_count(),
            initial_price: default_initial_price(),
            productivity: default_productivity(),
            price_step: default_price_step(),
            initial_workforce: default_initial_workforce(),
            max_workforce: default_max_workforce(),
            labour_sample: default_labour_sample(),
        }
    }
}

const fn default_firm_count() -> u32 {
    10
}

const fn default_initial_price() -> Decimal {
    Decimal::TEN
}

const fn default_productivity() -> Decimal {
    Decimal::TEN
}

const fn default_price_step() -> Decimal {
    Decimal::from_parts(3, 0, 0, false, 2)
}

const fn default_initial_workforce() -> u32 {
    3
}

const fn default_max_workforce() -> u32 {
    10
}

const fn default_labour_sample() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Households
// ---------------------------------------------------------------------------

/// Worker and consumer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdsConfig {
    /// Number of households (default: 50).
    #[serde(default = "default_household_count")]
    pub count: u32,

    /// Starting reservation wage before random dispersion (default: 50).
    #[serde(default = "default_initial_wage")]
    pub initial_wage: Decimal,

    /// Floor for the reservation wage (default: 1).
    #[serde(default = "default_min_wage")]
    pub min_wage: Decimal,

    /// Relative reservation wage change per period (default: 0.02).
    #[serde(default = "default_wage_step")]
    pub wage_step: Decimal,

    /// Share of savings spent on goods each period (default: 0.8).
    #[serde(default = "default_propensity")]
    pub propensity_to_consume: Decimal,

    /// Goods offers a household compares before buying (default: 5).
    #[serde(default = "default_goods_sample")]
    pub goods_sample: u32,
}

impl Default for HouseholdsConfig {
    fn default() -> Self {
        Self {
            count: default_household_count(),
            initial_wage: default_initial_wage(),
            min_wage: default_min_wage(),
            wage_step: default_wage_step(),
            propensity_to_consume: default_propensity(),
            goods_sample: default_goods_sample(),
        }
    }
}

const fn default_household_count() -> u32 {
    50
}

const fn default_initial_wage() -> Decimal {
    Decimal::from_parts(50, 0, 0, false, 0)
}

const fn default_min_wage() -> Decimal {
    Decimal::ONE
}

const fn default_wage_step() -> Decimal {
    Decimal::from_parts(2, 0, 0, false, 2)
}

const fn default_propensity() -> Decimal {
    Decimal::from_parts(8, 0, 0, false, 1)
}

const fn default_goods_sample() -> u32 {
    5
}

// ---------------------------------------------------------------------------
// Banks
// ---------------------------------------------------------------------------

/// Lender parameters. Firms apply these terms when they borrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanksConfig {
    /// Number of banks; zero disables credit (default: 2).
    #[serde(default = "default_bank_count")]
    pub count: u32,

    /// Interest charged per period on outstanding principal
    /// (default: 0.01).
    #[serde(default = "default_interest_rate")]
    pub interest_rate: Decimal,

    /// Share of principal repaid per period when funds allow
    /// (default: 0.1).
    #[serde(default = "default_repayment_rate")]
    pub repayment_rate: Decimal,

    /// Most a single firm may owe (default: 2000).
    #[serde(default = "default_loan_ceiling")]
    pub loan_ceiling: Decimal,
}

impl Default for BanksConfig {
    fn default() -> Self {
        Self {
            count: default_bank_count(),
            interest_rate: default_interest_rate(),
            repayment_rate: default_repayment_rate(),
            loan_ceiling: default_loan_ceiling(),
        }
    }
}

const fn default_bank_count() -> u32 {
    2
}

const fn default_interest_rate() -> Decimal {
    Decimal::from_parts(1, 0, 0, false, 2)
}

const fn default_repayment_rate() -> Decimal {
    Decimal::from_parts(1, 0, 0, false, 1)
}

const fn default_loan_ceiling() -> Decimal {
    Decimal::from_parts(2000, 0, 0, false, 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EconomyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.firms.price_step, dec!(0.03));
        assert_eq!(config.households.propensity_to_consume, dec!(0.8));
        assert_eq!(config.banks.interest_rate, dec!(0.01));
    }

    #[test]
    fn parse_ignores_kernel_sections() {
        let yaml = r#"
world:
  seed: 7
firms:
  count: 4
  price_step: "0.05"
households:
  count: 20
banks:
  count: 1
"#;
        let config = EconomyConfig::parse(yaml).unwrap();
        assert_eq!(config.firms.count, 4);
        assert_eq!(config.firms.price_step, dec!(0.05));
        assert_eq!(config.households.count, 20);
        assert_eq!(config.banks.count, 1);
        assert_eq!(config.banks.loan_ceiling, dec!(2000));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = EconomyConfig::parse("firms:\n  count: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "firms.count",
                ..
            }
        ));

        let err = EconomyConfig::parse("firms:\n  initial_workforce: 20\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "firms.initial_workforce",
                ..
            }
        ));

        let err = EconomyConfig::parse("banks:\n  interest_rate: \"1.5\"\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "banks.interest_rate",
                ..
            }
        ));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../macrosim-config.yaml");
        let config = EconomyConfig::from_file(&path).unwrap();
        assert!(config.firms.count > 0);
        assert!(config.households.count > 0);
    }
}

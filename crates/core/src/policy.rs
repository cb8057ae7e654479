use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::actor::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginClass {
    Standard,
    High,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown margin class `{0}` (expected standard|high)")]
pub struct ParseMarginClassError(pub String);

impl MarginClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for MarginClass {
    type Err = ParseMarginClassError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            other => Err(ParseMarginClassError(other.to_string())),
        }
    }
}

/// One row of the discount policy table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRule {
    pub role: Role,
    pub margin_class: MarginClass,
    pub max_discount_pct: Decimal,
}

/// The ceiling that applies to one `(role, product)` combination.
/// `max_discount_pct` is `None` for unrestricted roles; the cost-floor
/// check still applies to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCeiling {
    pub margin_class: MarginClass,
    pub max_discount_pct: Option<Decimal>,
    pub unrestricted: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PolicyTableError {
    #[error("missing policy row for role {role:?} and margin class {margin_class:?}")]
    MissingRule { role: Role, margin_class: MarginClass },
    #[error("duplicate policy row for role {role:?} and margin class {margin_class:?}")]
    DuplicateRule { role: Role, margin_class: MarginClass },
    #[error("ceiling out of range for role {role:?}: {max_discount_pct}%")]
    CeilingOutOfRange { role: Role, max_discount_pct: Decimal },
}

/// Stateless, deterministic resolver: identical inputs always yield
/// identical ceilings, so audit replays reproduce decisions exactly.
#[derive(Clone, Debug)]
pub struct TierPolicy {
    high_margin_threshold_pct: Decimal,
    ceilings: HashMap<(Role, MarginClass), Decimal>,
    unrestricted: HashSet<Role>,
}

impl TierPolicy {
    pub fn new(
        high_margin_threshold_pct: Decimal,
        rules: Vec<TierRule>,
        unrestricted_roles: Vec<Role>,
    ) -> Result<Self, PolicyTableError> {
        let unrestricted: HashSet<Role> = unrestricted_roles.into_iter().collect();
        let mut ceilings = HashMap::new();

        for rule in rules {
            if rule.max_discount_pct < Decimal::ZERO
                || rule.max_discount_pct > Decimal::ONE_HUNDRED
            {
                return Err(PolicyTableError::CeilingOutOfRange {
                    role: rule.role,
                    max_discount_pct: rule.max_discount_pct,
                });
            }
            if ceilings.insert((rule.role, rule.margin_class), rule.max_discount_pct).is_some() {
                return Err(PolicyTableError::DuplicateRule {
                    role: rule.role,
                    margin_class: rule.margin_class,
                });
            }
        }

        for role in Role::ALL {
            if unrestricted.contains(&role) {
                continue;
            }
            for margin_class in [MarginClass::Standard, MarginClass::High] {
                if !ceilings.contains_key(&(role, margin_class)) {
                    return Err(PolicyTableError::MissingRule { role, margin_class });
                }
            }
        }

        Ok(Self { high_margin_threshold_pct, ceilings, unrestricted })
    }

    /// Default retail table: staff 5%/10%, manager 15%/25%, admin
    /// unrestricted, high-margin threshold 30%.
    pub fn default_retail() -> Self {
        Self::new(Decimal::from(30), default_rules(), vec![Role::Admin])
            .expect("default policy table is complete")
    }

    pub fn classify(&self, margin_pct_before: Decimal) -> MarginClass {
        if margin_pct_before >= self.high_margin_threshold_pct {
            MarginClass::High
        } else {
            MarginClass::Standard
        }
    }

    pub fn resolve(&self, role: Role, margin_pct_before: Decimal) -> TierCeiling {
        let margin_class = self.classify(margin_pct_before);

        if self.unrestricted.contains(&role) {
            return TierCeiling { margin_class, max_discount_pct: None, unrestricted: true };
        }

        TierCeiling {
            margin_class,
            max_discount_pct: self.ceilings.get(&(role, margin_class)).copied(),
            unrestricted: false,
        }
    }
}

/// The default retail tier rows, also used as the configuration
/// baseline when no policy table is supplied.
pub fn default_rules() -> Vec<TierRule> {
    vec![
        TierRule {
            role: Role::Staff,
            margin_class: MarginClass::Standard,
            max_discount_pct: Decimal::from(5),
        },
        TierRule {
            role: Role::Staff,
            margin_class: MarginClass::High,
            max_discount_pct: Decimal::from(10),
        },
        TierRule {
            role: Role::Manager,
            margin_class: MarginClass::Standard,
            max_discount_pct: Decimal::from(15),
        },
        TierRule {
            role: Role::Manager,
            margin_class: MarginClass::High,
            max_discount_pct: Decimal::from(25),
        },
    ]
}

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

/// Price and cost in integer minor-currency units, frozen for the
/// duration of one validation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEconomics {
    pub unit_price_cents: i64,
    pub unit_cost_cents: i64,
}

impl ProductEconomics {
    pub fn new(unit_price_cents: i64, unit_cost_cents: i64) -> Result<Self, DomainError> {
        if unit_price_cents < 0 {
            return Err(DomainError::NegativeMoney {
                field: "unit_price_cents",
                value: unit_price_cents,
            });
        }
        if unit_cost_cents < 0 {
            return Err(DomainError::NegativeMoney {
                field: "unit_cost_cents",
                value: unit_cost_cents,
            });
        }

        Ok(Self { unit_price_cents, unit_cost_cents })
    }
}

#[cfg(test)]
mod tests {
    use super::ProductEconomics;
    use crate::errors::DomainError;

    #[test]
    fn accepts_non_negative_price_and_cost() {
        let economics = ProductEconomics::new(164_999, 112_200).expect("valid economics");
        assert_eq!(economics.unit_price_cents, 164_999);
        assert_eq!(economics.unit_cost_cents, 112_200);

        ProductEconomics::new(0, 0).expect("zero price and cost are valid");
    }

    #[test]
    fn rejects_negative_amounts() {
        let error = ProductEconomics::new(-1, 100).expect_err("negative price");
        assert!(matches!(error, DomainError::NegativeMoney { field: "unit_price_cents", .. }));

        let error = ProductEconomics::new(100, -1).expect_err("negative cost");
        assert!(matches!(error, DomainError::NegativeMoney { field: "unit_cost_cents", .. }));
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ledger figures and forecast the reorder heuristic works from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderInputs {
    pub available: Decimal,
    pub safety_stock: Decimal,
    pub predicted_demand: Decimal,
    pub horizon_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderAdvice {
    /// Quantity to order.
    pub quantity: Decimal,
    /// Share of the requirement not covered by available stock, 0..=1.
    pub urgency: Decimal,
    pub explanation: String,
}

/// Advise ordering the shortfall of available stock against predicted demand
/// plus safety stock. `None` when stock already covers the requirement.
pub fn advise_reorder(inputs: &ReorderInputs) -> Option<ReorderAdvice> {
    let required = inputs.predicted_demand + inputs.safety_stock;
    let shortfall = required - inputs.available;
    if shortfall <= Decimal::ZERO || required <= Decimal::ZERO {
        return None;
    }

    let urgency = (shortfall / required).min(Decimal::ONE).round_dp(2);
    let explanation = format!(
        "available {} against predicted {}-day demand {} plus safety stock {}; short by {}",
        inputs.available.normalize(),
        inputs.horizon_days,
        inputs.predicted_demand.normalize(),
        inputs.safety_stock.normalize(),
        shortfall.normalize(),
    );

    Some(ReorderAdvice {
        quantity: shortfall,
        urgency,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inputs(available: Decimal, safety: Decimal, predicted: Decimal) -> ReorderInputs {
        ReorderInputs {
            available,
            safety_stock: safety,
            predicted_demand: predicted,
            horizon_days: 30,
        }
    }

    #[test]
    fn orders_the_shortfall() {
        let advice = advise_reorder(&inputs(dec!(20), dec!(10), dec!(70))).unwrap();
        assert_eq!(advice.quantity, dec!(60));
        assert_eq!(advice.urgency, dec!(0.75));
        assert!(advice.explanation.contains("short by 60"));
    }

    #[test]
    fn no_advice_when_covered() {
        assert_eq!(advise_reorder(&inputs(dec!(100), dec!(10), dec!(70))), None);
        assert_eq!(advise_reorder(&inputs(dec!(80), dec!(10), dec!(70))), None);
        assert_eq!(advise_reorder(&inputs(dec!(0), dec!(0), dec!(0))), None);
    }

    #[test]
    fn empty_stock_is_fully_urgent() {
        let advice = advise_reorder(&inputs(dec!(0), dec!(5), dec!(15))).unwrap();
        assert_eq!(advice.quantity, dec!(20));
        assert_eq!(advice.urgency, dec!(1));
    }
}

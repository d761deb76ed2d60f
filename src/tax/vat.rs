//! VAT calculation for sales recorded as VAT-inclusive or VAT-exclusive totals

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::config::RoundingPolicy;
use crate::types::{AmountType, EngineError, EngineResult, SaleFact};

/// VAT rate expressed as a fraction (0.15 for 15%)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatRate(BigDecimal);

impl VatRate {
    /// Create a rate, rejecting values outside `[0, 1)`
    pub fn new(rate: BigDecimal) -> EngineResult<Self> {
        if rate < BigDecimal::from(0) || rate >= BigDecimal::from(1) {
            return Err(EngineError::Validation(format!(
                "VAT rate must be a fraction in [0, 1), got {rate}"
            )));
        }
        Ok(Self(rate))
    }

    /// The standard 15% rate
    pub fn standard() -> Self {
        Self(BigDecimal::from(15) / BigDecimal::from(100))
    }

    pub fn value(&self) -> &BigDecimal {
        &self.0
    }
}

impl Default for VatRate {
    fn default() -> Self {
        Self::standard()
    }
}

/// A single amount split into its net and VAT portions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatCalculation {
    /// How the source amount was quoted
    pub amount_type: AmountType,
    /// Amount excluding VAT
    pub net_amount: BigDecimal,
    /// VAT portion
    pub vat_amount: BigDecimal,
    /// Amount including VAT (`net + vat`)
    pub gross_amount: BigDecimal,
}

impl VatCalculation {
    /// VAT charged on top of a net amount
    pub fn calculate(net_amount: BigDecimal, rate: &VatRate) -> Self {
        let vat_amount = &net_amount * rate.value();
        let gross_amount = &net_amount + &vat_amount;

        Self {
            amount_type: AmountType::Exclusive,
            net_amount,
            vat_amount,
            gross_amount,
        }
    }

    /// VAT contained in a gross amount: `gross * rate / (1 + rate)`
    pub fn reverse_calculate(gross_amount: BigDecimal, rate: &VatRate) -> Self {
        let divisor = BigDecimal::from(1) + rate.value();
        let vat_amount = (&gross_amount * rate.value()) / divisor;
        let net_amount = &gross_amount - &vat_amount;

        Self {
            amount_type: AmountType::Inclusive,
            net_amount,
            vat_amount,
            gross_amount,
        }
    }

    /// Normalize an amount quoted either way into VAT-exclusive terms
    pub fn normalize(amount_type: AmountType, total_value: BigDecimal, rate: &VatRate) -> Self {
        match amount_type {
            AmountType::Inclusive => Self::reverse_calculate(total_value, rate),
            AmountType::Exclusive => Self::calculate(total_value, rate),
        }
    }

    /// Normalize a sale's total
    pub fn for_sale(sale: &SaleFact, rate: &VatRate) -> Self {
        Self::normalize(sale.amount_type, sale.total_value.clone(), rate)
    }
}

/// Unrounded running totals over many calculations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatSummary {
    pub gross_sales: BigDecimal,
    pub net_sales: BigDecimal,
    pub vat_amount: BigDecimal,
    pub count: usize,
}

impl Default for VatSummary {
    fn default() -> Self {
        Self {
            gross_sales: BigDecimal::from(0),
            net_sales: BigDecimal::from(0),
            vat_amount: BigDecimal::from(0),
            count: 0,
        }
    }
}

impl VatSummary {
    pub fn add(&mut self, calculation: &VatCalculation) {
        self.gross_sales += &calculation.gross_amount;
        self.net_sales += &calculation.net_amount;
        self.vat_amount += &calculation.vat_amount;
        self.count += 1;
    }

    /// Round the totals for persistence. Gross is rebuilt from the rounded
    /// parts so `gross = net + vat` holds exactly.
    pub fn rounded(&self, policy: &RoundingPolicy) -> Self {
        let net_sales = policy.apply(&self.net_sales);
        let vat_amount = policy.apply(&self.vat_amount);
        Self {
            gross_sales: &net_sales + &vat_amount,
            net_sales,
            vat_amount,
            count: self.count,
        }
    }
}

impl<'a> FromIterator<&'a VatCalculation> for VatSummary {
    fn from_iter<I: IntoIterator<Item = &'a VatCalculation>>(iter: I) -> Self {
        let mut summary = Self::default();
        for calculation in iter {
            summary.add(calculation);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_inclusive_sale_splits_out_vat() {
        let calculation = VatCalculation::normalize(
            AmountType::Inclusive,
            BigDecimal::from(115000),
            &VatRate::standard(),
        );

        assert_eq!(calculation.net_amount, BigDecimal::from(100000));
        assert_eq!(calculation.vat_amount, BigDecimal::from(15000));
        assert_eq!(calculation.gross_amount, BigDecimal::from(115000));
    }

    #[test]
    fn test_exclusive_sale_adds_vat() {
        let calculation = VatCalculation::normalize(
            AmountType::Exclusive,
            BigDecimal::from(100000),
            &VatRate::standard(),
        );

        assert_eq!(calculation.net_amount, BigDecimal::from(100000));
        assert_eq!(calculation.vat_amount, BigDecimal::from(15000));
        assert_eq!(calculation.gross_amount, BigDecimal::from(115000));
    }

    #[test]
    fn test_rate_bounds() {
        assert!(VatRate::new(BigDecimal::from(1)).is_err());
        assert!(VatRate::new(BigDecimal::from(-1)).is_err());
        assert!(VatRate::new(BigDecimal::from(0)).is_ok());
    }

    #[test]
    fn test_summary_rounds_only_at_the_end() {
        let rate = VatRate::standard();
        // 1.00 inclusive three times: each VAT portion is 0.1304..., the sum 0.3913...
        let calculations: Vec<VatCalculation> = (0..3)
            .map(|_| VatCalculation::normalize(AmountType::Inclusive, BigDecimal::from(1), &rate))
            .collect();

        let summary: VatSummary = calculations.iter().collect();
        let rounded = summary.rounded(&RoundingPolicy::default());

        assert_eq!(rounded.count, 3);
        assert_eq!(rounded.gross_sales, BigDecimal::from(3));
        assert_eq!(rounded.vat_amount, BigDecimal::from_str("0.39").unwrap());
        assert_eq!(rounded.net_sales, BigDecimal::from_str("2.61").unwrap());
    }

    #[test]
    fn test_rounded_gross_equals_net_plus_vat() {
        // 0.125 net: gross 0.14375 rounds to 0.14 on its own, but 0.13 + 0.02 = 0.15
        let rate = VatRate::standard();
        let summary: VatSummary = [VatCalculation::calculate(
            BigDecimal::from_str("0.125").unwrap(),
            &rate,
        )]
        .iter()
        .collect();

        let rounded = summary.rounded(&RoundingPolicy::default());
        assert_eq!(rounded.net_sales, BigDecimal::from_str("0.13").unwrap());
        assert_eq!(rounded.vat_amount, BigDecimal::from_str("0.02").unwrap());
        assert_eq!(rounded.gross_sales, BigDecimal::from_str("0.15").unwrap());
    }
}

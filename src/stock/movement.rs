//! Movement construction helpers

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::types::*;

/// Builder for stock movements
#[derive(Debug)]
pub struct MovementBuilder {
    movement: StockMovement,
}

impl MovementBuilder {
    /// Start a movement with no quantity
    pub fn new(
        product_id: String,
        date: NaiveDate,
        reference_type: ReferenceType,
        reference_id: String,
    ) -> Self {
        Self {
            movement: StockMovement::new(
                product_id,
                date,
                reference_type,
                reference_id,
                BigDecimal::from(0),
                BigDecimal::from(0),
            ),
        }
    }

    /// Quantity received
    pub fn quantity_in(mut self, quantity: BigDecimal) -> Self {
        self.movement.quantity_in = quantity;
        self
    }

    /// Quantity issued
    pub fn quantity_out(mut self, quantity: BigDecimal) -> Self {
        self.movement.quantity_out = quantity;
        self
    }

    /// Signed quantity: positive moves in, negative moves out
    pub fn delta(self, delta: BigDecimal) -> Self {
        if delta < BigDecimal::from(0) {
            self.quantity_out(delta.abs())
        } else {
            self.quantity_in(delta)
        }
    }

    pub fn unit_cost(mut self, unit_cost: BigDecimal) -> Self {
        self.movement.unit_cost = Some(unit_cost);
        self
    }

    pub fn reason(mut self, reason: String) -> Self {
        self.movement.reason = Some(reason);
        self
    }

    /// Build the movement
    pub fn build(self) -> EngineResult<StockMovement> {
        self.movement.validate()?;
        Ok(self.movement)
    }
}

/// Common movement patterns
pub mod patterns {
    use super::*;

    /// Stock on hand when the ledger is started
    pub fn opening_stock(
        product_id: String,
        date: NaiveDate,
        quantity: BigDecimal,
        unit_cost: Option<BigDecimal>,
    ) -> EngineResult<StockMovement> {
        let builder = MovementBuilder::new(
            product_id,
            date,
            ReferenceType::Opening,
            "opening".to_string(),
        )
        .quantity_in(quantity);

        match unit_cost {
            Some(cost) => builder.unit_cost(cost).build(),
            None => builder.build(),
        }
    }

    /// Goods received against a customs bill of entry
    pub fn import_receipt(
        product_id: String,
        date: NaiveDate,
        bill_of_entry: String,
        quantity: BigDecimal,
        unit_cost: BigDecimal,
    ) -> EngineResult<StockMovement> {
        MovementBuilder::new(product_id, date, ReferenceType::Import, bill_of_entry)
            .quantity_in(quantity)
            .unit_cost(unit_cost)
            .build()
    }

    /// Correction of an erroneous balance
    pub fn adjustment(
        product_id: String,
        date: NaiveDate,
        reference_id: String,
        delta: BigDecimal,
        reason: String,
    ) -> EngineResult<StockMovement> {
        MovementBuilder::new(product_id, date, ReferenceType::Adjust, reference_id)
            .delta(delta)
            .reason(reason)
            .build()
    }

    /// One SALE movement per invoice line
    pub fn sale_issues(sale: &SaleFact) -> EngineResult<Vec<StockMovement>> {
        sale.lines
            .iter()
            .map(|line| {
                MovementBuilder::new(
                    line.product_id.clone(),
                    sale.date,
                    ReferenceType::Sale,
                    sale.sale_id.clone(),
                )
                .quantity_out(line.quantity.clone())
                .build()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 10).unwrap()
    }

    #[test]
    fn test_negative_adjustment_moves_out() {
        let movement = patterns::adjustment(
            "p1".to_string(),
            date(),
            "count-7".to_string(),
            BigDecimal::from(-3),
            "damaged in transit".to_string(),
        )
        .unwrap();

        assert_eq!(movement.quantity_in, BigDecimal::from(0));
        assert_eq!(movement.quantity_out, BigDecimal::from(3));
        assert_eq!(movement.net_quantity(), BigDecimal::from(-3));
    }

    #[test]
    fn test_adjustment_without_reason_fails() {
        let result = MovementBuilder::new(
            "p1".to_string(),
            date(),
            ReferenceType::Adjust,
            "count-8".to_string(),
        )
        .delta(BigDecimal::from(2))
        .build();

        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_sale_issues_one_per_line() {
        let sale = SaleFact::new(
            "inv-9".to_string(),
            date(),
            AmountType::Exclusive,
            BigDecimal::from(500),
            vec![
                SaleLine::new("p1".to_string(), BigDecimal::from(2), BigDecimal::from(100)),
                SaleLine::new("p2".to_string(), BigDecimal::from(3), BigDecimal::from(100)),
            ],
        );

        let movements = patterns::sale_issues(&sale).unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements
            .iter()
            .all(|m| m.reference_type == ReferenceType::Sale && m.reference_id == "inv-9"));
        assert_eq!(movements[1].quantity_out, BigDecimal::from(3));
    }
}

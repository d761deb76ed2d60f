//! Validation utilities

use crate::traits::*;
use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that an amount is positive; `what` names the amount in the error
pub fn validate_positive_amount(amount: &BigDecimal, what: &str) -> EngineResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(EngineError::Validation(format!(
            "{what} must be positive, got {amount}"
        )))
    } else {
        Ok(())
    }
}

/// Validate that a product ID is valid
pub fn validate_product_id(product_id: &str) -> EngineResult<()> {
    if product_id.trim().is_empty() {
        return Err(EngineError::Validation(
            "Product ID cannot be empty".to_string(),
        ));
    }

    if product_id.len() > 50 {
        return Err(EngineError::Validation(
            "Product ID cannot exceed 50 characters".to_string(),
        ));
    }

    // Alphanumeric, dashes, underscores
    if !product_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::Validation(
            "Product ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that a product name is valid
pub fn validate_product_name(name: &str) -> EngineResult<()> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(
            "Product name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(EngineError::Validation(
            "Product name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate the justification attached to an administrative action
pub fn validate_reason(reason: &str) -> EngineResult<()> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation(
            "A reason is required for this action".to_string(),
        ));
    }

    if reason.len() > 500 {
        return Err(EngineError::Validation(
            "Reason cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Enhanced movement validator with detailed checks
pub struct EnhancedMovementValidator;

impl MovementValidator for EnhancedMovementValidator {
    fn validate_movement(&self, movement: &StockMovement) -> EngineResult<()> {
        movement.validate()?;
        validate_product_id(&movement.product_id)?;

        if movement.reference_id.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "Movement {} must reference its originating document",
                movement.id
            )));
        }

        if let Some(cost) = &movement.unit_cost {
            if *cost < BigDecimal::from(0) {
                return Err(EngineError::Validation(format!(
                    "Movement {} has a negative unit cost",
                    movement.id
                )));
            }
        }

        // Imports are valued at landed cost
        if movement.reference_type == ReferenceType::Import && movement.unit_cost.is_none() {
            return Err(EngineError::Validation(format!(
                "Import movement {} must carry a unit cost",
                movement.id
            )));
        }

        Ok(())
    }
}

/// Enhanced sale validator: lines must add up to the invoice total
pub struct EnhancedSaleValidator;

impl SaleValidator for EnhancedSaleValidator {
    fn validate_sale(&self, sale: &SaleFact) -> EngineResult<()> {
        sale.validate()?;

        if sale.lines.is_empty() {
            return Err(EngineError::Validation(format!(
                "Sale {} has no lines",
                sale.sale_id
            )));
        }

        let lines_total: BigDecimal = sale
            .lines
            .iter()
            .map(|line| &line.quantity * &line.unit_price)
            .sum();
        let tolerance = BigDecimal::from(1) / BigDecimal::from(100);
        if (&lines_total - &sale.total_value).abs() > tolerance {
            return Err(EngineError::Validation(format!(
                "Sale {} lines total {} but the invoice total is {}",
                sale.sale_id, lines_total, sale.total_value
            )));
        }

        // Same product twice on one invoice is a data-entry error
        let mut products = std::collections::HashSet::new();
        for line in &sale.lines {
            if !products.insert(&line.product_id) {
                return Err(EngineError::Validation(format!(
                    "Product '{}' appears more than once in sale {}",
                    line.product_id, sale.sale_id
                )));
            }
        }

        Ok(())
    }
}

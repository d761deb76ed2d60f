//! Core types and data structures for the stock ledger and VAT settlement engine

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar month used as the VAT settlement unit.
///
/// Ordering is chronological: `(year, month)` compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    /// Calendar year
    pub year: i32,
    /// Calendar month, 1 through 12
    pub month: u32,
}

impl Period {
    /// Create a period, rejecting months outside 1..=12
    pub fn new(year: i32, month: u32) -> EngineResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::Validation(format!(
                "Invalid period {year}-{month}: month must be between 1 and 12"
            )));
        }
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(EngineError::Validation(format!(
                "Invalid period {year}-{month}: year out of range"
            )));
        }
        Ok(Self { year, month })
    }

    /// The period a date falls in
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of the period
    pub fn start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the period
    pub fn end(&self) -> NaiveDate {
        self.next()
            .start()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    /// Whether the date falls inside `[start, end]`
    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::of(date) == *self
    }

    /// The period immediately before this one
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The period immediately after this one
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for Period {
    type Error = EngineError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        Period::new(raw.year, raw.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A stocked product known to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Unique identifier for the product
    pub id: String,
    /// Human-readable product name
    pub name: String,
    /// Materialized on-hand quantity; the movement log is authoritative
    pub on_hand: BigDecimal,
    /// When the product was registered
    pub created_at: NaiveDateTime,
    /// When the cached quantity last changed
    pub updated_at: NaiveDateTime,
}

impl Product {
    /// Create a new product with no stock
    pub fn new(id: String, name: String) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id,
            name,
            on_hand: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a movement into the cached on-hand figure
    pub fn apply_movement(&mut self, movement: &StockMovement) {
        self.on_hand += movement.net_quantity();
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Origin of a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// Stock present when the ledger was started
    Opening,
    /// Goods cleared through customs
    Import,
    /// Goods sold on an invoice
    Sale,
    /// Administrative correction; must carry a reason
    Adjust,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReferenceType::Opening => "OPENING",
            ReferenceType::Import => "IMPORT",
            ReferenceType::Sale => "SALE",
            ReferenceType::Adjust => "ADJUST",
        };
        f.write_str(label)
    }
}

/// Immutable inventory movement. Corrections are new `Adjust` movements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Unique identifier for the movement
    pub id: String,
    /// Insertion order assigned by storage; zero until persisted
    pub sequence: u64,
    /// Product being moved
    pub product_id: String,
    /// Business date of the movement
    pub date: NaiveDate,
    /// What produced this movement
    pub reference_type: ReferenceType,
    /// Identifier of the originating document (sale id, bill of entry, ...)
    pub reference_id: String,
    /// Quantity received
    pub quantity_in: BigDecimal,
    /// Quantity issued
    pub quantity_out: BigDecimal,
    /// Landed or opening unit cost, when known
    pub unit_cost: Option<BigDecimal>,
    /// Why the movement was made; mandatory for adjustments
    pub reason: Option<String>,
    /// When the movement was recorded
    pub created_at: NaiveDateTime,
}

impl StockMovement {
    /// Create a new movement
    pub fn new(
        product_id: String,
        date: NaiveDate,
        reference_type: ReferenceType,
        reference_id: String,
        quantity_in: BigDecimal,
        quantity_out: BigDecimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sequence: 0,
            product_id,
            date,
            reference_type,
            reference_id,
            quantity_in,
            quantity_out,
            unit_cost: None,
            reason: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Signed effect on on-hand: `quantity_in - quantity_out`
    pub fn net_quantity(&self) -> BigDecimal {
        &self.quantity_in - &self.quantity_out
    }

    /// Period the movement is dated in
    pub fn period(&self) -> Period {
        Period::of(self.date)
    }

    /// Validate quantities and the reason requirement for adjustments
    pub fn validate(&self) -> EngineResult<()> {
        let zero = BigDecimal::from(0);

        if self.product_id.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "Movement {} has an empty product id",
                self.id
            )));
        }

        if self.quantity_in < zero || self.quantity_out < zero {
            return Err(EngineError::Validation(format!(
                "Movement {} for product '{}' has a negative quantity: in = {}, out = {}",
                self.id, self.product_id, self.quantity_in, self.quantity_out
            )));
        }

        if self.quantity_in > zero && self.quantity_out > zero {
            return Err(EngineError::Validation(format!(
                "Movement {} for product '{}' moves stock both in and out",
                self.id, self.product_id
            )));
        }

        if self.reference_type == ReferenceType::Adjust
            && self.reason.as_deref().is_none_or(|r| r.trim().is_empty())
        {
            return Err(EngineError::Validation(format!(
                "Adjustment {} for product '{}' must reference a reason",
                self.id, self.product_id
            )));
        }

        Ok(())
    }
}

/// Whether a sale's total already contains VAT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmountType {
    /// Total includes VAT
    Inclusive,
    /// Total excludes VAT; VAT is charged on top
    Exclusive,
}

/// One invoiced product line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: String,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
}

impl SaleLine {
    pub fn new(product_id: String, quantity: BigDecimal, unit_price: BigDecimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// A sale supplied by the sales recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleFact {
    /// Unique invoice identifier
    pub sale_id: String,
    /// Invoice date
    pub date: NaiveDate,
    /// Whether `total_value` includes VAT
    pub amount_type: AmountType,
    /// Invoice total as billed
    pub total_value: BigDecimal,
    /// Product lines; each becomes a SALE stock movement
    pub lines: Vec<SaleLine>,
}

impl SaleFact {
    /// Create a new sale fact
    pub fn new(
        sale_id: String,
        date: NaiveDate,
        amount_type: AmountType,
        total_value: BigDecimal,
        lines: Vec<SaleLine>,
    ) -> Self {
        Self {
            sale_id,
            date,
            amount_type,
            total_value,
            lines,
        }
    }

    /// Build a sale from a raw textual total, as captured by an invoice form
    pub fn from_raw(
        sale_id: String,
        date: NaiveDate,
        amount_type: AmountType,
        total_value: &str,
        lines: Vec<SaleLine>,
    ) -> EngineResult<Self> {
        let total_value = BigDecimal::from_str(total_value.trim()).map_err(|_| {
            EngineError::Validation(format!(
                "Sale {sale_id} has a non-numeric total value '{total_value}'"
            ))
        })?;
        Ok(Self::new(sale_id, date, amount_type, total_value, lines))
    }

    /// Period the sale is dated in
    pub fn period(&self) -> Period {
        Period::of(self.date)
    }

    /// Validate the sale before it is recorded or counted
    pub fn validate(&self) -> EngineResult<()> {
        let zero = BigDecimal::from(0);

        if self.sale_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "Sale id cannot be empty".to_string(),
            ));
        }

        if self.total_value < zero {
            return Err(EngineError::Validation(format!(
                "Sale {} has a negative total value {}",
                self.sale_id, self.total_value
            )));
        }

        for line in &self.lines {
            if line.product_id.trim().is_empty() {
                return Err(EngineError::Validation(format!(
                    "Sale {} has a line with an empty product id",
                    self.sale_id
                )));
            }
            if line.quantity <= zero {
                return Err(EngineError::Validation(format!(
                    "Sale {} line for product '{}' must have a positive quantity",
                    self.sale_id, line.product_id
                )));
            }
            if line.unit_price < zero {
                return Err(EngineError::Validation(format!(
                    "Sale {} line for product '{}' has a negative unit price",
                    self.sale_id, line.product_id
                )));
            }
        }

        Ok(())
    }
}

/// Settlement state of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodStatus {
    /// No entry computed yet
    Open,
    /// Entry exists and may be recomputed
    Computed,
    /// Entry is frozen until explicitly unlocked
    Locked,
}

/// VAT settlement figures for one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VatPeriodEntry {
    /// Settled period
    pub period: Period,
    /// Sales normalized to VAT-inclusive terms
    pub gross_sales: BigDecimal,
    /// Sales excluding VAT
    pub net_sales_ex_vat: BigDecimal,
    /// VAT due on the period's sales
    pub vat_payable: BigDecimal,
    /// Portion of the VAT covered by the carried-forward credit
    pub used_from_closing_balance: BigDecimal,
    /// Portion that must be deposited with the treasury
    pub treasury_needed: BigDecimal,
    /// Rate the figures were computed with
    pub vat_rate: BigDecimal,
    /// Number of sales counted
    pub sales_counted: usize,
    /// Whether the entry is frozen
    pub locked: bool,
    /// When the figures were last computed
    pub computed_at: NaiveDateTime,
}

impl VatPeriodEntry {
    /// Settlement state implied by this entry
    pub fn status(&self) -> PeriodStatus {
        if self.locked {
            PeriodStatus::Locked
        } else {
            PeriodStatus::Computed
        }
    }
}

/// Period-end position of the carried-forward credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingBalanceSnapshot {
    /// Period the snapshot closes
    pub period: Period,
    /// Credit available at the start of the period
    pub opening: BigDecimal,
    /// Credit consumed by the period's VAT
    pub used: BigDecimal,
    /// Sum of administrative adjustments booked to the period
    pub adjustments: BigDecimal,
    /// Credit carried into the next period
    pub balance: BigDecimal,
    /// When the snapshot was last written
    pub recorded_at: NaiveDateTime,
}

impl ClosingBalanceSnapshot {
    pub fn new(
        period: Period,
        opening: BigDecimal,
        used: BigDecimal,
        adjustments: BigDecimal,
    ) -> Self {
        let balance = &opening - &used + &adjustments;
        Self {
            period,
            opening,
            used,
            adjustments,
            balance,
            recorded_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Credit held when the system was initialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningBalance {
    pub amount: BigDecimal,
    pub seeded_at: NaiveDateTime,
}

/// Manual top-up or correction of the carried-forward credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    /// Unique identifier for the adjustment
    pub id: String,
    /// Period the adjustment is booked to
    pub period: Period,
    /// Signed change in credit
    pub delta: BigDecimal,
    /// Mandatory justification
    pub reason: String,
    /// When the adjustment was made
    pub created_at: NaiveDateTime,
}

impl BalanceAdjustment {
    pub fn new(period: Period, delta: BigDecimal, reason: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            period,
            delta,
            reason,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Administrative action recorded against a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    OpeningBalanceSeeded,
    PeriodLocked,
    PeriodUnlocked,
    BalanceAdjusted,
}

/// Audit trail row for administrative actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAuditEvent {
    pub id: String,
    pub period: Option<Period>,
    pub action: AuditAction,
    pub reason: Option<String>,
    pub at: NaiveDateTime,
}

impl PeriodAuditEvent {
    pub fn new(period: Option<Period>, action: AuditAction, reason: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            period,
            action,
            reason,
            at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// A deposit made to the government treasury
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryChallan {
    /// Token number printed on the challan
    pub token_no: String,
    /// Deposit date
    pub date: NaiveDate,
    /// Amount deposited in BDT
    pub amount_bdt: BigDecimal,
    /// VAT period the deposit funds
    pub period: Period,
    /// Receiving bank
    pub bank: String,
    /// Treasury account code credited
    pub account_code: String,
}

impl TreasuryChallan {
    pub fn new(
        token_no: String,
        date: NaiveDate,
        amount_bdt: BigDecimal,
        period: Period,
        bank: String,
        account_code: String,
    ) -> Self {
        Self {
            token_no,
            date,
            amount_bdt,
            period,
            bank,
            account_code,
        }
    }

    /// Validate the challan before it is recorded
    pub fn validate(&self) -> EngineResult<()> {
        if self.token_no.trim().is_empty() {
            return Err(EngineError::Validation(
                "Challan token number cannot be empty".to_string(),
            ));
        }

        crate::utils::validation::validate_positive_amount(
            &self.amount_bdt,
            &format!("Challan {} amount", self.token_no),
        )
    }
}

/// A record rejected during batch ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub record_id: String,
    pub reason: String,
}

impl SkippedRecord {
    pub fn new(record_id: impl Into<String>, error: &EngineError) -> Self {
        Self {
            record_id: record_id.into(),
            reason: error.to_string(),
        }
    }
}

/// Outcome of a batch ingestion: what was stored and what was skipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport<T> {
    pub accepted: Vec<T>,
    pub skipped: Vec<SkippedRecord>,
}

impl<T> Default for IngestReport<T> {
    fn default() -> Self {
        Self {
            accepted: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> IngestReport<T> {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Errors that can occur in the engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Period {period} is locked: cannot {action}")]
    PeriodLocked { period: Period, action: String },
    #[error("Lock contention: {0}")]
    Contention(String),
    #[error("Consistency error: {0}")]
    Consistency(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller may retry the same operation after backing off
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Contention(_))
    }
}

impl From<::config::ConfigError> for EngineError {
    fn from(value: ::config::ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_period_boundaries() {
        let feb = Period::new(2024, 2).unwrap();
        assert_eq!(feb.start(), date(2024, 2, 1));
        assert_eq!(feb.end(), date(2024, 2, 29));
        assert!(feb.contains(date(2024, 2, 29)));
        assert!(!feb.contains(date(2024, 3, 1)));

        let dec = Period::new(2023, 12).unwrap();
        assert_eq!(dec.end(), date(2023, 12, 31));
        assert_eq!(dec.next(), Period::new(2024, 1).unwrap());
        assert_eq!(Period::new(2024, 1).unwrap().previous(), dec);
        assert!(dec < feb);
        assert_eq!(feb.to_string(), "2024-02");
    }

    #[test]
    fn test_period_rejects_bad_month() {
        assert!(matches!(
            Period::new(2024, 13),
            Err(EngineError::Validation(_))
        ));
        assert!(Period::new(2024, 0).is_err());
    }

    #[test]
    fn test_period_deserialization_is_checked() {
        let period: Period = serde_json::from_str(r#"{"year":2024,"month":2}"#).unwrap();
        assert_eq!(period, Period::new(2024, 2).unwrap());

        let bad = serde_json::from_str::<Period>(r#"{"year":2024,"month":13}"#);
        assert!(bad.unwrap_err().to_string().contains("month must be between 1 and 12"));
    }

    #[test]
    fn test_movement_validation() {
        let mut movement = StockMovement::new(
            "p1".to_string(),
            date(2024, 1, 1),
            ReferenceType::Import,
            "boe-1".to_string(),
            BigDecimal::from(10),
            BigDecimal::from(0),
        );
        assert!(movement.validate().is_ok());
        assert_eq!(movement.net_quantity(), BigDecimal::from(10));

        movement.quantity_out = BigDecimal::from(-1);
        assert!(movement.validate().is_err());

        movement.quantity_out = BigDecimal::from(2);
        assert!(movement.validate().is_err());
    }

    #[test]
    fn test_adjustment_requires_reason() {
        let mut adjust = StockMovement::new(
            "p1".to_string(),
            date(2024, 1, 1),
            ReferenceType::Adjust,
            "adj-1".to_string(),
            BigDecimal::from(5),
            BigDecimal::from(0),
        );
        assert!(adjust.validate().is_err());

        adjust.reason = Some("   ".to_string());
        assert!(adjust.validate().is_err());

        adjust.reason = Some("stock count".to_string());
        assert!(adjust.validate().is_ok());
    }

    #[test]
    fn test_sale_from_raw_rejects_non_numeric_total() {
        let result = SaleFact::from_raw(
            "inv-1".to_string(),
            date(2024, 1, 5),
            AmountType::Inclusive,
            "12a.00",
            vec![],
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));

        let sale = SaleFact::from_raw(
            "inv-2".to_string(),
            date(2024, 1, 5),
            AmountType::Inclusive,
            " 115000.00 ",
            vec![],
        )
        .unwrap();
        assert_eq!(sale.total_value, BigDecimal::from(115000));
    }

    #[test]
    fn test_snapshot_balance() {
        let snapshot = ClosingBalanceSnapshot::new(
            Period::new(2024, 1).unwrap(),
            BigDecimal::from(1000),
            BigDecimal::from(300),
            BigDecimal::from(50),
        );
        assert_eq!(snapshot.balance, BigDecimal::from(750));
    }

    #[test]
    fn test_serialized_reference_type() {
        let json = serde_json::to_string(&ReferenceType::Adjust).unwrap();
        assert_eq!(json, "\"ADJUST\"");
        let parsed: AmountType = serde_json::from_str("\"INCLUSIVE\"").unwrap();
        assert_eq!(parsed, AmountType::Inclusive);
    }
}

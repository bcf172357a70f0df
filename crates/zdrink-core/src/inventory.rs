//! # Inventory Ledger Types
//!
//! Every stock change is one append-only [`InventoryLog`] row.
//!
//! ```text
//! create_order  ──► Sale    (delta −qty, reference = order number)
//! cancel        ──► Return  (delta +qty, reference = order number)
//! restock       ──► Purchase
//! stock count   ──► Adjustment
//! spoilage      ──► Waste
//!
//! current stock == initial stock + Σ delta over every log row
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;

/// Why a SKU's stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum InventoryAction {
    Purchase,
    Sale,
    Adjustment,
    Return,
    Waste,
}

impl InventoryAction {
    /// Checks the sign of a delta against the action.
    ///
    /// Sale and waste only remove stock, purchase and return only add it,
    /// adjustment goes either way. A zero delta is never recorded.
    pub fn check_delta(&self, delta: i64) -> Result<(), ValidationError> {
        let ok = match self {
            InventoryAction::Sale | InventoryAction::Waste => delta < 0,
            InventoryAction::Purchase | InventoryAction::Return => delta > 0,
            InventoryAction::Adjustment => delta != 0,
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::inconsistent(
                "quantity_change",
                format!("{delta} is not a valid delta for {self:?}"),
            ))
        }
    }
}

/// One stock movement. Rows are inserted once and never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryLog {
    pub id: String,
    pub shop_id: String,
    pub sku_id: String,
    pub action: InventoryAction,
    pub quantity_change: i64,
    /// Stock right after this change was applied.
    pub quantity_after: i64,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    pub actor: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

//! # Repository Module
//!
//! Database repositories and transactional engines for ZDrink.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Caller (HTTP handler, job, test)                                      │
//! │       │                                                                 │
//! │       │  db.orders().cancel(&shop_id, &order_id, notes, actor)         │
//! │       ▼                                                                 │
//! │  OrderRepository                                                       │
//! │  ├── begin_write()      ← one SQLite transaction, write lock up front  │
//! │  ├── crate-private helpers taking &mut SqliteConnection                │
//! │  │   (inventory::apply_delta, membership::earn_in, ...)                │
//! │  └── commit()           ← all rows or none                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Helpers that take a connection never begin or commit. They run inside the
//! caller's transaction so several engines can contribute rows to one atomic
//! unit (order completion + points award, payment callback + order cascade).
//!
//! ## Available Repositories
//!
//! - [`ShopRepository`](shop::ShopRepository) - Shops and payment methods
//! - [`CatalogRepository`](catalog::CatalogRepository) - Products, SKUs, options
//! - [`InventoryRepository`](inventory::InventoryRepository) - Stock ledger
//! - [`CartRepository`](cart::CartRepository) - Carts
//! - [`OrderRepository`](order::OrderRepository) - Order engine
//! - [`PaymentRepository`](payment::PaymentRepository) - Transactions, refunds
//! - [`CouponRepository`](coupon::CouponRepository) - Coupon engine
//! - [`MembershipRepository`](membership::MembershipRepository) - Points engine

use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::error::DbResult;

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod inventory;
pub mod membership;
pub mod order;
pub mod payment;
pub mod shop;

/// Begins a transaction that already holds the SQLite write lock.
///
/// A deferred SQLite transaction only upgrades to a writer on its first
/// write. If another connection committed in between, that upgrade fails
/// immediately with SQLITE_BUSY instead of waiting on `busy_timeout`. The
/// no-op UPDATE takes the lock before any read, so every read that follows
/// sees the state the writes will be applied to.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE shops SET id = id WHERE 0")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// New row id.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

//! # zdrink-db: Storage Layer and Engines for ZDrink
//!
//! SQLite storage and the transactional engines of the ordering backend:
//! orders, payment reconciliation, coupons and membership points. Pure rules
//! live in `zdrink-core`; this crate decides what is written, and in which
//! transaction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ZDrink Data Flow                                 │
//! │                                                                         │
//! │  HTTP handler / job / test                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     zdrink-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories  │   │   Payment    │   │   │
//! │  │   │   (pool.rs)   │    │  order, cart,  │   │   service +  │   │   │
//! │  │   │               │◄───│  coupon,       │◄──│   providers  │   │   │
//! │  │   │ SqlitePool    │    │  membership,   │   │ (payment/)   │   │   │
//! │  │   │ Migrations    │    │  inventory ... │   │              │   │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool and engine accessors
//! - [`config`] - Service configuration (TOML + environment)
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repositories and transactional engines
//! - [`payment`] - Payment reconciliation and providers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zdrink_db::{Database, DbConfig, ProviderRegistry};
//!
//! let db = Database::new(DbConfig::new("./data/zdrink.db")).await?;
//! let order = db.orders().create_order(&shop_id, &request, Some("cashier-1")).await?;
//! let payments = db.payments(ProviderRegistry::builtin());
//! payments.create_payment(&shop_id, &order.id, PaymentMethodCode::Cash, None).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod payment;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, EngineSettings, ServiceConfig};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use payment::{
    CallbackRequest, GatewayClient, GatewayProvider, PaymentProvider, PaymentService, ProviderError,
    ProviderRegistry, RefundReceipt,
};

// Repository re-exports for convenience
pub use repository::cart::{AddCartItem, CartRepository};
pub use repository::catalog::CatalogRepository;
pub use repository::coupon::CouponRepository;
pub use repository::inventory::{InventoryRepository, StockMovement};
pub use repository::membership::MembershipRepository;
pub use repository::order::OrderRepository;
pub use repository::payment::PaymentRepository;
pub use repository::shop::ShopRepository;

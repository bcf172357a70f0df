//! # Database Handle
//!
//! Opens the SQLite pool the engines share and hands out repositories.
//!
//! ```text
//!  DbConfig / ServiceConfig
//!        │
//!        ▼
//!  Database::with_settings ── WAL, foreign keys, busy_timeout ── migrations
//!        │
//!        ├── shops() catalog() inventory() carts()
//!        ├── orders() coupons() members()            (engines)
//!        └── payments(registry)                      (reconciliation)
//! ```
//!
//! Every engine write begins with a write lock, so concurrent handlers queue
//! on `busy_timeout` instead of interleaving read-modify-write cycles. WAL
//! keeps readers off that queue.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{EngineSettings, ServiceConfig};
use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::payment::{PaymentService, ProviderRegistry};
use crate::repository::cart::CartRepository;
use crate::repository::catalog::CatalogRepository;
use crate::repository::coupon::CouponRepository;
use crate::repository::inventory::InventoryRepository;
use crate::repository::membership::MembershipRepository;
use crate::repository::order::OrderRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::shop::ShopRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the database lives and how the pool behaves.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/zdrink/zdrink.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,
    /// Pool ceiling. Default 5.
    pub max_connections: u32,
    /// Connections kept open while idle. Default 1.
    pub min_connections: u32,
    /// Wait for a free pooled connection. Default 30s.
    pub connect_timeout: Duration,
    /// Wait for the SQLite write lock before failing with
    /// [`DbError::Busy`]. Default 5s.
    pub busy_timeout: Duration,
    pub run_migrations: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// A private in-memory database, dropped with the pool.
    ///
    /// Limited to one connection: each SQLite connection to `:memory:` opens
    /// its own empty database.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
            ..DbConfig::new(MEMORY)
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.path)
                .create_if_missing(true)
        };
        Ok(options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

const MEMORY: &str = ":memory:";

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the pool and the engine settings. Clones share both.
///
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./zdrink.db")).await?;
/// let order = db.orders().create_order(&shop_id, &request, Some("cashier-7")).await?;
/// let payments = db.payments(ProviderRegistry::builtin());
/// payments.create_payment(&shop_id, &order.id, PaymentMethodCode::Cash, None).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    settings: Arc<EngineSettings>,
}

impl Database {
    /// Opens the database with default engine settings.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        Self::with_settings(config, EngineSettings::default()).await
    }

    pub async fn from_service_config(config: &ServiceConfig) -> DbResult<Self> {
        Self::with_settings(config.db_config(), config.engine_settings()).await
    }

    /// Opens the pool, then applies pending migrations unless disabled.
    pub async fn with_settings(config: DbConfig, settings: EngineSettings) -> DbResult<Self> {
        debug!(path = %config.path.display(), "Opening database");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let db = Database {
            pool,
            settings: Arc::new(settings),
        };
        if config.run_migrations {
            db.run_migrations().await?;
        }

        info!(
            path = %config.path.display(),
            max_connections = config.max_connections,
            provider_timeout_ms = db.settings.provider_timeout.as_millis() as u64,
            "Database ready"
        );
        Ok(db)
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// The raw pool, for diagnostics and ad-hoc reads. Writes belong in a
    /// repository so they run inside the right transaction.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Shops and their payment method configuration.
    pub fn shops(&self) -> ShopRepository {
        ShopRepository::new(self.pool.clone())
    }

    /// Products, SKUs and attribute options.
    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    /// Stock adjustments and the inventory ledger.
    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository::new(self.pool.clone())
    }

    pub fn carts(&self) -> CartRepository {
        CartRepository::new(self.pool.clone())
    }

    /// The order engine.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let order = db.orders().cancel(&shop_id, &order_id, Some("customer left"), Some("staff-2")).await?;
    /// ```
    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone(), self.settings.clone())
    }

    /// Coupon definitions and claims.
    pub fn coupons(&self) -> CouponRepository {
        CouponRepository::new(self.pool.clone())
    }

    /// Members, tiers, points and stored value.
    pub fn members(&self) -> MembershipRepository {
        MembershipRepository::new(self.pool.clone(), self.settings.clone())
    }

    /// Read access to payment transactions and refund requests.
    pub fn payment_records(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Payment reconciliation against the given providers.
    pub fn payments(&self, registry: ProviderRegistry) -> PaymentService {
        PaymentService::new(self.pool.clone(), self.settings.clone(), Arc::new(registry))
    }

    /// Waits for checked-out connections and closes the pool. Repositories
    /// created earlier fail afterwards.
    pub async fn close(&self) {
        debug!("Closing database pool");
        self.pool.close().await;
    }

    /// True when a trivial query round-trips.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[test]
    fn test_builder_and_memory_detection() {
        let config = DbConfig::new("/tmp/zdrink.db")
            .max_connections(10)
            .busy_timeout(Duration::from_millis(250));
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.is_in_memory());

        let memory = DbConfig::in_memory();
        assert!(memory.is_in_memory());
        assert_eq!(memory.max_connections, 1);
    }

    #[tokio::test]
    async fn test_service_config_settings_reach_engines() {
        let mut service = ServiceConfig::default();
        service.orders.number_prefix = "ZD".into();
        let settings = service.engine_settings();

        let db = Database::with_settings(DbConfig::in_memory(), settings)
            .await
            .unwrap();
        assert_eq!(db.settings().order_number_prefix, "ZD");
    }
}

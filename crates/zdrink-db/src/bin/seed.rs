//! # Demo Shop Seeder
//!
//! Provisions one demo shop for development: a drinks menu with SKUs and
//! attribute options, payment methods, membership tiers, a points rule and
//! a welcome coupon.
//!
//! ## Usage
//! ```bash
//! cargo run -p zdrink-db --bin seed
//!
//! # Specify database path
//! cargo run -p zdrink-db --bin seed -- --db ./data/zdrink.db
//!
//! # Load settings from a config file
//! cargo run -p zdrink-db --bin seed -- --config ./zdrink.toml
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use zdrink_core::catalog::{Product, ProductAttributeOption, ProductSku};
use zdrink_core::coupon::{ApplyTo, CouponType, NewCoupon};
use zdrink_core::{Money, PaymentMethodCode, Rate};
use zdrink_db::repository::shop::new_shop;
use zdrink_db::{Database, ServiceConfig};

/// Menu: (name, base price in cents, [(size, price delta)], stock per SKU)
const MENU: &[(&str, i64, &[(&str, i64)], i64)] = &[
    ("Milk Tea", 1200, &[("M", 0), ("L", 300)], 200),
    ("Jasmine Green Tea", 1000, &[("M", 0), ("L", 300)], 200),
    ("Mango Smoothie", 1800, &[("M", 0), ("L", 400)], 80),
    ("Americano", 1500, &[("Hot", 0), ("Iced", 200)], 150),
    ("Egg Tart", 800, &[("Single", 0), ("Box of 4", 2200)], 40),
];

/// Options every drink offers: (attribute, value, extra cents)
const OPTIONS: &[(&str, &str, i64)] = &[
    ("sugar", "full", 0),
    ("sugar", "half", 0),
    ("sugar", "none", 0),
    ("topping", "pearls", 200),
    ("topping", "coconut jelly", 200),
];

/// (code, name, min points, discount bps)
const TIERS: &[(&str, &str, i64, i64)] = &[
    ("regular", "Regular", 0, 10_000),
    ("silver", "Silver", 1_000, 9_500),
    ("gold", "Gold", 5_000, 9_000),
];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,zdrink_db=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut db_path: Option<PathBuf> = None;
    let mut config_path = PathBuf::from("./zdrink.toml");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("ZDrink Demo Shop Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file path (overrides config)");
                println!("  -c, --config <PATH>    Config file (default: ./zdrink.toml)");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = ServiceConfig::load(Some(&config_path))?;
    if let Some(path) = db_path {
        config.database.path = path;
    }
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::from_service_config(&config).await?;
    info!(path = %config.database.path.display(), "Connected, migrations applied");

    let start = std::time::Instant::now();
    let shop = db.shops().insert(&new_shop("ZDrink Demo")).await?;
    info!(shop_id = %shop.id, "Shop created");

    let mut sku_count = 0;
    for (name, base_price, sizes, stock) in MENU {
        let now = Utc::now();
        let product = db
            .catalog()
            .insert_product(&Product {
                id: Uuid::new_v4().to_string(),
                shop_id: shop.id.clone(),
                category_id: Some("drinks".to_string()),
                name: name.to_string(),
                image: None,
                base_price: Money::from_cents(*base_price),
                is_active: true,
                created_at: now,
            })
            .await?;

        for (size, delta) in sizes.iter() {
            let mut specifications = BTreeMap::new();
            specifications.insert("size".to_string(), size.to_string());
            let sku_code = format!(
                "{}-{}",
                name.split_whitespace()
                    .filter_map(|w| w.chars().next())
                    .collect::<String>()
                    .to_uppercase(),
                size.replace(' ', "").to_uppercase()
            );
            db.catalog()
                .insert_sku(&ProductSku {
                    id: Uuid::new_v4().to_string(),
                    shop_id: shop.id.clone(),
                    product_id: product.id.clone(),
                    sku_code,
                    price: Money::from_cents(base_price + delta),
                    stock_quantity: *stock,
                    low_stock_threshold: 10,
                    specifications,
                    is_active: true,
                    created_at: now,
                })
                .await?;
            sku_count += 1;
        }

        for (attribute, value, extra) in OPTIONS {
            db.catalog()
                .insert_attribute_option(&ProductAttributeOption {
                    id: Uuid::new_v4().to_string(),
                    product_id: product.id.clone(),
                    attribute_name: attribute.to_string(),
                    value: value.to_string(),
                    additional_price: Money::from_cents(*extra),
                })
                .await?;
        }
    }
    info!(products = MENU.len(), skus = sku_count, "Menu created");

    for (sort_order, code) in PaymentMethodCode::ALL.into_iter().enumerate() {
        // Gateways need credentials before they can be switched on.
        let active = !matches!(code, PaymentMethodCode::Wechat | PaymentMethodCode::Alipay);
        let name = match code {
            PaymentMethodCode::Wechat => "WeChat Pay",
            PaymentMethodCode::Alipay => "Alipay",
            PaymentMethodCode::Cash => "Cash",
            PaymentMethodCode::Balance => "Stored Value",
            PaymentMethodCode::Points => "Points",
        };
        db.shops()
            .set_payment_method(&shop.id, code, name, active, sort_order as i64)
            .await?;
    }

    let members = db.members();
    for (code, name, min_points, discount) in TIERS {
        members
            .upsert_tier(&shop.id, code, name, *min_points, Rate::from_bps(*discount), true)
            .await?;
    }
    members.set_points_rule(&shop.id, Rate::from_bps(1_000), true).await?;

    let now = Utc::now();
    let coupon = db
        .coupons()
        .create_coupon(
            &shop.id,
            &NewCoupon {
                code: "WELCOME10".to_string(),
                name: "Welcome ¥10 off".to_string(),
                coupon_type: CouponType::Fixed,
                value: 1_000,
                min_order_amount: Money::from_cents(3_000),
                max_discount: None,
                apply_to: ApplyTo::All,
                apply_to_ids: Vec::new(),
                total_quantity: 500,
                limit_per_user: 1,
                valid_from: now,
                valid_until: now + Duration::days(30),
            },
        )
        .await?;

    info!(
        shop_id = %shop.id,
        coupon = %coupon.code,
        elapsed = ?start.elapsed(),
        "Seed complete"
    );
    println!("{}", shop.id);

    Ok(())
}

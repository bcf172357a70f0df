//! Coupon claiming under contention and discount scoping.

mod common;

use std::path::PathBuf;

use chrono::{Duration, Utc};
use common::*;
use uuid::Uuid;
use zdrink_core::coupon::{ApplyTo, CouponLine, CouponType, NewCoupon, UserCouponStatus};
use zdrink_core::{CoreError, ErrorKind, Money};
use zdrink_db::repository::shop::new_shop;
use zdrink_db::{Database, DbConfig};

fn coupon(code: &str, coupon_type: CouponType, value: i64, total_quantity: i64) -> NewCoupon {
    let now = Utc::now();
    NewCoupon {
        code: code.to_string(),
        name: code.to_string(),
        coupon_type,
        value,
        min_order_amount: Money::zero(),
        max_discount: None,
        apply_to: ApplyTo::All,
        apply_to_ids: Vec::new(),
        total_quantity,
        limit_per_user: 1,
        valid_from: now - Duration::hours(1),
        valid_until: now + Duration::days(7),
    }
}

fn lines(items: &[(&str, Option<&str>)]) -> Vec<CouponLine> {
    items
        .iter()
        .map(|(product_id, category_id)| CouponLine {
            product_id: product_id.to_string(),
            category_id: category_id.map(str::to_string),
        })
        .collect()
}

/// A file-backed database so several connections can race.
struct FileDb {
    db: Database,
    path: PathBuf,
}

impl FileDb {
    async fn open() -> Self {
        let path = std::env::temp_dir().join(format!("zdrink-test-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(5)).await.unwrap();
        FileDb { db, path }
    }

    async fn close(self) {
        self.db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

#[tokio::test]
async fn test_claim_respects_per_user_limit() {
    let t = setup().await;
    let coupons = t.db.coupons();
    coupons
        .create_coupon(&t.shop_id, &coupon("SAVE10", CouponType::Fixed, 1000, 100))
        .await
        .unwrap();

    let claimed = coupons.claim_coupon(&t.shop_id, "SAVE10", "user-1").await.unwrap();
    assert_eq!(claimed.status, UserCouponStatus::Available);

    let err = coupons.claim_coupon(&t.shop_id, "SAVE10", "user-1").await.unwrap_err();
    assert!(matches!(
        err.as_domain(),
        Some(CoreError::ClaimLimitExceeded { limit: 1, .. })
    ));

    // another user is unaffected
    coupons.claim_coupon(&t.shop_id, "SAVE10", "user-2").await.unwrap();
    let stored = coupons.get_by_code(&t.shop_id, "SAVE10").await.unwrap().unwrap();
    assert_eq!(stored.used_quantity, 2);

    let err = coupons.claim_coupon(&t.shop_id, "NOPE", "user-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let held = coupons.available_coupons(&t.shop_id, "user-1").await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, claimed.id);
}

#[tokio::test]
async fn test_duplicate_code_rejected() {
    let t = setup().await;
    let coupons = t.db.coupons();
    coupons
        .create_coupon(&t.shop_id, &coupon("DUP", CouponType::Fixed, 500, 10))
        .await
        .unwrap();
    let err = coupons
        .create_coupon(&t.shop_id, &coupon("DUP", CouponType::Fixed, 800, 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_expired_and_future_coupons_unclaimable() {
    let t = setup().await;
    let coupons = t.db.coupons();
    let mut future = coupon("SOON", CouponType::Fixed, 500, 10);
    future.valid_from = Utc::now() + Duration::days(1);
    future.valid_until = Utc::now() + Duration::days(2);
    coupons.create_coupon(&t.shop_id, &future).await.unwrap();

    let err = coupons.claim_coupon(&t.shop_id, "SOON", "user-1").await.unwrap_err();
    assert!(matches!(err.as_domain(), Some(CoreError::CouponUnavailable { .. })));

    coupons
        .create_coupon(&t.shop_id, &coupon("LATER", CouponType::Fixed, 500, 10))
        .await
        .unwrap();
    let claimed = coupons.claim_coupon(&t.shop_id, "LATER", "user-1").await.unwrap();

    // nothing has lapsed yet
    assert_eq!(coupons.expire_coupons(&t.shop_id, Utc::now()).await.unwrap(), 0);
    let expired = coupons
        .expire_coupons(&t.shop_id, Utc::now() + Duration::days(8))
        .await
        .unwrap();
    assert_eq!(expired, 1);
    let stored = coupons.user_coupon(&t.shop_id, &claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, UserCouponStatus::Expired);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_coupon_claimed_once() {
    let file = FileDb::open().await;
    let shop = file.db.shops().insert(&new_shop("Rush Hour")).await.unwrap();
    file.db
        .coupons()
        .create_coupon(&shop.id, &coupon("LASTONE", CouponType::Fixed, 1000, 1))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..8 {
        let db = file.db.clone();
        let shop_id = shop.id.clone();
        handles.push(tokio::spawn(async move {
            db.coupons()
                .claim_coupon(&shop_id, "LASTONE", &format!("user-{n}"))
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(
                matches!(err.as_domain(), Some(CoreError::CouponUnavailable { .. })),
                "unexpected error: {err}"
            ),
        }
    }
    assert_eq!(winners, 1);

    let stored = file.db.coupons().get_by_code(&shop.id, "LASTONE").await.unwrap().unwrap();
    assert_eq!(stored.used_quantity, 1);
    file.close().await;
}

#[tokio::test]
async fn test_discount_scoping() {
    let t = setup().await;
    let coupons = t.db.coupons();

    let mut drinks = coupon("DRINKS20", CouponType::Percentage, 2_000, 50);
    drinks.apply_to = ApplyTo::Category;
    drinks.apply_to_ids = vec!["drinks".to_string()];
    drinks.max_discount = Some(Money::from_cents(500));
    coupons.create_coupon(&t.shop_id, &drinks).await.unwrap();

    let mut tart = coupon("TART3", CouponType::Fixed, 300, 50);
    tart.apply_to = ApplyTo::Product;
    tart.apply_to_ids = vec!["egg-tart".to_string()];
    tart.min_order_amount = Money::from_cents(1_000);
    coupons.create_coupon(&t.shop_id, &tart).await.unwrap();

    let tea = lines(&[("milk-tea", Some("drinks"))]);
    let snacks = lines(&[("egg-tart", Some("snacks"))]);

    // 20% of 2000, under the cap
    let discount = coupons
        .calculate_discount(&t.shop_id, "DRINKS20", Money::from_cents(2_000), &tea)
        .await
        .unwrap();
    assert_eq!(discount.cents(), 400);

    // 20% of 4000 capped at 500
    let discount = coupons
        .calculate_discount(&t.shop_id, "DRINKS20", Money::from_cents(4_000), &tea)
        .await
        .unwrap();
    assert_eq!(discount.cents(), 500);

    let discount = coupons
        .calculate_discount(&t.shop_id, "DRINKS20", Money::from_cents(2_000), &snacks)
        .await
        .unwrap();
    assert!(discount.is_zero());

    let discount = coupons
        .calculate_discount(&t.shop_id, "TART3", Money::from_cents(1_600), &snacks)
        .await
        .unwrap();
    assert_eq!(discount.cents(), 300);

    // below the minimum
    let discount = coupons
        .calculate_discount(&t.shop_id, "TART3", Money::from_cents(800), &snacks)
        .await
        .unwrap();
    assert!(discount.is_zero());

    let err = coupons
        .calculate_discount(&t.shop_id, "MISSING", Money::from_cents(800), &snacks)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

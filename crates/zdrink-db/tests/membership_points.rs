//! Points earned through the order lifecycle.

mod common;

use common::*;
use zdrink_core::membership::PointsKind;
use zdrink_core::{ErrorKind, Money, OrderStatus, Rate};

#[tokio::test]
async fn test_completion_awards_points_once() {
    let t = setup().await;
    let members = t.db.members();
    members.set_points_rule(&t.shop_id, Rate::FULL, true).await.unwrap();
    let (product, sku) = add_sku(&t, "Milk Tea", 1275, 50).await;

    let order = t
        .db
        .orders()
        .create_order(&t.shop_id, &dine_in(vec![line(&product, &sku, 2)], Some("user-1")), None)
        .await
        .unwrap();
    assert_eq!(order.total_amount.cents(), 2550);

    for status in [OrderStatus::Paid, OrderStatus::Confirmed, OrderStatus::Preparing] {
        t.db.orders()
            .update_status(&t.shop_id, &order.id, status, None, Some("barista"))
            .await
            .unwrap();
    }
    // nothing is earned before the order completes
    assert!(members.member(&t.shop_id, "user-1").await.unwrap().is_none());

    t.db.orders()
        .update_status(&t.shop_id, &order.id, OrderStatus::Completed, None, Some("barista"))
        .await
        .unwrap();

    let member = members.member(&t.shop_id, "user-1").await.unwrap().unwrap();
    assert_eq!(member.available_points, 25);
    assert_eq!(member.total_points, 25);
    assert_eq!(member.total_consumption.cents(), 2550);
    assert_eq!(member.consumption_count, 1);

    let history = members.points_history(&t.shop_id, "user-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, PointsKind::EarnOrder);
    assert_eq!(history[0].reference_id.as_deref(), Some(order.order_number.as_str()));

    // completed is terminal
    let err = t
        .db
        .orders()
        .update_status(&t.shop_id, &order.id, OrderStatus::Completed, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let member = members.member(&t.shop_id, "user-1").await.unwrap().unwrap();
    assert_eq!(member.available_points, 25);
}

#[tokio::test]
async fn test_completion_upgrades_tier() {
    let t = setup().await;
    let members = t.db.members();
    members.upsert_tier(&t.shop_id, "regular", "Regular", 0, Rate::FULL, true).await.unwrap();
    members
        .upsert_tier(&t.shop_id, "silver", "Silver", 100, Rate::from_bps(9_500), true)
        .await
        .unwrap();
    members.set_points_rule(&t.shop_id, Rate::FULL, true).await.unwrap();
    members
        .earn_points(&t.shop_id, "user-1", 90, PointsKind::Adjust, None, Some("migration"))
        .await
        .unwrap();
    let before = members.member(&t.shop_id, "user-1").await.unwrap().unwrap();
    assert_eq!(before.tier_code.as_deref(), Some("regular"));

    let (product, sku) = add_sku(&t, "Cheese Foam Tea", 2000, 10).await;
    let order = t
        .db
        .orders()
        .create_order(&t.shop_id, &dine_in(vec![line(&product, &sku, 1)], Some("user-1")), None)
        .await
        .unwrap();
    t.db.orders()
        .update_status(&t.shop_id, &order.id, OrderStatus::Completed, None, None)
        .await
        .unwrap();

    let after = members.member(&t.shop_id, "user-1").await.unwrap().unwrap();
    assert_eq!(after.total_points, 110);
    assert_eq!(after.tier_code.as_deref(), Some("silver"));
}

#[tokio::test]
async fn test_tier_discount_applies_at_checkout() {
    let t = setup().await;
    let members = t.db.members();
    members.upsert_tier(&t.shop_id, "regular", "Regular", 0, Rate::FULL, true).await.unwrap();
    members
        .upsert_tier(&t.shop_id, "silver", "Silver", 100, Rate::from_bps(9_500), true)
        .await
        .unwrap();
    members
        .earn_points(&t.shop_id, "user-1", 150, PointsKind::Adjust, None, None)
        .await
        .unwrap();
    let (product, sku) = add_sku(&t, "Brown Sugar Boba", 2000, 10).await;

    assert_eq!(
        members.member_discount(&t.shop_id, "user-1", Money::from_cents(2000)).await.unwrap().cents(),
        100
    );
    assert!(members
        .member_discount(&t.shop_id, "walk-in", Money::from_cents(2000))
        .await
        .unwrap()
        .is_zero());

    let order = t
        .db
        .orders()
        .create_order(&t.shop_id, &dine_in(vec![line(&product, &sku, 1)], Some("user-1")), None)
        .await
        .unwrap();
    assert_eq!(order.subtotal.cents(), 2000);
    assert_eq!(order.discount_amount.cents(), 100);
    assert_eq!(order.total_amount.cents(), 1900);
    assert!(order.totals().holds_invariant());

    let guest = t
        .db
        .orders()
        .create_order(&t.shop_id, &dine_in(vec![line(&product, &sku, 1)], Some("walk-in")), None)
        .await
        .unwrap();
    assert!(guest.discount_amount.is_zero());
}

#[tokio::test]
async fn test_inactive_rule_still_counts_consumption() {
    let t = setup().await;
    let members = t.db.members();
    members.set_points_rule(&t.shop_id, Rate::FULL, false).await.unwrap();
    let (product, sku) = add_sku(&t, "Americano", 1500, 10).await;

    let order = t
        .db
        .orders()
        .create_order(&t.shop_id, &dine_in(vec![line(&product, &sku, 1)], Some("user-1")), None)
        .await
        .unwrap();
    t.db.orders()
        .update_status(&t.shop_id, &order.id, OrderStatus::Completed, None, None)
        .await
        .unwrap();

    let member = members.member(&t.shop_id, "user-1").await.unwrap().unwrap();
    assert_eq!(member.available_points, 0);
    assert_eq!(member.consumption_count, 1);
    assert_eq!(member.total_consumption.cents(), 1500);
    assert!(members.points_history(&t.shop_id, "user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_anonymous_orders_earn_nothing() {
    let t = setup().await;
    t.db.members().set_points_rule(&t.shop_id, Rate::FULL, true).await.unwrap();
    let (product, sku) = add_sku(&t, "Egg Tart", 800, 10).await;

    let order = t
        .db
        .orders()
        .create_order(&t.shop_id, &dine_in(vec![line(&product, &sku, 3)], None), None)
        .await
        .unwrap();
    let completed = t
        .db
        .orders()
        .update_status(&t.shop_id, &order.id, OrderStatus::Completed, None, None)
        .await
        .unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.completed_at.is_some());
}

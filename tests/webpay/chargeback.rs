//! Tests for POST /webpay/chargeback: refunds and chargebacks reported by the
//! processor append reversal rows to the ledger.

use axum::http::StatusCode;
use rust_decimal::Decimal;

#[path = "../common/mod.rs"]
mod common;
use common::*;

use webpay_ledger::refunds::{RefundChange, enqueue_refund};

/// A confirmed purchase of a paid app for 0.99 USD.
fn setup_purchase(ctx: &TestContext) -> (Webapp, User, Contribution) {
    let conn = ctx.conn();
    let user = create_test_user(&conn, "buyer@example.com");
    let app = create_paid_app(&conn, "Paid App");
    let mut input = CreateContribution::pending(ProductRef::Webapp(app.id.clone()), "contrib-1".into());
    input.user_id = Some(user.id.clone());
    input.amount = Some(Decimal::new(99, 2));
    queries::create_contribution(&conn, &input).unwrap();
    let purchase = complete_purchase(&conn, "contrib-1", "T1");
    (app, user, purchase)
}

fn chargeback_notice(ctx: &TestContext, purchase: &Contribution, transaction_id: &str, reason: &str) -> String {
    let mut claims = notice_claims(&product_data_for(purchase), transaction_id, None);
    claims.response.as_mut().unwrap().reason = Some(reason.to_string());
    sign_notice(ctx.keys(), claims, now())
}

#[tokio::test]
async fn test_refund_notice_appends_refund_row() {
    let ctx = create_test_context();
    let (app, user, purchase) = setup_purchase(&ctx);

    let token = chargeback_notice(&ctx, &purchase, "T1", "refund");
    let (status, body) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "T1");

    let conn = ctx.conn();
    let refund = queries::get_reversal_for(&conn, &purchase.id)
        .unwrap()
        .expect("refund row");
    assert_eq!(refund.contrib_type, ContributionType::Refund);
    assert_ne!(refund.uuid, purchase.uuid);
    assert_eq!(refund.related_id.as_deref(), Some(purchase.id.as_str()));
    assert_eq!(refund.amount, Some(Decimal::new(-99, 2)));
    assert_eq!(refund.user_id.as_deref(), Some(user.id.as_str()));

    let history = queries::list_contributions_for_user(&conn, &user.id).unwrap();
    assert_eq!(history.len(), 2);

    // The purchase row itself is never rewritten
    let unchanged = get_contribution(&conn, &purchase.uuid);
    assert_eq!(unchanged.contrib_type, ContributionType::Purchase);

    let ownership = queries::get_app_purchase(&conn, &app.id, &user.id).unwrap().unwrap();
    assert_eq!(ownership.status, OwnershipStatus::Refunded);
    assert!(!queries::user_owns_app(&conn, &app.id, &user.id).unwrap());

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::RefundApproved);
    assert_eq!(sent[0].recipient.as_deref(), Some("buyer@example.com"));
}

#[tokio::test]
async fn test_reversal_notice_appends_chargeback_row() {
    let ctx = create_test_context();
    let (app, user, purchase) = setup_purchase(&ctx);

    let token = chargeback_notice(&ctx, &purchase, "T1", "reversal");
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;
    assert_eq!(status, StatusCode::OK);

    let conn = ctx.conn();
    let reversal = queries::get_reversal_for(&conn, &purchase.id).unwrap().unwrap();
    assert_eq!(reversal.contrib_type, ContributionType::Chargeback);

    let ownership = queries::get_app_purchase(&conn, &app.id, &user.id).unwrap().unwrap();
    assert_eq!(ownership.status, OwnershipStatus::Chargeback);

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::Chargeback);
    assert_eq!(sent[0].recipient.as_deref(), Some("support@example.com"));
    assert_eq!(sent[0].reason.as_deref(), Some("reversal"));
}

#[tokio::test]
async fn test_chargeback_redelivery_is_idempotent() {
    let ctx = create_test_context();
    let (_, _, purchase) = setup_purchase(&ctx);

    let token = chargeback_notice(&ctx, &purchase, "T1", "refund");
    let (first, _) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;
    let (second, body) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body, "T1");
    assert_eq!(count_rows(&ctx.conn(), "contributions"), 2);
    assert_eq!(ctx.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_second_reversal_of_other_kind_conflicts() {
    let ctx = create_test_context();
    let (_, _, purchase) = setup_purchase(&ctx);

    let refund = chargeback_notice(&ctx, &purchase, "T1", "refund");
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &refund).await;
    assert_eq!(status, StatusCode::OK);

    let reversal = chargeback_notice(&ctx, &purchase, "T1", "reversal");
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &reversal).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "contributions"), 2);
    let existing = queries::get_reversal_for(&conn, &purchase.id).unwrap().unwrap();
    assert_eq!(existing.contrib_type, ContributionType::Refund);
}

#[tokio::test]
async fn test_refund_notice_after_local_approval_records_transaction() {
    let ctx = create_test_context();
    let (_, _, purchase) = setup_purchase(&ctx);
    {
        let mut conn = ctx.conn();
        enqueue_refund(
            &mut conn,
            &*ctx.notifier,
            &purchase,
            RefundChange::new(RefundStatus::Approved, "dev"),
        )
        .unwrap();
    }

    let token = chargeback_notice(&ctx, &purchase, "R1", "refund");
    let (status, body) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "R1");

    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;
    assert_eq!(status, StatusCode::OK);

    let conn = ctx.conn();
    let reversal = queries::get_reversal_for(&conn, &purchase.id).unwrap().unwrap();
    assert_eq!(reversal.contrib_type, ContributionType::Refund);
    assert_eq!(reversal.transaction_id.as_deref(), Some("R1"));
    assert_eq!(count_rows(&conn, "contributions"), 2);
    assert_eq!(ctx.notifier.count(NotificationKind::RefundApproved), 1);

    let other = chargeback_notice(&ctx, &purchase, "R2", "refund");
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &other).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_chargeback_of_pending_contribution_is_illegal() {
    let ctx = create_test_context();
    let conn = ctx.conn();
    let app = create_paid_app(&conn, "Paid App");
    let pending = create_pending(&conn, ProductRef::Webapp(app.id), "contrib-1", None);
    drop(conn);

    let token = chargeback_notice(&ctx, &pending, "T1", "refund");
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(count_rows(&ctx.conn(), "contributions"), 1);
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_chargeback_for_unknown_contribution() {
    let ctx = create_test_context();
    let app = create_paid_app(&ctx.conn(), "Paid App");
    let product_data = ProductData {
        contrib_uuid: "missing".into(),
        product: ProductRef::Webapp(app.id),
        public_id: None,
        application_size: None,
        buyer_email: None,
    }
    .encode();

    let mut claims = notice_claims(&product_data, "T1", None);
    claims.response.as_mut().unwrap().reason = Some("refund".into());
    let token = sign_notice(ctx.keys(), claims, now());
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &token).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

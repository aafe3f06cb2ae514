//! Tests for POST /webpay/postback: applying purchase notices to the ledger.

use axum::http::StatusCode;
use rust_decimal::Decimal;

#[path = "../common/mod.rs"]
mod common;
use common::*;

/// A paid app, a known buyer and a pending purchase of the app by that buyer.
fn setup_app_purchase(ctx: &TestContext) -> (Webapp, User, Contribution) {
    let conn = ctx.conn();
    let user = create_test_user(&conn, "buyer@example.com");
    let app = create_paid_app(&conn, "Paid App");
    let pending = create_pending(
        &conn,
        ProductRef::Webapp(app.id.clone()),
        "contrib-1",
        Some(&user.id),
    );
    (app, user, pending)
}

#[tokio::test]
async fn test_postback_completes_purchase() {
    let ctx = create_test_context();
    let (app, user, pending) = setup_app_purchase(&ctx);

    let token = sign_notice(
        ctx.keys(),
        notice_claims(&product_data_for(&pending), "T1", Some(("10.99", "BRL"))),
        now(),
    );
    let (status, body) = post_notice(ctx.app(), "/webpay/postback", &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "T1");

    let conn = ctx.conn();
    let contribution = get_contribution(&conn, &pending.uuid);
    assert_eq!(contribution.contrib_type, ContributionType::Purchase);
    assert_eq!(contribution.transaction_id.as_deref(), Some("T1"));
    assert_eq!(contribution.amount, Some(Decimal::new(1099, 2)));
    assert_eq!(contribution.currency, "BRL");
    assert_eq!(contribution.user_id.as_deref(), Some(user.id.as_str()));
    assert!(queries::user_owns_app(&conn, &app.id, &user.id).unwrap());

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::PurchaseReceipt);
    assert_eq!(sent[0].recipient.as_deref(), Some("buyer@example.com"));
    assert_eq!(sent[0].transaction_id.as_deref(), Some("T1"));
}

#[tokio::test]
async fn test_postback_without_price_keeps_requested_amount() {
    let ctx = create_test_context();
    let (_, _, pending) = setup_app_purchase(&ctx);
    {
        let conn = ctx.conn();
        conn.execute(
            "UPDATE contributions SET amount = '0.99' WHERE uuid = ?1",
            [&pending.uuid],
        )
        .unwrap();
    }

    let token = sign_notice(
        ctx.keys(),
        notice_claims(&product_data_for(&pending), "T1", None),
        now(),
    );
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &token).await;
    assert_eq!(status, StatusCode::OK);

    let contribution = get_contribution(&ctx.conn(), &pending.uuid);
    assert_eq!(contribution.amount, Some(Decimal::new(99, 2)));
    assert_eq!(contribution.currency, "USD");
}

/// Redelivery of the same notice answers 200 again without a second receipt
/// or a second ownership row.
#[tokio::test]
async fn test_postback_redelivery_is_idempotent() {
    let ctx = create_test_context();
    let (_, _, pending) = setup_app_purchase(&ctx);

    let token = sign_notice(
        ctx.keys(),
        notice_claims(&product_data_for(&pending), "T1", Some(("0.99", "USD"))),
        now(),
    );

    let (first, first_body) = post_notice(ctx.app(), "/webpay/postback", &token).await;
    let (second, second_body) = post_notice(ctx.app(), "/webpay/postback", &token).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(first_body, "T1");
    assert_eq!(second_body, "T1");

    assert_eq!(ctx.notifier.count(NotificationKind::PurchaseReceipt), 1);
    let conn = ctx.conn();
    assert_eq!(count_rows(&conn, "contributions"), 1);
    assert_eq!(count_rows(&conn, "app_purchases"), 1);
}

#[tokio::test]
async fn test_postback_with_other_transaction_conflicts() {
    let ctx = create_test_context();
    let (_, _, pending) = setup_app_purchase(&ctx);
    let product_data = product_data_for(&pending);

    let first = sign_notice(ctx.keys(), notice_claims(&product_data, "T1", None), now());
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &first).await;
    assert_eq!(status, StatusCode::OK);

    let second = sign_notice(ctx.keys(), notice_claims(&product_data, "T2", None), now());
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &second).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let contribution = get_contribution(&ctx.conn(), &pending.uuid);
    assert_eq!(
        contribution.transaction_id.as_deref(),
        Some("T1"),
        "first transaction id must be retained"
    );
    assert_eq!(ctx.notifier.count(NotificationKind::PurchaseReceipt), 1);
}

#[tokio::test]
async fn test_postback_for_unknown_contribution() {
    let ctx = create_test_context();
    let app = create_paid_app(&ctx.conn(), "Paid App");

    let product_data = ProductData {
        contrib_uuid: "does-not-exist".to_string(),
        product: ProductRef::Webapp(app.id.clone()),
        public_id: None,
        application_size: None,
        buyer_email: None,
    }
    .encode();
    let token = sign_notice(ctx.keys(), notice_claims(&product_data, "T1", None), now());
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &token).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_postback_naming_other_product_is_rejected() {
    let ctx = create_test_context();
    let (_, _, pending) = setup_app_purchase(&ctx);
    let other = create_paid_app(&ctx.conn(), "Other App");

    let product_data = ProductData {
        contrib_uuid: pending.uuid.clone(),
        product: ProductRef::Webapp(other.id.clone()),
        public_id: None,
        application_size: None,
        buyer_email: None,
    }
    .encode();
    let token = sign_notice(ctx.keys(), notice_claims(&product_data, "T1", None), now());
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &token).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let contribution = get_contribution(&ctx.conn(), &pending.uuid);
    assert_eq!(contribution.contrib_type, ContributionType::Pending);
}

/// A postback aimed at a refund row must not turn it into a purchase.
#[tokio::test]
async fn test_postback_for_reversal_row_is_illegal() {
    let ctx = create_test_context();
    let (_, _, pending) = setup_app_purchase(&ctx);
    let purchase = complete_purchase(&ctx.conn(), &pending.uuid, "T1");

    let chargeback = {
        let mut claims = notice_claims(&product_data_for(&purchase), "T1", None);
        claims.response.as_mut().unwrap().reason = Some("refund".to_string());
        sign_notice(ctx.keys(), claims, now())
    };
    let (status, _) = post_notice(ctx.app(), "/webpay/chargeback", &chargeback).await;
    assert_eq!(status, StatusCode::OK);

    let refund = queries::get_reversal_for(&ctx.conn(), &purchase.id)
        .unwrap()
        .expect("refund row");
    let product_data = ProductData {
        contrib_uuid: refund.uuid.clone(),
        product: refund.product.clone(),
        public_id: None,
        application_size: None,
        buyer_email: None,
    }
    .encode();
    let token = sign_notice(ctx.keys(), notice_claims(&product_data, "T1", None), now());
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &token).await;

    assert_eq!(status, StatusCode::CONFLICT);
    let refund = get_contribution(&ctx.conn(), &refund.uuid);
    assert_eq!(refund.contrib_type, ContributionType::Refund);
}

/// The documented round trip: app A123 bought by U1 for 10.99 BRL.
#[tokio::test]
async fn test_request_token_round_trip_through_postback() {
    let ctx = create_test_context();
    let conn = ctx.conn();
    conn.execute(
        "INSERT INTO webapps (id, name, solitude_public_id, price_point, price_amount, currency, created_at)
         VALUES ('A123', 'Some App', 'public-A123', '10', '10.99', 'BRL', 0)",
        [],
    )
    .unwrap();
    let app = queries::get_webapp_by_id(&conn, "A123").unwrap().unwrap();
    let user = create_test_user(&conn, "u1@example.com");
    let pending = create_pending(&conn, ProductRef::Webapp("A123".into()), "U1", Some(&user.id));

    let request = products::encode_request(
        ctx.keys(),
        &ctx.state.config,
        &Product::App(app),
        &pending,
        None,
        now(),
    )
    .unwrap();
    let request_claims = ctx.keys().decode(&request).unwrap();
    let product_data = request_claims.custom.request.product_data.unwrap();
    assert!(product_data.contains("contrib_uuid=U1"));
    assert!(product_data.contains("addon_id=A123"));
    drop(conn);

    let notice = sign_notice(
        ctx.keys(),
        notice_claims(&product_data, "T1", Some(("10.99", "BRL"))),
        now(),
    );
    let (status, body) = post_notice(ctx.app(), "/webpay/postback", &notice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "T1");

    let conn = ctx.conn();
    let contribution = get_contribution(&conn, "U1");
    assert_eq!(contribution.contrib_type, ContributionType::Purchase);
    assert_eq!(contribution.amount, Some(Decimal::new(1099, 2)));
    assert_eq!(contribution.currency, "BRL");
    assert!(queries::user_owns_app(&conn, "A123", &user.id).unwrap());
}

#[tokio::test]
async fn test_inapp_postback_records_charged_price_without_ownership() {
    let ctx = create_test_context();
    let conn = ctx.conn();
    let user = create_test_user(&conn, "buyer@example.com");
    let app = create_paid_app(&conn, "Game");
    let sword = create_inapp(&conn, Some(&app.id), Decimal::new(199, 2), false);
    let pending = create_pending(&conn, ProductRef::InApp(sword.id.clone()), "contrib-inapp", Some(&user.id));
    drop(conn);

    let token = sign_notice(
        ctx.keys(),
        notice_claims(&product_data_for(&pending), "T9", Some(("1.99", "EUR"))),
        now(),
    );
    let (status, _) = post_notice(ctx.app(), "/webpay/postback", &token).await;
    assert_eq!(status, StatusCode::OK);

    let conn = ctx.conn();
    let contribution = get_contribution(&conn, &pending.uuid);
    assert_eq!(contribution.contrib_type, ContributionType::Purchase);
    assert_eq!(contribution.amount, Some(Decimal::new(199, 2)));
    assert_eq!(contribution.currency, "EUR");
    assert_eq!(count_rows(&conn, "app_purchases"), 0);
    assert_eq!(ctx.notifier.count(NotificationKind::PurchaseReceipt), 1);
}

//! End-to-end webhook handler tests
//!
//! The authentication and validation tests run without a database (the
//! request is rejected before any query executes, and the pool is lazy).
//! The full-flow tests are ignored by default; run with a configured
//! DATABASE_URL: `cargo test -p webhook-gateway -- --ignored`

use actix_web::{test, web, App};
use affiliate_engine::{CommissionConfig, CommissionEngine};
use ledger_core::{
    AccountKind, DatabaseConfig, LedgerConfig, LedgerStore, TransactionApplier, WithdrawService,
    WithdrawalConfig,
};
use rust_decimal_macros::dec;
use serde_json::json;
use webhook_gateway::handlers::{configure_routes, AppState};
use webhook_gateway::{Config, Dispatcher, GatewayMetrics, ProviderConfig, ServerConfig};

const PUBLIC_KEY: &str = "pk-test";
const SECRET_KEY: &str = "sk-test";

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            http_port: 0,
        },
        database: DatabaseConfig::from_env(),
        provider: ProviderConfig {
            public_key: Some(PUBLIC_KEY.to_string()),
            secret_key: Some(SECRET_KEY.to_string()),
            allow_unauthenticated: false,
        },
        ledger: LedgerConfig::default(),
        withdrawal: WithdrawalConfig::default(),
        commission: CommissionConfig::default(),
    }
}

fn state_with_pool(pool: sqlx::PgPool) -> AppState {
    let config = test_config();
    let store = LedgerStore::from_pool(pool.clone());
    let applier = TransactionApplier::new(pool.clone(), config.ledger.clone());
    let commission = CommissionEngine::new(pool.clone(), config.commission.clone());
    let withdraw = WithdrawService::new(pool, config.withdrawal.clone());
    let metrics = GatewayMetrics::new().unwrap();
    let dispatcher = Dispatcher::new(
        store.clone(),
        applier,
        commission,
        metrics.clone(),
        &config.ledger,
    );
    AppState {
        config,
        store,
        dispatcher,
        withdraw,
        metrics,
    }
}

fn lazy_state() -> AppState {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/unused")
        .expect("lazy pool");
    state_with_pool(pool)
}

async fn open_state() -> (AppState, LedgerStore) {
    let store = LedgerStore::open(&DatabaseConfig::from_env())
        .await
        .expect("database available for integration tests");
    (state_with_pool(store.pool().clone()), store)
}

fn unique_user() -> i64 {
    3_000_000 + rand::random::<u32>() as i64
}

// ===== NO-DATABASE PATHS =====

#[actix_web::test]
async fn test_deposit_webhook_requires_auth_headers() {
    let app =
        test::init_service(App::new().app_data(web::Data::new(lazy_state())).configure(configure_routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .set_json(json!({
            "status": "PAID",
            "identifier": "deposit_42_1700000000000",
            "amount": "20.00"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_deposit_webhook_rejects_wrong_secret() {
    let app =
        test::init_service(App::new().app_data(web::Data::new(lazy_state())).configure(configure_routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", "wrong"))
        .set_json(json!({
            "status": "PAID",
            "identifier": "deposit_42_1700000000000",
            "amount": "20.00"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_deposit_webhook_rejects_missing_identifier() {
    let app =
        test::init_service(App::new().app_data(web::Data::new(lazy_state())).configure(configure_routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "status": "PAID",
            "amount": "20.00"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_deposit_webhook_rejects_malformed_identifier() {
    let app =
        test::init_service(App::new().app_data(web::Data::new(lazy_state())).configure(configure_routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "status": "PAID",
            "identifier": "payment_42_1700000000000",
            "amount": "20.00"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_create_withdrawal_rejects_unknown_key_type() {
    let app =
        test::init_service(App::new().app_data(web::Data::new(lazy_state())).configure(configure_routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/withdrawals")
        .set_json(json!({
            "user_id": 42,
            "amount": "50.00",
            "pix_key": "whatever",
            "pix_key_type": "iban"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_health_endpoint() {
    let app =
        test::init_service(App::new().app_data(web::Data::new(lazy_state())).configure(configure_routes))
            .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn test_metrics_endpoint_renders() {
    let state = lazy_state();
    state.metrics.deposits_received.inc();
    let app =
        test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_routes))
            .await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("gateway_deposit_webhooks_total"));
}

// ===== FULL FLOWS (DATABASE REQUIRED) =====

#[actix_web::test]
#[ignore] // Only run with database available
async fn test_paid_deposit_webhook_credits_balance_once() {
    let (state, store) = open_state().await;
    let app =
        test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_routes))
            .await;

    let user_id = unique_user();
    store
        .create_account(user_id, AccountKind::Real, None, None)
        .await
        .unwrap();

    let payload = json!({
        "event": "PAID",
        "transaction": {
            "identifier": format!("deposit_{}_1700000000000", user_id),
            "amount": "20.00",
            "transactionId": "prov-e2e-1"
        }
    });

    for expected_outcome in ["applied", "already_processed"] {
        let req = test::TestRequest::post()
            .uri("/webhooks/deposit")
            .insert_header(("x-public-key", PUBLIC_KEY))
            .insert_header(("x-secret-key", SECRET_KEY))
            .set_json(payload.clone())
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["outcome"], expected_outcome);
    }

    let account = store.get_account(user_id).await.unwrap();
    assert_eq!(account.real_balance, dec!(20.00));
    assert!(account.first_deposit_done);

    let projection = store.get_wallet_projection(user_id).await.unwrap();
    assert_eq!(projection.real_balance, dec!(20.00));
}

#[actix_web::test]
#[ignore] // Only run with database available
async fn test_rejected_withdrawal_webhook_restores_balance() {
    let (state, store) = open_state().await;
    let withdraw = state.withdraw.clone();
    let app =
        test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_routes))
            .await;

    let user_id = unique_user();
    store
        .create_account(user_id, AccountKind::Real, None, None)
        .await
        .unwrap();

    // Fund, then initiate a withdrawal that debits up front
    let deposit = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "status": "paid",
            "identifier": format!("deposit_{}_1700000000001", user_id),
            "amount": "100.00"
        }))
        .to_request();
    assert!(test::call_service(&app, deposit).await.status().is_success());

    let entry = withdraw
        .create_withdrawal(user_id, dec!(40.00), "11122233344", ledger_core::PixKeyType::Cpf)
        .await
        .unwrap();
    let account = store.get_account(user_id).await.unwrap();
    assert_eq!(account.real_balance, dec!(60.00));

    let reject = test::TestRequest::post()
        .uri("/webhooks/withdrawal")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "identifier": entry.external_identifier,
            "status": "REJECTED"
        }))
        .to_request();
    let resp = test::call_service(&app, reject).await;
    assert!(resp.status().is_success());

    let account = store.get_account(user_id).await.unwrap();
    assert_eq!(account.real_balance, dec!(100.00));
    let projection = store.get_wallet_projection(user_id).await.unwrap();
    assert_eq!(projection.real_balance, dec!(100.00));
}

#[actix_web::test]
#[ignore] // Only run with database available
async fn test_withdrawal_webhook_for_unknown_reference_is_404() {
    let (state, _store) = open_state().await;
    let app =
        test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_routes))
            .await;

    let req = test::TestRequest::post()
        .uri("/webhooks/withdrawal")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "identifier": "withdraw_999999999_1",
            "status": "approved"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[ignore] // Only run with database available
async fn test_account_endpoints_provision_link_and_history() {
    let (state, _store) = open_state().await;
    let app =
        test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_routes))
            .await;

    let affiliate_id = unique_user();
    let user_id = unique_user();

    for body in [
        json!({ "user_id": affiliate_id, "account_kind": "DemoAffiliate" }),
        json!({ "user_id": user_id }),
    ] {
        let req = test::TestRequest::post()
            .uri("/accounts")
            .set_json(body)
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    let link = test::TestRequest::post()
        .uri(&format!("/accounts/{}/referral", user_id))
        .set_json(json!({ "affiliate_id": affiliate_id, "referral_code": "CODE1" }))
        .to_request();
    assert!(test::call_service(&app, link).await.status().is_success());

    // Write-once: the second link attempt is rejected
    let relink = test::TestRequest::post()
        .uri(&format!("/accounts/{}/referral", user_id))
        .set_json(json!({ "affiliate_id": affiliate_id + 1, "referral_code": "CODE2" }))
        .to_request();
    assert_eq!(test::call_service(&app, relink).await.status(), 400);

    let deposit = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "status": "paid",
            "identifier": format!("deposit_{}_1700000000003", user_id),
            "amount": "25.00"
        }))
        .to_request();
    assert!(test::call_service(&app, deposit).await.status().is_success());

    let wallet = test::TestRequest::get()
        .uri(&format!("/accounts/{}/wallet", user_id))
        .to_request();
    let resp = test::call_service(&app, wallet).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["real_balance"], "25.00");

    let history = test::TestRequest::get()
        .uri(&format!("/accounts/{}/entries?limit=10", user_id))
        .to_request();
    let resp = test::call_service(&app, history).await;
    assert!(resp.status().is_success());
    let entries: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(entries.as_array().map(|a| a.len()), Some(1));
}

#[actix_web::test]
#[ignore] // Only run with database available
async fn test_expired_deposit_webhook_never_touches_balance() {
    let (state, store) = open_state().await;
    let app =
        test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_routes))
            .await;

    let user_id = unique_user();
    store
        .create_account(user_id, AccountKind::Real, None, None)
        .await
        .unwrap();

    let req = test::TestRequest::post()
        .uri("/webhooks/deposit")
        .insert_header(("x-public-key", PUBLIC_KEY))
        .insert_header(("x-secret-key", SECRET_KEY))
        .set_json(json!({
            "event": "EXPIRED",
            "identifier": format!("deposit_{}_1700000000002", user_id),
            "amount": "20.00"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let account = store.get_account(user_id).await.unwrap();
    assert_eq!(account.real_balance, dec!(0.00));
    assert!(!account.first_deposit_done);
}

//! HTTP handlers and shared application state

use crate::auth::authenticate_request;
use crate::config::Config;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::errors::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::payload::{DepositWebhook, WithdrawalWebhook};
use actix_web::{web, HttpRequest, HttpResponse};
use ledger_core::withdraw::PixKeyType;
use ledger_core::{AccountKind, LedgerStore, WithdrawService};
use prometheus::{Encoder, TextEncoder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Shared per-worker state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: LedgerStore,
    pub dispatcher: Dispatcher,
    pub withdraw: WithdrawService,
    pub metrics: GatewayMetrics,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(prometheus_metrics))
        .route("/webhooks/deposit", web::post().to(deposit_webhook))
        .route("/webhooks/withdrawal", web::post().to(withdrawal_webhook))
        .route("/withdrawals", web::post().to(create_withdrawal))
        .route("/accounts", web::post().to(create_account))
        .route("/accounts/{user_id}/referral", web::post().to(link_referral))
        .route("/accounts/{user_id}/wallet", web::get().to(get_wallet))
        .route("/accounts/{user_id}/entries", web::get().to(list_entries));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "webhook-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn prometheus_metrics(state: web::Data<AppState>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.metrics.registry().gather(), &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("encode error: {}", e));
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Deposit confirmation webhook. Duplicates and replays are acknowledged
/// with the same 200 as a first delivery.
async fn deposit_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<DepositWebhook>,
) -> Result<HttpResponse> {
    authenticate_request(&req, &state.config.provider)?;

    let deposit = body.normalize().map_err(|e| {
        state.metrics.rejected.inc();
        e
    })?;
    let outcome = state.dispatcher.dispatch_deposit(&deposit).await?;

    Ok(acknowledge(outcome))
}

/// Withdrawal status webhook (approval or reversal).
async fn withdrawal_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<WithdrawalWebhook>,
) -> Result<HttpResponse> {
    authenticate_request(&req, &state.config.provider)?;

    let withdrawal = body.normalize().map_err(|e| {
        state.metrics.rejected.inc();
        e
    })?;
    let outcome = state.dispatcher.dispatch_withdrawal(&withdrawal).await?;

    Ok(acknowledge(outcome))
}

fn acknowledge(outcome: DispatchOutcome) -> HttpResponse {
    let status = match outcome {
        DispatchOutcome::Applied => "applied",
        DispatchOutcome::AlreadyProcessed => "already_processed",
        DispatchOutcome::Ignored => "ignored",
    };
    HttpResponse::Ok().json(json!({
        "success": true,
        "outcome": status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub user_id: i64,
    pub amount: Decimal,
    pub pix_key: String,
    pub pix_key_type: String,
}

#[derive(Debug, Serialize)]
struct CreateWithdrawalResponse {
    success: bool,
    entry_id: String,
    identifier: Option<String>,
    amount: Decimal,
    status: String,
}

/// Create a pending withdrawal, debiting the balance up front.
async fn create_withdrawal(
    state: web::Data<AppState>,
    body: web::Json<CreateWithdrawalRequest>,
) -> Result<HttpResponse> {
    let key_type = PixKeyType::from_str(&body.pix_key_type).ok_or_else(|| {
        GatewayError::Validation(format!("unknown PIX key type: {}", body.pix_key_type))
    })?;

    let entry = state
        .withdraw
        .create_withdrawal(body.user_id, body.amount, &body.pix_key, key_type)
        .await?;

    info!(
        "Withdrawal {} created for user {} ({})",
        entry.id, body.user_id, body.amount
    );
    Ok(HttpResponse::Ok().json(CreateWithdrawalResponse {
        success: true,
        entry_id: entry.id.to_string(),
        identifier: entry.external_identifier.clone(),
        amount: entry.amount,
        status: entry.status.clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: i64,
    #[serde(default)]
    pub account_kind: Option<String>,
    pub referred_by_affiliate_id: Option<i64>,
    pub referral_code: Option<String>,
}

/// Provision an account (with its wallet projection) for a new user.
async fn create_account(
    state: web::Data<AppState>,
    body: web::Json<CreateAccountRequest>,
) -> Result<HttpResponse> {
    let kind = body
        .account_kind
        .as_deref()
        .map(AccountKind::from_str)
        .unwrap_or(AccountKind::Real);

    let account = state
        .store
        .create_account(
            body.user_id,
            kind,
            body.referred_by_affiliate_id,
            body.referral_code.clone(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user_id": account.user_id,
        "account_kind": account.account_kind,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LinkReferralRequest {
    pub affiliate_id: i64,
    pub referral_code: String,
}

/// Attach a referring affiliate to an existing account. Write-once: a
/// second attempt for an already-referred user is rejected.
async fn link_referral(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<LinkReferralRequest>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    state
        .store
        .link_referral(user_id, body.affiliate_id, &body.referral_code)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

async fn get_wallet(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse> {
    let projection = state.store.get_wallet_projection(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(projection))
}

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    pub limit: Option<i64>,
}

/// Transaction history, newest first
async fn list_entries(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<ListEntriesQuery>,
) -> Result<HttpResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let entries = state
        .store
        .list_entries_for_user(path.into_inner(), limit)
        .await?;
    Ok(HttpResponse::Ok().json(entries))
}

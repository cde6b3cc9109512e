//! Router construction and request handlers.
//!
//! Handlers receive their services by injection and do no business
//! logic of their own: they validate the wire shape, call one service
//! operation and translate its typed error into a status code. This
//! module is the only place where error kinds meet HTTP.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tracing::{error, warn};

use scrip_auth::{AuthError, AuthService, TokenService};
use scrip_core::{Credentials, WithdrawalRequest};
use scrip_jobs::AccrualPoller;
use scrip_ledger::{BalanceError, BalanceService, OrderError, OrderService};

use crate::middleware::{auth_middleware, AuthState};
use crate::context::CurrentUser;

/// Service handles shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub tokens: Arc<TokenService>,
    pub orders: Arc<OrderService>,
    pub balance: Arc<BalanceService>,
    pub accrual: Arc<AccrualPoller>,
}

/// Build the full router: two public credential endpoints, everything
/// else behind the bearer-token middleware.
pub fn build_app(state: AppState) -> Router {
    let auth_state = AuthState {
        tokens: state.tokens.clone(),
        auth: state.auth.clone(),
    };

    let protected = Router::new()
        .route("/api/user/orders", post(create_order).get(get_orders))
        .route("/api/user/balance", get(get_balance))
        .route("/api/user/balance/withdraw", post(create_withdrawal))
        .route("/api/user/withdrawals", get(get_withdrawals))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ));

    Router::new()
        .route("/api/user/register", post(register))
        .route("/api/user/login", post(login))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(state)))
}

async fn register(
    Extension(state): Extension<AppState>,
    Json(body): Json<Credentials>,
) -> Response {
    let Some((login, password)) = body.validated() else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_credentials",
            "request must contain login and password",
        );
    };

    if let Err(err) = state.auth.register(login, password).await {
        return match err {
            AuthError::AlreadyRegistered => {
                json_error(StatusCode::CONFLICT, "duplicate_user", err.to_string())
            }
            other => internal_error("registration failed", other),
        };
    }

    respond_with_token(&state, login)
}

async fn login(Extension(state): Extension<AppState>, Json(body): Json<Credentials>) -> Response {
    let Some((login, password)) = body.validated() else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_credentials",
            "request must contain login and password",
        );
    };

    if let Err(err) = state.auth.login(login, password).await {
        return match err {
            AuthError::UnknownUser | AuthError::WrongPassword => json_error(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "login or password is incorrect",
            ),
            other => internal_error("login failed", other),
        };
    }

    respond_with_token(&state, login)
}

fn respond_with_token(state: &AppState, login: &str) -> Response {
    match state.tokens.issue(login) {
        Ok(token) => (
            StatusCode::OK,
            [(header::AUTHORIZATION, format!("Bearer {token}"))],
        )
            .into_response(),
        Err(err) => internal_error("token issuance failed", err),
    }
}

async fn create_order(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: String,
) -> Response {
    let order_id = body.trim();

    if order_id.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "empty_order",
            "order number is empty",
        );
    }
    if !state.orders.verify_order_id(order_id) {
        return json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_order",
            "order number failed validation",
        );
    }

    match state.orders.create_order(order_id, user.id).await {
        Ok(()) => {
            // The order row exists either way; a failed submission only
            // delays polling until the next startup scan.
            if let Err(err) = state.accrual.clone().calculate_accrual(order_id).await {
                warn!(order_id, error = %err, "could not schedule accrual polling");
            }
            StatusCode::ACCEPTED.into_response()
        }
        Err(OrderError::DuplicateBySameUser) => StatusCode::OK.into_response(),
        Err(OrderError::DuplicateByOtherUser) => json_error(
            StatusCode::CONFLICT,
            "duplicate_order",
            "order was uploaded by another user",
        ),
        Err(other) => internal_error("order creation failed", other),
    }
}

async fn get_orders(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Response {
    match state.orders.get_orders(user.id).await {
        Ok(orders) if orders.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(err) => internal_error("order listing failed", err),
    }
}

async fn get_balance(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Response {
    match state.balance.get_user_balance(user.id).await {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(err) => internal_error("balance read failed", err),
    }
}

async fn create_withdrawal(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<WithdrawalRequest>,
) -> Response {
    let (Some(order_id), Some(sum)) = (body.order.as_deref(), body.sum) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_fields",
            "request must contain order and sum",
        );
    };

    match state.balance.create_withdrawal(order_id, user.id, sum).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(BalanceError::InvalidOrderId) | Err(BalanceError::InvalidAmount) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_withdrawal",
            "order number or amount failed validation",
        ),
        Err(BalanceError::Insufficient) => json_error(
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_balance",
            "balance does not cover the requested amount",
        ),
        Err(BalanceError::Duplicate) => json_error(
            StatusCode::CONFLICT,
            "duplicate_withdrawal",
            "a withdrawal for this order was already recorded",
        ),
        Err(other) => internal_error("withdrawal failed", other),
    }
}

async fn get_withdrawals(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Response {
    match state.balance.get_withdrawal_flow(user.id).await {
        Ok(flow) if flow.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(flow) => (StatusCode::OK, Json(flow)).into_response(),
        Err(err) => internal_error("withdrawal listing failed", err),
    }
}

fn internal_error(context: &'static str, err: impl std::fmt::Display) -> Response {
    error!(error = %err, "{context}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", context)
}

fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

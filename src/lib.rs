//! Spendyze is the backend for a personal finance tracker: it records
//! income and expense transactions per user and reports them back as a
//! transaction history table plus a monthly bar-chart payload.
//!
//! This library provides a JSON REST API served over HTTP.

use std::time::Duration;

use axum::{
    extract::{Json, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_server::Handle;
use serde::Deserialize;
use serde_json::json;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

pub use crate::config::AppConfig;
pub use crate::db::initialize;

use crate::{
    auth::{Claims, Credentials},
    db::{DbError, Insert, SelectBy},
    models::{NewTransaction, NewUser, PasswordHash, RawAmount, Transaction, ValidationError},
    report::MonthlySummary,
};

pub mod auth;
mod config;
pub mod db;
pub mod models;
pub mod report;

/// Return a router with all the app's routes and the CORS policy the browser
/// client relies on.
pub fn build_router() -> Router<AppConfig> {
    // The bearer token travels in the Authorization header, so the preflight
    // must allow it alongside Content-Type or the client can never
    // authenticate cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .route("/", get(|| async { StatusCode::IM_A_TEAPOT }))
        .route("/create_account", post(create_account))
        .route("/login", post(auth::log_in))
        .route("/home", post(create_transaction))
        .route("/transactions", get(get_transactions))
        .layer(cors)
}

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first, and then signals the server to shut down
/// gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

enum AppError {
    /// A request field was malformed or missing.
    Validation(ValidationError),
    /// The requested username already belongs to another account.
    DuplicateUsername,
    /// An error occurred while accessing the application's database.
    Storage(DbError),
    /// An error occurred in a third-party library.
    InternalError,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            // The browser client expects account creation to respond 200 and
            // signal failure through the error field.
            AppError::DuplicateUsername => (StatusCode::OK, "duplicate_username".to_string()),
            // Storage detail is logged server-side and never sent to the
            // client.
            AppError::Storage(_) | AppError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::DuplicateUsername => AppError::DuplicateUsername,
            e => {
                tracing::error!("{e:?}");
                AppError::Storage(e)
            }
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e)
    }
}

/// A route handler for creating a new user account.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same
/// thread.
async fn create_account(
    State(state): State<AppConfig>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let password_hash = PasswordHash::new(&credentials.password).map_err(|e| {
        tracing::error!("Error hashing password: {e:?}");
        AppError::InternalError
    })?;

    NewUser {
        username: credentials.username,
        password_hash,
    }
    .insert(&state.db_connection().lock().unwrap())?;

    Ok(Json(json!({ "status": "ok" })))
}

/// The body of a transaction-creation request.
///
/// `amount` may arrive as a JSON number or a numeric string; the browser
/// client sends form values unconverted.
#[derive(Deserialize)]
struct NewTransactionData {
    #[serde(rename = "type")]
    trans_type: String,
    amount: RawAmount,
    date: String,
    category: String,
}

/// A route handler for recording a new transaction for the authenticated
/// user.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same
/// thread.
async fn create_transaction(
    State(state): State<AppConfig>,
    claims: Claims,
    Json(data): Json<NewTransactionData>,
) -> Result<impl IntoResponse, AppError> {
    let new_transaction = NewTransaction::new(
        &data.trans_type,
        data.amount,
        &data.date,
        data.category,
        claims.sub,
    )?;

    let transaction = new_transaction.insert(&state.db_connection().lock().unwrap())?;

    Ok(Json(json!({
        "status": "ok",
        "id": transaction.id(),
    })))
}

/// A route handler for the transactions report: the authenticated user's
/// transaction history plus the monthly income/expense chart payload.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same
/// thread.
async fn get_transactions(
    State(state): State<AppConfig>,
    claims: Claims,
) -> Result<impl IntoResponse, AppError> {
    let connection_mutex = state.db_connection();
    let connection = connection_mutex.lock().unwrap();

    let transactions = Transaction::select(claims.sub, &connection)?;
    let summary = MonthlySummary::select(claims.sub, &connection)?;

    Ok(Json(report::build_report_payload(&transactions, &summary)))
}


#[cfg(test)]
mod cors_tests {
    use axum::http::{HeaderName, HeaderValue, Method};

    use crate::test_utils::get_test_server;

    #[tokio::test]
    async fn preflight_allows_the_authorization_and_content_type_headers() {
        let server = get_test_server();

        let response = server
            .method(Method::OPTIONS, "/transactions")
            .add_header(
                HeaderName::from_static("origin"),
                HeaderValue::from_static("https://example.com"),
            )
            .add_header(
                HeaderName::from_static("access-control-request-method"),
                HeaderValue::from_static("GET"),
            )
            .add_header(
                HeaderName::from_static("access-control-request-headers"),
                HeaderValue::from_static("authorization,content-type"),
            )
            .await;

        response.assert_status_ok();

        let allow_headers = response
            .header("access-control-allow-headers")
            .to_str()
            .expect("allowed headers should be ASCII")
            .to_lowercase();

        assert!(allow_headers.contains("authorization"));
        assert!(allow_headers.contains("content-type"));
    }

    #[tokio::test]
    async fn preflight_allows_any_origin() {
        let server = get_test_server();

        let response = server
            .method(Method::OPTIONS, "/home")
            .add_header(
                HeaderName::from_static("origin"),
                HeaderValue::from_static("https://example.com"),
            )
            .add_header(
                HeaderName::from_static("access-control-request-method"),
                HeaderValue::from_static("POST"),
            )
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.header("access-control-allow-origin"),
            HeaderValue::from_static("*")
        );
    }
}

//! Token-based authentication: the log-in handler, JWT encoding/decoding,
//! and the extractor that resolves a bearer token to a user ID.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRef, FromRequestParts, Json, State},
    http::request::Parts,
    http::{Response, StatusCode},
    response::IntoResponse,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::AppConfig,
    db::{DbError, SelectBy},
    models::{User, UserID},
};

/// The contents of a JSON Web Token.
#[derive(Serialize, Deserialize)]
pub struct Claims {
    /// The expiry time of the token.
    pub exp: usize,
    /// The time the token was issued.
    pub iat: usize,
    /// The ID of the authenticated user.
    pub sub: UserID,
}

#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    AppConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::InvalidToken)?;

        let app_config = parts
            .extract_with_state::<AppConfig, _>(state)
            .await
            .map_err(|_| AuthError::InvalidToken)?;

        let token_data = decode_jwt(bearer.token(), app_config.decoding_key())?;

        Ok(token_data.claims)
    }
}

/// The credentials sent to the account-creation and log-in endpoints.
#[derive(Deserialize)]
pub struct Credentials {
    /// Username entered during sign-in.
    pub username: String,
    /// Password entered during sign-in.
    pub password: String,
}

#[derive(Debug)]
pub enum AuthError {
    /// The username/password pair did not match a stored user.
    WrongCredentials,
    /// The bearer token was missing, malformed, or expired.
    InvalidToken,
    /// The token could not be created.
    TokenCreation,
    /// An unexpected error occurred while verifying the credentials.
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response<Body> {
        let (status, error_message) = match self {
            AuthError::WrongCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AuthError::TokenCreation => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            AuthError::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Handler for log-in requests.
///
/// Responds with `{"status": "ok", "token": <JWT>}` on success.
///
/// # Errors
///
/// This function will return an error in a few situations.
/// - The username does not belong to a registered user.
/// - The password is not correct.
/// - An internal error occurred when verifying the password.
///
/// An unknown username and a wrong password produce the same response so the
/// client cannot probe for registered usernames.
pub async fn log_in(
    State(state): State<AppConfig>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, AuthError> {
    let user = User::select(
        credentials.username.as_str(),
        &state.db_connection().lock().unwrap(),
    )
    .map_err(|e| match e {
        DbError::NotFound => AuthError::WrongCredentials,
        _ => {
            tracing::error!("Error matching user: {e:?}");
            AuthError::InternalError
        }
    })?;

    let password_is_correct = user
        .password_hash()
        .verify(&credentials.password)
        .map_err(|e| {
            tracing::error!("Error verifying password: {}", e);
            AuthError::InternalError
        })?;

    if !password_is_correct {
        return Err(AuthError::WrongCredentials);
    }

    let token = encode_jwt(user.id(), state.encoding_key())?;

    Ok(Json(json!({
        "status": "ok",
        "token": token,
    })))
}

fn encode_jwt(user_id: UserID, encoding_key: &EncodingKey) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = (now + Duration::minutes(15)).timestamp() as usize;
    let iat = now.timestamp() as usize;
    let claims = Claims {
        exp,
        iat,
        sub: user_id,
    };

    encode(&Header::default(), &claims, encoding_key).map_err(|_| AuthError::TokenCreation)
}

fn decode_jwt(jwt_token: &str, decoding_key: &DecodingKey) -> Result<TokenData<Claims>, AuthError> {
    decode(jwt_token, decoding_key, &Validation::default()).map_err(|_| AuthError::InvalidToken)
}

use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use jobchat_db::Database;
use jobchat_gateway::blocking;
use jobchat_gateway::dispatcher::Dispatcher;
use jobchat_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

/// Tokens stay valid for a month; the gateway checks them only at upgrade.
const TOKEN_TTL_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
}

fn check_registration(req: &RegisterRequest) -> Result<(), &'static str> {
    if !(3..=32).contains(&req.username.len()) {
        return Err("username must be 3-32 characters");
    }
    if req.password.len() < 8 {
        return Err("password must be at least 8 characters");
    }
    if req.first_name.trim().is_empty() {
        return Err("first name is required");
    }
    Ok(())
}

enum Registration {
    Created(Uuid),
    Taken,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if let Err(reason) = check_registration(&req) {
        warn!("registration of {:?} refused: {}", req.username, reason);
        return Err(StatusCode::BAD_REQUEST);
    }

    let username = req.username.clone();
    let outcome = blocking(&state.db, move |db| {
        if db.get_user_by_username(&req.username)?.is_some() {
            return Ok(Registration::Taken);
        }

        // Argon2id with a fresh salt
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        let participant_id = Uuid::new_v4();
        db.create_user(
            &participant_id.to_string(),
            &req.username,
            &hash,
            req.first_name.trim(),
            req.last_name.trim(),
            req.avatar_url.as_deref(),
        )?;
        Ok(Registration::Created(participant_id))
    })
    .await
    .map_err(|e| {
        error!("registration of {:?} failed: {:#}", username, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let user_id = match outcome {
        Registration::Created(id) => id,
        Registration::Taken => return Err(StatusCode::CONFLICT),
    };

    let token = create_token(&state.jwt_secret, user_id, &username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("Registered participant {} ({})", username, user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

/// Wrong username and wrong password are both a plain 401.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let verified = blocking(&state.db, move |db| {
        let Some(user) = db.get_user_by_username(&req.username)? else {
            return Ok(None);
        };
        let stored = PasswordHash::new(&user.password)
            .map_err(|e| anyhow::anyhow!("stored hash for {} is unreadable: {}", user.username, e))?;
        let matches = Argon2::default()
            .verify_password(req.password.as_bytes(), &stored)
            .is_ok();
        Ok(matches.then_some(user))
    })
    .await
    .map_err(|e| {
        error!("login failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let user = verified.ok_or(StatusCode::UNAUTHORIZED)?;
    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let token = create_token(&state.jwt_secret, user_id, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let expires = chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS);
    let claims = Claims {
        sub: user_id,
        username: username.to_owned(),
        exp: expires.timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

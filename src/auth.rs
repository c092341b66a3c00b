//! Session-token validation for the realtime endpoint.
//!
//! Token issuance lives in the account service; we only check the
//! signature and pull the player id out.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use std::env;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String, // player_id
    #[allow(dead_code)]
    exp: usize,
}

/// Validate a bearer token and return the player id it carries.
pub fn verify(token: &str) -> Result<Uuid> {
    let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .context("invalid session token")?;
    Uuid::parse_str(&data.claims.sub).context("token subject is not a player id")
}

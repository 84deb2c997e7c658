use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;
use std::future::{ready, Ready};

use crate::models::Id;
use crate::service::Actor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub name: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

fn secret() -> Result<String, JwtError> {
    env::var("JWT_SECRET").map_err(|_| JwtError::from(JwtErrorKind::InvalidKeyFormat))
}

fn token_ttl() -> chrono::Duration {
    let hours = env::var("TOKEN_TTL_HOURS").ok().and_then(|v| v.parse().ok()).unwrap_or(24);
    chrono::Duration::hours(hours)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, JwtError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`. Use `Option<Auth>` for anonymous-capable routes.
pub struct Auth(pub Claims);

impl Auth {
    /// The acting user passed to every core operation.
    pub fn actor(&self) -> Result<Actor, crate::error::ApiError> {
        let user_id: Id = self.0.sub.parse().map_err(|_| crate::error::ApiError::Unauthorized)?;
        Ok(Actor { user_id, username: self.0.name.clone(), roles: self.0.roles.clone() })
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(e) => {
                    tracing::debug!("rejected bearer token: {e}");
                    ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT")))
                }
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

/// Role guard for handlers returning `Result<_, ApiError>`.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}

/// Issue an access token for a user.
pub fn create_jwt(user_id: Id, username: &str, roles: Vec<Role>) -> Result<String, JwtError> {
    let secret = secret()?;
    let expiration = chrono::Utc::now()
        .checked_add_signed(token_ttl())
        .ok_or_else(|| JwtError::from(JwtErrorKind::ExpiredSignature))?
        .timestamp() as usize;

    let claims = Claims { sub: user_id.to_string(), name: username.to_string(), exp: expiration, roles };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

// Password storage: "sha256$<rounds>$<salt hex>$<digest hex>".
const HASH_SCHEME: &str = "sha256";
const HASH_ROUNDS: u32 = 10_000;

fn stretch(password: &str, salt: &[u8], rounds: u32) -> Vec<u8> {
    let mut digest = Sha256::new().chain_update(salt).chain_update(password.as_bytes()).finalize();
    for _ in 1..rounds {
        digest = Sha256::new().chain_update(salt).chain_update(digest).finalize();
    }
    digest.to_vec()
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = stretch(password, &salt, HASH_ROUNDS);
    format!("{HASH_SCHEME}${HASH_ROUNDS}${}${}", hex::encode(salt), hex::encode(digest))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(HASH_SCHEME), Some(rounds), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(rounds), Ok(salt), Ok(expected)) = (rounds.parse::<u32>(), hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    if rounds == 0 {
        return false;
    }
    let actual = stretch(password, &salt, rounds);
    // constant time over equal-length digests
    actual.len() == expected.len() && actual.iter().zip(&expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::auth::{AuthPatient, AuthStaff, Claims, JwtSecret, Role};

/// Issue a signed bearer token for a principal.
pub fn issue_token(
    principal_id: Uuid,
    clinic_id: Uuid,
    role: Role,
    secret: &str,
    ttl_seconds: u64,
) -> anyhow::Result<String> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: principal_id.to_string(),
        clinic: clinic_id.to_string(),
        role,
        iat: now,
        exp: now + ttl_seconds as usize,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Verify a token and return its claims. Only HS256 is accepted; expiry is
/// always validated.
pub fn decode_token(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    Ok(data.claims)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn secret(parts: &Parts) -> Result<String, ApiError> {
    parts
        .extensions
        .get::<JwtSecret>()
        .map(|s| s.0.clone())
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("JWT secret not configured")))
}

impl<S> FromRequestParts<S> for AuthStaff
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthenticated)?;
        let claims = decode_token(token, &secret(parts)?).map_err(|_| ApiError::Unauthenticated)?;

        match claims.role {
            Role::Admin | Role::Doctor => Ok(AuthStaff {
                user_id: claims.sub.parse().map_err(|_| ApiError::Unauthenticated)?,
                clinic_id: claims.clinic.parse().map_err(|_| ApiError::Unauthenticated)?,
                role: claims.role,
            }),
            Role::Patient => Err(ApiError::Forbidden),
        }
    }
}

impl<S> FromRequestParts<S> for AuthPatient
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthenticated)?;
        let claims = decode_token(token, &secret(parts)?).map_err(|_| ApiError::Unauthenticated)?;

        match claims.role {
            Role::Patient => Ok(AuthPatient {
                patient_id: claims.sub.parse().map_err(|_| ApiError::Unauthenticated)?,
                clinic_id: claims.clinic.parse().map_err(|_| ApiError::Unauthenticated)?,
            }),
            _ => Err(ApiError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn issued_token_round_trips() {
        let id = Uuid::new_v4();
        let clinic = Uuid::new_v4();
        let token = issue_token(id, clinic, Role::Doctor, SECRET, 3600).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.clinic, clinic.to_string());
        assert_eq!(claims.role, Role::Doctor);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token =
            issue_token(Uuid::new_v4(), Uuid::new_v4(), Role::Admin, SECRET, 3600).unwrap();
        assert!(decode_token(&token, "ffffffffffffffffffffffffffffffff").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            clinic: Uuid::new_v4().to_string(),
            role: Role::Admin,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(decode_token(&token, SECRET).is_err());
    }
}

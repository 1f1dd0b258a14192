use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Roles carried by the external identity layer's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
}

const ISSUER: &str = "dojo";

/// Mint a bearer token. Used by the `dojo token` operator command and by
/// tests; production tokens come from the identity layer with the same
/// claims.
pub fn issue_token(
    subject: &str,
    role: Role,
    secret: &str,
    duration_hours: i64,
) -> Result<String> {
    let now = Utc::now();
    let exp = now
        .checked_add_signed(Duration::hours(duration_hours))
        .expect("valid timestamp");

    let claims = Claims {
        sub: subject.to_string(),
        role,
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
        iss: ISSUER.to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;
    Ok(token)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[ISSUER]);

    let token_data: TokenData<Claims> = decode(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_subject_and_role() {
        let token = issue_token("alice", Role::Admin, "secret", 1).unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("alice", Role::User, "secret", 1).unwrap();
        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("alice", Role::User, "secret", -1).unwrap();
        assert!(decode_token(&token, "secret").is_err());
    }
}

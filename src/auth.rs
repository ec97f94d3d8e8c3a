//! Authentication utilities: JWT access-token validation
//!
//! Tokens are issued by the external auth service; this worker only
//! validates them and extracts the caller's identity and role.

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Request;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User role (admin, operator)
    pub role: String,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthInfo {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Extract authentication info from a NATS request. A missing or
/// invalid token is an error — there is no anonymous access.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_ref()
        .ok_or_else(|| anyhow!("No authentication provided — JWT token is required"))?;
    let claims = validate_token(token, jwt_secret)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;
    Ok(AuthInfo {
        user_id,
        role: claims.role,
    })
}

#[cfg(test)]
pub fn generate_token(user_id: Uuid, role: &str, secret: &str) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + 8 * 60 * 60,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmptyPayload;

    const SECRET: &str = "test-secret-with-at-least-32-bytes!!";

    #[test]
    fn test_valid_token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id, "admin", SECRET).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = generate_token(Uuid::new_v4(), "operator", SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-of-sufficient-size!").is_err());
    }

    #[test]
    fn test_extract_auth_requires_token() {
        let request = Request {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            token: None,
            payload: EmptyPayload {},
        };
        assert!(extract_auth(&request, SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_reads_role() {
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id, "operator", SECRET).unwrap();
        let request = Request::with_token(token, EmptyPayload {});
        let auth = extract_auth(&request, SECRET).unwrap();
        assert_eq!(auth.user_id, user_id);
        assert!(!auth.is_admin());
    }
}

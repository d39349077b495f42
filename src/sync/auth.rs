//! Connection credentials: HS256 bearer tokens verified at handshake time.
//!
//! On success the decoded identity is bound to the connection for its whole
//! lifetime and handed to every command handler as an immutable value. On
//! failure the connection attempt itself is rejected — no command is ever
//! processed on an unauthenticated socket.

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Decoded token claims. `exp` is checked by the verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub exp: i64,
}

/// Identity bound to a connection after a successful handshake.
/// Never mutated after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

/// Return the signing secret for this daemon instance.
///
/// On first call, generates a random 32-character hex secret and writes it
/// to `{data_dir}/jwt_secret` with user-only permissions (mode 0600 on
/// Unix). On subsequent calls, reads and returns the existing secret.
pub fn get_or_create_secret(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("jwt_secret");

    if path.exists() {
        let secret = std::fs::read_to_string(&path)?.trim().to_string();
        if !secret.is_empty() {
            return Ok(secret);
        }
    }

    // UUID v4, hex without dashes = 32 chars
    let secret = Uuid::new_v4().to_string().replace('-', "");

    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, &secret)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(secret)
}

/// Sign a token for `username`, valid for `ttl_secs` from now.
pub fn issue_token(username: &str, secret: &str, ttl_secs: u64) -> Result<String> {
    let claims = Claims {
        username: username.to_string(),
        exp: Utc::now().timestamp() + ttl_secs as i64,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Verify signature and expiry; return the bound identity on success.
pub fn verify_token(token: &str, secret: &str) -> Option<Identity> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some(Identity {
        username: data.claims.username,
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}

//! Access and refresh credential lookup.
//!
//! Credentials are issued by the authentication service and written to the
//! shared key-value store. The hub only reads them; the `issue_*` helpers
//! exist for the issuer and for tests.

use serde::{Deserialize, Serialize};

use crate::db::kv::KeyValueStore;
use crate::error::ApiError;

// ---------------------------------------------------------------------------
// Opaque token generation
// ---------------------------------------------------------------------------

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

// ---------------------------------------------------------------------------
// Stored credential data
// ---------------------------------------------------------------------------

/// Access credential TTL in seconds (15 minutes).
pub const ACCESS_TTL_SECS: u64 = 900;

/// Refresh credential TTL in seconds (30 days).
pub const REFRESH_TTL_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Access,
    Refresh,
}

/// Data stored alongside a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialData {
    pub user_id: String,
    pub username: String,
    pub kind: CredentialKind,
}

fn credential_key(token: &str) -> String {
    format!("hub:cred:{}", token)
}

async fn store_credential(
    kv: &dyn KeyValueStore,
    token: &str,
    data: &CredentialData,
    ttl_secs: u64,
) -> Result<(), ApiError> {
    let value = serde_json::to_string(data).map_err(|_| ApiError::internal("serialization"))?;
    kv.set_ex(&credential_key(token), &value, ttl_secs).await
}

/// Issue and store a new access credential for `user_id`.
pub async fn issue_access_token(
    kv: &dyn KeyValueStore,
    user_id: &str,
    username: &str,
) -> Result<String, ApiError> {
    let token = generate_opaque_token("hat", 32);
    let data = CredentialData {
        user_id: user_id.to_string(),
        username: username.to_string(),
        kind: CredentialKind::Access,
    };
    store_credential(kv, &token, &data, ACCESS_TTL_SECS).await?;
    Ok(token)
}

/// Issue and store a new refresh credential for `user_id`.
pub async fn issue_refresh_token(
    kv: &dyn KeyValueStore,
    user_id: &str,
    username: &str,
) -> Result<String, ApiError> {
    let token = generate_opaque_token("hrt", 32);
    let data = CredentialData {
        user_id: user_id.to_string(),
        username: username.to_string(),
        kind: CredentialKind::Refresh,
    };
    store_credential(kv, &token, &data, REFRESH_TTL_SECS).await?;
    Ok(token)
}

pub async fn lookup_credential(
    kv: &dyn KeyValueStore,
    token: &str,
) -> Result<Option<CredentialData>, ApiError> {
    match kv.get(&credential_key(token)).await? {
        Some(v) => {
            let data: CredentialData =
                serde_json::from_str(&v).map_err(|_| ApiError::internal("corrupt token data"))?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

/// Look up a credential and require it to be an access credential.
///
/// Refresh credentials are reported as absent so callers reject them the
/// same way as unknown tokens.
pub async fn lookup_access_token(
    kv: &dyn KeyValueStore,
    token: &str,
) -> Result<Option<CredentialData>, ApiError> {
    Ok(lookup_credential(kv, token)
        .await?
        .filter(|data| data.kind == CredentialKind::Access))
}

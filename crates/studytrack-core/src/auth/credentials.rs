use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the authenticated identity, as returned by the login and
/// register endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_superuser: bool,
}

/// Access token, refresh token and user held together as one unit.
///
/// All three fields are required when deserializing, so a pair is either
/// fully present or absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
    pub user: UserSummary,
}

impl CredentialPair {
    /// Copy of this pair with the access token replaced. The refresh token
    /// and user are kept as-is.
    pub fn with_access(&self, access: String) -> Self {
        Self {
            access,
            refresh: self.refresh.clone(),
            user: self.user.clone(),
        }
    }

    /// Expiry of the access token, if it is a JWT carrying an `exp` claim
    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        token_expiry(&self.access)
    }

    /// Expiry of the refresh token, if it is a JWT carrying an `exp` claim
    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        token_expiry(&self.refresh)
    }

    /// Get minutes remaining until the access token expires (for display)
    pub fn minutes_until_access_expiry(&self) -> Option<i64> {
        self.access_expires_at()
            .map(|expiry| (expiry - Utc::now()).num_minutes().max(0))
    }

    /// True only when the refresh token is known to be expired. Opaque
    /// tokens are never considered expired.
    pub fn refresh_expired(&self) -> bool {
        self.refresh_expires_at()
            .map(|expiry| Utc::now() >= expiry)
            .unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim from a JWT payload without verifying the signature.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"token_type":"access","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}

use super::types::TokenResponse;
use chrono::{DateTime, Duration, Utc};

/// Seconds before the nominal expiry at which a token stops being used
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth2 access token with expiry tracking
#[derive(Debug, Clone)]
pub struct OAuth2Token {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds as granted by the token endpoint
    pub expires_in: i64,
    pub created_at: DateTime<Utc>,
}

impl OAuth2Token {
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_in,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn from_response(response: TokenResponse) -> Self {
        Self::new(response.access_token, response.token_type, response.expires_in)
    }

    /// Instant after which the token is treated as expired (safety margin applied)
    pub fn usable_until(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.expires_in - EXPIRY_MARGIN_SECS)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.usable_until()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

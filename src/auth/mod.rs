//! Authentication
//!
//! Provides OIDC/OAuth2 with PKCE sign-in against the configured identity
//! provider. The web handlers only see the [`IdentityProvider`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secret_string::SecretString;
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_EXPIRY_MARGIN_SECS;
use crate::error::GatewayError;

pub mod oauth;

pub use oauth::OAuthClient;

/// Remote access credentials for the storage provider, kept in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveCredentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// When the access token stops working, if the provider said
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl DriveCredentials {
    /// Expiry time `expires_in` from now
    pub fn expiry_from(expires_in: Option<std::time::Duration>) -> Option<DateTime<Utc>> {
        expires_in
            .and_then(|expires_in| Duration::from_std(expires_in).ok())
            .map(|expires_in| Utc::now() + expires_in)
    }

    /// True once the access token is expired, or about to be
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let margin = Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS);
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now + margin)
    }
}

/// Everything needed to finish a login, stored in the session between
/// `/login` and `/callback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: SecretString,
    pub nonce: SecretString,
    pub pkce_verifier: SecretString,
}

impl PendingLogin {
    /// Constant-time comparison of the returned `state` with the stored one
    pub fn state_matches(&self, state: &str) -> bool {
        self.state.ct_eq(state)
    }
}

#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: String,
    pub pending: PendingLogin,
}

#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub email: String,
    pub credentials: DriveCredentials,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the provider redirect URL along with fresh state, nonce and PKCE verifier
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Exchange an authorization code and verify the returned ID token
    async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<VerifiedIdentity, GatewayError>;

    /// Trade the refresh token for a new access token. The refresh token is
    /// carried over when the provider doesn't issue a new one.
    async fn refresh_credentials(
        &self,
        credentials: &DriveCredentials,
    ) -> Result<DriveCredentials, GatewayError>;
}

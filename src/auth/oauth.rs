//! OIDC/OAuth2 client with PKCE support
//!
//! Discovers the provider from its issuer URL, builds authorization URLs and
//! exchanges authorization codes. ID token signature, issuer, audience and
//! nonce are all checked by `openidconnect`.

use async_trait::async_trait;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet, EndpointNotSet,
    EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, Scope, TokenResponse,
};
use secret_string::SecretString;
use tracing::{debug, error, info, instrument};

use crate::auth::{
    AuthorizationRequest, DriveCredentials, IdentityProvider, PendingLogin, VerifiedIdentity,
};
use crate::constants::OAUTH_SCOPES;
use crate::error::GatewayError;

/// What `from_provider_metadata` hands back: auth URL known, token and
/// userinfo URLs depend on the discovery document.
type DiscoveredClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// OAuth client for OIDC authentication with PKCE
pub struct OAuthClient {
    client: DiscoveredClient,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Create new OAuth client from the issuer's discovery document
    pub async fn new(
        issuer_url: &str,
        client_id: &str,
        client_secret: &SecretString,
        redirect_uri: &str,
    ) -> Result<Self, GatewayError> {
        // Token and discovery requests must not follow redirects
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| {
                GatewayError::Configuration(format!("Failed to build OIDC HTTP client: {err}"))
            })?;

        let issuer = IssuerUrl::new(issuer_url.to_string()).map_err(|err| {
            GatewayError::Configuration(format!("Invalid issuer URL '{issuer_url}': {err}"))
        })?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer, &http_client)
            .await
            .map_err(|err| {
                error!(issuer_url = %issuer_url, error = %err, "OIDC discovery failed");
                GatewayError::Configuration(format!("OIDC discovery failed: {err}"))
            })?;

        let redirect_url = RedirectUrl::new(redirect_uri.to_string()).map_err(|err| {
            GatewayError::Configuration(format!("Invalid redirect URI '{redirect_uri}': {err}"))
        })?;

        let client = CoreClient::from_provider_metadata(
            provider_metadata,
            ClientId::new(client_id.to_string()),
            Some(ClientSecret::new(client_secret.value().to_string())),
        )
        .set_redirect_uri(redirect_url);

        info!(issuer_url = %issuer_url, redirect_uri = %redirect_uri, "OIDC client configured");

        Ok(Self {
            client,
            http_client,
        })
    }
}

#[async_trait]
impl IdentityProvider for OAuthClient {
    fn authorization_request(&self) -> AuthorizationRequest {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self.client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        for scope in OAUTH_SCOPES {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        let (url, csrf_token, nonce) = request
            .add_extra_param("access_type", "offline")
            .add_extra_param("include_granted_scopes", "true")
            .set_pkce_challenge(pkce_challenge)
            .url();

        AuthorizationRequest {
            url: url.to_string(),
            pending: PendingLogin {
                state: SecretString::new(csrf_token.secret().as_str()),
                nonce: SecretString::new(nonce.secret().as_str()),
                pkce_verifier: SecretString::new(pkce_verifier.secret().as_str()),
            },
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<VerifiedIdentity, GatewayError> {
        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|err| GatewayError::AuthenticationFailed(err.to_string()))?
            .set_pkce_verifier(PkceCodeVerifier::new(
                pending.pkce_verifier.value().to_string(),
            ))
            .request_async(&self.http_client)
            .await
            .map_err(|err| {
                GatewayError::AuthenticationFailed(format!("Token exchange failed: {err}"))
            })?;
        debug!("Token exchange succeeded");

        let id_token = token_response.id_token().ok_or_else(|| {
            GatewayError::AuthenticationFailed("Provider returned no ID token".to_string())
        })?;

        let nonce = Nonce::new(pending.nonce.value().to_string());
        let claims = id_token
            .claims(&self.client.id_token_verifier(), &nonce)
            .map_err(|err| {
                GatewayError::AuthenticationFailed(format!("ID token verification failed: {err}"))
            })?;

        if claims.email_verified() == Some(false) {
            return Err(GatewayError::AuthenticationFailed(
                "Email address is not verified".to_string(),
            ));
        }

        let email = claims
            .email()
            .map(|email| email.as_str().to_string())
            .ok_or_else(|| {
                GatewayError::AuthenticationFailed("ID token carries no email claim".to_string())
            })?;

        Ok(VerifiedIdentity {
            email,
            credentials: DriveCredentials {
                access_token: SecretString::new(token_response.access_token().secret().as_str()),
                refresh_token: token_response
                    .refresh_token()
                    .map(|token| SecretString::new(token.secret().as_str())),
                expires_at: DriveCredentials::expiry_from(token_response.expires_in()),
            },
        })
    }

    #[instrument(level = "debug", skip_all)]
    async fn refresh_credentials(
        &self,
        credentials: &DriveCredentials,
    ) -> Result<DriveCredentials, GatewayError> {
        let Some(refresh_token) = credentials.refresh_token.as_ref() else {
            return Err(GatewayError::AuthenticationFailed(
                "No refresh token to renew the access token with".to_string(),
            ));
        };

        let refresh_token = RefreshToken::new(refresh_token.value().to_string());
        let token_response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .map_err(|err| GatewayError::AuthenticationFailed(err.to_string()))?
            .request_async(&self.http_client)
            .await
            .map_err(|err| {
                GatewayError::AuthenticationFailed(format!("Token refresh failed: {err}"))
            })?;
        debug!("Access token refreshed");

        Ok(DriveCredentials {
            access_token: SecretString::new(token_response.access_token().secret().as_str()),
            refresh_token: token_response
                .refresh_token()
                .map(|token| SecretString::new(token.secret().as_str()))
                .or_else(|| credentials.refresh_token.clone()),
            expires_at: DriveCredentials::expiry_from(token_response.expires_in()),
        })
    }
}

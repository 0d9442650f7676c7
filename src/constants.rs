use std::fmt::Display;

/// Default OIDC issuer, discovery happens against `<issuer>/.well-known/openid-configuration`.
pub const DEFAULT_ISSUER_URL: &str = "https://accounts.google.com";

/// OAuth scopes requested on top of `openid`.
pub const OAUTH_SCOPES: [&str; 2] = ["email", "https://www.googleapis.com/auth/drive.file"];

/// Maximum number of records returned by a single search.
pub const SEARCH_PAGE_SIZE: i32 = 50;

/// Fields requested from Drive for each file in a search.
pub const SEARCH_FIELDS: &str = "files(id,name,mimeType,webViewLink,createdTime)";

/// Fields requested from Drive for a freshly created file.
pub const UPLOAD_FIELDS: &str = "id,webViewLink";

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Largest `/demo_login` form body accepted.
pub const DEMO_FORM_MAX_BYTES: usize = 4 * 1024;

/// Session expires after this many hours without a request.
pub const SESSION_INACTIVITY_HOURS: i64 = 8;

/// Access tokens this close to expiry are refreshed before use.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

pub const SESSION_COOKIE_NAME: &str = "drivegate_session";

/// Placeholder tokens stored for demo logins, never accepted by Drive.
pub const DEMO_ACCESS_TOKEN: &str = "demo_access_token_placeholder";
pub const DEMO_REFRESH_TOKEN: &str = "demo_refresh_token_placeholder";

pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey {
    /// Authenticated user's email address
    Email,
    /// Drive access/refresh token pair
    DriveToken,
    /// State, nonce and PKCE verifier for a login in flight
    PendingLogin,
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        match self {
            SessionKey::Email => "email",
            SessionKey::DriveToken => "drive_token",
            SessionKey::PendingLogin => "pending_login",
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

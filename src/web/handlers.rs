//! Web UI and API handlers
//!
//! Handles sign-in, the landing page and the JSON API used by the browser app.

use std::borrow::Cow;
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use askama::Template;
use chrono::Utc;
use http::{
    HeaderValue, Method,
    header::{
        CACHE_CONTROL, CONTENT_TYPE, LOCATION, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
        X_FRAME_OPTIONS,
    },
};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{
    Request, Response, StatusCode,
    body::{Bytes, Incoming},
};
use serde::Serialize;
use tower_sessions::Session;
use tracing::{debug, error, info, instrument, warn};

use crate::access::AccessPolicy;
use crate::auth::{AuthorizationRequest, DriveCredentials, IdentityProvider, PendingLogin};
use crate::constants::{
    AUTH_FAILED_MESSAGE, DEFAULT_MAX_UPLOAD_BYTES, DEMO_ACCESS_TOKEN, DEMO_FORM_MAX_BYTES,
    DEMO_REFRESH_TOKEN, SessionKey,
};
use crate::error::{ErrorKind, GatewayError};
use crate::storage::{StorageProvider, UploadRequest};
use crate::upload::{BufferedUpload, extract_boundary};
use crate::web::serde::{
    DemoLoginForm, ErrorBody, FilesResponse, UploadResponse, UploadedFileInfo, UserResponse,
};
use crate::web::templates::IndexTemplate;

/// What a `/api/tab/<tab>/<action>` request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TabAction {
    Files,
    Upload,
}

/// Split `/api/tab/<tab>/<action>` into its percent-decoded tab key and action
pub(crate) fn parse_tab_route(path: &str) -> Option<(Cow<'_, str>, TabAction)> {
    let (tab, action) = path.strip_prefix("/api/tab/")?.split_once('/')?;
    let action = match action {
        "files" => TabAction::Files,
        "upload" => TabAction::Upload,
        _ => return None,
    };
    let tab = urlencoding::decode(tab).ok()?;
    if tab.is_empty() || tab.contains('/') {
        return None;
    }
    Some((tab, action))
}

/// Checks the `state` returned by the provider against the login in flight
pub(crate) fn verify_state(
    pending: Option<PendingLogin>,
    returned: Option<&str>,
) -> Result<PendingLogin, GatewayError> {
    let pending = pending.ok_or(GatewayError::StateMissing("session"))?;
    let returned = returned
        .filter(|state| !state.is_empty())
        .ok_or(GatewayError::StateMissing("request URL"))?;
    if !pending.state_matches(returned) {
        return Err(GatewayError::StateMismatch);
    }
    Ok(pending)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// `path?error=<message>`, or just `path`
fn with_error(path: &str, error: Option<&str>) -> String {
    match error {
        Some(error) => format!(
            "{path}?{}",
            form_urlencoded::Serializer::new(String::new())
                .append_pair("error", error)
                .finish()
        ),
        None => path.to_string(),
    }
}

fn redirect(location: &str) -> Result<Response<Full<Bytes>>, GatewayError> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .header(CACHE_CONTROL, "no-store")
        .body(Full::new(Bytes::new()))
        .map_err(GatewayError::from)
}

/// Return with a 500 response
fn respond_500(msg: &impl ToString) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(msg.to_string())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Web handler for the portal UI and API endpoints
pub struct WebHandler {
    access: Arc<AccessPolicy>,
    identity: Arc<dyn IdentityProvider>,
    storage: Arc<dyn StorageProvider>,
    demo_login_enabled: bool,
    max_upload_bytes: u64,
    upload_dir: PathBuf,
    static_dir: PathBuf,
}

impl WebHandler {
    pub fn new(
        access: Arc<AccessPolicy>,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        Self {
            access,
            identity,
            storage,
            demo_login_enabled: false,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: std::env::temp_dir(),
            static_dir: PathBuf::from("static"),
        }
    }

    pub fn with_demo_login(mut self, enabled: bool) -> Self {
        self.demo_login_enabled = enabled;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Directory the multipart spool files are created in
    pub fn with_upload_dir(mut self, upload_dir: PathBuf) -> Self {
        self.upload_dir = upload_dir;
        self
    }

    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
        session: Session,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let query = query.as_deref();
        let is_api_request = path.starts_with("/api/");

        let result = match (method, path.as_str()) {
            (Method::GET, "/") => self.get_index(query, &session).await,
            (Method::GET, "/login") => self.get_login(query, &session).await,
            (Method::GET, "/callback") => self.get_callback(query, &session).await,
            (Method::GET, "/logout") => self.get_logout(&session).await,
            (Method::GET, "/api/user") => self.get_api_user(&session).await,
            (Method::GET, "/api/tabs") => {
                self.build_json_response(StatusCode::OK, self.access.tabs())
            }
            (method, path) if path.starts_with("/api/tab/") => {
                match (method, parse_tab_route(path)) {
                    (Method::GET, Some((tab, TabAction::Files))) => {
                        self.get_api_files(query, &session, &tab).await
                    }
                    (Method::POST, Some((tab, TabAction::Upload))) => {
                        self.post_api_upload(req, &session, &tab).await
                    }
                    _ => Err(GatewayError::NotFound),
                }
            }
            (Method::GET, "/demo_login") if self.demo_login_enabled => redirect("/"),
            (Method::POST, "/demo_login") if self.demo_login_enabled => {
                self.post_demo_login(req, &session).await
            }
            (Method::GET, path) if path.starts_with("/static/") => {
                self.get_static_file(path).await
            }
            _ => Err(GatewayError::NotFound),
        };

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                match err.kind() {
                    ErrorKind::Upstream | ErrorKind::Internal => {
                        error!(path = %path, error = %err, "Request failed")
                    }
                    _ => debug!(path = %path, error = %err, "Request rejected"),
                }
                if is_api_request || matches!(err, GatewayError::NotFound) {
                    Ok(self.json_error(&err))
                } else {
                    Ok(err.into())
                }
            }
        }
    }

    /// GET / - Landing page, or off to `/login` without a session
    async fn get_index(
        &self,
        query: Option<&str>,
        session: &Session,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let error = query_param(query, "error");
        if self.session_email(session).await?.is_none() {
            return redirect(&with_error("/login", error.as_deref()));
        }
        self.build_html_response(IndexTemplate {
            auth_url: None,
            error,
            demo_login_enabled: self.demo_login_enabled,
        })
    }

    /// GET /login - Start a login and render the page linking to the provider
    async fn get_login(
        &self,
        query: Option<&str>,
        session: &Session,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let AuthorizationRequest { url, pending } = self.identity.authorization_request();
        session
            .insert(SessionKey::PendingLogin.as_ref(), &pending)
            .await?;
        debug!("Stored pending login in session");

        self.build_html_response(IndexTemplate {
            auth_url: Some(url),
            error: query_param(query, "error"),
            demo_login_enabled: self.demo_login_enabled,
        })
    }

    /// GET /callback - Finish the login started at `/login`
    #[instrument(level = "debug", skip_all)]
    async fn get_callback(
        &self,
        query: Option<&str>,
        session: &Session,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let params: HashMap<String, String> =
            form_urlencoded::parse(query.unwrap_or("").as_bytes())
                .into_owned()
                .collect();

        // single use, whatever happens next
        let pending: Option<PendingLogin> =
            session.remove(SessionKey::PendingLogin.as_ref()).await?;

        let pending = match verify_state(pending, params.get("state").map(String::as_str)) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "Rejected OAuth callback");
                session.flush().await?;
                return Err(err);
            }
        };

        let verified = match params.get("code") {
            Some(code) => self.identity.exchange_code(code, &pending).await,
            None => Err(GatewayError::AuthenticationFailed(format!(
                "Provider returned no code (error: {})",
                params.get("error").map(String::as_str).unwrap_or("none")
            ))),
        };
        let verified = match verified {
            Ok(verified) => verified,
            Err(err) => {
                warn!(error = %err, "OAuth callback failed");
                session.flush().await?;
                return redirect(&with_error("/", Some(AUTH_FAILED_MESSAGE)));
            }
        };

        if self.access.access_for(&verified.email).is_empty() {
            warn!(user = %verified.email, "Signed-in user has no accessible tabs");
            session.flush().await?;
            return Err(GatewayError::NoAccessibleTabs(verified.email));
        }

        self.start_session(session, &verified.email, &verified.credentials)
            .await?;
        info!(user = %verified.email, "User logged in");
        redirect("/")
    }

    async fn start_session(
        &self,
        session: &Session,
        email: &str,
        credentials: &DriveCredentials,
    ) -> Result<(), GatewayError> {
        session.cycle_id().await?;
        session.insert(SessionKey::Email.as_ref(), email).await?;
        session
            .insert(SessionKey::DriveToken.as_ref(), credentials)
            .await?;
        Ok(())
    }

    /// GET /logout - Clear the session
    async fn get_logout(&self, session: &Session) -> Result<Response<Full<Bytes>>, GatewayError> {
        let email = self.session_email(session).await?;
        session.flush().await?;
        info!(user = ?email, "User logged out");
        redirect("/")
    }

    /// GET /api/user
    async fn get_api_user(&self, session: &Session) -> Result<Response<Full<Bytes>>, GatewayError> {
        let response = match self.session_email(session).await? {
            Some(email) => {
                let access = self.access.access_for(&email);
                UserResponse::Authenticated {
                    authenticated: true,
                    email,
                    accessible_tabs: access.tabs,
                    folder_map: access.folder_map,
                }
            }
            None => UserResponse::anonymous(),
        };
        self.build_json_response(StatusCode::OK, response)
    }

    /// GET /api/tab/<tab>/files?q=
    #[instrument(level = "debug", skip(self, query, session))]
    async fn get_api_files(
        &self,
        query: Option<&str>,
        session: &Session,
        tab: &str,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let (email, credentials) = self.require_user(session).await?;
        let folder_id = self.access.authorize(&email, tab)?;
        let term = query_param(query, "q")
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty());

        let files = match self
            .storage
            .search(&credentials, folder_id, term.as_deref())
            .await
        {
            Err(GatewayError::StorageUnauthorized(_)) => {
                let credentials = self.refresh_credentials(session, &credentials).await?;
                self.storage
                    .search(&credentials, folder_id, term.as_deref())
                    .await?
            }
            result => result?,
        };
        debug!(user = %email, count = files.len(), "Search complete");

        self.build_json_response(StatusCode::OK, FilesResponse { files })
    }

    /// POST /api/tab/<tab>/upload
    #[instrument(level = "debug", skip(self, req, session))]
    async fn post_api_upload(
        &self,
        req: Request<Incoming>,
        session: &Session,
        tab: &str,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let (email, credentials) = self.require_user(session).await?;
        let folder_id = self.access.authorize(&email, tab)?.map(str::to_string);

        let boundary = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_boundary)
            .ok_or(GatewayError::MissingFile)?;

        // The spool file goes away when `upload` drops, on every path out of here
        let upload = BufferedUpload::from_multipart(
            req.into_body().into_data_stream(),
            boundary,
            &self.upload_dir,
            self.max_upload_bytes,
        )
        .await?;

        info!(
            user = %email,
            file_name = %upload.file_name(),
            size = upload.size(),
            "Uploading file"
        );
        let request = |upload: &BufferedUpload| -> Result<UploadRequest, GatewayError> {
            Ok(UploadRequest {
                name: upload.file_name().to_string(),
                mime_type: upload.mime_type().clone(),
                folder_id: folder_id.clone(),
                body: upload.reopen()?,
            })
        };
        let uploaded = match self.storage.upload(&credentials, request(&upload)?).await {
            Err(GatewayError::StorageUnauthorized(_)) => {
                let credentials = self.refresh_credentials(session, &credentials).await?;
                self.storage
                    .upload(&credentials, request(&upload)?)
                    .await?
            }
            result => result?,
        };

        self.build_json_response(
            StatusCode::OK,
            UploadResponse {
                success: true,
                file: UploadedFileInfo {
                    name: upload.file_name().to_string(),
                    web_view_link: uploaded.web_view_link,
                    id: uploaded.id,
                },
            },
        )
    }

    /// POST /demo_login - Sign in as a listed identity without the provider
    async fn post_demo_login(
        &self,
        req: Request<Incoming>,
        session: &Session,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let body = Limited::new(req.into_body(), DEMO_FORM_MAX_BYTES)
            .collect()
            .await
            .map_err(|err| {
                if err.is::<LengthLimitError>() {
                    GatewayError::PayloadTooLarge(DEMO_FORM_MAX_BYTES as u64)
                } else {
                    GatewayError::Hyper(err.to_string())
                }
            })?
            .to_bytes();
        let form = DemoLoginForm::parse(&body);

        if form.email.is_empty() || !self.access.is_known_identity(&form.email) {
            warn!(user = %form.email, "Demo login refused");
            return self.build_html_response(IndexTemplate {
                auth_url: None,
                error: Some(format!(
                    "Demo login failed for '{}'. Email not authorized.",
                    form.email
                )),
                demo_login_enabled: true,
            });
        }

        let credentials = DriveCredentials {
            access_token: DEMO_ACCESS_TOKEN.into(),
            refresh_token: Some(DEMO_REFRESH_TOKEN.into()),
            expires_at: None,
        };
        self.start_session(session, &form.email, &credentials)
            .await?;
        info!(user = %form.email, "Demo login");
        redirect("/")
    }

    /// GET /static/<file>
    async fn get_static_file(&self, path: &str) -> Result<Response<Full<Bytes>>, GatewayError> {
        let file_path = path.strip_prefix("/static/").unwrap_or("");

        // Prevent directory traversal attacks
        if file_path.is_empty() || file_path.contains("..") || file_path.contains('\\') {
            return Err(GatewayError::NotFound);
        }

        let content = match tokio::fs::read(self.static_dir.join(file_path)).await {
            Ok(content) => content,
            Err(err) => {
                debug!(file_path, error = %err, "Static file not found");
                return Err(GatewayError::NotFound);
            }
        };

        let content_type = mime_guess::from_path(file_path).first_or_octet_stream();
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type.as_ref())
            .header(CACHE_CONTROL, "public, max-age=3600")
            .header(X_CONTENT_TYPE_OPTIONS, "nosniff")
            .body(Full::new(Bytes::from(content)))
            .map_err(GatewayError::from)
    }

    async fn session_email(&self, session: &Session) -> Result<Option<String>, GatewayError> {
        Ok(session.get::<String>(SessionKey::Email.as_ref()).await?)
    }

    /// Helper: the signed-in identity and its Drive credentials, or 401.
    /// Expired credentials are refreshed first.
    async fn require_user(
        &self,
        session: &Session,
    ) -> Result<(String, DriveCredentials), GatewayError> {
        let email = self
            .session_email(session)
            .await?
            .ok_or(GatewayError::NotAuthenticated)?;
        let credentials: DriveCredentials = session
            .get(SessionKey::DriveToken.as_ref())
            .await?
            .ok_or(GatewayError::NotAuthenticated)?;
        if credentials.is_expired(Utc::now()) {
            debug!(user = %email, "Access token expired");
            let credentials = self.refresh_credentials(session, &credentials).await?;
            return Ok((email, credentials));
        }
        Ok((email, credentials))
    }

    /// Swap the session's credentials for refreshed ones. The session ends
    /// when the provider won't refresh them.
    async fn refresh_credentials(
        &self,
        session: &Session,
        stale: &DriveCredentials,
    ) -> Result<DriveCredentials, GatewayError> {
        match self.identity.refresh_credentials(stale).await {
            Ok(fresh) => {
                session
                    .insert(SessionKey::DriveToken.as_ref(), &fresh)
                    .await?;
                debug!("Stored refreshed access token in session");
                Ok(fresh)
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed, ending session");
                session.flush().await?;
                Err(GatewayError::NotAuthenticated)
            }
        }
    }

    /// Helper: Build HTML response with security headers including CSP
    fn build_html_response(
        &self,
        html: impl Template,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .header(
                "Content-Security-Policy",
                "default-src 'self'; script-src 'self'; style-src 'self'; connect-src 'self'; img-src 'self' data:;",
            )
            .header(CACHE_CONTROL, "no-store")
            .header(X_CONTENT_TYPE_OPTIONS, "nosniff")
            .header(X_FRAME_OPTIONS, "DENY")
            .header(REFERRER_POLICY, "strict-origin-when-cross-origin")
            .body(Full::new(Bytes::from(html.render()?)))
            .map_err(GatewayError::from)
    }

    fn build_json_response(
        &self,
        status: StatusCode,
        json: impl Serialize,
    ) -> Result<Response<Full<Bytes>>, GatewayError> {
        let body = serde_json::to_string(&json).inspect_err(|err| {
            debug!("Failed to serialize JSON response: {err:?}");
        })?;

        let mut res = Response::new(Full::new(Bytes::from(body)));

        *res.status_mut() = status;

        res.headers_mut().extend(vec![
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (
                REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
        ]);

        Ok(res)
    }

    fn json_error(&self, err: &GatewayError) -> Response<Full<Bytes>> {
        let body = ErrorBody {
            error: err.public_message(),
        };
        match self.build_json_response(err.status_code(), body) {
            Ok(response) => response,
            Err(build_err) => {
                respond_500(&format!("Failed to build error response: {build_err}"))
            }
        }
    }
}


use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as TokenLifetime, Utc};
use secret_string::SecretString;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::debug;

use crate::auth::{
    AuthorizationRequest, DriveCredentials, IdentityProvider, PendingLogin, VerifiedIdentity,
};
use crate::error::{GatewayError, StorageOperation};
use crate::logging::setup_test_logging;
use crate::server::Server;
use crate::storage::{FileRecord, StorageProvider, UploadRequest, UploadedFile};

/// Code the fake provider refuses to exchange
pub(crate) const REJECTED_CODE: &str = "invalid";

/// Identity provider that signs in whoever the `code` names.
#[derive(Default)]
pub(crate) struct FakeIdentityProvider {
    counter: AtomicUsize,
    issued_states: Mutex<Vec<String>>,
    /// Hand out access tokens that have already expired
    pub(crate) issue_expired: AtomicBool,
    pub(crate) fail_refresh: AtomicBool,
    refreshes: AtomicUsize,
}

impl FakeIdentityProvider {
    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub(crate) fn last_state(&self) -> String {
        self.issued_states
            .lock()
            .expect("Poisoned state lock")
            .last()
            .cloned()
            .expect("No login was started")
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn authorization_request(&self) -> AuthorizationRequest {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let state = format!("state-{n}");
        self.issued_states
            .lock()
            .expect("Poisoned state lock")
            .push(state.clone());
        AuthorizationRequest {
            url: format!("https://idp.example.com/authorize?state={state}"),
            pending: PendingLogin {
                state: SecretString::new(state),
                nonce: SecretString::new(format!("nonce-{n}")),
                pkce_verifier: SecretString::new(format!("verifier-{n}")),
            },
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<VerifiedIdentity, GatewayError> {
        if code == REJECTED_CODE || pending.nonce.is_empty() {
            return Err(GatewayError::AuthenticationFailed(
                "fake provider refused the code".to_string(),
            ));
        }
        let lifetime = if self.issue_expired.load(Ordering::SeqCst) {
            TokenLifetime::minutes(-5)
        } else {
            TokenLifetime::hours(1)
        };
        Ok(VerifiedIdentity {
            email: code.to_string(),
            credentials: DriveCredentials {
                access_token: SecretString::new(format!("token-for-{code}")),
                refresh_token: Some(SecretString::new(format!("refresh-for-{code}"))),
                expires_at: Some(Utc::now() + lifetime),
            },
        })
    }

    async fn refresh_credentials(
        &self,
        credentials: &DriveCredentials,
    ) -> Result<DriveCredentials, GatewayError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let identity = credentials
            .refresh_token
            .as_ref()
            .and_then(|token| token.value().strip_prefix("refresh-for-"))
            .filter(|_| !self.fail_refresh.load(Ordering::SeqCst))
            .ok_or_else(|| {
                GatewayError::AuthenticationFailed("fake provider refused the refresh".to_string())
            })?;
        Ok(DriveCredentials {
            access_token: SecretString::new(format!("refreshed-token-for-{identity}")),
            refresh_token: credentials.refresh_token.clone(),
            expires_at: Some(Utc::now() + TokenLifetime::hours(1)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedSearch {
    pub(crate) folder_id: Option<String>,
    pub(crate) term: Option<String>,
    pub(crate) access_token: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedUpload {
    pub(crate) name: String,
    pub(crate) mime_type: String,
    pub(crate) folder_id: Option<String>,
    pub(crate) content: Vec<u8>,
    pub(crate) access_token: String,
}

/// Storage provider that records every call, and fails them all when told to.
#[derive(Default)]
pub(crate) struct FakeStorage {
    pub(crate) fail: AtomicBool,
    rejected_tokens: Mutex<HashSet<String>>,
    searches: Mutex<Vec<RecordedSearch>>,
    uploads: Mutex<Vec<RecordedUpload>>,
}

impl FakeStorage {
    /// Answer calls made with `token` as Drive answers a revoked token
    pub(crate) fn reject_token(&self, token: &str) {
        self.rejected_tokens
            .lock()
            .expect("Poisoned token lock")
            .insert(token.to_string());
    }

    fn is_rejected(&self, credentials: &DriveCredentials) -> bool {
        self.rejected_tokens
            .lock()
            .expect("Poisoned token lock")
            .contains(credentials.access_token.value())
    }

    pub(crate) fn searches(&self) -> Vec<RecordedSearch> {
        self.searches.lock().expect("Poisoned search lock").clone()
    }

    pub(crate) fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().expect("Poisoned upload lock").clone()
    }
}

#[async_trait]
impl StorageProvider for FakeStorage {
    async fn search(
        &self,
        credentials: &DriveCredentials,
        folder_id: Option<&str>,
        term: Option<&str>,
    ) -> Result<Vec<FileRecord>, GatewayError> {
        self.searches
            .lock()
            .expect("Poisoned search lock")
            .push(RecordedSearch {
                folder_id: folder_id.map(str::to_string),
                term: term.map(str::to_string),
                access_token: credentials.access_token.value().to_string(),
            });
        if self.is_rejected(credentials) {
            return Err(GatewayError::StorageUnauthorized(StorageOperation::Search));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::upstream(
                StorageOperation::Search,
                &"quota exceeded for folder-secret",
            ));
        }
        Ok(vec![FileRecord {
            id: "file-1".to_string(),
            name: "minutes-2024-01.pdf".to_string(),
            mime_type: Some("application/pdf".to_string()),
            web_view_link: Some("https://drive.google.com/file/d/file-1/view".to_string()),
            created_time: None,
        }])
    }

    async fn upload(
        &self,
        credentials: &DriveCredentials,
        request: UploadRequest,
    ) -> Result<UploadedFile, GatewayError> {
        let mut body = request.body;
        let mut content = Vec::new();
        body.read_to_end(&mut content)?;
        self.uploads
            .lock()
            .expect("Poisoned upload lock")
            .push(RecordedUpload {
                name: request.name.clone(),
                mime_type: request.mime_type.essence_str().to_string(),
                folder_id: request.folder_id,
                content,
                access_token: credentials.access_token.value().to_string(),
            });
        if self.is_rejected(credentials) {
            return Err(GatewayError::StorageUnauthorized(StorageOperation::Upload));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::upstream(
                StorageOperation::Upload,
                &"storage quota exceeded",
            ));
        }
        Ok(UploadedFile {
            id: "uploaded-1".to_string(),
            web_view_link: "https://drive.google.com/file/d/uploaded-1/view".to_string(),
        })
    }
}

/// A running server wired to the fakes, stopped on drop.
pub(crate) struct TestServer {
    pub(crate) port: u16,
    pub(crate) identity: Arc<FakeIdentityProvider>,
    pub(crate) storage: Arc<FakeStorage>,
    pub(crate) upload_dir: TempDir,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    /// Keeps cookies, never follows redirects
    pub(crate) fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build client")
    }

    /// Walks `/login` then `/callback` as the provider would send `email` back
    pub(crate) async fn login(&self, client: &reqwest::Client, email: &str) -> reqwest::Response {
        let res = client
            .get(self.url("/login"))
            .send()
            .await
            .expect("Failed to fetch /login");
        assert_eq!(res.status(), reqwest::StatusCode::OK);

        let state = self.identity.last_state();
        client
            .get(self.url("/callback"))
            .query(&[("code", email), ("state", state.as_str())])
            .send()
            .await
            .expect("Failed to call /callback")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) fn test_access_config() -> PathBuf {
    PathBuf::from("test_config/access.json")
}

async fn wait_for_port(port: u16) {
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("Server on port {port} never started");
}

pub(crate) async fn start_test_server(configure: impl FnOnce(Server) -> Server) -> TestServer {
    setup_test_logging();

    let identity = Arc::new(FakeIdentityProvider::default());
    let storage = Arc::new(FakeStorage::default());
    let upload_dir = TempDir::new().expect("Failed to create upload dir");

    let (server, port) = Server::test_mode(test_access_config())
        .await
        .expect("Failed to create test server");
    let server = configure(
        server
            .with_identity_provider(identity.clone())
            .with_storage_provider(storage.clone())
            .with_upload_dir(upload_dir.path().to_path_buf()),
    );

    let handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("Server error: {}", e);
        }
    });
    wait_for_port(port).await;
    debug!(port, "Test server is up");

    TestServer {
        port,
        identity,
        storage,
        upload_dir,
        handle,
    }
}

pub(crate) fn assert_dir_empty(path: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(path)
        .expect("Failed to read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    assert!(leftovers.is_empty(), "Leftover files: {leftovers:?}");
}

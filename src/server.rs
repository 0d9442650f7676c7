//! HTTP/HTTPS server setup and lifecycle management.
//!
//! Loads the access policy, wires the identity and storage providers into the
//! web handler, and serves it with optional TLS.

use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rand::Rng;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use secret_string::SecretString;
use sha2::{Digest, Sha512};
use tokio::fs::File;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::Key;
use tower_sessions::cookie::time::Duration;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::{debug, error, info, warn};

use crate::access::AccessPolicy;
use crate::auth::{IdentityProvider, OAuthClient};
use crate::cli::Cli;
use crate::constants::{SESSION_COOKIE_NAME, SESSION_INACTIVITY_HOURS};
use crate::error::GatewayError;
use crate::logging::LoggingSpanner;
use crate::storage::{DriveStorage, StorageProvider};
use crate::web::handlers::WebHandler;
use crate::web::service::WebService;

/// Main server struct holding configuration and state.
pub struct Server {
    bind_address: String,
    port: NonZeroU16,
    access_config: PathBuf,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    session_secret: Option<SecretString>,
    issuer_url: String,
    frontend_url: Option<String>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    demo_login: bool,
    max_upload_bytes: u64,
    upload_dir: Option<PathBuf>,

    identity: Option<Arc<dyn IdentityProvider>>,
    storage: Option<Arc<dyn StorageProvider>>,
}

impl Server {
    pub fn new(cli: Cli) -> Self {
        Self {
            bind_address: cli.host,
            port: cli.port,
            access_config: cli.access_config,
            client_id: cli.client_id,
            client_secret: cli.client_secret,
            session_secret: cli.session_secret,
            issuer_url: cli.issuer_url,
            frontend_url: cli
                .frontend_url
                .map(|url| url.trim_end_matches('/').to_string()),
            tls_cert: cli.tls_cert,
            tls_key: cli.tls_key,
            demo_login: cli.enable_demo_login,
            max_upload_bytes: cli.max_upload_bytes,
            upload_dir: cli.upload_dir,
            identity: None,
            storage: None,
        }
    }

    /// Use this identity provider instead of discovering one from the issuer
    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use this storage provider instead of Google Drive
    pub fn with_storage_provider(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_demo_login(mut self, enabled: bool) -> Self {
        self.demo_login = enabled;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_upload_dir(mut self, upload_dir: PathBuf) -> Self {
        self.upload_dir = Some(upload_dir);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    #[cfg(test)]
    /// Create a server instance for testing that binds to a random available port
    pub(crate) async fn test_mode(access_config: PathBuf) -> Result<(Self, u16), GatewayError> {
        use crate::constants::DEFAULT_ISSUER_URL;

        let host = "127.0.0.1".to_string();
        let listener = TcpListener::bind(format!("{host}:0")).await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let server = Server::new(Cli {
            host,
            port: NonZeroU16::try_from(port).map_err(|_| {
                GatewayError::Other(format!("Failed to convert port '{port}' to NonZeroU16"))
            })?,
            access_config,
            client_id: None,
            client_secret: None,
            session_secret: Some(SecretString::new("drivegate-test-session-secret")),
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            frontend_url: None,
            tls_cert: None,
            tls_key: None,
            enable_demo_login: false,
            max_upload_bytes: crate::constants::DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: None,
        });
        Ok((server, port))
    }

    fn base_url(&self, tls_enabled: bool) -> String {
        match &self.frontend_url {
            Some(frontend_url) => frontend_url.clone(),
            None => format!(
                "http{}://{}:{}",
                if tls_enabled { "s" } else { "" },
                self.bind_address,
                self.port
            ),
        }
    }

    /// 64-byte cookie signing key, derived from the configured secret when there is one
    fn session_key(&self) -> Key {
        match &self.session_secret {
            Some(secret) => Key::from(Sha512::digest(secret.value().as_bytes()).as_slice()),
            None => {
                warn!("No session secret configured, sessions will not survive a restart");
                let mut bytes = [0u8; 64];
                rand::rng().fill(&mut bytes);
                Key::from(&bytes[..])
            }
        }
    }

    async fn identity_provider(
        &self,
        tls_enabled: bool,
    ) -> Result<Arc<dyn IdentityProvider>, GatewayError> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(GatewayError::Configuration(
                "Both GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET must be set".to_string(),
            ));
        };
        let redirect_uri = format!("{}/callback", self.base_url(tls_enabled));
        let client =
            OAuthClient::new(&self.issuer_url, client_id, client_secret, &redirect_uri).await?;
        Ok(Arc::new(client))
    }

    fn storage_provider(&self) -> Result<Arc<dyn StorageProvider>, GatewayError> {
        match &self.storage {
            Some(storage) => Ok(storage.clone()),
            None => Ok(Arc::new(DriveStorage::new()?)),
        }
    }

    pub async fn run(self) -> Result<(), GatewayError> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        let addr: SocketAddr = addr.parse().map_err(|err| {
            GatewayError::Configuration(format!("Failed to parse address '{addr}': {err}"))
        })?;

        let tls_enabled = match (&self.tls_cert, &self.tls_key) {
            (Some(_), Some(_)) => true,
            (None, None) => false,
            _ => {
                error!("Both TLS certificate and key must be provided to enable TLS");
                return Err(GatewayError::Configuration(
                    "Both TLS certificate and key must be provided to enable TLS".to_string(),
                ));
            }
        };

        // Several crates in the tree pull in rustls, pick one provider for all of them
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let access = Arc::new(AccessPolicy::from_file(&self.access_config).await?);
        let identity = self.identity_provider(tls_enabled).await?;
        let storage = self.storage_provider()?;

        if self.demo_login {
            warn!("Demo login is enabled, anyone can sign in as a listed user");
        }

        let web_handler = Arc::new(
            WebHandler::new(access, identity, storage)
                .with_demo_login(self.demo_login)
                .with_max_upload_bytes(self.max_upload_bytes)
                .with_upload_dir(self.upload_dir.clone().unwrap_or_else(std::env::temp_dir)),
        );

        let session_layer = SessionManagerLayer::new(MemoryStore::default())
            .with_name(SESSION_COOKIE_NAME)
            .with_secure(tls_enabled)
            .with_http_only(true)
            .with_signed(self.session_key())
            .with_expiry(Expiry::OnInactivity(Duration::hours(
                SESSION_INACTIVITY_HOURS,
            )));

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(LoggingSpanner)
            .on_response(LoggingSpanner);

        let service = ServiceBuilder::new()
            .layer(trace_layer)
            .layer(session_layer)
            .service(WebService::new(web_handler));

        let listening_url = self.base_url(tls_enabled);
        info!(
            access_config = ?self.access_config,
            address = %addr,
            frontend_url = %listening_url,
            issuer_url = %self.issuer_url,
            tls_cert = ?self.tls_cert,
            tls_key = ?self.tls_key,
            demo_login = self.demo_login,
            max_upload_bytes = self.max_upload_bytes,
            "Starting drivegate..."
        );

        let listener = TcpListener::bind(addr).await?;
        info!("Starting server on {}...", listening_url);

        if tls_enabled {
            let certs = self.load_cert().await.inspect_err(|e| {
                error!(tls_cert = ?self.tls_cert, error = %e, "Failed to load TLS certificate");
            })?;
            let key = self.load_private_key().await.inspect_err(|e| {
                error!(tls_key = ?self.tls_key, error = %e, "Failed to load TLS private key");
            })?;

            let mut tls_server_config = ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .inspect_err(|err| error!(error=?err, "Failed to configure TLS server"))?;
            tls_server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
            let tls_acceptor = TlsAcceptor::from(Arc::new(tls_server_config));

            loop {
                let (stream, remote_addr) = listener.accept().await?;
                let tls_acceptor = tls_acceptor.clone();
                let service = TowerToHyperService::new(service.clone());
                debug!(remote_addr = %remote_addr, "Accepted new connection");

                tokio::task::spawn(async move {
                    let tls_stream = match tls_acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            error!(error = %e, remote_addr = %remote_addr, "TLS handshake failed");
                            return;
                        }
                    };
                    // Use auto builder to support both HTTP/1.1 and HTTP/2
                    if let Err(err) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!(
                            error = %err,
                            remote_addr = %remote_addr,
                            "Error serving connection"
                        );
                    }
                });
            }
        } else {
            loop {
                let (stream, remote_addr) = listener.accept().await?;
                let service = TowerToHyperService::new(service.clone());
                debug!(remote_addr = %remote_addr, "Accepted new connection");

                tokio::task::spawn(async move {
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(
                            error = %err,
                            remote_addr = %remote_addr,
                            "Error serving connection"
                        );
                    }
                });
            }
        }
    }

    // Load public certificate from file.
    async fn load_cert(&self) -> Result<Vec<CertificateDer<'static>>, GatewayError> {
        let Some(cert_file) = self.tls_cert.as_ref() else {
            return Err(GatewayError::Configuration(
                "TLS certificate file not specified".to_string(),
            ));
        };
        let certfile = File::open(cert_file).await?;
        let mut reader = BufReader::new(certfile.into_std().await);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::Other(format!("Failed to load certificates: {}", e)))?;
        if certs.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "No certificates found in {}",
                cert_file.display()
            )));
        }
        Ok(certs)
    }

    // Load private key from file.
    async fn load_private_key(&self) -> Result<PrivateKeyDer<'static>, GatewayError> {
        let Some(key_file) = self.tls_key.as_ref() else {
            return Err(GatewayError::Configuration(
                "TLS key file not specified".to_string(),
            ));
        };
        let keyfile = File::open(key_file).await?;
        let mut reader = BufReader::new(keyfile.into_std().await);

        match rustls_pemfile::private_key(&mut reader) {
            Ok(Some(key)) => Ok(key),
            Ok(None) => Err(GatewayError::Other(
                "No private keys found in the key file".to_string(),
            )),
            Err(e) => Err(GatewayError::Other(format!(
                "Failed to load private key: {}",
                e
            ))),
        }
    }
}

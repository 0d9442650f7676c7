use std::num::NonZeroU16;
use std::path::PathBuf;

use clap::Parser;
use secret_string::SecretString;

use crate::constants::{DEFAULT_ISSUER_URL, DEFAULT_MAX_UPLOAD_BYTES};

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(short, long, default_value = "8080", env = "DRIVEGATE_PORT")]
    pub port: NonZeroU16,

    #[clap(long, default_value = "127.0.0.1", env = "DRIVEGATE_HOST")]
    pub host: String,

    /// JSON file mapping users to tabs and tabs to Drive folders
    #[clap(
        short,
        long,
        default_value = "./access.json",
        env = "DRIVEGATE_ACCESS_CONFIG"
    )]
    pub access_config: PathBuf,

    /// OAuth client ID
    #[clap(long, env = "GOOGLE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[clap(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<SecretString>,

    /// Secret the session cookie is signed with, sessions don't survive a restart without it
    #[clap(long, env = "SECRET_KEY", hide_env_values = true)]
    pub session_secret: Option<SecretString>,

    /// OIDC issuer, the discovery document is fetched from here
    #[clap(long, default_value = DEFAULT_ISSUER_URL, env = "DRIVEGATE_ISSUER_URL")]
    pub issuer_url: String,

    /// Public URL of the server (e.g. https://portal.example.com).
    /// The OAuth redirect URI is built from it
    #[clap(long, env = "DRIVEGATE_FRONTEND_URL")]
    pub frontend_url: Option<String>,

    #[clap(long, env = "DRIVEGATE_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[clap(long, env = "DRIVEGATE_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Allow signing in as any listed user without the identity provider.
    /// Never enable in production
    #[clap(long, env = "DRIVEGATE_ENABLE_DEMO_LOGIN")]
    pub enable_demo_login: bool,

    #[clap(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "DRIVEGATE_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: u64,

    /// Where uploads are spooled before being sent to Drive, defaults to the system temp dir
    #[clap(long, env = "DRIVEGATE_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,
}

use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub cache_dir: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,
    pub api_token: String,
}

/// Command-line + environment configuration.
///
/// Credentials (secret access key, operator token) are environment-only so
/// they never show up in process listings.
#[derive(Parser, Debug)]
#[command(author, version, about = "Edge gateway for presigned blob uploads and streaming")]
pub struct Args {
    /// Host to bind to (overrides BLOB_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BLOB_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for the edge cache (overrides BLOB_GATEWAY_CACHE_DIR)
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Object store endpoint URL (overrides BLOB_GATEWAY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Object store region (overrides BLOB_GATEWAY_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Object store bucket (overrides BLOB_GATEWAY_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("BLOB_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("BLOB_GATEWAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing BLOB_GATEWAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading BLOB_GATEWAY_PORT"),
        };
        let env_db = env::var("BLOB_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/blob_gateway.db".into());
        let env_cache =
            env::var("BLOB_GATEWAY_CACHE_DIR").unwrap_or_else(|_| "./data/cache".into());
        let env_endpoint = env::var("BLOB_GATEWAY_S3_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:9000".into());
        let env_region =
            env::var("BLOB_GATEWAY_S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_bucket = env::var("BLOB_GATEWAY_S3_BUCKET").unwrap_or_else(|_| "blobs".into());

        // Credentials have no defaults; missing values are a startup error.
        let access_key_id = env::var("BLOB_GATEWAY_S3_ACCESS_KEY_ID")
            .context("reading BLOB_GATEWAY_S3_ACCESS_KEY_ID")?;
        let secret_access_key = env::var("BLOB_GATEWAY_S3_SECRET_ACCESS_KEY")
            .context("reading BLOB_GATEWAY_S3_SECRET_ACCESS_KEY")?;
        let api_token =
            env::var("BLOB_GATEWAY_API_TOKEN").context("reading BLOB_GATEWAY_API_TOKEN")?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            cache_dir: args.cache_dir.unwrap_or(env_cache),
            s3_endpoint: args.s3_endpoint.unwrap_or(env_endpoint),
            s3_region: args.s3_region.unwrap_or(env_region),
            s3_bucket: args.s3_bucket.unwrap_or(env_bucket),
            s3_access_key_id: access_key_id,
            s3_secret_access_key: secret_access_key,
            api_token,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

//! Blobgate - authenticated upload gateway over Azure Blob storage

use blobgate_server::config::default_public_paths;
use blobgate_server::{run_server, GatewayConfig, VerificationMode};
use clap::{Parser, Subcommand};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "blobgate")]
#[command(about = "Authenticated file upload gateway over Azure Blob storage")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "BLOBGATE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "BLOBGATE_PORT")]
    port: u16,

    /// Azure storage account name
    #[arg(long, default_value = "", env = "AZURE_STORAGE_ACCOUNT_NAME")]
    storage_account: String,

    /// Blob container holding uploads
    #[arg(long, default_value = "", env = "AZURE_STORAGE_CONTAINER_NAME")]
    storage_container: String,

    /// Blob endpoint override (e.g. Azurite)
    #[arg(long, env = "AZURE_STORAGE_ENDPOINT")]
    storage_endpoint: Option<String>,

    /// Service principal tenant for storage access
    #[arg(long, env = "AZURE_TENANT_ID")]
    storage_tenant_id: Option<String>,

    /// Service principal client id for storage access
    #[arg(long, env = "AZURE_CLIENT_ID")]
    storage_client_id: Option<String>,

    /// Service principal client secret for storage access
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    storage_client_secret: Option<String>,

    /// Use in-memory storage (for testing, data will not persist)
    #[arg(long, env = "BLOBGATE_MEMORY_STORE")]
    memory_store: bool,

    /// Maximum upload size in bytes
    #[arg(long, default_value = "52428800", env = "MAX_UPLOAD_SIZE")]
    max_upload_size: u64,

    /// Maximum request body size in bytes
    #[arg(long, default_value = "67108864", env = "MAX_BODY_SIZE")]
    max_body_size: usize,

    /// Extra attempts for transient storage failures
    #[arg(long, default_value = "0", env = "STORAGE_RETRIES")]
    storage_retries: u32,

    /// Token signature checking
    #[arg(long, value_enum, default_value = "unverified", env = "TOKEN_VERIFICATION")]
    verification: VerificationMode,

    /// Tenant issuing bearer tokens
    #[arg(long, env = "MSAL_TENANT_ID")]
    tenant_id: Option<String>,

    /// Application (client) id expected as token audience
    #[arg(long, env = "MSAL_CLIENT_ID")]
    client_id: Option<String>,

    /// Fixed JWKS URL instead of OpenID discovery
    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    /// Expected token issuer
    #[arg(long, env = "TOKEN_ISSUER")]
    issuer: Option<String>,

    /// Clock skew tolerated on token expiry (seconds)
    #[arg(long, default_value = "60", env = "TOKEN_LEEWAY_SECS")]
    token_leeway_secs: u64,

    /// Comma-separated paths served without authentication
    #[arg(long, value_delimiter = ',', env = "PUBLIC_PATHS")]
    public_paths: Vec<String>,

    /// Comma-separated CORS origins
    #[arg(long, value_delimiter = ',', default_value = "*", env = "CORS_ORIGINS")]
    cors_origins: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, env = "BLOBGATE_DEBUG")]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a development token for use with `--verification unverified`
    Token {
        /// Subject object id
        #[arg(long, default_value = "dev-user")]
        oid: String,

        /// User principal name
        #[arg(long, default_value = "dev@example.com")]
        username: String,

        /// Display name
        #[arg(long, default_value = "Dev User")]
        name: String,

        /// HMAC secret the token is signed with
        #[arg(long, default_value = "blobgate-dev-secret", env = "DEV_TOKEN_SECRET")]
        secret: String,
    },
}

fn dev_token(oid: &str, username: &str, name: &str, secret: &str) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "oid": oid,
        "preferred_username": username,
        "name": name,
        "iat": now,
        "exp": now + 24 * 60 * 60,
    });
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Some(Command::Token {
        oid,
        username,
        name,
        secret,
    }) = &args.command
    {
        println!("{}", dev_token(oid, username, name, secret)?);
        return Ok(());
    }

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "blobgate_server={lvl},blobgate_core={lvl},blobgate_storage={lvl},tower_http={lvl}",
                    lvl = log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Blobgate on {}:{}", args.host, args.port);

    if args.memory_store {
        tracing::warn!("Using in-memory storage - data will NOT persist!");
    }
    if args.verification == VerificationMode::Unverified {
        tracing::warn!("Token signatures are NOT verified - for development only!");
    }

    let public_paths = if args.public_paths.is_empty() {
        default_public_paths()
    } else {
        args.public_paths
    };

    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        storage_account: args.storage_account,
        storage_container: args.storage_container,
        storage_endpoint: args.storage_endpoint,
        storage_tenant_id: args.storage_tenant_id,
        storage_client_id: args.storage_client_id,
        storage_client_secret: args.storage_client_secret,
        use_memory_store: args.memory_store,
        max_upload_size: args.max_upload_size,
        max_body_size: args.max_body_size,
        storage_retries: args.storage_retries,
        verification: args.verification,
        tenant_id: args.tenant_id,
        client_id: args.client_id,
        jwks_url: args.jwks_url,
        issuer: args.issuer,
        token_leeway_secs: args.token_leeway_secs,
        public_paths,
        cors_origins: args.cors_origins,
    };

    run_server(config).await
}

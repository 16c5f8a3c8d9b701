//! Bounty Board Server
//!
//! GitHub issue bounties settled in ETH

use std::sync::Arc;
use std::time::Duration;

use bounty_board::auth::TokenAuthority;
use bounty_board::server::AppState;
use bounty_board::{
    BountyLifecycle, Config, EthereumVerifier, GitHubClient, PgStorage, SettlementVerifier,
    VerificationPolicy,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Bounty Board Server");

    let config = Config::load()?;

    // Initialize PostgreSQL storage (required)
    let database_url = std::env::var("DATABASE_URL").map_err(|_| {
        error!("DATABASE_URL environment variable is required");
        anyhow::anyhow!("DATABASE_URL not set")
    })?;

    let storage = Arc::new(PgStorage::new(&database_url).await?);
    info!("PostgreSQL storage initialized");

    // GitHub OAuth client
    let client_id = config.github_client_id().unwrap_or_default();
    let client_secret = config.github_client_secret().unwrap_or_default();
    if client_id.is_empty() || client_secret.is_empty() {
        warn!("GitHub OAuth credentials not configured - login endpoints will fail");
    }
    let github = GitHubClient::new(client_id, client_secret);

    // Settlement verification per the configured policy
    let policy = config.ethereum.verification;
    let verifier: Arc<dyn SettlementVerifier> = match EthereumVerifier::from_config(&config) {
        Ok(v) => Arc::new(v),
        Err(e) if policy == VerificationPolicy::Skip => {
            // Verification never runs under the skip policy, so an
            // unconfigured provider is fine in development.
            warn!("Ethereum RPC not configured ({}); verification is skipped anyway", e);
            Arc::new(EthereumVerifier::new(String::new(), 1, Duration::from_secs(1)))
        }
        Err(e) => {
            error!("Settlement verification is enforced but not configured: {}", e);
            return Err(e);
        }
    };
    info!(
        "Settlement verification policy: {}",
        match policy {
            VerificationPolicy::Enforce => "enforce",
            VerificationPolicy::Skip => "skip",
        }
    );

    let lifecycle = BountyLifecycle::new(storage.clone(), verifier, policy);
    let tokens = TokenAuthority::new(&config.jwt_secret(), config.auth.token_ttl_hours);

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = Arc::new(AppState {
        lifecycle,
        storage,
        github,
        tokens,
        config,
        started_at: std::time::Instant::now(),
    });

    bounty_board::server::run_server(&host, port, state).await?;

    Ok(())
}

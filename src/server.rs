//! Bounty Board Server
//!
//! HTTP surface for the bounty marketplace: GitHub OAuth login, bounty
//! lifecycle endpoints, GitHub repository/issue proxying, tags, stats and
//! reputation lookups.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::{AuthUser, TokenAuthority};
use crate::config::Config;
use crate::error::ApiError;
use crate::github::{GitHubClient, GitHubUser, IssueSummary, RepoSummary};
use crate::lifecycle::{BountyDraft, BountyLifecycle};
use crate::models::{BountyFilter, BountyStatus, NewUser, PublicUser, Reputation, User};
use crate::storage::Storage;

/// GitHub access token accompanying proxy requests.
const GITHUB_TOKEN_HEADER: &str = "X-GitHub-Token";

pub struct AppState {
    pub lifecycle: BountyLifecycle,
    pub storage: Arc<dyn Storage>,
    pub github: GitHubClient,
    pub tokens: TokenAuthority,
    pub config: Config,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/github", get(auth_url_handler))
        .route("/api/auth/github/callback", get(auth_callback_handler))
        .route("/api/auth/me", get(me_handler))
        .route("/api/users/ethereum-address", patch(update_eth_address_handler))
        .route("/api/users/:id/reputation", get(reputation_handler))
        .route("/api/repositories", get(repositories_handler))
        .route("/api/repositories/:owner/:repo/issues", get(repo_issues_handler))
        .route("/api/bounties", get(list_bounties_handler).post(create_bounty_handler))
        .route("/api/bounties/:id", get(get_bounty_handler))
        .route("/api/bounties/:id/claim", patch(claim_bounty_handler))
        .route("/api/bounties/:id/complete", patch(complete_bounty_handler))
        .route("/api/user/bounties", get(user_bounties_handler))
        .route("/api/tags", get(tags_handler))
        .route("/api/stats", get(stats_handler))
        .layer(middleware::from_fn(security_headers))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("SAMEORIGIN"));
    response
}

// ============================================================================
// HEALTH
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    healthy: bool,
    uptime_secs: u64,
    version: String,
    service: String,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "bounty-board".to_string(),
    })
}

// ============================================================================
// AUTH
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthUrlResponse {
    auth_url: String,
}

async fn auth_url_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AuthUrlResponse>, ApiError> {
    if state.config.github_client_id().is_none() {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "GitHub client ID not configured"
        )));
    }

    let auth_url = state.github.authorize_url(
        &state.config.github.redirect_uri,
        &state.config.github.oauth_scope,
    );
    Ok(Json(AuthUrlResponse { auth_url }))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

/// Token plus user payload returned after a successful login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthSession {
    token: String,
    github_token: String,
    user: AuthUser,
}

async fn auth_callback_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<AuthSession>, ApiError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("Invalid OAuth code".into()))?;

    let github_token = state
        .github
        .exchange_code(&code)
        .await
        .map_err(|e| ApiError::Upstream(format!("Authentication failed: {}", e)))?;

    let github_user = state
        .github
        .get_user(&github_token)
        .await
        .map_err(|e| ApiError::Upstream(format!("Authentication failed: {}", e)))?;

    let user = find_or_create_user(&state.storage, &github_user).await?;
    let auth_user = AuthUser::from(&user);
    let token = state.tokens.issue(&auth_user)?;

    info!("User {} logged in", user.username);
    Ok(Json(AuthSession {
        token,
        github_token,
        user: auth_user,
    }))
}

async fn me_handler(user: AuthUser) -> Json<AuthUser> {
    Json(user)
}

/// Look up the user by GitHub identity, creating it (with a zeroed
/// reputation row) on first login.
async fn find_or_create_user(
    storage: &Arc<dyn Storage>,
    github_user: &GitHubUser,
) -> Result<User, ApiError> {
    let github_id = github_user.id.to_string();

    if let Some(user) = storage.get_user_by_github_id(&github_id).await? {
        return Ok(user);
    }

    let user = storage
        .create_user(NewUser {
            username: github_user.login.clone(),
            github_id,
            email: github_user.email.clone(),
            avatar_url: github_user.avatar_url.clone(),
            name: github_user.name.clone(),
            bio: github_user.bio.clone(),
        })
        .await?;
    storage.init_reputation(user.id).await?;

    Ok(user)
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEthAddressRequest {
    #[serde(default)]
    eth_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenWithUser {
    token: String,
    user: PublicUser,
}

async fn update_eth_address_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<UpdateEthAddressRequest>,
) -> Result<Json<TokenWithUser>, ApiError> {
    if body.eth_address.is_empty() {
        return Err(ApiError::InvalidInput("Ethereum address is required".into()));
    }

    let updated = state
        .storage
        .update_user_eth_address(user.id, &body.eth_address)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    // Re-issue the token so the embedded address stays current
    let token = state.tokens.issue(&AuthUser::from(&updated))?;

    Ok(Json(TokenWithUser {
        token,
        user: PublicUser::from(&updated),
    }))
}

async fn reputation_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
) -> Result<Json<Reputation>, ApiError> {
    let reputation = state
        .storage
        .get_reputation(user_id)
        .await?
        .unwrap_or_else(|| Reputation::empty(user_id));
    Ok(Json(reputation))
}

// ============================================================================
// REPOSITORIES (GitHub proxy with DB fallback)
// ============================================================================

fn github_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(GITHUB_TOKEN_HEADER)?
        .to_str()
        .ok()
        .filter(|t| !t.is_empty())
}

async fn repositories_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    match github_token(&headers) {
        Some(token) => {
            let repos = state
                .github
                .get_user_repos(token)
                .await
                .map_err(|e| ApiError::Upstream(format!("Error fetching repositories: {}", e)))?;
            let summaries: Vec<RepoSummary> = repos.into_iter().map(Into::into).collect();
            Ok(Json(summaries).into_response())
        }
        None => {
            // No GitHub token accompanying the request; serve what we know
            let repos = state.storage.get_repositories_by_owner(user.id).await?;
            Ok(Json(repos).into_response())
        }
    }
}

async fn repo_issues_handler(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Vec<IssueSummary>>, ApiError> {
    let token = github_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("GitHub authentication required".into()))?;

    let issues = state
        .github
        .get_repo_issues(token, &owner, &repo)
        .await
        .map_err(|e| ApiError::Upstream(format!("Error fetching repository issues: {}", e)))?;

    Ok(Json(issues.into_iter().map(Into::into).collect()))
}

// ============================================================================
// BOUNTIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListBountiesQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn parse_status_filter(status: Option<&str>) -> Result<Option<BountyStatus>, ApiError> {
    match status {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| ApiError::InvalidInput("Invalid status filter".into())),
    }
}

async fn list_bounties_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBountiesQuery>,
) -> Result<Response, ApiError> {
    let filter = BountyFilter::new(
        parse_status_filter(query.status.as_deref())?,
        query.search.filter(|s| !s.is_empty()),
        query.limit,
        query.offset,
    );

    let bounties = state.lifecycle.list(&filter).await?;
    Ok(Json(bounties).into_response())
}

async fn get_bounty_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let bounty = state.lifecycle.details(id).await?;
    Ok(Json(bounty).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBountyRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: f64,
    pub currency: Option<String>,
    #[serde(default)]
    pub issue_url: String,
    pub issue_number: Option<i32>,
    pub repository_id: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

async fn create_bounty_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateBountyRequest>,
) -> Result<Response, ApiError> {
    let bounty = state
        .lifecycle
        .create(
            user.id,
            BountyDraft {
                title: body.title,
                description: body.description,
                amount: body.amount,
                currency: body.currency,
                issue_url: body.issue_url,
                issue_number: body.issue_number,
                repository_id: body.repository_id,
                tags: body.tags,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(bounty)).into_response())
}

async fn claim_bounty_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let bounty = state.lifecycle.claim(id, user.id).await?;
    Ok(Json(bounty).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBountyRequest {
    #[serde(default)]
    pub transaction_hash: String,
}

async fn complete_bounty_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(body): Json<CompleteBountyRequest>,
) -> Result<Response, ApiError> {
    let bounty = state
        .lifecycle
        .complete(id, user.id, &body.transaction_hash)
        .await?;
    Ok(Json(bounty).into_response())
}

#[derive(Debug, Deserialize)]
struct UserBountiesQuery {
    role: Option<String>,
}

async fn user_bounties_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<UserBountiesQuery>,
) -> Result<Response, ApiError> {
    let bounties = match query.role.as_deref() {
        Some("creator") => state.lifecycle.list_for_creator(user.id).await?,
        Some("solver") => state.lifecycle.list_for_claimer(user.id).await?,
        _ => return Err(ApiError::InvalidInput("Invalid role specified".into())),
    };
    Ok(Json(bounties).into_response())
}

// ============================================================================
// TAGS & STATS
// ============================================================================

async fn tags_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let tags = state.storage.list_tags().await?;
    Ok(Json(tags).into_response())
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let stats = state.storage.dashboard_stats().await?;
    Ok(Json(stats).into_response())
}

// ============================================================================
// SERVER
// ============================================================================

/// Run the server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Bounty Board server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

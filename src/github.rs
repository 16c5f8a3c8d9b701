//! GitHub API client
//!
//! Handles the OAuth web flow (authorize URL, code-for-token exchange) and
//! the authenticated fetches the UI needs: the logged-in user, their
//! repositories, and a repository's open issues.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_AGENT: &str = "bounty-board/0.1.0";

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenResponse {
    Success {
        access_token: String,
    },
    Failure {
        error: String,
        error_description: Option<String>,
    },
}

/// The authenticated user as GitHub reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRepo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub owner: GitHubAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAccount {
    pub id: u64,
    pub login: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub id: u64,
    pub number: u32,
    pub title: String,
    pub body: Option<String>,
    pub html_url: String,
    pub state: String,
    pub user: GitHubAccount,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubLabel {
    pub id: u64,
    pub name: String,
    pub color: Option<String>,
}

/// Repository projection returned by `/api/repositories`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummary {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub url: String,
    pub owner: AccountSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: u64,
    pub login: String,
    pub avatar_url: Option<String>,
}

/// Issue projection returned by `/api/repositories/{owner}/{repo}/issues`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub id: u64,
    pub number: u32,
    pub title: String,
    pub body: String,
    pub url: String,
    pub state: String,
    pub user: AccountSummary,
    pub labels: Vec<LabelSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSummary {
    pub id: u64,
    pub name: String,
    pub color: Option<String>,
}

impl From<GitHubAccount> for AccountSummary {
    fn from(account: GitHubAccount) -> Self {
        Self {
            id: account.id,
            login: account.login,
            avatar_url: account.avatar_url,
        }
    }
}

impl From<GitHubRepo> for RepoSummary {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            id: repo.id,
            name: repo.name,
            full_name: repo.full_name,
            description: repo.description.unwrap_or_default(),
            url: repo.html_url,
            owner: repo.owner.into(),
        }
    }
}

impl From<GitHubIssue> for IssueSummary {
    fn from(issue: GitHubIssue) -> Self {
        Self {
            id: issue.id,
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            url: issue.html_url,
            state: issue.state,
            user: issue.user.into(),
            labels: issue
                .labels
                .into_iter()
                .map(|l| LabelSummary {
                    id: l.id,
                    name: l.name,
                    color: l.color,
                })
                .collect(),
        }
    }
}

impl GitHubClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id,
            client_secret,
        }
    }

    /// Build the authorization URL the client redirects the user to.
    pub fn authorize_url(&self, redirect_uri: &str, scope: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}",
            GITHUB_AUTHORIZE_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope),
        )
    }

    /// Exchange an OAuth code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        debug!("Exchanging OAuth code for access token");

        let response = self
            .client
            .post(GITHUB_TOKEN_URL)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .context("GitHub token exchange request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("GitHub token exchange HTTP error {}: {}", status, body);
            anyhow::bail!("GitHub token exchange failed: {}", status);
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token exchange response")?;

        match token_response {
            TokenResponse::Success { access_token } => {
                info!("Exchanged OAuth code for access token");
                Ok(access_token)
            }
            TokenResponse::Failure {
                error,
                error_description,
            } => {
                anyhow::bail!(
                    "GitHub API error: {}",
                    error_description.unwrap_or(error)
                )
            }
        }
    }

    fn build_request(&self, url: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Fetch the authenticated user.
    pub async fn get_user(&self, token: &str) -> Result<GitHubUser> {
        let url = format!("{}/user", GITHUB_API_BASE);
        let response = self.build_request(&url, token).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("GitHub user fetch failed: {}", response.status());
        }

        let user: GitHubUser = response
            .json()
            .await
            .context("Failed to parse user response")?;
        info!("Fetched GitHub user {}", user.login);
        Ok(user)
    }

    /// Fetch the authenticated user's repositories, most recently updated first.
    pub async fn get_user_repos(&self, token: &str) -> Result<Vec<GitHubRepo>> {
        let url = format!("{}/user/repos?per_page=100&sort=updated", GITHUB_API_BASE);
        let response = self.build_request(&url, token).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("GitHub repos fetch failed: {}", response.status());
        }

        let repos: Vec<GitHubRepo> = response
            .json()
            .await
            .context("Failed to parse repositories response")?;
        debug!("Fetched {} repositories", repos.len());
        Ok(repos)
    }

    /// Fetch a repository's open issues.
    pub async fn get_repo_issues(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<GitHubIssue>> {
        let url = format!(
            "{}/repos/{}/{}/issues?state=open&per_page=100",
            GITHUB_API_BASE, owner, repo
        );
        let response = self.build_request(&url, token).send().await?;

        if !response.status().is_success() {
            anyhow::bail!(
                "GitHub issues fetch for {}/{} failed: {}",
                owner,
                repo,
                response.status()
            );
        }

        let issues: Vec<GitHubIssue> = response
            .json()
            .await
            .context("Failed to parse issues response")?;
        debug!("Fetched {} issues for {}/{}", issues.len(), owner, repo);
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_encodes_parameters() {
        let client = GitHubClient::new("abc123".to_string(), "secret".to_string());
        let url = client.authorize_url(
            "http://localhost:8080/api/auth/github/callback",
            "user:email,read:user",
        );

        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=abc123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fapi%2Fauth%2Fgithub%2Fcallback"));
        assert!(url.contains("scope=user%3Aemail%2Cread%3Auser"));
    }

    #[test]
    fn test_repo_summary_conversion() {
        let repo = GitHubRepo {
            id: 9,
            name: "widget".to_string(),
            full_name: "acme/widget".to_string(),
            description: None,
            html_url: "https://github.com/acme/widget".to_string(),
            owner: GitHubAccount {
                id: 1,
                login: "acme".to_string(),
                avatar_url: None,
            },
        };

        let summary = RepoSummary::from(repo);
        assert_eq!(summary.description, "");
        assert_eq!(summary.url, "https://github.com/acme/widget");
        assert_eq!(summary.owner.login, "acme");
    }

    #[test]
    fn test_token_response_parses_both_shapes() {
        let ok: TokenResponse =
            serde_json::from_str(r#"{"access_token":"gho_x","token_type":"bearer","scope":""}"#)
                .unwrap();
        assert!(matches!(ok, TokenResponse::Success { .. }));

        let err: TokenResponse = serde_json::from_str(
            r#"{"error":"bad_verification_code","error_description":"The code is incorrect."}"#,
        )
        .unwrap();
        match err {
            TokenResponse::Failure {
                error,
                error_description,
            } => {
                assert_eq!(error, "bad_verification_code");
                assert!(error_description.unwrap().contains("incorrect"));
            }
            _ => panic!("expected failure variant"),
        }
    }
}

//! Domain entities and wire types
//!
//! Field names serialize in camelCase to match the public API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a bounty.
///
/// Transitions are unidirectional: open -> claimed -> completed.
/// `Cancelled` is declared for completeness but nothing produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BountyStatus {
    Open,
    Claimed,
    Completed,
    Cancelled,
}

impl BountyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BountyStatus::Open => "open",
            BountyStatus::Claimed => "claimed",
            BountyStatus::Completed => "completed",
            BountyStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BountyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BountyStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(BountyStatus::Open),
            "claimed" => Ok(BountyStatus::Claimed),
            "completed" => Ok(BountyStatus::Completed),
            "cancelled" => Ok(BountyStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown bounty status: {}", other)),
        }
    }
}

/// Audit trail action recorded per lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityAction {
    Created,
    Claimed,
    Completed,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Claimed => "claimed",
            ActivityAction::Completed => "completed",
        }
    }
}

impl FromStr for ActivityAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ActivityAction::Created),
            "claimed" => Ok(ActivityAction::Claimed),
            "completed" => Ok(ActivityAction::Completed),
            other => Err(anyhow::anyhow!("unknown activity action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub username: String,
    pub github_id: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub eth_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The user projection embedded in bounty details and auth responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i32,
    pub username: String,
    pub github_id: String,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub eth_address: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            github_id: user.github_id.clone(),
            avatar_url: user.avatar_url.clone(),
            name: user.name.clone(),
            eth_address: user.eth_address.clone(),
        }
    }
}

/// Insert payload for lazily-created users (first GitHub login).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub github_id: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: i32,
    pub github_id: i64,
    pub owner_id: i32,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRepository {
    pub github_id: i64,
    pub owner_id: i32,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounty {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub status: BountyStatus,
    pub creator_id: i32,
    pub repository_id: Option<i32>,
    pub issue_number: Option<i32>,
    pub issue_url: String,
    pub claimed_by_id: Option<i32>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub transaction_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for bounty creation. Status is always `open`.
#[derive(Debug, Clone)]
pub struct NewBounty {
    pub title: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub creator_id: i32,
    pub repository_id: Option<i32>,
    pub issue_number: Option<i32>,
    pub issue_url: String,
    pub tags: Vec<String>,
}

/// A bounty enriched with its joined creator/repository/claimer/tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BountyWithDetails {
    #[serde(flatten)]
    pub bounty: Bounty,
    pub creator: PublicUser,
    pub repository: Option<Repository>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<PublicUser>,
}

/// Listing filter for `GET /api/bounties`.
#[derive(Debug, Clone, Default)]
pub struct BountyFilter {
    pub status: Option<BountyStatus>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

pub const DEFAULT_LIST_LIMIT: i64 = 10;

impl BountyFilter {
    pub fn new(
        status: Option<BountyStatus>,
        search: Option<String>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Self {
        Self {
            status,
            search,
            limit: limit.unwrap_or(DEFAULT_LIST_LIMIT).max(0),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i32,
    pub user_id: i32,
    pub bounty_id: Option<i32>,
    pub action: ActivityAction,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reputation {
    pub user_id: i32,
    pub points: i32,
    pub completed_bounties: i32,
    pub created_bounties: i32,
    pub updated_at: DateTime<Utc>,
}

impl Reputation {
    /// The all-zero figure returned for users without a reputation row.
    pub fn empty(user_id: i32) -> Self {
        Self {
            user_id,
            points: 0,
            completed_bounties: 0,
            created_bounties: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_bounties: i64,
    pub total_paid_out: f64,
    pub active_bounties: i64,
    pub completed_bounties: i64,
}

//! Persistence gateway contract
//!
//! The lifecycle manager talks to storage through this trait so the state
//! machine can be exercised against an in-memory implementation in tests
//! while the server runs on PostgreSQL.
//!
//! The three lifecycle writes (`insert_bounty`, `claim_bounty`,
//! `complete_bounty`) are compound operations: each applies the status
//! change together with its activity append and reputation delta as a
//! single atomic unit. Claim and complete are conditional on the current
//! status; a `None` return means the bounty was not in the required state
//! when the write ran.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Activity, Bounty, BountyFilter, BountyWithDetails, DashboardStats, NewBounty, NewRepository,
    NewUser, Repository, Reputation, Tag, User,
};

/// Points credited to the creator when a bounty is created
pub const CREATION_POINTS: i32 = 5;

/// Points credited to the claimer when a bounty is completed
pub const COMPLETION_POINTS: i32 = 10;

#[async_trait]
pub trait Storage: Send + Sync {
    // Users
    async fn get_user(&self, id: i32) -> Result<Option<User>>;
    async fn get_user_by_github_id(&self, github_id: &str) -> Result<Option<User>>;
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn update_user_eth_address(&self, id: i32, eth_address: &str) -> Result<Option<User>>;

    // Repositories
    async fn get_repository(&self, id: i32) -> Result<Option<Repository>>;
    async fn get_repository_by_github_id(&self, github_id: i64) -> Result<Option<Repository>>;
    async fn get_repositories_by_owner(&self, owner_id: i32) -> Result<Vec<Repository>>;
    async fn create_repository(&self, repository: NewRepository) -> Result<Repository>;

    // Bounties
    async fn get_bounty(&self, id: i32) -> Result<Option<Bounty>>;
    async fn get_bounty_with_details(&self, id: i32) -> Result<Option<BountyWithDetails>>;
    async fn list_bounties(&self, filter: &BountyFilter) -> Result<Vec<BountyWithDetails>>;
    async fn list_bounties_by_creator(&self, creator_id: i32) -> Result<Vec<BountyWithDetails>>;
    async fn list_bounties_by_claimer(&self, claimer_id: i32) -> Result<Vec<BountyWithDetails>>;

    /// Insert an open bounty plus its tag links, `created` activity and the
    /// creator's reputation delta, atomically. Tag creation is idempotent.
    async fn insert_bounty(&self, bounty: NewBounty) -> Result<Bounty>;

    /// Transition open -> claimed for `claimer_id`, appending the `claimed`
    /// activity. Returns `None` when the bounty is no longer open.
    async fn claim_bounty(&self, id: i32, claimer_id: i32) -> Result<Option<Bounty>>;

    /// Transition claimed -> completed recording `transaction_hash`,
    /// appending the `completed` activity for `acting_user_id` and crediting
    /// the claimer's reputation. Returns `None` when the bounty is no longer
    /// claimed.
    async fn complete_bounty(
        &self,
        id: i32,
        acting_user_id: i32,
        transaction_hash: &str,
    ) -> Result<Option<Bounty>>;

    // Tags
    async fn list_tags(&self) -> Result<Vec<Tag>>;

    // Activities (audit trail; never consulted for authorization)
    async fn activities_by_user(&self, user_id: i32, limit: i64) -> Result<Vec<Activity>>;

    // Reputation
    async fn get_reputation(&self, user_id: i32) -> Result<Option<Reputation>>;

    /// Initialize a zeroed reputation row if the user has none.
    async fn init_reputation(&self, user_id: i32) -> Result<Reputation>;

    // Stats
    async fn dashboard_stats(&self) -> Result<DashboardStats>;
}

//! Bounty lifecycle state machine
//!
//! Owns the open -> claimed -> completed transitions, their authorization
//! rules and their side effects (activity trail, reputation deltas). All
//! storage writes for a transition happen through one compound storage
//! operation so they land atomically.
//!
//! Settlement verification is governed by the injected policy: `Enforce`
//! consults the verifier before completing, `Skip` bypasses it entirely.

use std::sync::Arc;

use tracing::warn;

use crate::config::VerificationPolicy;
use crate::error::ApiError;
use crate::ethereum::SettlementVerifier;
use crate::models::{BountyFilter, BountyStatus, BountyWithDetails, NewBounty};
use crate::storage::Storage;

/// Creation request, validated before insertion.
#[derive(Debug, Clone)]
pub struct BountyDraft {
    pub title: String,
    pub description: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub issue_url: String,
    pub issue_number: Option<i32>,
    pub repository_id: Option<i32>,
    pub tags: Vec<String>,
}

pub struct BountyLifecycle {
    storage: Arc<dyn Storage>,
    verifier: Arc<dyn SettlementVerifier>,
    policy: VerificationPolicy,
}

impl BountyLifecycle {
    pub fn new(
        storage: Arc<dyn Storage>,
        verifier: Arc<dyn SettlementVerifier>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            storage,
            verifier,
            policy,
        }
    }

    /// Create a new open bounty for `creator_id`.
    ///
    /// Links tags idempotently, appends the `created` activity and credits
    /// the creator's reputation.
    pub async fn create(
        &self,
        creator_id: i32,
        draft: BountyDraft,
    ) -> Result<BountyWithDetails, ApiError> {
        if draft.title.is_empty()
            || draft.description.is_empty()
            || draft.issue_url.is_empty()
            || draft.amount <= 0.0
        {
            return Err(ApiError::InvalidInput("Missing required fields".into()));
        }

        let created = self
            .storage
            .insert_bounty(NewBounty {
                title: draft.title,
                description: draft.description,
                amount: draft.amount,
                currency: draft.currency.unwrap_or_else(|| "ETH".to_string()),
                creator_id,
                repository_id: draft.repository_id,
                issue_number: draft.issue_number,
                issue_url: draft.issue_url,
                tags: draft.tags,
            })
            .await?;

        self.details(created.id).await
    }

    /// Claim an open bounty for `acting_user_id`.
    ///
    /// The creator cannot claim their own bounty. No reputation change on
    /// claim.
    pub async fn claim(
        &self,
        bounty_id: i32,
        acting_user_id: i32,
    ) -> Result<BountyWithDetails, ApiError> {
        let bounty = self
            .storage
            .get_bounty(bounty_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Bounty not found".into()))?;

        if bounty.status != BountyStatus::Open {
            return Err(ApiError::InvalidState(
                "This bounty is not available for claiming".into(),
            ));
        }

        if bounty.creator_id == acting_user_id {
            return Err(ApiError::Forbidden(
                "You cannot claim your own bounty".into(),
            ));
        }

        // The storage write re-checks the status; a concurrent claim that
        // won the race surfaces the same way as arriving late.
        if self
            .storage
            .claim_bounty(bounty_id, acting_user_id)
            .await?
            .is_none()
        {
            return Err(ApiError::InvalidState(
                "This bounty is not available for claiming".into(),
            ));
        }

        self.details(bounty_id).await
    }

    /// Complete a claimed bounty, recording the settlement reference.
    ///
    /// Only the creator may complete. Under the `Enforce` policy the
    /// settlement is verified first and a failed verification aborts the
    /// transition. Credits the claimer's reputation.
    pub async fn complete(
        &self,
        bounty_id: i32,
        acting_user_id: i32,
        transaction_hash: &str,
    ) -> Result<BountyWithDetails, ApiError> {
        if transaction_hash.is_empty() {
            return Err(ApiError::InvalidInput("Transaction hash is required".into()));
        }

        let bounty = self
            .storage
            .get_bounty(bounty_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Bounty not found".into()))?;

        if bounty.status != BountyStatus::Claimed {
            return Err(ApiError::InvalidState(
                "This bounty is not in claimed status".into(),
            ));
        }

        if bounty.creator_id != acting_user_id {
            return Err(ApiError::Forbidden(
                "Only the bounty creator can complete it".into(),
            ));
        }

        if self.policy == VerificationPolicy::Enforce {
            let outcome = self
                .verifier
                .verify(transaction_hash)
                .await
                .map_err(|e| ApiError::Upstream(format!("Settlement verification failed: {}", e)))?;

            if !outcome.success {
                let reason = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
                warn!(
                    "Rejected completion of bounty {}: verification reported {}",
                    bounty_id, reason
                );
                return Err(ApiError::InvalidInput(format!(
                    "Transaction verification failed: {}",
                    reason
                )));
            }
        }

        if self
            .storage
            .complete_bounty(bounty_id, acting_user_id, transaction_hash)
            .await?
            .is_none()
        {
            return Err(ApiError::InvalidState(
                "This bounty is not in claimed status".into(),
            ));
        }

        self.details(bounty_id).await
    }

    /// List bounties matching the filter, newest first.
    pub async fn list(&self, filter: &BountyFilter) -> Result<Vec<BountyWithDetails>, ApiError> {
        Ok(self.storage.list_bounties(filter).await?)
    }

    pub async fn list_for_creator(
        &self,
        creator_id: i32,
    ) -> Result<Vec<BountyWithDetails>, ApiError> {
        Ok(self.storage.list_bounties_by_creator(creator_id).await?)
    }

    pub async fn list_for_claimer(
        &self,
        claimer_id: i32,
    ) -> Result<Vec<BountyWithDetails>, ApiError> {
        Ok(self.storage.list_bounties_by_claimer(claimer_id).await?)
    }

    /// Fetch one enriched bounty.
    pub async fn details(&self, bounty_id: i32) -> Result<BountyWithDetails, ApiError> {
        self.storage
            .get_bounty_with_details(bounty_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Bounty not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::VerifyOutcome;
    use crate::models::{
        Activity, ActivityAction, Bounty, DashboardStats, NewBounty, NewRepository, NewUser,
        PublicUser, Repository, Reputation, Tag, User,
    };
    use crate::storage::{COMPLETION_POINTS, CREATION_POINTS};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // In-memory storage implementing the same compound-write contract as
    // PgStorage, so the state machine is exercised end to end.
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct Inner {
        users: Vec<User>,
        repositories: Vec<Repository>,
        bounties: Vec<Bounty>,
        tags: Vec<Tag>,
        bounty_tags: Vec<(i32, i32)>,
        activities: Vec<Activity>,
        reputation: HashMap<i32, Reputation>,
        next_id: i32,
    }

    impl Inner {
        fn next(&mut self) -> i32 {
            self.next_id += 1;
            self.next_id
        }

        fn bump_reputation(&mut self, user_id: i32, points: i32, completed: i32, created: i32) {
            let entry = self
                .reputation
                .entry(user_id)
                .or_insert_with(|| Reputation::empty(user_id));
            entry.points += points;
            entry.completed_bounties += completed;
            entry.created_bounties += created;
            entry.updated_at = Utc::now();
        }

        fn push_activity(
            &mut self,
            user_id: i32,
            bounty_id: i32,
            action: ActivityAction,
            metadata: Option<String>,
        ) {
            let id = self.next();
            self.activities.push(Activity {
                id,
                user_id,
                bounty_id: Some(bounty_id),
                action,
                metadata,
                created_at: Utc::now(),
            });
        }

        fn hydrate(&self, bounty: &Bounty) -> BountyWithDetails {
            let public = |id: i32| -> Option<PublicUser> {
                self.users.iter().find(|u| u.id == id).map(PublicUser::from)
            };
            let tag_names: Vec<String> = self
                .bounty_tags
                .iter()
                .filter(|(bid, _)| *bid == bounty.id)
                .filter_map(|(_, tid)| self.tags.iter().find(|t| t.id == *tid))
                .map(|t| t.name.clone())
                .collect();

            BountyWithDetails {
                bounty: bounty.clone(),
                creator: public(bounty.creator_id).expect("creator exists"),
                repository: bounty
                    .repository_id
                    .and_then(|id| self.repositories.iter().find(|r| r.id == id).cloned()),
                tags: tag_names,
                claimed_by: bounty.claimed_by_id.and_then(public),
            }
        }
    }

    #[derive(Default)]
    struct MemStorage {
        inner: Mutex<Inner>,
    }

    impl MemStorage {
        fn set_created_at(&self, bounty_id: i32, at: DateTime<Utc>) {
            let mut inner = self.inner.lock().unwrap();
            let bounty = inner
                .bounties
                .iter_mut()
                .find(|b| b.id == bounty_id)
                .unwrap();
            bounty.created_at = at;
        }
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn get_user(&self, id: i32) -> Result<Option<User>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.users.iter().find(|u| u.id == id).cloned())
        }

        async fn get_user_by_github_id(&self, github_id: &str) -> Result<Option<User>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.users.iter().find(|u| u.github_id == github_id).cloned())
        }

        async fn create_user(&self, user: NewUser) -> Result<User> {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next();
            let created = User {
                id,
                username: user.username,
                github_id: user.github_id,
                email: user.email,
                avatar_url: user.avatar_url,
                name: user.name,
                bio: user.bio,
                eth_address: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            inner.users.push(created.clone());
            Ok(created)
        }

        async fn update_user_eth_address(
            &self,
            id: i32,
            eth_address: &str,
        ) -> Result<Option<User>> {
            let mut inner = self.inner.lock().unwrap();
            Ok(inner.users.iter_mut().find(|u| u.id == id).map(|u| {
                u.eth_address = Some(eth_address.to_string());
                u.updated_at = Utc::now();
                u.clone()
            }))
        }

        async fn get_repository(&self, id: i32) -> Result<Option<Repository>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.repositories.iter().find(|r| r.id == id).cloned())
        }

        async fn get_repository_by_github_id(&self, github_id: i64) -> Result<Option<Repository>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .repositories
                .iter()
                .find(|r| r.github_id == github_id)
                .cloned())
        }

        async fn get_repositories_by_owner(&self, owner_id: i32) -> Result<Vec<Repository>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .repositories
                .iter()
                .filter(|r| r.owner_id == owner_id)
                .cloned()
                .collect())
        }

        async fn create_repository(&self, repository: NewRepository) -> Result<Repository> {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next();
            let created = Repository {
                id,
                github_id: repository.github_id,
                owner_id: repository.owner_id,
                name: repository.name,
                full_name: repository.full_name,
                description: repository.description,
                url: repository.url,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            inner.repositories.push(created.clone());
            Ok(created)
        }

        async fn get_bounty(&self, id: i32) -> Result<Option<Bounty>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.bounties.iter().find(|b| b.id == id).cloned())
        }

        async fn get_bounty_with_details(&self, id: i32) -> Result<Option<BountyWithDetails>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bounties
                .iter()
                .find(|b| b.id == id)
                .map(|b| inner.hydrate(b)))
        }

        async fn list_bounties(&self, filter: &BountyFilter) -> Result<Vec<BountyWithDetails>> {
            let inner = self.inner.lock().unwrap();
            let needle = filter.search.as_ref().map(|s| s.to_lowercase());
            let mut matched: Vec<&Bounty> = inner
                .bounties
                .iter()
                .filter(|b| filter.status.map_or(true, |s| b.status == s))
                .filter(|b| {
                    needle.as_ref().map_or(true, |n| {
                        b.title.to_lowercase().contains(n)
                            || b.description.to_lowercase().contains(n)
                    })
                })
                .collect();
            matched.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
            Ok(matched
                .into_iter()
                .skip(filter.offset as usize)
                .take(filter.limit as usize)
                .map(|b| inner.hydrate(b))
                .collect())
        }

        async fn list_bounties_by_creator(
            &self,
            creator_id: i32,
        ) -> Result<Vec<BountyWithDetails>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bounties
                .iter()
                .filter(|b| b.creator_id == creator_id)
                .map(|b| inner.hydrate(b))
                .collect())
        }

        async fn list_bounties_by_claimer(
            &self,
            claimer_id: i32,
        ) -> Result<Vec<BountyWithDetails>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .bounties
                .iter()
                .filter(|b| b.claimed_by_id == Some(claimer_id))
                .map(|b| inner.hydrate(b))
                .collect())
        }

        async fn insert_bounty(&self, bounty: NewBounty) -> Result<Bounty> {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next();
            let created = Bounty {
                id,
                title: bounty.title,
                description: bounty.description,
                amount: bounty.amount,
                currency: bounty.currency,
                status: BountyStatus::Open,
                creator_id: bounty.creator_id,
                repository_id: bounty.repository_id,
                issue_number: bounty.issue_number,
                issue_url: bounty.issue_url,
                claimed_by_id: None,
                claimed_at: None,
                completed_at: None,
                transaction_hash: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            inner.bounties.push(created.clone());

            for name in &bounty.tags {
                let tag_id = match inner.tags.iter().find(|t| &t.name == name) {
                    Some(tag) => tag.id,
                    None => {
                        let id = inner.next();
                        inner.tags.push(Tag {
                            id,
                            name: name.clone(),
                        });
                        id
                    }
                };
                if !inner.bounty_tags.contains(&(created.id, tag_id)) {
                    inner.bounty_tags.push((created.id, tag_id));
                }
            }

            inner.push_activity(bounty.creator_id, created.id, ActivityAction::Created, None);
            inner.bump_reputation(bounty.creator_id, CREATION_POINTS, 0, 1);
            Ok(created)
        }

        async fn claim_bounty(&self, id: i32, claimer_id: i32) -> Result<Option<Bounty>> {
            let mut inner = self.inner.lock().unwrap();
            let claimed = match inner.bounties.iter_mut().find(|b| b.id == id) {
                Some(b) if b.status == BountyStatus::Open => {
                    b.status = BountyStatus::Claimed;
                    b.claimed_by_id = Some(claimer_id);
                    b.claimed_at = Some(Utc::now());
                    b.updated_at = Utc::now();
                    b.clone()
                }
                _ => return Ok(None),
            };
            inner.push_activity(claimer_id, id, ActivityAction::Claimed, None);
            Ok(Some(claimed))
        }

        async fn complete_bounty(
            &self,
            id: i32,
            acting_user_id: i32,
            transaction_hash: &str,
        ) -> Result<Option<Bounty>> {
            let mut inner = self.inner.lock().unwrap();
            let completed = match inner.bounties.iter_mut().find(|b| b.id == id) {
                Some(b) if b.status == BountyStatus::Claimed => {
                    b.status = BountyStatus::Completed;
                    b.completed_at = Some(Utc::now());
                    b.transaction_hash = Some(transaction_hash.to_string());
                    b.updated_at = Utc::now();
                    b.clone()
                }
                _ => return Ok(None),
            };
            let metadata =
                serde_json::json!({ "transactionHash": transaction_hash }).to_string();
            inner.push_activity(acting_user_id, id, ActivityAction::Completed, Some(metadata));
            if let Some(claimer_id) = completed.claimed_by_id {
                inner.bump_reputation(claimer_id, COMPLETION_POINTS, 1, 0);
            }
            Ok(Some(completed))
        }

        async fn list_tags(&self) -> Result<Vec<Tag>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.tags.clone())
        }

        async fn activities_by_user(&self, user_id: i32, limit: i64) -> Result<Vec<Activity>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .activities
                .iter()
                .filter(|a| a.user_id == user_id)
                .rev()
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn get_reputation(&self, user_id: i32) -> Result<Option<Reputation>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.reputation.get(&user_id).cloned())
        }

        async fn init_reputation(&self, user_id: i32) -> Result<Reputation> {
            let mut inner = self.inner.lock().unwrap();
            Ok(inner
                .reputation
                .entry(user_id)
                .or_insert_with(|| Reputation::empty(user_id))
                .clone())
        }

        async fn dashboard_stats(&self) -> Result<DashboardStats> {
            let inner = self.inner.lock().unwrap();
            let completed: Vec<&Bounty> = inner
                .bounties
                .iter()
                .filter(|b| b.status == BountyStatus::Completed)
                .collect();
            Ok(DashboardStats {
                total_bounties: inner.bounties.len() as i64,
                total_paid_out: completed.iter().map(|b| b.amount).sum(),
                active_bounties: inner
                    .bounties
                    .iter()
                    .filter(|b| {
                        matches!(b.status, BountyStatus::Open | BountyStatus::Claimed)
                    })
                    .count() as i64,
                completed_bounties: completed.len() as i64,
            })
        }
    }

    // ------------------------------------------------------------------
    // Scripted verifier
    // ------------------------------------------------------------------

    enum Script {
        Succeed,
        FailLogical(&'static str),
        FailTransport,
    }

    struct MockVerifier {
        script: Script,
        calls: AtomicUsize,
    }

    impl MockVerifier {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SettlementVerifier for MockVerifier {
        async fn verify(&self, _tx_hash: &str) -> Result<VerifyOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Succeed => Ok(VerifyOutcome {
                    success: true,
                    amount: Some("0.5".to_string()),
                    from: Some("0xfeed".to_string()),
                    to: Some("0xbeef".to_string()),
                    error: None,
                }),
                Script::FailLogical(reason) => {
                    Ok(VerifyOutcome {
                        success: false,
                        amount: None,
                        from: None,
                        to: None,
                        error: Some(reason.to_string()),
                    })
                }
                Script::FailTransport => Err(anyhow::anyhow!("connection refused")),
            }
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    struct Fixture {
        lifecycle: BountyLifecycle,
        storage: Arc<MemStorage>,
        verifier: Arc<MockVerifier>,
        alice: User,
        bob: User,
    }

    async fn fixture(policy: VerificationPolicy, script: Script) -> Fixture {
        let storage = Arc::new(MemStorage::default());
        let verifier = Arc::new(MockVerifier::new(script));
        let lifecycle = BountyLifecycle::new(storage.clone(), verifier.clone(), policy);

        let alice = storage
            .create_user(NewUser {
                username: "alice".to_string(),
                github_id: "1001".to_string(),
                email: None,
                avatar_url: None,
                name: Some("Alice".to_string()),
                bio: None,
            })
            .await
            .unwrap();
        let bob = storage
            .create_user(NewUser {
                username: "bob".to_string(),
                github_id: "1002".to_string(),
                email: None,
                avatar_url: None,
                name: Some("Bob".to_string()),
                bio: None,
            })
            .await
            .unwrap();
        storage.init_reputation(alice.id).await.unwrap();
        storage.init_reputation(bob.id).await.unwrap();

        Fixture {
            lifecycle,
            storage,
            verifier,
            alice,
            bob,
        }
    }

    fn draft(title: &str) -> BountyDraft {
        BountyDraft {
            title: title.to_string(),
            description: "Fix the crash on empty input".to_string(),
            amount: 0.5,
            currency: None,
            issue_url: "https://github.com/acme/widget/issues/7".to_string(),
            issue_number: Some(7),
            repository_id: None,
            tags: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_opens_bounty_and_credits_creator() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        let details = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        assert_eq!(details.bounty.status, BountyStatus::Open);
        assert_eq!(details.bounty.currency, "ETH");
        assert_eq!(details.creator.username, "alice");
        assert!(details.bounty.claimed_by_id.is_none());
        assert!(details.bounty.transaction_hash.is_none());

        let rep = f.storage.get_reputation(f.alice.id).await.unwrap().unwrap();
        assert_eq!(rep.points, 5);
        assert_eq!(rep.created_bounties, 1);
        assert_eq!(rep.completed_bounties, 0);

        let activities = f.storage.activities_by_user(f.alice.id, 10).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].action, ActivityAction::Created);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        let mut empty_title = draft("x");
        empty_title.title = String::new();
        let mut zero_amount = draft("x");
        zero_amount.amount = 0.0;
        let mut empty_url = draft("x");
        empty_url.issue_url = String::new();

        for bad in [empty_title, zero_amount, empty_url] {
            let err = f.lifecycle.create(f.alice.id, bad).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidInput(_)), "got {:?}", err);
        }
    }

    #[tokio::test]
    async fn test_create_deduplicates_tags() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        let mut with_tags = draft("Tagged");
        with_tags.tags = vec!["rust".to_string(), "parser".to_string(), "rust".to_string()];

        let details = f.lifecycle.create(f.alice.id, with_tags).await.unwrap();
        assert_eq!(details.tags.len(), 2);

        let tags = f.storage.list_tags().await.unwrap();
        assert_eq!(tags.len(), 2);
    }

    // ------------------------------------------------------------------
    // Claim
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_claim_transitions_to_claimed() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();

        let claimed = f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();
        assert_eq!(claimed.bounty.status, BountyStatus::Claimed);
        assert_eq!(claimed.bounty.claimed_by_id, Some(f.bob.id));
        assert!(claimed.bounty.claimed_at.is_some());
        assert_eq!(claimed.claimed_by.as_ref().unwrap().username, "bob");

        // No reputation change on claim
        let rep = f.storage.get_reputation(f.bob.id).await.unwrap().unwrap();
        assert_eq!(rep.points, 0);
    }

    #[tokio::test]
    async fn test_claim_own_bounty_forbidden() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();

        let err = f
            .lifecycle
            .claim(bounty.bounty.id, f.alice.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_claim_non_open_invalid_state() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let err = f
            .lifecycle
            .claim(bounty.bounty.id, f.bob.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_claim_missing_bounty_not_found() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let err = f.lifecycle.claim(9999, f.bob.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)), "got {:?}", err);
    }

    // ------------------------------------------------------------------
    // Complete
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_complete_records_settlement_and_credits_claimer() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let before = f.storage.get_reputation(f.bob.id).await.unwrap().unwrap();

        let completed = f
            .lifecycle
            .complete(bounty.bounty.id, f.alice.id, "0xabc")
            .await
            .unwrap();
        assert_eq!(completed.bounty.status, BountyStatus::Completed);
        assert_eq!(completed.bounty.transaction_hash.as_deref(), Some("0xabc"));
        assert!(completed.bounty.completed_at.is_some());

        let after = f.storage.get_reputation(f.bob.id).await.unwrap().unwrap();
        assert_eq!(after.points, before.points + 10);
        assert_eq!(after.completed_bounties, before.completed_bounties + 1);

        // Skip policy never touched the verifier
        assert_eq!(f.verifier.call_count(), 0);

        let activities = f.storage.activities_by_user(f.alice.id, 10).await.unwrap();
        let completion = activities
            .iter()
            .find(|a| a.action == ActivityAction::Completed)
            .unwrap();
        assert!(completion
            .metadata
            .as_deref()
            .unwrap()
            .contains("0xabc"));
    }

    #[tokio::test]
    async fn test_complete_requires_transaction_hash() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let err = f
            .lifecycle
            .complete(bounty.bounty.id, f.alice.id, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_complete_by_non_creator_forbidden() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let err = f
            .lifecycle
            .complete(bounty.bounty.id, f.bob.id, "0xabc")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_complete_unclaimed_invalid_state() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();

        let err = f
            .lifecycle
            .complete(bounty.bounty.id, f.alice.id, "0xabc")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_enforce_policy_consults_verifier() {
        let f = fixture(VerificationPolicy::Enforce, Script::Succeed).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let completed = f
            .lifecycle
            .complete(bounty.bounty.id, f.alice.id, "0xabc")
            .await
            .unwrap();
        assert_eq!(completed.bounty.status, BountyStatus::Completed);
        assert_eq!(f.verifier.call_count(), 1);
    }

    #[tokio::test]
    async fn test_enforce_policy_verification_failure_aborts() {
        let f = fixture(
            VerificationPolicy::Enforce,
            Script::FailLogical("Transaction not found"),
        )
        .await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let err = f
            .lifecycle
            .complete(bounty.bounty.id, f.alice.id, "0xabc")
            .await
            .unwrap_err();
        match err {
            ApiError::InvalidInput(msg) => assert!(msg.contains("Transaction not found")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }

        // No state change, no reputation credited
        let current = f.storage.get_bounty(bounty.bounty.id).await.unwrap().unwrap();
        assert_eq!(current.status, BountyStatus::Claimed);
        assert!(current.transaction_hash.is_none());
        let rep = f.storage.get_reputation(f.bob.id).await.unwrap().unwrap();
        assert_eq!(rep.completed_bounties, 0);
    }

    #[tokio::test]
    async fn test_enforce_policy_transport_failure_is_upstream() {
        let f = fixture(VerificationPolicy::Enforce, Script::FailTransport).await;
        let bounty = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        f.lifecycle.claim(bounty.bounty.id, f.bob.id).await.unwrap();

        let err = f
            .lifecycle
            .complete(bounty.bounty.id, f.alice.id, "0xabc")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)), "got {:?}", err);
    }

    // ------------------------------------------------------------------
    // Invariants and the end-to-end scenario
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_full_lifecycle_scenario() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        // A creates an open bounty
        let created = f.lifecycle.create(f.alice.id, draft("Fix parser")).await.unwrap();
        assert_eq!(created.bounty.status, BountyStatus::Open);
        assert!(created.bounty.claimed_by_id.is_none());
        assert!(created.bounty.transaction_hash.is_none());

        // B claims it
        let claimed = f.lifecycle.claim(created.bounty.id, f.bob.id).await.unwrap();
        assert_eq!(claimed.bounty.status, BountyStatus::Claimed);
        assert_eq!(claimed.bounty.claimed_by_id, Some(f.bob.id));

        // A completes it with hash 0xabc
        let completed = f
            .lifecycle
            .complete(created.bounty.id, f.alice.id, "0xabc")
            .await
            .unwrap();
        assert_eq!(completed.bounty.status, BountyStatus::Completed);
        assert_eq!(completed.bounty.transaction_hash.as_deref(), Some("0xabc"));
        assert!(completed.bounty.completed_at.is_some());

        let rep = f.storage.get_reputation(f.bob.id).await.unwrap().unwrap();
        assert_eq!(rep.completed_bounties, 1);
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_filters_by_status_newest_first() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        let first = f.lifecycle.create(f.alice.id, draft("First")).await.unwrap();
        let second = f.lifecycle.create(f.alice.id, draft("Second")).await.unwrap();
        let third = f.lifecycle.create(f.alice.id, draft("Third")).await.unwrap();
        f.lifecycle.claim(second.bounty.id, f.bob.id).await.unwrap();

        let open = f
            .lifecycle
            .list(&BountyFilter::new(Some(BountyStatus::Open), None, None, None))
            .await
            .unwrap();
        let ids: Vec<i32> = open.iter().map(|b| b.bounty.id).collect();
        assert_eq!(ids, vec![third.bounty.id, first.bounty.id]);
        assert!(open.iter().all(|b| b.bounty.status == BountyStatus::Open));
    }

    #[tokio::test]
    async fn test_list_search_matches_title_and_description() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        f.lifecycle.create(f.alice.id, draft("Parser bug")).await.unwrap();
        let mut other = draft("Unrelated");
        other.description = "Codec panic on truncated frames".to_string();
        f.lifecycle.create(f.alice.id, other).await.unwrap();

        let hits = f
            .lifecycle
            .list(&BountyFilter::new(None, Some("codec".to_string()), None, None))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].bounty.title, "Unrelated");
    }

    #[tokio::test]
    async fn test_list_tie_break_on_identical_timestamps() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        let a = f.lifecycle.create(f.alice.id, draft("A")).await.unwrap();
        let b = f.lifecycle.create(f.alice.id, draft("B")).await.unwrap();

        let same_instant = Utc::now();
        f.storage.set_created_at(a.bounty.id, same_instant);
        f.storage.set_created_at(b.bounty.id, same_instant);

        let listed = f
            .lifecycle
            .list(&BountyFilter::new(None, None, None, None))
            .await
            .unwrap();
        let ids: Vec<i32> = listed.iter().map(|x| x.bounty.id).collect();
        // Higher id wins the tie
        assert_eq!(ids, vec![b.bounty.id, a.bounty.id]);
    }

    #[tokio::test]
    async fn test_get_details_not_found() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;
        let err = f.lifecycle.details(404).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_details_include_repository() {
        let f = fixture(VerificationPolicy::Skip, Script::Succeed).await;

        let repo = f
            .storage
            .create_repository(NewRepository {
                github_id: 555,
                owner_id: f.alice.id,
                name: "widget".to_string(),
                full_name: "acme/widget".to_string(),
                description: None,
                url: "https://github.com/acme/widget".to_string(),
            })
            .await
            .unwrap();

        let mut with_repo = draft("Repo-linked");
        with_repo.repository_id = Some(repo.id);
        let details = f.lifecycle.create(f.alice.id, with_repo).await.unwrap();
        assert_eq!(
            details.repository.as_ref().unwrap().full_name,
            "acme/widget"
        );
        assert_eq!(
            f.storage
                .get_repository_by_github_id(555)
                .await
                .unwrap()
                .unwrap()
                .id,
            repo.id
        );
        assert_eq!(
            f.storage
                .get_repository(repo.id)
                .await
                .unwrap()
                .unwrap()
                .github_id,
            555
        );
    }
}

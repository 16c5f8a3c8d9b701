//! PostgreSQL Storage for the Bounty Board
//!
//! Connects with DATABASE_URL and applies the embedded schema migration on
//! startup. The lifecycle writes (create/claim/complete) run as single
//! transactions so the status change, activity append and reputation delta
//! land together or not at all.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use std::collections::HashMap;
use tokio_postgres::{NoTls, Row};
use tracing::info;

use crate::models::{
    Activity, Bounty, BountyFilter, BountyWithDetails, DashboardStats, NewBounty, NewRepository,
    NewUser, PublicUser, Repository, Reputation, Tag, User,
};
use crate::storage::{Storage, COMPLETION_POINTS, CREATION_POINTS};

/// Database pool configuration
const DB_POOL_MAX_SIZE: usize = 20;
const DB_QUERY_TIMEOUT_SECS: u64 = 30;

const BOUNTY_COLUMNS: &str = "id, title, description, amount, currency, status, creator_id, \
     repository_id, issue_number, issue_url, claimed_by_id, claimed_at, completed_at, \
     transaction_hash, created_at, updated_at";

const USER_COLUMNS: &str =
    "id, username, github_id, email, avatar_url, name, bio, eth_address, created_at, updated_at";

const REPO_COLUMNS: &str =
    "id, github_id, owner_id, name, full_name, description, url, created_at, updated_at";

// ============================================================================
// ROW MAPPING
// ============================================================================

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get(0),
        username: row.get(1),
        github_id: row.get(2),
        email: row.get(3),
        avatar_url: row.get(4),
        name: row.get(5),
        bio: row.get(6),
        eth_address: row.get(7),
        created_at: row.get(8),
        updated_at: row.get(9),
    }
}

fn repository_from_row(row: &Row) -> Repository {
    Repository {
        id: row.get(0),
        github_id: row.get(1),
        owner_id: row.get(2),
        name: row.get(3),
        full_name: row.get(4),
        description: row.get(5),
        url: row.get(6),
        created_at: row.get(7),
        updated_at: row.get(8),
    }
}

fn bounty_from_row(row: &Row) -> Result<Bounty> {
    Ok(Bounty {
        id: row.get(0),
        title: row.get(1),
        description: row.get(2),
        amount: row.get(3),
        currency: row.get(4),
        status: row.get::<_, String>(5).parse()?,
        creator_id: row.get(6),
        repository_id: row.get(7),
        issue_number: row.get(8),
        issue_url: row.get(9),
        claimed_by_id: row.get(10),
        claimed_at: row.get(11),
        completed_at: row.get(12),
        transaction_hash: row.get(13),
        created_at: row.get(14),
        updated_at: row.get(15),
    })
}

fn reputation_from_row(row: &Row) -> Reputation {
    Reputation {
        user_id: row.get(0),
        points: row.get(1),
        completed_bounties: row.get(2),
        created_bounties: row.get(3),
        updated_at: row.get(4),
    }
}

// ============================================================================
// PG STORAGE
// ============================================================================

#[derive(Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    /// Create storage from DATABASE_URL
    pub async fn new(database_url: &str) -> Result<Self> {
        use deadpool_postgres::{ManagerConfig, PoolConfig, RecyclingMethod};
        use std::time::Duration;

        let mut config = Config::new();
        config.url = Some(database_url.to_string());

        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        config.pool = Some(PoolConfig {
            max_size: DB_POOL_MAX_SIZE,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(DB_QUERY_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Test connection
        let client = pool.get().await?;
        client
            .execute(
                &format!("SET statement_timeout = '{}s'", DB_QUERY_TIMEOUT_SECS),
                &[],
            )
            .await?;

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            DB_POOL_MAX_SIZE, DB_QUERY_TIMEOUT_SECS
        );

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create storage from DATABASE_URL environment variable
    pub async fn from_env() -> Result<Self> {
        let url =
            std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;
        Self::new(&url).await
    }

    /// Run embedded migrations
    async fn run_migrations(&self) -> Result<()> {
        let client = self.pool.get().await?;

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_migrations')",
                &[],
            )
            .await?
            .get(0);

        if !exists {
            let migration_sql = include_str!("../migrations/001_schema.sql");
            client.batch_execute(migration_sql).await?;
            info!("Applied migration 001_schema");
        }

        Ok(())
    }

    // ========================================================================
    // HYDRATION
    // ========================================================================

    async fn users_by_ids(&self, ids: &[i32]) -> Result<HashMap<i32, PublicUser>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {} FROM users WHERE id = ANY($1)", USER_COLUMNS),
                &[&ids],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let user = user_from_row(r);
                (user.id, PublicUser::from(&user))
            })
            .collect())
    }

    async fn repositories_by_ids(&self, ids: &[i32]) -> Result<HashMap<i32, Repository>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM repositories WHERE id = ANY($1)",
                    REPO_COLUMNS
                ),
                &[&ids],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let repo = repository_from_row(r);
                (repo.id, repo)
            })
            .collect())
    }

    async fn tags_by_bounty_ids(&self, ids: &[i32]) -> Result<HashMap<i32, Vec<String>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT bt.bounty_id, t.name FROM bounty_tags bt
                 INNER JOIN tags t ON bt.tag_id = t.id
                 WHERE bt.bounty_id = ANY($1)
                 ORDER BY t.name",
                &[&ids],
            )
            .await?;

        let mut map: HashMap<i32, Vec<String>> = HashMap::new();
        for row in rows {
            map.entry(row.get(0)).or_default().push(row.get(1));
        }
        Ok(map)
    }

    /// Attach creator/repository/claimer/tags to a batch of bounties.
    async fn hydrate(&self, bounties: Vec<Bounty>) -> Result<Vec<BountyWithDetails>> {
        if bounties.is_empty() {
            return Ok(Vec::new());
        }

        let mut user_ids: Vec<i32> = bounties.iter().map(|b| b.creator_id).collect();
        user_ids.extend(bounties.iter().filter_map(|b| b.claimed_by_id));
        user_ids.sort_unstable();
        user_ids.dedup();

        let mut repo_ids: Vec<i32> = bounties.iter().filter_map(|b| b.repository_id).collect();
        repo_ids.sort_unstable();
        repo_ids.dedup();

        let bounty_ids: Vec<i32> = bounties.iter().map(|b| b.id).collect();

        let (users, repositories, mut tags) = futures::try_join!(
            self.users_by_ids(&user_ids),
            self.repositories_by_ids(&repo_ids),
            self.tags_by_bounty_ids(&bounty_ids),
        )?;

        bounties
            .into_iter()
            .map(|bounty| {
                let creator = users
                    .get(&bounty.creator_id)
                    .cloned()
                    .with_context(|| format!("creator {} missing for bounty {}", bounty.creator_id, bounty.id))?;
                let repository = bounty
                    .repository_id
                    .and_then(|id| repositories.get(&id).cloned());
                let claimed_by = bounty
                    .claimed_by_id
                    .and_then(|id| users.get(&id).cloned());
                let tags = tags.remove(&bounty.id).unwrap_or_default();
                Ok(BountyWithDetails {
                    bounty,
                    creator,
                    repository,
                    tags,
                    claimed_by,
                })
            })
            .collect()
    }

    async fn list_bounties_where(&self, clause: &str, id: i32) -> Result<Vec<BountyWithDetails>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM bounties WHERE {} = $1
                     ORDER BY created_at DESC, id DESC",
                    BOUNTY_COLUMNS, clause
                ),
                &[&id],
            )
            .await?;
        drop(client);

        let bounties = rows.iter().map(bounty_from_row).collect::<Result<Vec<_>>>()?;
        self.hydrate(bounties).await
    }
}

#[async_trait]
impl Storage for PgStorage {
    // ========================================================================
    // USERS
    // ========================================================================

    async fn get_user(&self, id: i32) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
                &[&id],
            )
            .await?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    async fn get_user_by_github_id(&self, github_id: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE github_id = $1", USER_COLUMNS),
                &[&github_id],
            )
            .await?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO users (username, github_id, email, avatar_url, name, bio)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {}",
                    USER_COLUMNS
                ),
                &[
                    &user.username,
                    &user.github_id,
                    &user.email,
                    &user.avatar_url,
                    &user.name,
                    &user.bio,
                ],
            )
            .await?;

        let created = user_from_row(&row);
        info!("Created user {} (github_id {})", created.username, created.github_id);
        Ok(created)
    }

    async fn update_user_eth_address(&self, id: i32, eth_address: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE users SET eth_address = $2, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {}",
                    USER_COLUMNS
                ),
                &[&id, &eth_address],
            )
            .await?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    // ========================================================================
    // REPOSITORIES
    // ========================================================================

    async fn get_repository(&self, id: i32) -> Result<Option<Repository>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM repositories WHERE id = $1", REPO_COLUMNS),
                &[&id],
            )
            .await?;
        Ok(row.map(|r| repository_from_row(&r)))
    }

    async fn get_repository_by_github_id(&self, github_id: i64) -> Result<Option<Repository>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM repositories WHERE github_id = $1",
                    REPO_COLUMNS
                ),
                &[&github_id],
            )
            .await?;
        Ok(row.map(|r| repository_from_row(&r)))
    }

    async fn get_repositories_by_owner(&self, owner_id: i32) -> Result<Vec<Repository>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM repositories WHERE owner_id = $1 ORDER BY updated_at DESC",
                    REPO_COLUMNS
                ),
                &[&owner_id],
            )
            .await?;
        Ok(rows.iter().map(repository_from_row).collect())
    }

    async fn create_repository(&self, repository: NewRepository) -> Result<Repository> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO repositories (github_id, owner_id, name, full_name, description, url)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {}",
                    REPO_COLUMNS
                ),
                &[
                    &repository.github_id,
                    &repository.owner_id,
                    &repository.name,
                    &repository.full_name,
                    &repository.description,
                    &repository.url,
                ],
            )
            .await?;
        Ok(repository_from_row(&row))
    }

    // ========================================================================
    // BOUNTIES
    // ========================================================================

    async fn get_bounty(&self, id: i32) -> Result<Option<Bounty>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM bounties WHERE id = $1", BOUNTY_COLUMNS),
                &[&id],
            )
            .await?;
        row.map(|r| bounty_from_row(&r)).transpose()
    }

    async fn get_bounty_with_details(&self, id: i32) -> Result<Option<BountyWithDetails>> {
        let bounty = match self.get_bounty(id).await? {
            Some(b) => b,
            None => return Ok(None),
        };
        Ok(self.hydrate(vec![bounty]).await?.pop())
    }

    async fn list_bounties(&self, filter: &BountyFilter) -> Result<Vec<BountyWithDetails>> {
        let client = self.pool.get().await?;

        let status = filter.status.map(|s| s.as_str().to_string());
        let pattern = filter.search.as_ref().map(|s| format!("%{}%", s));

        let rows = match (&status, &pattern) {
            (Some(s), Some(p)) => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM bounties
                             WHERE status = $1 AND (title ILIKE $2 OR description ILIKE $2)
                             ORDER BY created_at DESC, id DESC
                             LIMIT $3 OFFSET $4",
                            BOUNTY_COLUMNS
                        ),
                        &[&s, &p, &filter.limit, &filter.offset],
                    )
                    .await?
            }
            (Some(s), None) => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM bounties
                             WHERE status = $1
                             ORDER BY created_at DESC, id DESC
                             LIMIT $2 OFFSET $3",
                            BOUNTY_COLUMNS
                        ),
                        &[&s, &filter.limit, &filter.offset],
                    )
                    .await?
            }
            (None, Some(p)) => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM bounties
                             WHERE title ILIKE $1 OR description ILIKE $1
                             ORDER BY created_at DESC, id DESC
                             LIMIT $2 OFFSET $3",
                            BOUNTY_COLUMNS
                        ),
                        &[&p, &filter.limit, &filter.offset],
                    )
                    .await?
            }
            (None, None) => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM bounties
                             ORDER BY created_at DESC, id DESC
                             LIMIT $1 OFFSET $2",
                            BOUNTY_COLUMNS
                        ),
                        &[&filter.limit, &filter.offset],
                    )
                    .await?
            }
        };
        drop(client);

        let bounties = rows.iter().map(bounty_from_row).collect::<Result<Vec<_>>>()?;
        self.hydrate(bounties).await
    }

    async fn list_bounties_by_creator(&self, creator_id: i32) -> Result<Vec<BountyWithDetails>> {
        self.list_bounties_where("creator_id", creator_id).await
    }

    async fn list_bounties_by_claimer(&self, claimer_id: i32) -> Result<Vec<BountyWithDetails>> {
        self.list_bounties_where("claimed_by_id", claimer_id).await
    }

    async fn insert_bounty(&self, bounty: NewBounty) -> Result<Bounty> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO bounties (title, description, amount, currency, status,
                                           creator_id, repository_id, issue_number, issue_url)
                     VALUES ($1, $2, $3, $4, 'open', $5, $6, $7, $8)
                     RETURNING {}",
                    BOUNTY_COLUMNS
                ),
                &[
                    &bounty.title,
                    &bounty.description,
                    &bounty.amount,
                    &bounty.currency,
                    &bounty.creator_id,
                    &bounty.repository_id,
                    &bounty.issue_number,
                    &bounty.issue_url,
                ],
            )
            .await?;
        let created = bounty_from_row(&row)?;

        for name in &bounty.tags {
            // Get-or-create in one statement; the no-op update makes
            // RETURNING yield the existing row on conflict.
            let tag_id: i32 = tx
                .query_one(
                    "INSERT INTO tags (name) VALUES ($1)
                     ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                     RETURNING id",
                    &[&name],
                )
                .await?
                .get(0);

            tx.execute(
                "INSERT INTO bounty_tags (bounty_id, tag_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
                &[&created.id, &tag_id],
            )
            .await?;
        }

        tx.execute(
            "INSERT INTO activities (user_id, bounty_id, action) VALUES ($1, $2, 'created')",
            &[&bounty.creator_id, &created.id],
        )
        .await?;

        tx.execute(
            "INSERT INTO reputation (user_id, points, created_bounties)
             VALUES ($1, $2, 1)
             ON CONFLICT (user_id) DO UPDATE SET
                points = reputation.points + EXCLUDED.points,
                created_bounties = reputation.created_bounties + EXCLUDED.created_bounties,
                updated_at = NOW()",
            &[&bounty.creator_id, &CREATION_POINTS],
        )
        .await?;

        tx.commit().await?;

        info!(
            "Created bounty {} ({} {}) by user {}",
            created.id, created.amount, created.currency, created.creator_id
        );
        Ok(created)
    }

    async fn claim_bounty(&self, id: i32, claimer_id: i32) -> Result<Option<Bounty>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Compare-and-swap on status: a concurrent claim that got there
        // first leaves no matching row.
        let row = tx
            .query_opt(
                &format!(
                    "UPDATE bounties
                     SET status = 'claimed', claimed_by_id = $2, claimed_at = NOW(), updated_at = NOW()
                     WHERE id = $1 AND status = 'open'
                     RETURNING {}",
                    BOUNTY_COLUMNS
                ),
                &[&id, &claimer_id],
            )
            .await?;

        let claimed = match row {
            Some(r) => bounty_from_row(&r)?,
            None => return Ok(None),
        };

        tx.execute(
            "INSERT INTO activities (user_id, bounty_id, action) VALUES ($1, $2, 'claimed')",
            &[&claimer_id, &id],
        )
        .await?;

        tx.commit().await?;

        info!("Bounty {} claimed by user {}", id, claimer_id);
        Ok(Some(claimed))
    }

    async fn complete_bounty(
        &self,
        id: i32,
        acting_user_id: i32,
        transaction_hash: &str,
    ) -> Result<Option<Bounty>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!(
                    "UPDATE bounties
                     SET status = 'completed', completed_at = NOW(), transaction_hash = $2, updated_at = NOW()
                     WHERE id = $1 AND status = 'claimed'
                     RETURNING {}",
                    BOUNTY_COLUMNS
                ),
                &[&id, &transaction_hash],
            )
            .await?;

        let completed = match row {
            Some(r) => bounty_from_row(&r)?,
            None => return Ok(None),
        };

        let metadata =
            serde_json::json!({ "transactionHash": transaction_hash }).to_string();
        tx.execute(
            "INSERT INTO activities (user_id, bounty_id, action, metadata)
             VALUES ($1, $2, 'completed', $3)",
            &[&acting_user_id, &id, &metadata],
        )
        .await?;

        if let Some(claimer_id) = completed.claimed_by_id {
            tx.execute(
                "INSERT INTO reputation (user_id, points, completed_bounties)
                 VALUES ($1, $2, 1)
                 ON CONFLICT (user_id) DO UPDATE SET
                    points = reputation.points + EXCLUDED.points,
                    completed_bounties = reputation.completed_bounties + EXCLUDED.completed_bounties,
                    updated_at = NOW()",
                &[&claimer_id, &COMPLETION_POINTS],
            )
            .await?;
        }

        tx.commit().await?;

        info!("Bounty {} completed with tx {}", id, transaction_hash);
        Ok(Some(completed))
    }

    // ========================================================================
    // TAGS
    // ========================================================================

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT id, name FROM tags ORDER BY name", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|r| Tag {
                id: r.get(0),
                name: r.get(1),
            })
            .collect())
    }

    // ========================================================================
    // ACTIVITIES
    // ========================================================================

    async fn activities_by_user(&self, user_id: i32, limit: i64) -> Result<Vec<Activity>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, user_id, bounty_id, action, metadata, created_at
                 FROM activities
                 WHERE user_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2",
                &[&user_id, &limit],
            )
            .await?;

        rows.iter()
            .map(|r| {
                Ok(Activity {
                    id: r.get(0),
                    user_id: r.get(1),
                    bounty_id: r.get(2),
                    action: r.get::<_, String>(3).parse()?,
                    metadata: r.get(4),
                    created_at: r.get(5),
                })
            })
            .collect()
    }

    // ========================================================================
    // REPUTATION
    // ========================================================================

    async fn get_reputation(&self, user_id: i32) -> Result<Option<Reputation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT user_id, points, completed_bounties, created_bounties, updated_at
                 FROM reputation WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.map(|r| reputation_from_row(&r)))
    }

    async fn init_reputation(&self, user_id: i32) -> Result<Reputation> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO reputation (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
                &[&user_id],
            )
            .await?;
        drop(client);

        self.get_reputation(user_id)
            .await?
            .context("reputation row missing after init")
    }

    // ========================================================================
    // STATS
    // ========================================================================

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                    COALESCE(SUM(amount) FILTER (WHERE status = 'completed'), 0)::FLOAT8 AS paid_out,
                    COUNT(*) FILTER (WHERE status IN ('open', 'claimed')) AS active
                 FROM bounties",
                &[],
            )
            .await?;

        Ok(DashboardStats {
            total_bounties: row.get(0),
            completed_bounties: row.get(1),
            total_paid_out: row.get(2),
            active_bounties: row.get(3),
        })
    }
}

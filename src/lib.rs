//! Bounty Board - GitHub issue bounties settled in ETH
//!
//! A marketplace connecting GitHub issues to cryptocurrency payments.
//! Creators fund bounties against issues in their repositories, solvers
//! claim them, and creators complete them by supplying the Ethereum
//! transaction hash that paid the solver.
//!
//! # How it works
//!
//! 1. Users log in with GitHub OAuth; accounts are created lazily on first login
//! 2. A creator posts a bounty (title, amount, issue URL, tags) - it opens at `open`
//! 3. Any other user claims it, moving it to `claimed`
//! 4. The creator completes it with the settlement transaction hash
//! 5. Under the enforce policy the hash is verified against an Ethereum
//!    JSON-RPC provider before the bounty moves to `completed`
//!
//! # Bookkeeping
//!
//! - Creating credits the creator +5 reputation points
//! - Completing credits the claimer +10 points
//! - Every transition appends to an append-only activity trail

pub mod auth;
pub mod config;
pub mod error;
pub mod ethereum;
pub mod github;
pub mod lifecycle;
pub mod models;
pub mod pg_storage;
pub mod server;
pub mod storage;

pub use config::{Config, VerificationPolicy};
pub use error::ApiError;
pub use ethereum::{EthereumVerifier, SettlementVerifier, VerifyOutcome};
pub use github::GitHubClient;
pub use lifecycle::BountyLifecycle;
pub use pg_storage::PgStorage;
pub use storage::{Storage, COMPLETION_POINTS, CREATION_POINTS};

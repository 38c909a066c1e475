// Autopost - publish pipeline and adaptive scheduling engine
//
// Drafts are generated from prompt arms chosen by a UCB1 bandit, held for
// human review, and published through a rate-limited platform client. Work
// moves through a Postgres-backed job queue; cron tasks handle planning,
// review expiry, token refresh and engagement sync.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;

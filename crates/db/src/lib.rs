//! Keel db: scoped Postgres sessions and the statements that converge roles, databases
//! and the pooler lookup function.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use keel_core::{Error, Result};

pub mod databases;
pub mod lookup;
pub mod sqlx_session;
pub mod users;

pub use databases::{plan_databases, DatabasePlan};
pub use lookup::{install_lookup_function, lookup_function_statements};
pub use sqlx_session::SqlxConnector;
pub use users::{md5_password, normalize_flags, DefaultUserSyncStrategy, SyncRequest, UserSyncStrategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectTarget {
    pub fn with_database(&self, database: &str) -> Self { Self { database: database.to_string(), ..self.clone() } }
}

/// A role as stored in `pg_authid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbRole {
    pub name: String,
    /// Stored hash (`md5…` or `SCRAM-SHA-256$…`), empty when the role has no password.
    pub password: String,
    /// Positive attributes only (`LOGIN`, `CREATEDB`, …), sorted.
    pub flags: Vec<String>,
    pub member_of: Vec<String>,
}

/// One open connection. Always finish with `close`, even on error paths.
#[async_trait::async_trait]
pub trait PgSession: Send {
    async fn list_roles(&mut self, names: &[String]) -> Result<BTreeMap<String, DbRole>>;
    /// Non-template databases mapped to their owner.
    async fn list_databases(&mut self) -> Result<BTreeMap<String, String>>;
    async fn execute(&mut self, statement: &str) -> Result<()>;
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait PgConnector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn PgSession>>;
}

/// Fold the outcome of closing a session into the outcome of the work done on it.
/// A close failure is always reported; a prior error is kept alongside it.
pub fn compose_close<T>(result: Result<T>, closed: Result<()>) -> Result<T> {
    match (result, closed) {
        (r, Ok(())) => r,
        (Ok(_), Err(c)) => Err(Error::Transport(format!("could not close database connection: {}", c))),
        (Err(e), Err(c)) => Err(Error::Transport(format!("could not close database connection: {} (prior error: {})", c, e))),
    }
}

pub fn quote_ident(s: &str) -> String { format!("\"{}\"", s.replace('"', "\"\"")) }

pub fn quote_literal(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

//! Role sync. The default strategy creates missing roles and alters roles whose password,
//! attributes or group membership drifted. Roles are never dropped.

use std::collections::{BTreeMap, BTreeSet};

use keel_core::{Error, PgUser, Result, ResultExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::{quote_ident, quote_literal, DbRole, PgSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Create(PgUser),
    Alter {
        name: String,
        /// Attributes to set, including `NO…` forms for attributes to drop.
        flags: Vec<String>,
        password: Option<String>,
        grant: Vec<String>,
    },
}

impl SyncRequest {
    pub fn role(&self) -> &str {
        match self {
            SyncRequest::Create(u) => &u.name,
            SyncRequest::Alter { name, .. } => name,
        }
    }

    pub fn statements(&self) -> Vec<String> {
        match self {
            SyncRequest::Create(u) => {
                let mut s = format!("CREATE ROLE {}", quote_ident(&u.name));
                let flags = normalize_flags(&u.flags);
                if !flags.is_empty() {
                    s.push_str(" WITH ");
                    s.push_str(&flags.join(" "));
                }
                if !u.password.is_empty() {
                    s.push_str(&format!(" PASSWORD {}", quote_literal(&md5_password(&u.name, &u.password))));
                }
                if !u.member_of.is_empty() {
                    let groups: Vec<String> = u.member_of.iter().map(|g| quote_ident(g)).collect();
                    s.push_str(&format!(" IN ROLE {}", groups.join(", ")));
                }
                vec![s]
            }
            SyncRequest::Alter { name, flags, password, grant } => {
                let mut out = Vec::new();
                if !flags.is_empty() || password.is_some() {
                    let mut s = format!("ALTER ROLE {}", quote_ident(name));
                    if !flags.is_empty() {
                        s.push_str(" WITH ");
                        s.push_str(&flags.join(" "));
                    }
                    if let Some(p) = password {
                        s.push_str(&format!(" PASSWORD {}", quote_literal(p)));
                    }
                    out.push(s);
                }
                out.extend(grant.iter().map(|g| format!("GRANT {} TO {}", quote_ident(g), quote_ident(name))));
                out
            }
        }
    }
}

/// `md5` followed by hex(md5(password || username)), the format Postgres stores.
pub fn md5_password(user: &str, password: &str) -> String {
    format!("md5{:x}", md5::compute(format!("{}{}", password, user)))
}

/// Uppercase the flags and imply `LOGIN`/`INHERIT` unless `NOLOGIN`/`NOINHERIT` is given.
/// Only positive attributes are returned, sorted, comparable with `DbRole::flags`.
pub fn normalize_flags(flags: &[String]) -> Vec<String> {
    let upper: BTreeSet<String> = flags.iter().map(|f| f.trim().to_uppercase()).filter(|f| !f.is_empty()).collect();
    let mut out: BTreeSet<String> = upper.iter().filter(|f| !negated(f)).cloned().collect();
    for implied in ["LOGIN", "INHERIT"] {
        if !upper.contains(&format!("NO{}", implied)) {
            out.insert(implied.to_string());
        }
    }
    out.into_iter().collect()
}

fn negated(flag: &str) -> bool { flag.starts_with("NO") }

/// A live SCRAM secret cannot be compared against a cleartext password; it is left alone.
fn password_differs(live: &DbRole, desired: &PgUser) -> bool {
    if desired.password.is_empty() {
        return false;
    }
    if live.password.starts_with("SCRAM-SHA-256$") {
        return false;
    }
    live.password != md5_password(&desired.name, &desired.password)
}

#[async_trait::async_trait]
pub trait UserSyncStrategy: Send + Sync {
    fn produce_sync_requests(&self, live: &BTreeMap<String, DbRole>, desired: &BTreeMap<String, PgUser>) -> Vec<SyncRequest>;
    async fn execute_sync_requests(&self, requests: &[SyncRequest], session: &mut dyn PgSession) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUserSyncStrategy;

#[async_trait::async_trait]
impl UserSyncStrategy for DefaultUserSyncStrategy {
    fn produce_sync_requests(&self, live: &BTreeMap<String, DbRole>, desired: &BTreeMap<String, PgUser>) -> Vec<SyncRequest> {
        let mut out = Vec::new();
        for (name, want) in desired {
            let Some(have) = live.get(name) else {
                out.push(SyncRequest::Create(want.clone()));
                continue;
            };
            let want_flags = normalize_flags(&want.flags);
            let have_flags: BTreeSet<&String> = have.flags.iter().collect();
            let want_set: BTreeSet<&String> = want_flags.iter().collect();
            let mut flags: Vec<String> = want_set.difference(&have_flags).map(|f| f.to_string()).collect();
            flags.extend(have_flags.difference(&want_set).map(|f| format!("NO{}", f)));

            let password = password_differs(have, want).then(|| md5_password(&want.name, &want.password));
            let grant: Vec<String> = want.member_of.iter().filter(|g| !have.member_of.contains(g)).cloned().collect();

            if !flags.is_empty() || password.is_some() || !grant.is_empty() {
                out.push(SyncRequest::Alter { name: name.clone(), flags, password, grant });
            }
        }
        out
    }

    async fn execute_sync_requests(&self, requests: &[SyncRequest], session: &mut dyn PgSession) -> Result<()> {
        for req in requests {
            for stmt in req.statements() {
                session.execute(&stmt).await.with_context(|| format!("syncing role {}", req.role()))?;
            }
            match req {
                SyncRequest::Create(_) => info!(role = %req.role(), "db: role created"),
                SyncRequest::Alter { .. } => info!(role = %req.role(), "db: role altered"),
            }
        }
        Ok(())
    }
}

/// Role names must be plain identifiers; anything else is refused before reaching SQL.
pub fn validate_role_name(name: &str) -> Result<()> {
    static ROLE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-zA-Z0-9]([-_a-zA-Z0-9]*[a-zA-Z0-9])?$").unwrap()
    });
    if name.len() <= 63 && ROLE_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid role name {:?}", name)))
    }
}

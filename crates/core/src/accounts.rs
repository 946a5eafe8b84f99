//! Account registry: system accounts owned by the engine plus roles declared in the
//! manifest or supplied by the infrastructure.

use std::collections::BTreeMap;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Who is the system of record for an account's password.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Origin {
    /// Password comes from operator configuration; the live secret is overwritten to match.
    Infrastructure,
    /// Password lives in the secret; the registry adopts whatever the secret holds.
    Manifest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PgUser {
    pub name: String,
    pub password: String,
    pub origin: Origin,
    pub flags: Vec<String>,
    pub member_of: Vec<String>,
}

impl PgUser {
    pub fn manifest(name: &str, flags: Vec<String>) -> Self {
        Self { name: name.to_string(), password: random_password(), origin: Origin::Manifest, flags, member_of: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemAccount {
    Superuser,
    Replication,
    ConnectionPool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccountKey {
    System(SystemAccount),
    Declared(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accounts {
    pub system: BTreeMap<SystemAccount, PgUser>,
    pub declared: BTreeMap<String, PgUser>,
}

impl Accounts {
    /// Map a role name back to its registry slot. System accounts shadow declared ones.
    pub fn resolve(&self, username: &str) -> Option<AccountKey> {
        if let Some((key, _)) = self.system.iter().find(|(_, u)| u.name == username) {
            return Some(AccountKey::System(*key));
        }
        self.declared.contains_key(username).then(|| AccountKey::Declared(username.to_string()))
    }

    pub fn get(&self, key: &AccountKey) -> Option<&PgUser> {
        match key {
            AccountKey::System(k) => self.system.get(k),
            AccountKey::Declared(n) => self.declared.get(n),
        }
    }

    pub fn get_mut(&mut self, key: &AccountKey) -> Option<&mut PgUser> {
        match key {
            AccountKey::System(k) => self.system.get_mut(k),
            AccountKey::Declared(n) => self.declared.get_mut(n),
        }
    }

    /// All accounts that get a credentials secret, system accounts first.
    pub fn iter(&self) -> impl Iterator<Item = &PgUser> {
        self.system.values().chain(self.declared.values())
    }

    /// Owned copy of every account with its registry slot, in `iter()` order.
    pub fn entries(&self) -> Vec<(AccountKey, PgUser)> {
        let system = self.system.iter().map(|(k, u)| (AccountKey::System(*k), u.clone()));
        let declared = self.declared.iter().map(|(k, u)| (AccountKey::Declared(k.clone()), u.clone()));
        system.chain(declared).collect()
    }

    pub fn superuser(&self) -> Option<&PgUser> { self.system.get(&SystemAccount::Superuser) }
}

pub fn random_password() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(64).map(char::from).collect()
}

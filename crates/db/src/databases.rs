use std::collections::BTreeMap;

use crate::quote_ident;

/// Corrective actions for declared databases. Creations always run before owner changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabasePlan {
    pub create: Vec<(String, String)>,
    pub alter_owner: Vec<(String, String)>,
}

impl DatabasePlan {
    pub fn is_empty(&self) -> bool { self.create.is_empty() && self.alter_owner.is_empty() }

    pub fn statements(&self) -> Vec<String> {
        let creates = self.create.iter().map(|(db, owner)| format!("CREATE DATABASE {} OWNER {}", quote_ident(db), quote_ident(owner)));
        let alters = self.alter_owner.iter().map(|(db, owner)| format!("ALTER DATABASE {} OWNER TO {}", quote_ident(db), quote_ident(owner)));
        creates.chain(alters).collect()
    }
}

/// Databases present live but not declared are left alone.
pub fn plan_databases(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> DatabasePlan {
    let mut plan = DatabasePlan::default();
    for (db, owner) in desired {
        match current.get(db) {
            None => plan.create.push((db.clone(), owner.clone())),
            Some(live) if live != owner => plan.alter_owner.push((db.clone(), owner.clone())),
            Some(_) => {}
        }
    }
    plan
}

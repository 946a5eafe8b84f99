use keel_core::{Accounts, Origin, PgUser, Result, SystemAccount};
use keel_db::users::validate_role_name;
use tracing::warn;

use crate::cluster::Cluster;

impl Cluster {
    /// Rebuild the account registry from the manifest and operator config. Passwords of
    /// manifest-origin accounts are placeholders until the secret sync adopts the live ones.
    pub fn init_users(&mut self) -> Result<()> {
        let spec = self.spec().clone();
        let mut accounts = Accounts::default();

        accounts.system.insert(SystemAccount::Superuser, PgUser::manifest(&self.config.superuser_name, vec!["SUPERUSER".into()]));
        accounts
            .system
            .insert(SystemAccount::Replication, PgUser::manifest(&self.config.replication_username, vec!["REPLICATION".into()]));
        if spec.needs_connection_pool() {
            let (_, user) = self.pool_schema_and_user(&spec);
            accounts.system.insert(SystemAccount::ConnectionPool, PgUser::manifest(&user, vec!["LOGIN".into()]));
        }

        for (name, flags) in &spec.users {
            if let Err(e) = validate_role_name(name) {
                warn!(cluster = %self.name(), error = %e, "skipping declared user");
                continue;
            }
            accounts.declared.insert(name.clone(), PgUser::manifest(name, flags.clone()));
        }

        for role in &self.config.infrastructure_roles {
            if let Err(e) = validate_role_name(&role.name) {
                warn!(cluster = %self.name(), error = %e, "skipping infrastructure role");
                continue;
            }
            accounts.declared.insert(
                role.name.clone(),
                PgUser {
                    name: role.name.clone(),
                    password: role.password.clone(),
                    origin: Origin::Infrastructure,
                    flags: role.flags.clone(),
                    member_of: role.member_of.clone(),
                },
            );
        }

        self.accounts = accounts;
        Ok(())
    }
}

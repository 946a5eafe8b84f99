//! Credential secrets, one per account. Which side wins a password mismatch depends on
//! the account's origin.

use k8s_openapi::api::core::v1::Secret;
use keel_core::{Error, Origin, PgUser, Result, ResultExt};
use keel_kubehub::StoreError;
use tracing::{debug, warn};

use crate::cluster::Cluster;
use crate::events::Transition;
use crate::generate;

fn field(secret: &Secret, key: &str) -> Option<String> {
    secret.data.as_ref()?.get(key).map(|b| String::from_utf8_lossy(&b.0).into_owned())
}

impl Cluster {
    pub async fn sync_secrets(&mut self) -> Result<()> {
        for (_, user) in self.accounts.entries() {
            self.sync_secret(&user).await?;
        }
        Ok(())
    }

    async fn sync_secret(&mut self, user: &PgUser) -> Result<()> {
        let name = self.secret_name(&user.name);
        let store = self.backends.secrets.clone();
        let desired = generate::secret(self, user);

        let live = match store.get(&name).await {
            Ok(live) => live,
            Err(StoreError::NotFound(_)) => match store.create(&desired).await {
                Ok(created) => {
                    self.backends.events.record("Secret", &name, Transition::Created, "missing");
                    self.secrets.insert(name, created);
                    return Ok(());
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(secret = %name, "secret appeared concurrently, fetching it");
                    store.get(&name).await.with_context(|| format!("could not get secret {:?}", name))?
                }
                Err(e) => return Err(Error::from(e).context(format!("could not create secret for user {:?}", user.name))),
            },
            Err(e) => return Err(Error::from(e).context(format!("could not get secret {:?}", name))),
        };
        self.merge_secret(user, live).await
    }

    async fn merge_secret(&mut self, user: &PgUser, live: Secret) -> Result<()> {
        let name = live.metadata.name.clone().unwrap_or_default();
        let live_user = field(&live, "username").unwrap_or_default();
        if live_user != user.name {
            warn!(secret = %name, expected = %user.name, found = %live_user, "secret does not contain the role");
            return Ok(());
        }
        let live_password = field(&live, "password").unwrap_or_default();

        let stored = match user.origin {
            Origin::Infrastructure if live_password != user.password => {
                let mut desired = generate::secret(self, user);
                desired.metadata.resource_version = live.metadata.resource_version.clone();
                let updated = self
                    .backends
                    .secrets
                    .update(&desired)
                    .await
                    .with_context(|| format!("could not update infrastructure role secret for role {:?}", user.name))?;
                self.backends.events.record("Secret", &name, Transition::Updated, "infrastructure role password changed");
                updated
            }
            Origin::Infrastructure => live,
            Origin::Manifest => {
                // The secret names the role; system accounts shadow declared ones of the same name.
                if let Some(slot) = self.accounts.resolve(&live_user).and_then(|k| self.accounts.get_mut(&k)) {
                    slot.password = live_password;
                }
                live
            }
        };
        self.secrets.insert(name, stored);
        Ok(())
    }
}

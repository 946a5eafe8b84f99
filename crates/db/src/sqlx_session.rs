use std::collections::BTreeMap;

use keel_core::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor, Row};
use tracing::debug;

use crate::{ConnectTarget, DbRole, PgConnector, PgSession};

const ROLES_SQL: &str = "SELECT a.rolname::text, COALESCE(a.rolpassword, '')::text, a.rolsuper, a.rolinherit, \
     a.rolcreaterole, a.rolcreatedb, a.rolcanlogin, a.rolreplication, a.rolbypassrls, \
     ARRAY(SELECT b.rolname::text FROM pg_catalog.pg_auth_members m \
           JOIN pg_catalog.pg_authid b ON (m.roleid = b.oid) WHERE m.member = a.oid) AS memberof \
     FROM pg_catalog.pg_authid a WHERE a.rolname = ANY($1) ORDER BY 1";

const DATABASES_SQL: &str =
    "SELECT datname::text, pg_get_userbyid(datdba)::text FROM pg_catalog.pg_database WHERE NOT datistemplate";

fn transport(e: sqlx::Error) -> Error { Error::Transport(e.to_string()) }

pub struct SqlxConnector;

#[async_trait::async_trait]
impl PgConnector for SqlxConnector {
    async fn connect(&self, t: &ConnectTarget) -> Result<Box<dyn PgSession>> {
        let opts = PgConnectOptions::new().host(&t.host).port(t.port).database(&t.database).username(&t.user).password(&t.password);
        let conn = PgConnection::connect_with(&opts).await.map_err(transport)?;
        debug!(host = %t.host, database = %t.database, "db: connected");
        Ok(Box::new(SqlxSession { conn }))
    }
}

pub struct SqlxSession {
    conn: PgConnection,
}

#[async_trait::async_trait]
impl PgSession for SqlxSession {
    async fn list_roles(&mut self, names: &[String]) -> Result<BTreeMap<String, DbRole>> {
        let rows = sqlx::query(ROLES_SQL).bind(names.to_vec()).fetch_all(&mut self.conn).await.map_err(transport)?;
        let mut out = BTreeMap::new();
        for row in rows {
            let name: String = row.try_get(0).map_err(transport)?;
            let attrs = ["SUPERUSER", "INHERIT", "CREATEROLE", "CREATEDB", "LOGIN", "REPLICATION", "BYPASSRLS"];
            let mut flags = Vec::new();
            for (i, flag) in attrs.iter().enumerate() {
                if row.try_get::<bool, _>(i + 2).map_err(transport)? {
                    flags.push(flag.to_string());
                }
            }
            flags.sort();
            let role = DbRole {
                name: name.clone(),
                password: row.try_get(1).map_err(transport)?,
                flags,
                member_of: row.try_get(9).map_err(transport)?,
            };
            out.insert(name, role);
        }
        Ok(out)
    }

    async fn list_databases(&mut self) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(DATABASES_SQL).fetch_all(&mut self.conn).await.map_err(transport)?;
        Ok(rows.into_iter().collect())
    }

    async fn execute(&mut self, statement: &str) -> Result<()> {
        // unprepared: goes through the simple query protocol
        self.conn.execute(statement).await.map_err(transport)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.conn.close().await.map_err(transport)
    }
}

//! The pooler authenticates clients through a SECURITY DEFINER function reading
//! `pg_shadow`; it has to exist in every database clients connect to.

use keel_core::{Result, ResultExt};
use tracing::info;

use crate::{compose_close, quote_ident, ConnectTarget, PgConnector, PgSession};

pub fn lookup_function_statements(schema: &str, user: &str) -> Vec<String> {
    let (s, u) = (quote_ident(schema), quote_ident(user));
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", s),
        format!(
            "CREATE OR REPLACE FUNCTION {s}.user_lookup(\n    in i_username text, out uname text, out phash text)\n\
             RETURNS record AS $$\nBEGIN\n    SELECT usename, passwd FROM pg_catalog.pg_shadow\n    \
             WHERE usename = i_username INTO uname, phash;\n    RETURN;\nEND;\n$$ LANGUAGE plpgsql SECURITY DEFINER",
            s = s
        ),
        format!("REVOKE ALL ON FUNCTION {}.user_lookup(text) FROM public, {}", s, u),
        format!("GRANT EXECUTE ON FUNCTION {}.user_lookup(text) TO {}", s, u),
        format!("GRANT USAGE ON SCHEMA {} TO {}", s, u),
    ]
}

async fn run_all(session: &mut dyn PgSession, statements: &[String]) -> Result<()> {
    for stmt in statements {
        session.execute(stmt).await?;
    }
    Ok(())
}

/// Install the lookup function in every non-template database reachable from `target`.
pub async fn install_lookup_function(connector: &dyn PgConnector, target: &ConnectTarget, schema: &str, user: &str) -> Result<()> {
    let mut session = connector.connect(target).await.context("could not connect to list databases")?;
    let listed = session.list_databases().await;
    let databases = compose_close(listed, session.close().await)?;

    let statements = lookup_function_statements(schema, user);
    for db in databases.keys() {
        let mut session = connector
            .connect(&target.with_database(db))
            .await
            .with_context(|| format!("could not connect to database {}", db))?;
        let done = run_all(session.as_mut(), &statements).await;
        compose_close(done, session.close().await).with_context(|| format!("could not install lookup function in {}", db))?;
        info!(database = %db, schema = %schema, "db: lookup function installed");
    }
    Ok(())
}

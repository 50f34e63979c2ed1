//! PostgreSQL operations skill
//!
//! Queries go through psql inside the database container.  Arbitrary SQL is
//! gated: reads are always allowed, writes only for write-capable sessions,
//! and DDL never runs regardless of capability.

use super::{opt_str, require_str};
use crate::skill::exec::shell::safe_shell;
use crate::skill::SkillExecutor;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

const PG_CONTAINER: &str = "unicorn-postgresql";
const PG_USER: &str = "unicorn";

const READ_PREFIXES: &[&str] = &["select", "\\d", "explain", "with"];
const WRITE_PREFIXES: &[&str] = &["insert", "update", "delete"];

pub struct PostgresExecutor;

impl PostgresExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn psql(&self, database: Option<&str>, sql: &str, timeout_secs: u64) -> String {
        let escaped = sql.replace('\'', "'\\''");
        let db_flag = match database {
            Some(db) => format!("-d {db} "),
            None => String::new(),
        };
        let command =
            format!("docker exec {PG_CONTAINER} psql -U {PG_USER} {db_flag}-c '{escaped}'");
        safe_shell(&command, timeout_secs).await
    }

    fn query_allowed(sql: &str, write_enabled: bool) -> Result<(), String> {
        let lowered = sql.trim().to_lowercase();
        let is_read = READ_PREFIXES.iter().any(|p| lowered.starts_with(p));
        let is_write = WRITE_PREFIXES.iter().any(|p| lowered.starts_with(p));

        if is_read {
            return Ok(());
        }
        if is_write {
            if write_enabled {
                return Ok(());
            }
            return Err(
                "Blocked: Only SELECT, \\d, and EXPLAIN queries are allowed. \
                 (Write operations require a write-capable model.)"
                    .to_string(),
            );
        }
        Err(
            "Blocked: Only SELECT, INSERT, UPDATE, DELETE, WITH, \\d, and EXPLAIN are allowed. \
             DROP/ALTER/TRUNCATE are always blocked."
                .to_string(),
        )
    }
}

impl Default for PostgresExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillExecutor for PostgresExecutor {
    fn skill_id(&self) -> &'static str {
        "postgresql-ops"
    }

    async fn execute(&self, action: &str, params: &Value, write_enabled: bool) -> Result<String> {
        match action {
            "list_databases" => Ok(self.psql(None, "\\l", 10).await),
            "list_tables" => {
                let db = opt_str(params, "database", "unicorn_db");
                Ok(self.psql(Some(db), "\\dt+", 10).await)
            }
            "query" => {
                let sql = require_str(params, "query")?;
                let db = opt_str(params, "database", "unicorn_db");
                match Self::query_allowed(sql, write_enabled) {
                    Ok(()) => Ok(self.psql(Some(db), sql, 30).await),
                    Err(denial) => Ok(denial),
                }
            }
            "stats" => {
                let sql = "SELECT datname, numbackends, xact_commit, xact_rollback, \
                           blks_read, blks_hit, tup_returned, tup_fetched \
                           FROM pg_stat_database WHERE datname NOT LIKE 'template%';";
                Ok(self.psql(None, sql, 10).await)
            }
            other => Ok(format!("Unknown skill action: postgresql-ops__{other}")),
        }
    }
}

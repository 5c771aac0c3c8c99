//! PostgreSQL driver shelling out to `psql` / `pg_dump`.
//!
//! When the endpoint names a container, every invocation is wrapped in
//! `docker exec <container>` so the client tools inside the container
//! are used and no port needs to be published.

use crate::{DatabaseDriver, Row};
use async_trait::async_trait;
use camino::Utf8Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use vaultsync_core::{Endpoint, Error, Result};

/// Driver for one PostgreSQL endpoint.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    endpoint: Endpoint,
}

impl PostgresDriver {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    /// Build a command for a client tool, wrapped in `docker exec`
    /// when the endpoint is containerized.
    fn tool_command(&self, tool: &str) -> Command {
        match &self.endpoint.container {
            Some(container) => {
                let mut cmd = Command::new("docker");
                cmd.args(["exec", "-i", container, tool]);
                cmd
            }
            None => Command::new(tool),
        }
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = vec![
            "-U".to_string(),
            self.endpoint.user.clone(),
            "-d".to_string(),
            self.endpoint.database.clone(),
        ];
        // Inside the container the server is local; outside, connect
        // over TCP to the configured host/port.
        if self.endpoint.container.is_none() {
            args.extend([
                "-h".to_string(),
                self.endpoint.host.clone(),
                "-p".to_string(),
                self.endpoint.port.to_string(),
            ]);
        }
        args
    }

    /// Run `psql -Atc <sql>` and return trimmed stdout.
    async fn psql(&self, sql: &str) -> Result<String> {
        let mut cmd = self.tool_command("psql");
        cmd.args(self.connection_args())
            .args(["-v", "ON_ERROR_STOP=1", "-Atc", sql])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("psql [{}]: {}", self.endpoint.label, sql);
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::driver(format!(
                "psql failed on {}: {}",
                self.endpoint.label,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run `psql` feeding `input` on stdin.
    async fn psql_stdin(&self, args: &[&str], input: &[u8]) -> Result<String> {
        let mut cmd = self.tool_command("psql");
        cmd.args(self.connection_args())
            .args(["-v", "ON_ERROR_STOP=1"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::driver("failed to open psql stdin"))?;
        stdin.write_all(input).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::driver(format!(
                "psql (stdin) failed on {}: {}",
                self.endpoint.label,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<()> {
        self.psql("SELECT 1").await.map_err(|e| {
            Error::endpoint_unreachable(self.endpoint.label.clone(), e.to_string())
        })?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.psql(sql).await?;
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let out = self
            .psql(&format!("SELECT COUNT(*) FROM {}", table))
            .await?;
        out.parse::<u64>()
            .map_err(|e| Error::driver(format!("bad count for {}: {} ({})", table, out, e)))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let out = self
            .psql(&format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_name = '{}'",
                table
            ))
            .await?;
        Ok(out == "1")
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let out = self
            .psql(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' ORDER BY table_name",
            )
            .await?;
        Ok(out
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn dump(&self, tables: &[String], out: &Utf8Path) -> Result<()> {
        let mut cmd = self.tool_command("pg_dump");
        cmd.args(self.connection_args())
            .args(["--clean", "--if-exists", "--no-owner", "--no-privileges"]);
        for table in tables {
            cmd.args(["-t", table]);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!(
            "pg_dump [{}]: {} tables -> {}",
            self.endpoint.label,
            tables.len(),
            out
        );
        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::dump_failed(
                self.endpoint.label.clone(),
                stderr.trim().to_string(),
            ));
        }

        tokio::fs::write(out.as_std_path(), &output.stdout).await?;
        Ok(())
    }

    async fn restore(&self, dump: &Utf8Path) -> Result<()> {
        let sql = tokio::fs::read(dump.as_std_path()).await?;
        self.psql_stdin(&[], &sql).await?;
        Ok(())
    }

    async fn fetch_window(
        &self,
        table: &str,
        order_column: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let sql = format!(
            "COPY (SELECT * FROM {} ORDER BY {} OFFSET {} LIMIT {}) \
             TO STDOUT WITH (FORMAT csv)",
            table, order_column, offset, limit
        );
        let out = self.psql(&sql).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let copy = format!("COPY {} FROM STDIN WITH (FORMAT csv)", table);
        let mut payload = rows.join("\n");
        payload.push('\n');
        self.psql_stdin(&["-c", &copy], payload.as_bytes()).await?;
        Ok(rows.len() as u64)
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        // Best-effort by contract: callers log and continue when the
        // index is already gone, so if-exists keeps this idempotent.
        self.execute(&format!("DROP INDEX IF EXISTS {}", name)).await
    }

    async fn create_index(&self, ddl: &str) -> Result<()> {
        self.execute(ddl).await
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let admin = self.for_database("postgres");
        admin.execute(&format!("CREATE DATABASE {}", name)).await
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let admin = self.for_database("postgres");
        if let Err(e) = admin
            .execute(&format!("DROP DATABASE IF EXISTS {}", name))
            .await
        {
            warn!("drop database {} failed: {}", name, e);
            return Err(e);
        }
        Ok(())
    }

    fn for_database(&self, name: &str) -> Box<dyn DatabaseDriver> {
        let mut endpoint = self.endpoint.clone();
        endpoint.database = name.to_string();
        Box::new(Self::new(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(container: Option<&str>) -> Endpoint {
        Endpoint {
            label: "test".to_string(),
            host: "db.internal".to_string(),
            port: 5433,
            database: "app".to_string(),
            user: "app".to_string(),
            container: container.map(str::to_string),
        }
    }

    #[test]
    fn test_connection_args_direct_include_host() {
        let driver = PostgresDriver::new(endpoint(None));
        let args = driver.connection_args();
        assert!(args.contains(&"-h".to_string()));
        assert!(args.contains(&"db.internal".to_string()));
        assert!(args.contains(&"5433".to_string()));
    }

    #[test]
    fn test_connection_args_containerized_are_local() {
        let driver = PostgresDriver::new(endpoint(Some("app-db")));
        let args = driver.connection_args();
        assert!(!args.contains(&"-h".to_string()));
        assert!(args.contains(&"app".to_string()));
    }

    #[test]
    fn test_for_database_swaps_database_only() {
        let driver = PostgresDriver::new(endpoint(None));
        let other = driver.for_database("app_verify_1234");
        assert_eq!(other.endpoint().database, "app_verify_1234");
        assert_eq!(other.endpoint().label, "test");
    }
}

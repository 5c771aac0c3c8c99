//! In-memory database driver for tests.
//!
//! Models an engine ("cluster") holding named databases of named
//! tables, with rows stored as CSV lines. Failure injection hooks let
//! tests exercise the pipeline's error paths without a real database.

use crate::{DatabaseDriver, Row};
use async_trait::async_trait;
use camino::Utf8Path;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use vaultsync_core::{Endpoint, Error, Result};

const DUMP_HEADER: &str = "-- vaultsync dump v1";

#[derive(Debug, Default)]
struct Database {
    tables: BTreeMap<String, Vec<Row>>,
    indexes: HashSet<String>,
}

/// Shared engine state: all drivers created via `for_database` see the
/// same databases, which is what lets the validator restore into an
/// ephemeral database on "the same engine".
#[derive(Debug, Default)]
struct Cluster {
    databases: Mutex<HashMap<String, Database>>,
}

/// In-memory [`DatabaseDriver`] implementation.
pub struct MemoryDriver {
    endpoint: Endpoint,
    cluster: Arc<Cluster>,
    fail_ping: Arc<AtomicBool>,
    fail_dump: Arc<AtomicBool>,
    fail_restore: Arc<AtomicBool>,
    fail_append: Arc<AtomicBool>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MemoryDriver {
    pub fn new(endpoint: Endpoint) -> Self {
        let cluster = Arc::new(Cluster::default());
        cluster
            .databases
            .lock()
            .unwrap()
            .insert(endpoint.database.clone(), Database::default());
        Self {
            endpoint,
            cluster,
            fail_ping: Arc::new(AtomicBool::new(false)),
            fail_dump: Arc::new(AtomicBool::new(false)),
            fail_restore: Arc::new(AtomicBool::new(false)),
            fail_append: Arc::new(AtomicBool::new(false)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Driver with a default endpoint under the given label.
    pub fn with_label(label: &str) -> Self {
        Self::new(Endpoint {
            label: label.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            user: "app".to_string(),
            container: None,
        })
    }

    pub fn fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dump(&self, fail: bool) {
        self.fail_dump.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    pub fn fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    /// Create (or replace) a table with the given rows.
    pub fn seed_table(&self, table: &str, rows: Vec<Row>) {
        self.with_db(|db| {
            db.tables.insert(table.to_string(), rows);
        });
    }

    /// Seed `count` synthetic rows into a table.
    pub fn seed_rows(&self, table: &str, count: u64) {
        let rows = (0..count).map(|i| format!("{},row-{}", i, i)).collect();
        self.seed_table(table, rows);
    }

    /// Current rows of a table (empty when absent).
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.with_db(|db| db.tables.get(table).cloned().unwrap_or_default())
    }

    /// Register an index name as existing.
    pub fn seed_index(&self, name: &str) {
        self.with_db(|db| {
            db.indexes.insert(name.to_string());
        });
    }

    pub fn index_exists(&self, name: &str) -> bool {
        self.with_db(|db| db.indexes.contains(name))
    }

    /// Every statement passed to `execute`, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Database names currently present on the engine.
    pub fn database_names(&self) -> Vec<String> {
        let dbs = self.cluster.databases.lock().unwrap();
        let mut names: Vec<String> = dbs.keys().cloned().collect();
        names.sort();
        names
    }

    fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> T) -> T {
        let mut dbs = self.cluster.databases.lock().unwrap();
        let db = dbs.entry(self.endpoint.database.clone()).or_default();
        f(db)
    }

    fn apply_statement(&self, sql: &str) {
        let upper = sql.trim().to_uppercase();
        if let Some(rest) = upper.strip_prefix("TRUNCATE TABLE ") {
            let list = rest.trim_end_matches("CASCADE").trim().to_lowercase();
            self.with_db(|db| {
                for table in list.split(',').map(str::trim) {
                    if let Some(rows) = db.tables.get_mut(table) {
                        rows.clear();
                    }
                }
            });
        } else if let Some(rest) = upper.strip_prefix("DROP TABLE IF EXISTS ") {
            let table = rest.trim().to_lowercase();
            self.with_db(|db| {
                db.tables.remove(&table);
            });
        }
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(Error::driver("connection refused (injected)"));
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.apply_statement(sql);
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.with_db(|db| db.tables.get(table).map(|r| r.len() as u64).unwrap_or(0)))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.with_db(|db| db.tables.contains_key(table)))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.with_db(|db| db.tables.keys().cloned().collect()))
    }

    async fn dump(&self, tables: &[String], out: &Utf8Path) -> Result<()> {
        if self.fail_dump.load(Ordering::SeqCst) {
            return Err(Error::dump_failed(
                self.endpoint.label.clone(),
                "export process exited non-zero (injected)",
            ));
        }

        let mut content = String::from(DUMP_HEADER);
        content.push('\n');
        self.with_db(|db| {
            for table in tables {
                content.push_str(&format!("-- table: {}\n", table));
                if let Some(rows) = db.tables.get(table) {
                    for row in rows {
                        content.push_str(row);
                        content.push('\n');
                    }
                }
                content.push_str("-- end table\n");
            }
        });

        tokio::fs::write(out.as_std_path(), content).await?;
        Ok(())
    }

    async fn restore(&self, dump: &Utf8Path) -> Result<()> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(Error::driver("restore failed (injected)"));
        }

        let content = tokio::fs::read_to_string(dump.as_std_path()).await?;
        if !content.starts_with(DUMP_HEADER) {
            return Err(Error::driver("unrecognized dump format"));
        }

        let mut current: Option<(String, Vec<Row>)> = None;
        let mut parsed: Vec<(String, Vec<Row>)> = Vec::new();
        for line in content.lines().skip(1) {
            if let Some(name) = line.strip_prefix("-- table: ") {
                current = Some((name.to_string(), Vec::new()));
            } else if line == "-- end table" {
                if let Some(section) = current.take() {
                    parsed.push(section);
                }
            } else if let Some((_, rows)) = current.as_mut() {
                rows.push(line.to_string());
            }
        }

        self.with_db(|db| {
            for (table, rows) in parsed {
                db.tables.insert(table, rows);
            }
        });
        Ok(())
    }

    async fn fetch_window(
        &self,
        table: &str,
        _order_column: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        Ok(self.with_db(|db| {
            let rows = db.tables.get(table).cloned().unwrap_or_default();
            rows.into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect()
        }))
    }

    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<u64> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(Error::driver("copy stream broken (injected)"));
        }
        self.with_db(|db| {
            db.tables
                .entry(table.to_string())
                .or_default()
                .extend(rows.iter().cloned());
        });
        Ok(rows.len() as u64)
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        self.with_db(|db| {
            db.indexes.remove(name);
        });
        Ok(())
    }

    async fn create_index(&self, ddl: &str) -> Result<()> {
        // Index name is the third word of "CREATE INDEX <name> ON ..."
        let name = ddl
            .split_whitespace()
            .nth(2)
            .unwrap_or("unnamed")
            .to_string();
        self.with_db(|db| {
            db.indexes.insert(name);
        });
        Ok(())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.cluster
            .databases
            .lock()
            .unwrap()
            .insert(name.to_string(), Database::default());
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.cluster.databases.lock().unwrap().remove(name);
        Ok(())
    }

    fn for_database(&self, name: &str) -> Box<dyn DatabaseDriver> {
        let mut endpoint = self.endpoint.clone();
        endpoint.database = name.to_string();
        Box::new(Self {
            endpoint,
            cluster: Arc::clone(&self.cluster),
            fail_ping: Arc::clone(&self.fail_ping),
            fail_dump: Arc::clone(&self.fail_dump),
            fail_restore: Arc::clone(&self.fail_restore),
            fail_append: Arc::clone(&self.fail_append),
            executed: Arc::clone(&self.executed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[tokio::test]
    async fn test_dump_and_restore_round_trip() {
        let driver = MemoryDriver::with_label("local");
        driver.seed_rows("users", 3);

        let dir = tempfile::tempdir().unwrap();
        let dump = Utf8PathBuf::from_path_buf(dir.path().join("out.sql")).unwrap();
        driver
            .dump(&["users".to_string()], &dump)
            .await
            .unwrap();

        let other = MemoryDriver::with_label("other");
        other.restore(&dump).await.unwrap();
        assert_eq!(other.row_count("users").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_truncate_cascade_clears_listed_tables() {
        let driver = MemoryDriver::with_label("local");
        driver.seed_rows("a", 2);
        driver.seed_rows("b", 2);
        driver.seed_rows("c", 2);

        driver
            .execute("TRUNCATE TABLE a, b, c CASCADE")
            .await
            .unwrap();

        for table in ["a", "b", "c"] {
            assert_eq!(driver.row_count(table).await.unwrap(), 0);
            assert!(driver.table_exists(table).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_fetch_window_bounds() {
        let driver = MemoryDriver::with_label("local");
        driver.seed_rows("events", 25);

        let w1 = driver.fetch_window("events", "id", 0, 10).await.unwrap();
        let w3 = driver.fetch_window("events", "id", 20, 10).await.unwrap();
        assert_eq!(w1.len(), 10);
        assert_eq!(w3.len(), 5);
    }

    #[tokio::test]
    async fn test_for_database_shares_engine() {
        let driver = MemoryDriver::with_label("local");
        driver.create_database("app_verify_x").await.unwrap();

        let ephemeral = driver.for_database("app_verify_x");
        ephemeral
            .append_rows("t", &["1,a".to_string()])
            .await
            .unwrap();
        assert_eq!(ephemeral.row_count("t").await.unwrap(), 1);

        // Original database unaffected
        assert_eq!(driver.row_count("t").await.unwrap(), 0);

        driver.drop_database("app_verify_x").await.unwrap();
        assert_eq!(driver.database_names(), vec!["app".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_dump_failure() {
        let driver = MemoryDriver::with_label("local");
        driver.fail_dump(true);
        let dir = tempfile::tempdir().unwrap();
        let dump = Utf8PathBuf::from_path_buf(dir.path().join("out.sql")).unwrap();
        let err = driver.dump(&["users".to_string()], &dump).await.unwrap_err();
        assert!(matches!(err, Error::DumpFailed { .. }));
    }
}

//! Database driver capability interface.
//!
//! Every higher-level component (backup, restore, sync, validation)
//! talks to a database exclusively through [`DatabaseDriver`]; the
//! details of how commands reach the engine (direct `psql`, or
//! `docker exec` into a container) live behind this seam. Tests use
//! the in-memory implementation in [`memory`].

pub mod memory;
pub mod postgres;
pub mod probe;

pub use memory::MemoryDriver;
pub use postgres::PostgresDriver;
pub use probe::ConnectivityProbe;

use async_trait::async_trait;
use camino::Utf8Path;
use vaultsync_core::{Endpoint, Result};

/// One table row in transit, encoded as a CSV line.
///
/// Rows are opaque to the pipeline: they are fetched from a source
/// window and appended to the target verbatim, never parsed.
pub type Row = String;

/// Narrow capability interface against one database endpoint.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// The endpoint this driver talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Cheap liveness check (`SELECT 1`). Callers wrap this in a short
    /// timeout; the driver itself does not.
    async fn ping(&self) -> Result<()>;

    /// Execute a statement, discarding any result rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Row count of one table.
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Whether a table exists in the connected database.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Names of user tables in the connected database.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Export structure and data of the given tables to a plain-SQL
    /// file at `out`. No fixed timeout: duration is data-volume bound.
    async fn dump(&self, tables: &[String], out: &Utf8Path) -> Result<()>;

    /// Apply a plain-SQL dump file to the connected database.
    async fn restore(&self, dump: &Utf8Path) -> Result<()>;

    /// Fetch one ordered window of rows as CSV lines.
    async fn fetch_window(
        &self,
        table: &str,
        order_column: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>>;

    /// Append CSV rows to a table. Returns the number of rows written.
    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<u64>;

    /// Drop an index by name with if-exists semantics.
    async fn drop_index(&self, name: &str) -> Result<()>;

    /// Create an index from its full DDL.
    async fn create_index(&self, ddl: &str) -> Result<()>;

    /// Create a database on the same engine (used for ephemeral
    /// validation instances).
    async fn create_database(&self, name: &str) -> Result<()>;

    /// Drop a database on the same engine, if it exists.
    async fn drop_database(&self, name: &str) -> Result<()>;

    /// A driver against a different database on the same engine.
    fn for_database(&self, name: &str) -> Box<dyn DatabaseDriver>;
}

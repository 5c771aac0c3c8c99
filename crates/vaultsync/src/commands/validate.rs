//! Validate command: ephemeral test restore

use anyhow::{bail, Result};
use camino::Utf8Path;
use vaultsync_driver::DatabaseDriver;
use vaultsync_restore::Validator;

use crate::cli::ValidateArgs;
use crate::context::AppContext;
use crate::output;

pub async fn run(args: ValidateArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = AppContext::load(config_path)?;
    let live = ctx.driver_for(&args.endpoint)?;

    let artifact = match &args.id {
        Some(id) => match ctx.store.get(id)? {
            Some(artifact) => artifact,
            None => bail!("no artifact with id '{}'", id),
        },
        None => {
            let max_age = ctx.config.file.backup.max_age_seconds;
            match ctx.store.latest(&args.endpoint, max_age)? {
                Some(artifact) => artifact,
                None => bail!(
                    "no verified artifact for '{}' within {}s; name one explicitly",
                    args.endpoint,
                    max_age
                ),
            }
        }
    };

    output::header("Validate Artifact");
    output::kv("Artifact", &artifact.id);
    output::kv("Engine", &live.endpoint().to_string());

    let validator = Validator::new(ctx.config.tables.clone());
    let pb = output::spinner("Restoring into an ephemeral database");
    let report = validator.test_restore(&artifact, &live).await;
    pb.finish_and_clear();
    let report = report?;

    output::kv("Ephemeral database", &report.ephemeral_database);
    output::kv("Tables", &report.existence_summary());
    for check in &report.counts {
        if check.matched() {
            output::kv(&check.table, &format!("{} rows", check.actual));
        } else {
            output::warning(&format!(
                "{}: live has {} rows, restored copy has {}",
                check.table, check.expected, check.actual
            ));
        }
    }

    if report.passed() {
        output::success(&format!("Artifact {} is restorable", artifact.id));
        Ok(())
    } else {
        bail!("artifact {} failed the test restore", artifact.id)
    }
}

//! The `pgloader` subcommand: emit the LOAD file for the data move

use crate::cli::PgloaderArgs;
use crate::error::Result;
use crate::pgloader as config;
use tracing::info;

pub async fn pgloader(args: &PgloaderArgs) -> Result<u8> {
    config::generate(
        &args.mysql_dsn,
        &args.postgres_dsn,
        args.remove_null_characters,
        args.output.as_deref(),
    )
    .await?;

    if let Some(path) = &args.output {
        info!(path = %path.display(), "pgloader configuration written");
    }
    Ok(0)
}

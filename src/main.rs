use clap::Parser;
use schemaport::cli::{Cli, Commands};
use schemaport::{commands, Error};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match &cli.command {
        Commands::Source(args) => commands::source(args).await,
        Commands::Target(args) => commands::target(args).await,
        Commands::PostMigrate(args) => commands::post_migrate(args).await,
        Commands::Pgloader(args) => commands::pgloader(args).await,
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            tracing::error!("{error}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directives = if verbose {
        "schemaport=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Stable exit codes so wrapping scripts can branch on the failure class
fn exit_code_for(error: &Error) -> u8 {
    match error {
        Error::Connectivity { .. } => 2,
        Error::CatalogUnavailable(_) => 3,
        Error::VersionUnsupported { .. } => 4,
        Error::CheckExecution { .. } => 5,
        Error::FixExecution { .. } => 6,
        Error::SourceUndetermined(_) => 7,
        Error::MigrationApplication { .. } => 8,
        Error::Provisioning(_) => 9,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classes_map_to_distinct_codes() {
        let codes = [
            exit_code_for(&Error::Connectivity {
                engine: "mysql",
                message: "refused".to_string(),
            }),
            exit_code_for(&Error::CatalogUnavailable("x".to_string())),
            exit_code_for(&Error::VersionUnsupported {
                detected: "5.7".to_string(),
                required: 8,
                operation: "unicode fixes",
            }),
            exit_code_for(&Error::CheckExecution {
                name: "x".to_string(),
                message: "y".to_string(),
            }),
            exit_code_for(&Error::FixExecution {
                name: "x".to_string(),
                message: "y".to_string(),
            }),
            exit_code_for(&Error::SourceUndetermined("x".to_string())),
            exit_code_for(&Error::MigrationApplication {
                script: "x".to_string(),
                message: "y".to_string(),
            }),
            exit_code_for(&Error::Provisioning("x".to_string())),
        ];

        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&schemaport::commands::EXIT_DRIFT));
    }
}

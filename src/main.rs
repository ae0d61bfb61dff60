use std::{process, sync::Arc};

use tenantry::{
    application::{authz::Anonymous, error::AppError},
    cache::{CacheConfig, MemoryCacheBackend},
    config::{self, DatabaseSettings},
    infra::{
        db::PostgresStore,
        error::InfraError,
        seed::{self, Fixtures},
        telemetry,
    },
    modules::Platform,
};
use sqlx::PgPool;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.render(), source = report.source, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.render(), source = report.source, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::Seed(args) => run_seed(&settings, args).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let pool = connect(&settings.database).await?;
    PostgresStore::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    info!("Migrations applied");
    Ok(())
}

async fn run_seed(settings: &config::Settings, args: config::SeedArgs) -> Result<(), AppError> {
    let fixtures = Fixtures::load(&args.file).await?;
    let pool = connect(&settings.database).await?;

    let cache_config = CacheConfig::from(&settings.cache);
    let backend = Arc::new(MemoryCacheBackend::new(&cache_config));
    let platform = Platform::new(
        Arc::new(PostgresStore::new(pool)),
        backend,
        cache_config,
        Arc::new(Anonymous),
    );

    let report = seed::seed(&platform, &fixtures).await?;
    info!(
        file = %args.file.display(),
        records = report.entries.len(),
        conflicts = report.conflict_count(),
        "Seed complete"
    );
    Ok(())
}

async fn connect(database: &DatabaseSettings) -> Result<PgPool, AppError> {
    let url = database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url must be configured"))?;
    let pool = PostgresStore::connect(url, database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    Ok(pool)
}

mod config;

use common::domain::{CommandStore, RouterStore};
use common::postgres::{PostgresClient, PostgresCommandRepository, PostgresRouterRepository};
use common::redis::{RedisClient, RedisCommandRepository, RedisRouterRepository};
use common::telemetry::{init_telemetry, TelemetryConfig};
use crate::config::ServiceConfig;
use goose::MigrationRunner;
use router_manager_api::domain::{CommandQueue, RouterIdentityResolver};
use router_manager_api::router_manager_api::RouterManagerApi;
use router_manager_runner::Runner;
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig::new(
        config.service_name.clone(),
        config.log_level.clone(),
    )) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(service = %config.service_name, "Starting router manager");
    debug!("Configuration: {:?}", config);

    let deps = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    let resolver = Arc::new(RouterIdentityResolver::new(
        deps.durable_routers,
        deps.fast_path_routers,
    ));
    let command_queue = Arc::new(CommandQueue::new(
        resolver,
        deps.durable_commands,
        deps.fast_path_commands,
    ));

    let api = RouterManagerApi::new(command_queue, config.grpc_config());

    let postgres_client = deps.postgres_client;
    let runner = Runner::new()
        .with_app_process("router_manager_api", api.into_runner_process())
        .with_closer("postgres", move || async move {
            postgres_client.close();
            info!("PostgreSQL pool closed");
            Ok(())
        })
        .with_closer_timeout(config.closer_timeout());

    std::process::exit(runner.run().await);
}

struct SharedDependencies {
    postgres_client: PostgresClient,
    durable_routers: Arc<dyn RouterStore>,
    durable_commands: Arc<dyn CommandStore>,
    fast_path_routers: Arc<dyn RouterStore>,
    fast_path_commands: Arc<dyn CommandStore>,
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    info!("Initializing PostgreSQL...");
    let postgres_config = config.postgres_config();
    MigrationRunner::new(
        config.postgres_goose_binary_path.clone(),
        config.postgres_migrations_dir.clone(),
        "postgres".to_string(),
        postgres_config.dsn(),
    )
    .run_migrations()
    .await?;

    let postgres_client = PostgresClient::new(&postgres_config)?;
    postgres_client.ping().await?;

    info!("Initializing Redis...");
    let redis_config = config.redis_config();
    let redis_client = RedisClient::connect(&redis_config).await?;
    redis_client.ping().await?;

    Ok(SharedDependencies {
        durable_routers: Arc::new(PostgresRouterRepository::new(postgres_client.clone())),
        durable_commands: Arc::new(PostgresCommandRepository::new(postgres_client.clone())),
        fast_path_routers: Arc::new(RedisRouterRepository::new(
            redis_client.clone(),
            redis_config.router_ttl_secs,
        )),
        fast_path_commands: Arc::new(RedisCommandRepository::new(
            redis_client,
            redis_config.command_ttl_secs,
        )),
        postgres_client,
    })
}

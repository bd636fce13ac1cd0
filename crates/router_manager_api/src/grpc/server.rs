use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info};

use crate::domain::CommandQueue;
use crate::grpc::CommandServiceHandler;
use crate::proto::command::v1::command_service_server::CommandServiceServer;
use crate::proto::command::v1::FILE_DESCRIPTOR_SET;
use common::grpc::{GrpcLoggingConfig, GrpcLoggingLayer};

/// Configuration for the gRPC server.
#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    pub host: String,
    pub port: u16,
    pub logging_config: GrpcLoggingConfig,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            logging_config: GrpcLoggingConfig::default(),
        }
    }
}

impl GrpcServerConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid server address {}:{}", self.host, self.port))
    }
}

/// Run the CommandService until the token is cancelled
pub async fn run_grpc_server(
    config: GrpcServerConfig,
    command_queue: Arc<CommandQueue>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config.addr()?;
    info!(address = %addr, "Starting gRPC server");

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .context("failed to build reflection service")?;

    let command_handler = CommandServiceHandler::new(command_queue);

    let serve = Server::builder()
        .layer(GrpcLoggingLayer::new(config.logging_config.clone()))
        .add_service(reflection_service)
        .add_service(CommandServiceServer::new(command_handler))
        .serve_with_shutdown(addr, async move {
            cancellation_token.cancelled().await;
            debug!("gRPC server shutdown signal received");
        });

    match serve.await {
        Ok(_) => {
            info!("gRPC server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("gRPC server error: {}", e);
            Err(e.into())
        }
    }
}

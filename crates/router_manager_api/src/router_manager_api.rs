use crate::domain::CommandQueue;
use crate::grpc::{run_grpc_server, GrpcServerConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The gRPC face of the command queue, packaged as a runner process
pub struct RouterManagerApi {
    command_queue: Arc<CommandQueue>,
    config: GrpcServerConfig,
}

impl RouterManagerApi {
    pub fn new(command_queue: Arc<CommandQueue>, config: GrpcServerConfig) -> Self {
        debug!("Initializing router manager API module");
        Self {
            command_queue,
            config,
        }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
    {
        move |ctx| Box::pin(async move { run_grpc_server(self.config, self.command_queue, ctx).await })
    }
}

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument};

use crate::domain::CommandQueue;
use crate::grpc::{to_ack_request, to_dispatch_request, to_poll_request, to_proto_command};
use crate::proto::command::v1::command_service_server::CommandService as CommandServiceTrait;
use crate::proto::command::v1::{
    AckCommandRequest, AckCommandResponse, PollCommandsRequest, PollCommandsResponse,
    SendCommandRequest, SendCommandResponse,
};
use common::domain::CommandStatus;
use common::grpc::domain_error_to_status;

/// gRPC handler for CommandService
/// Handles Proto → Domain mapping and error conversion
pub struct CommandServiceHandler {
    command_queue: Arc<CommandQueue>,
}

impl CommandServiceHandler {
    pub fn new(command_queue: Arc<CommandQueue>) -> Self {
        Self { command_queue }
    }
}

#[tonic::async_trait]
impl CommandServiceTrait for CommandServiceHandler {
    #[instrument(
        name = "SendCommand",
        skip(self, request),
        fields(
            command_type = %request.get_ref().command_type,
            routers = request.get_ref().routers.len(),
        )
    )]
    async fn send_command(
        &self,
        request: Request<SendCommandRequest>,
    ) -> Result<Response<SendCommandResponse>, Status> {
        let service_request = to_dispatch_request(request.into_inner());

        let ids = self
            .command_queue
            .dispatch(service_request)
            .await
            .map_err(domain_error_to_status)?;

        debug!(count = ids.len(), "Commands queued successfully");

        Ok(Response::new(SendCommandResponse {
            status: CommandStatus::Pending.to_string(),
            ids: ids.into_iter().map(|id| id.to_string()).collect(),
        }))
    }

    #[instrument(
        name = "PollCommands",
        skip(self, request),
        fields(
            router_id = %request.get_ref().router_id,
            serial_number = %request.get_ref().serial_number,
        )
    )]
    async fn poll_commands(
        &self,
        request: Request<PollCommandsRequest>,
    ) -> Result<Response<PollCommandsResponse>, Status> {
        let service_request = to_poll_request(request.into_inner());

        let deliveries = self
            .command_queue
            .poll(service_request)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(PollCommandsResponse {
            commands: deliveries.into_iter().map(to_proto_command).collect(),
        }))
    }

    #[instrument(
        name = "AckCommand",
        skip(self, request),
        fields(
            router_id = %request.get_ref().router_id,
            command_type = %request.get_ref().command_type,
        )
    )]
    async fn ack_command(
        &self,
        request: Request<AckCommandRequest>,
    ) -> Result<Response<AckCommandResponse>, Status> {
        let service_request = to_ack_request(request.into_inner());

        let status = self
            .command_queue
            .ack(service_request)
            .await
            .map_err(domain_error_to_status)?;

        Ok(Response::new(AckCommandResponse {
            status: status.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RouterIdentityResolver;
    use crate::proto::command::v1::RouterTarget;
    use common::domain::InMemoryStore;
    use tonic::Code;

    fn handler() -> CommandServiceHandler {
        let durable = InMemoryStore::new();
        let fast_path = InMemoryStore::cache();
        let resolver = Arc::new(RouterIdentityResolver::new(
            Arc::new(durable.clone()),
            Arc::new(fast_path.clone()),
        ));
        let queue = CommandQueue::new(resolver, Arc::new(durable), Arc::new(fast_path));
        CommandServiceHandler::new(Arc::new(queue))
    }

    #[tokio::test]
    async fn test_send_command_without_routers_is_invalid_argument() {
        let status = handler()
            .send_command(Request::new(SendCommandRequest {
                routers: vec![],
                command_type: "REBOOT".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("no routers specified"));
    }

    #[tokio::test]
    async fn test_poll_unknown_router_is_not_found() {
        let status = handler()
            .poll_commands(Request::new(PollCommandsRequest {
                router_id: uuid::Uuid::new_v4().to_string(),
                serial_number: "SN1".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_status_strings_over_the_wire() {
        let handler = handler();

        let sent = handler
            .send_command(Request::new(SendCommandRequest {
                routers: vec![RouterTarget {
                    serial_number: "SN1".to_string(),
                }],
                command_type: "REBOOT".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(sent.status, "PENDING");
        assert_eq!(sent.ids.len(), 1);

        let router_id = handler
            .command_queue
            .resolver()
            .resolve_or_register("SN1")
            .await
            .unwrap()
            .id
            .to_string();

        let polled = handler
            .poll_commands(Request::new(PollCommandsRequest {
                router_id: router_id.clone(),
                serial_number: "SN1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(polled.commands.len(), 1);
        assert_eq!(polled.commands[0].id, sent.ids[0]);
        assert_eq!(polled.commands[0].payload, r#"{"command":"REBOOT"}"#);

        let acked = handler
            .ack_command(Request::new(AckCommandRequest {
                router_id,
                serial_number: "SN1".to_string(),
                command_type: "REBOOT".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(acked.status, "ACKED");
    }
}

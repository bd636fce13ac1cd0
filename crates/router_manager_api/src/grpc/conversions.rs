use crate::domain::{AckRequest, DispatchRequest, PollRequest, RouterTarget};
use crate::proto::command::v1::{
    AckCommandRequest, Command as ProtoCommand, PollCommandsRequest, SendCommandRequest,
};
use chrono::{DateTime, Utc};
use common::domain::CommandDelivery;
use prost_types::Timestamp;

/// Convert DateTime<Utc> to protobuf Timestamp
fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

pub fn to_dispatch_request(req: SendCommandRequest) -> DispatchRequest {
    DispatchRequest {
        routers: req
            .routers
            .into_iter()
            .map(|target| RouterTarget {
                serial_number: target.serial_number,
            })
            .collect(),
        command_type: req.command_type,
    }
}

pub fn to_poll_request(req: PollCommandsRequest) -> PollRequest {
    PollRequest {
        router_id: req.router_id,
        serial_number: req.serial_number,
    }
}

pub fn to_ack_request(req: AckCommandRequest) -> AckRequest {
    AckRequest {
        router_id: req.router_id,
        serial_number: req.serial_number,
        command_type: req.command_type,
    }
}

/// Convert a delivered command to its protobuf form, payload as JSON text
pub fn to_proto_command(delivery: CommandDelivery) -> ProtoCommand {
    ProtoCommand {
        id: delivery.id.to_string(),
        command_type: delivery.command_type,
        payload: delivery.payload.to_string(),
        created_at: Some(datetime_to_timestamp(delivery.created_at)),
    }
}

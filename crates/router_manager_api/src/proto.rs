//! Generated `router_manager.command.v1` types and service stubs.

#![allow(clippy::all)]

pub mod command {
    pub mod v1 {
        tonic::include_proto!("router_manager.command.v1");

        /// Encoded descriptor set served by gRPC reflection
        pub const FILE_DESCRIPTOR_SET: &[u8] =
            include_bytes!(concat!(env!("OUT_DIR"), "/command_descriptor.bin"));
    }
}

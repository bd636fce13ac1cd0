pub mod domain;
pub mod grpc;
pub mod proto;
pub mod router_manager_api;

pub use domain::*;
pub use grpc::*;
pub use router_manager_api::*;

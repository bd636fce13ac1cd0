pub mod domain;
pub mod garde;
pub mod grpc;
pub mod postgres;
pub mod redis;
pub mod telemetry;

pub use domain::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockCommandStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRouterStore;

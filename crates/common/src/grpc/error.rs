use crate::domain::DomainError;
use tonic::Status;

/// Convert domain error to gRPC Status
pub fn domain_error_to_status(error: DomainError) -> Status {
    match error {
        DomainError::InvalidArgument(msg) => Status::invalid_argument(msg),

        DomainError::RouterNotFound(msg) => {
            Status::not_found(format!("Router not found: {}", msg))
        }

        DomainError::InvalidStateTransition(msg) => {
            Status::failed_precondition(format!("Invalid state transition: {}", msg))
        }

        DomainError::PersistenceError(err) => Status::internal(format!("Internal error: {}", err)),

        DomainError::CacheWarning(err) => Status::internal(format!("Cache error: {}", err)),
    }
}

use crate::domain::RouterIdentityResolver;
use chrono::Utc;
use common::domain::{
    Command, CommandDelivery, CommandStatus, CommandStore, DomainError, DomainResult, Router,
};
use common::garde::validate_struct;
use garde::Validate;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

fn routers_specified(routers: &[RouterTarget], _: &()) -> garde::Result {
    if routers.is_empty() {
        return Err(garde::Error::new("no routers specified"));
    }
    Ok(())
}

fn command_specified(command_type: &str, _: &()) -> garde::Result {
    if command_type.trim().is_empty() {
        return Err(garde::Error::new("no command specified"));
    }
    Ok(())
}

fn serial_number_specified(serial_number: &str, _: &()) -> garde::Result {
    if serial_number.trim().is_empty() {
        return Err(garde::Error::new("no serial number specified"));
    }
    Ok(())
}

/// A router addressed by a dispatch
#[derive(Debug, Clone, Validate)]
pub struct RouterTarget {
    #[garde(custom(serial_number_specified))]
    pub serial_number: String,
}

/// Service request for queueing one command per router
#[derive(Debug, Clone, Validate)]
pub struct DispatchRequest {
    #[garde(custom(routers_specified), dive)]
    pub routers: Vec<RouterTarget>,
    #[garde(custom(command_specified))]
    pub command_type: String,
}

/// Service request for a router fetching its outstanding commands
#[derive(Debug, Clone, Validate)]
pub struct PollRequest {
    #[garde(skip)]
    pub router_id: String,
    #[garde(custom(serial_number_specified))]
    pub serial_number: String,
}

/// Service request for a router confirming it executed its commands
#[derive(Debug, Clone, Validate)]
pub struct AckRequest {
    #[garde(skip)]
    pub router_id: String,
    #[garde(custom(serial_number_specified))]
    pub serial_number: String,
    #[garde(custom(command_specified))]
    pub command_type: String,
}

/// Orchestrates the command lifecycle across the store of record and the
/// fast path.
///
/// Writes land in the store of record first and are then mirrored; a mirror
/// that may have missed drops the router's cached list. Reads are served from
/// the fast path while it holds outstanding work for the router. Status
/// transitions run on the fast path first so an illegal cached record stops
/// the transition before the store of record is touched, and a poll only
/// moves the commands it actually returned.
pub struct CommandQueue {
    resolver: Arc<RouterIdentityResolver>,
    durable: Arc<dyn CommandStore>,
    fast_path: Arc<dyn CommandStore>,
}

impl CommandQueue {
    pub fn new(
        resolver: Arc<RouterIdentityResolver>,
        durable: Arc<dyn CommandStore>,
        fast_path: Arc<dyn CommandStore>,
    ) -> Self {
        Self {
            resolver,
            durable,
            fast_path,
        }
    }

    pub fn resolver(&self) -> &RouterIdentityResolver {
        &self.resolver
    }

    /// Queue a PENDING command for every target, returning ids in target order
    #[instrument(skip(self, request), fields(command_type = %request.command_type, routers = request.routers.len()))]
    pub async fn dispatch(&self, request: DispatchRequest) -> DomainResult<Vec<Uuid>> {
        validate_struct(&request)?;

        let mut ids = Vec::with_capacity(request.routers.len());
        for target in &request.routers {
            let router = self
                .resolver
                .resolve_or_register(&target.serial_number)
                .await?;

            let command = Command::pending(router.id, &request.command_type, Utc::now());
            self.durable.save_command(&command).await?;

            if let Err(e) = self.fast_path.save_command(&command).await {
                warn!(command_id = %command.id, error = %e, "failed to mirror command to fast path");
                self.invalidate_fast_path(router.id).await;
            }

            debug!(command_id = %command.id, router_id = %router.id, "command queued");
            ids.push(command.id);
        }

        info!(count = ids.len(), "dispatched commands");
        Ok(ids)
    }

    /// Deliver a router's commands and mark the delivered PENDING ones SENT.
    ///
    /// Returns the whole snapshot as it was before the transition, so SENT and
    /// ACKED commands come back too.
    #[instrument(skip(self, request), fields(router_id = %request.router_id, serial_number = %request.serial_number))]
    pub async fn poll(&self, request: PollRequest) -> DomainResult<Vec<CommandDelivery>> {
        validate_struct(&request)?;

        let router = self.resolver.resolve(&request.router_id).await?;
        warn_on_serial_mismatch(&router, &request.serial_number);

        let commands = self.read_commands(router.id).await?;
        let router = self.resolver.touch(router).await?;

        let delivered: Vec<Uuid> = commands.iter().map(|command| command.id).collect();
        self.advance_within(router.id, Some(delivered.as_slice()), CommandStatus::Sent)
            .await?;

        let deliveries: Vec<CommandDelivery> = commands.iter().map(Command::delivery).collect();

        debug!(count = deliveries.len(), "delivered commands");
        Ok(deliveries)
    }

    /// Mark a router's SENT commands ACKED. Nothing to ack is not an error.
    #[instrument(skip(self, request), fields(router_id = %request.router_id, command_type = %request.command_type))]
    pub async fn ack(&self, request: AckRequest) -> DomainResult<CommandStatus> {
        validate_struct(&request)?;

        let router = self.resolver.resolve(&request.router_id).await?;
        warn_on_serial_mismatch(&router, &request.serial_number);

        let router = self.resolver.touch(router).await?;
        let moved = self.advance(router.id, CommandStatus::Acked).await?;

        debug!(moved, "acknowledged commands");
        Ok(CommandStatus::Acked)
    }

    /// Move every command of a router that is eligible for `target`.
    ///
    /// The fast path goes first. An illegal record there aborts the whole
    /// transition; any other fast-path failure drops the cached list.
    #[instrument(skip(self))]
    pub async fn advance(&self, router_id: Uuid, target: CommandStatus) -> DomainResult<usize> {
        self.advance_within(router_id, None, target).await
    }

    async fn advance_within(
        &self,
        router_id: Uuid,
        ids: Option<&[Uuid]>,
        target: CommandStatus,
    ) -> DomainResult<usize> {
        let at = Utc::now();

        let fast_outcome = match ids {
            Some(ids) => self.fast_path.advance_selected(router_id, ids, target, at).await,
            None => self.fast_path.advance_status(router_id, target, at).await,
        };
        let fast_path_advanced = match fast_outcome {
            Ok(moved) => {
                debug!(moved, "fast path transitioned");
                true
            }
            Err(e @ DomainError::InvalidStateTransition(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "fast-path transition failed, continuing with durable store");
                self.invalidate_fast_path(router_id).await;
                false
            }
        };

        let durable_outcome = match ids {
            Some(ids) => self.durable.advance_selected(router_id, ids, target, at).await,
            None => self.durable.advance_status(router_id, target, at).await,
        };
        match durable_outcome {
            Ok(moved) => Ok(moved),
            Err(e) => {
                if fast_path_advanced {
                    error!(error = %e, "durable transition failed after fast-path transition, stores are inconsistent");
                    self.invalidate_fast_path(router_id).await;
                } else {
                    error!(error = %e, "durable transition failed");
                }
                Err(e)
            }
        }
    }

    /// Fast path while it holds outstanding commands for the router, else the
    /// store of record, whose snapshot then seeds the fast path.
    ///
    /// A cached list that has drained is checked against the store of record;
    /// one that disagrees on size missed a write and is replaced.
    async fn read_commands(&self, router_id: Uuid) -> DomainResult<Vec<Command>> {
        let cached = match self.fast_path.list_commands(router_id).await {
            Ok(commands) => commands,
            Err(e) => {
                warn!(error = %e, "fast-path read failed, falling back to durable store");
                Vec::new()
            }
        };

        if cached.iter().any(Command::is_outstanding) {
            debug!(count = cached.len(), "commands served from fast path");
            return Ok(cached);
        }
        debug!(cached = cached.len(), "fast path holds no outstanding commands");

        let commands = self.durable.list_commands(router_id).await?;

        if !cached.is_empty() && cached.len() != commands.len() {
            info!(
                cached = cached.len(),
                durable = commands.len(),
                "cached command list is stale"
            );
            self.invalidate_fast_path(router_id).await;
        }

        if let Err(e) = self.fast_path.warm_commands(router_id, &commands).await {
            warn!(error = %e, "failed to warm fast path");
        }

        Ok(commands)
    }

    async fn invalidate_fast_path(&self, router_id: Uuid) {
        if let Err(e) = self.fast_path.invalidate(router_id).await {
            warn!(%router_id, error = %e, "failed to invalidate fast-path command list");
        }
    }
}

fn warn_on_serial_mismatch(router: &Router, serial_number: &str) {
    if router.serial_number != serial_number {
        warn!(
            router_id = %router.id,
            registered_serial = %router.serial_number,
            reported_serial = %serial_number,
            "serial number does not match registered router"
        );
    }
}

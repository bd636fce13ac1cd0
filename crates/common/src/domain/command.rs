use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery status of a command.
///
/// Transitions are strictly PENDING -> SENT -> ACKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acked,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Sent => "SENT",
            CommandStatus::Acked => "ACKED",
        }
    }

    /// The only status a command may hold before moving to `self`
    pub fn required_prior(&self) -> Option<CommandStatus> {
        match self {
            CommandStatus::Pending => None,
            CommandStatus::Sent => Some(CommandStatus::Pending),
            CommandStatus::Acked => Some(CommandStatus::Sent),
        }
    }

    /// Validate a single-step transition from `self` to `target`
    pub fn advance_to(&self, target: CommandStatus) -> DomainResult<CommandStatus> {
        if target.required_prior() == Some(*self) {
            Ok(target)
        } else {
            Err(DomainError::InvalidStateTransition(format!(
                "{} -> {}",
                self, target
            )))
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommandStatus::Pending),
            "SENT" => Ok(CommandStatus::Sent),
            "ACKED" => Ok(CommandStatus::Acked),
            other => Err(anyhow::anyhow!("unknown command status: {}", other)),
        }
    }
}

/// An administrative command queued for a router
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: Uuid,
    pub router_id: Uuid,
    pub command_type: String,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Build a new PENDING command with a fresh id and the derived payload
    pub fn pending(router_id: Uuid, command_type: impl Into<String>, now: DateTime<Utc>) -> Self {
        let command_type = command_type.into();
        let payload = serde_json::json!({ "command": command_type });

        Self {
            id: Uuid::new_v4(),
            router_id,
            command_type,
            payload,
            status: CommandStatus::Pending,
            created_at: now,
            sent_at: None,
            acked_at: None,
        }
    }

    /// Whether this command is in the prior status required to reach `target`
    pub fn is_eligible_for(&self, target: CommandStatus) -> bool {
        target.required_prior() == Some(self.status)
    }

    pub fn is_outstanding(&self) -> bool {
        self.status != CommandStatus::Acked
    }

    /// Apply a transition, stamping the matching timestamp exactly once.
    ///
    /// On error the command is left unchanged.
    pub fn advance(&mut self, target: CommandStatus, at: DateTime<Utc>) -> DomainResult<()> {
        let next = self.status.advance_to(target)?;

        match next {
            CommandStatus::Sent => {
                if self.sent_at.is_some() {
                    return Err(DomainError::InvalidStateTransition(format!(
                        "command {} already has sent_at set",
                        self.id
                    )));
                }
                self.sent_at = Some(at);
            }
            CommandStatus::Acked => {
                if self.acked_at.is_some() {
                    return Err(DomainError::InvalidStateTransition(format!(
                        "command {} already has acked_at set",
                        self.id
                    )));
                }
                self.acked_at = Some(at);
            }
            CommandStatus::Pending => unreachable!("PENDING has no prior status"),
        }

        self.status = next;
        Ok(())
    }

    /// Projection returned to a polling router
    pub fn delivery(&self) -> CommandDelivery {
        CommandDelivery {
            id: self.id,
            command_type: self.command_type.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
        }
    }
}

/// The fields of a command a router needs to execute it
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDelivery {
    pub id: Uuid,
    pub command_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Compute a router-scoped transition over a list of commands.
///
/// Returns the position and advanced copy of every command currently in the
/// prior status `target` requires; all others are left out. Fails without
/// touching anything if `target` cannot be reached or an eligible command
/// cannot legally make the step. Every store applies this same rule.
pub fn plan_transition(
    commands: &[Command],
    target: CommandStatus,
    at: DateTime<Utc>,
) -> DomainResult<Vec<(usize, Command)>> {
    plan_matching(commands, target, at, |_| true)
}

/// Like `plan_transition`, restricted to the commands whose id is in `ids`
pub fn plan_selected_transition(
    commands: &[Command],
    ids: &[Uuid],
    target: CommandStatus,
    at: DateTime<Utc>,
) -> DomainResult<Vec<(usize, Command)>> {
    plan_matching(commands, target, at, |command| ids.contains(&command.id))
}

fn plan_matching<F>(
    commands: &[Command],
    target: CommandStatus,
    at: DateTime<Utc>,
    selected: F,
) -> DomainResult<Vec<(usize, Command)>>
where
    F: Fn(&Command) -> bool,
{
    if target.required_prior().is_none() {
        return Err(DomainError::InvalidStateTransition(format!(
            "{} is not a reachable target status",
            target
        )));
    }

    let mut planned = Vec::new();
    for (position, command) in commands.iter().enumerate() {
        if !command.is_eligible_for(target) || !selected(command) {
            continue;
        }
        let mut next = command.clone();
        next.advance(target, at)?;
        planned.push((position, next));
    }

    Ok(planned)
}

/// Persistence surface for commands.
///
/// Implemented by both the durable store and the fast-path store. Stores hold
/// no business rules of their own: `advance_status` applies `plan_transition`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Append a command to the router's queue
    async fn save_command(&self, command: &Command) -> DomainResult<()>;

    /// All commands of a router in creation order
    async fn list_commands(&self, router_id: Uuid) -> DomainResult<Vec<Command>>;

    /// Advance every eligible command of a router to `target`, returning how
    /// many commands moved
    async fn advance_status(
        &self,
        router_id: Uuid,
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize>;

    /// Advance only the listed commands of a router that are eligible for
    /// `target`. Ids the store does not hold are ignored.
    async fn advance_selected(
        &self,
        router_id: Uuid,
        ids: &[Uuid],
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize>;

    /// Seed the router's queue from a durable snapshot after a read miss.
    ///
    /// Stores of record already hold every command, so this is a no-op
    /// unless overridden.
    async fn warm_commands(&self, _router_id: Uuid, _commands: &[Command]) -> DomainResult<()> {
        Ok(())
    }

    /// Drop whatever the store holds for a router once it may have missed a
    /// write. No-op for stores of record.
    async fn invalidate(&self, _router_id: Uuid) -> DomainResult<()> {
        Ok(())
    }
}

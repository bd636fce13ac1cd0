use crate::domain::{
    plan_transition, Command, CommandStatus, CommandStore, DomainError, DomainResult,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

const COMMAND_COLUMNS: &str =
    "id, router_id, command_type, payload, status, created_at, sent_at, acked_at";

/// Command row for PostgreSQL storage
#[derive(Debug, Clone)]
pub struct CommandRow {
    pub id: Uuid,
    pub router_id: Uuid,
    pub command_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

impl From<&Row> for CommandRow {
    fn from(row: &Row) -> Self {
        CommandRow {
            id: row.get(0),
            router_id: row.get(1),
            command_type: row.get(2),
            payload: row.get(3),
            status: row.get(4),
            created_at: row.get(5),
            sent_at: row.get(6),
            acked_at: row.get(7),
        }
    }
}

/// Convert database CommandRow to domain Command
impl TryFrom<CommandRow> for Command {
    type Error = DomainError;

    fn try_from(row: CommandRow) -> Result<Self, Self::Error> {
        Ok(Command {
            id: row.id,
            router_id: row.router_id,
            command_type: row.command_type,
            payload: row.payload,
            status: row.status.parse()?,
            created_at: row.created_at,
            sent_at: row.sent_at,
            acked_at: row.acked_at,
        })
    }
}

fn commands_from_rows(rows: &[Row]) -> DomainResult<Vec<Command>> {
    rows.iter()
        .map(|row| Command::try_from(CommandRow::from(row)))
        .collect()
}

/// PostgreSQL implementation of CommandStore, the system of record for commands
#[derive(Clone)]
pub struct PostgresCommandRepository {
    client: PostgresClient,
}

impl PostgresCommandRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    /// Transition the router's eligible rows, optionally limited to `ids`, in
    /// one transaction
    async fn advance_within(
        &self,
        router_id: Uuid,
        ids: Option<&[Uuid]>,
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize> {
        let Some(prior) = target.required_prior() else {
            return Err(DomainError::InvalidStateTransition(format!(
                "{} is not a reachable target status",
                target
            )));
        };

        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::PersistenceError)?;

        let transaction = conn
            .transaction()
            .await
            .map_err(|e| DomainError::PersistenceError(e.into()))?;

        // Lock the eligible rows so a concurrent poll or ack cannot move the
        // same command twice
        let rows = match ids {
            Some(ids) => {
                transaction
                    .query(
                        &format!(
                            "SELECT {COMMAND_COLUMNS}
                             FROM commands
                             WHERE router_id = $1 AND status = $2 AND id = ANY($3)
                             ORDER BY created_at ASC, seq ASC
                             FOR UPDATE"
                        ),
                        &[&router_id, &prior.as_str(), &ids],
                    )
                    .await
            }
            None => {
                transaction
                    .query(
                        &format!(
                            "SELECT {COMMAND_COLUMNS}
                             FROM commands
                             WHERE router_id = $1 AND status = $2
                             ORDER BY created_at ASC, seq ASC
                             FOR UPDATE"
                        ),
                        &[&router_id, &prior.as_str()],
                    )
                    .await
            }
        }
        .map_err(|e| DomainError::PersistenceError(e.into()))?;

        let eligible = commands_from_rows(&rows)?;
        let planned = plan_transition(&eligible, target, at)?;

        for (_, command) in &planned {
            transaction
                .execute(
                    "UPDATE commands
                     SET status = $2, sent_at = $3, acked_at = $4
                     WHERE id = $1",
                    &[
                        &command.id,
                        &command.status.as_str(),
                        &command.sent_at,
                        &command.acked_at,
                    ],
                )
                .await
                .map_err(|e| DomainError::PersistenceError(e.into()))?;
        }

        // Dropping the transaction on any error above rolls everything back
        transaction
            .commit()
            .await
            .map_err(|e| DomainError::PersistenceError(e.into()))?;

        debug!(moved = planned.len(), "advanced command status");
        Ok(planned.len())
    }
}

#[async_trait]
impl CommandStore for PostgresCommandRepository {
    #[instrument(skip(self, command), fields(command_id = %command.id, router_id = %command.router_id, command_type = %command.command_type))]
    async fn save_command(&self, command: &Command) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::PersistenceError)?;

        // Timestamps already set are never replaced
        conn.execute(
            "INSERT INTO commands (id, router_id, command_type, payload, status, created_at, sent_at, acked_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                 status = EXCLUDED.status,
                 sent_at = COALESCE(commands.sent_at, EXCLUDED.sent_at),
                 acked_at = COALESCE(commands.acked_at, EXCLUDED.acked_at)",
            &[
                &command.id,
                &command.router_id,
                &command.command_type,
                &command.payload,
                &command.status.as_str(),
                &command.created_at,
                &command.sent_at,
                &command.acked_at,
            ],
        )
        .await
        .map_err(|e| DomainError::PersistenceError(e.into()))?;

        debug!("stored command");
        Ok(())
    }

    #[instrument(skip(self, router_id), fields(router_id = %router_id))]
    async fn list_commands(&self, router_id: Uuid) -> DomainResult<Vec<Command>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::PersistenceError)?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {COMMAND_COLUMNS}
                     FROM commands
                     WHERE router_id = $1
                     ORDER BY created_at ASC, seq ASC"
                ),
                &[&router_id],
            )
            .await
            .map_err(|e| DomainError::PersistenceError(e.into()))?;

        let commands = commands_from_rows(&rows)?;
        debug!("found {} commands for router: {}", commands.len(), router_id);

        Ok(commands)
    }

    #[instrument(skip(self, router_id, target, at), fields(router_id = %router_id, target = %target))]
    async fn advance_status(
        &self,
        router_id: Uuid,
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize> {
        self.advance_within(router_id, None, target, at).await
    }

    #[instrument(skip(self, router_id, ids, target, at), fields(router_id = %router_id, target = %target, selected = ids.len()))]
    async fn advance_selected(
        &self,
        router_id: Uuid,
        ids: &[Uuid],
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize> {
        self.advance_within(router_id, Some(ids), target, at).await
    }
}

use crate::domain::{
    plan_selected_transition, plan_transition, Command, CommandStatus, CommandStore, DomainError,
    DomainResult,
};
use crate::redis::RedisClient;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub(crate) fn command_key(router_id: Uuid) -> String {
    format!("command:{}", router_id)
}

/// Replaces list elements only if the whole list still matches what was read.
///
/// KEYS[1] list key
/// ARGV[1] expected length n, ARGV[2..n+1] expected elements,
/// then (index, new element) pairs.
const COMPARE_AND_SET_SCRIPT: &str = r#"
local n = tonumber(ARGV[1])
if redis.call('LLEN', KEYS[1]) ~= n then
    return 0
end
for i = 1, n do
    if redis.call('LINDEX', KEYS[1], i - 1) ~= ARGV[i + 1] then
        return 0
    end
end
for i = n + 2, #ARGV, 2 do
    redis.call('LSET', KEYS[1], tonumber(ARGV[i]), ARGV[i + 1])
end
return 1
"#;

/// Appends to a list only when it already exists and refreshes its TTL.
///
/// KEYS[1] list key, ARGV[1] element, ARGV[2] ttl seconds
const APPEND_IF_PRESENT_SCRIPT: &str = r#"
local len = redis.call('RPUSHX', KEYS[1], ARGV[1])
if len > 0 then
    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
end
return len
"#;

/// Creates a list from a full snapshot unless another writer created it first.
///
/// KEYS[1] list key, ARGV[1] ttl seconds, ARGV[2..] elements
const WARM_IF_ABSENT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
for i = 2, #ARGV do
    redis.call('RPUSH', KEYS[1], ARGV[i])
end
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
return 1
"#;

/// JSON form of a command in the fast-path store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCommand {
    pub id: Uuid,
    pub router_id: Uuid,
    pub command_type: String,
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

impl From<&Command> for CachedCommand {
    fn from(command: &Command) -> Self {
        CachedCommand {
            id: command.id,
            router_id: command.router_id,
            command_type: command.command_type.clone(),
            payload: command.payload.clone(),
            status: command.status,
            created_at: command.created_at,
            sent_at: command.sent_at,
            acked_at: command.acked_at,
        }
    }
}

impl From<CachedCommand> for Command {
    fn from(cached: CachedCommand) -> Self {
        Command {
            id: cached.id,
            router_id: cached.router_id,
            command_type: cached.command_type,
            payload: cached.payload,
            status: cached.status,
            created_at: cached.created_at,
            sent_at: cached.sent_at,
            acked_at: cached.acked_at,
        }
    }
}

fn encode(command: &Command) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&CachedCommand::from(command))?)
}

fn decode_all(raw: &[String]) -> anyhow::Result<Vec<Command>> {
    raw.iter()
        .map(|json| -> anyhow::Result<Command> {
            let cached: CachedCommand = serde_json::from_str(json)?;
            Ok(cached.into())
        })
        .collect()
}

/// Redis implementation of CommandStore.
///
/// A router's `command:{router_id}` list is either absent or a complete copy
/// of that router's commands: appends never create the list, and
/// `warm_commands` builds it from a durable snapshot. Any list that cannot be
/// trusted any more is evicted.
#[derive(Clone)]
pub struct RedisCommandRepository {
    client: RedisClient,
    ttl_secs: u64,
}

impl RedisCommandRepository {
    pub fn new(client: RedisClient, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }

    async fn read_list(&self, router_id: Uuid) -> anyhow::Result<Vec<String>> {
        let mut conn = self.client.connection();
        let raw: Vec<String> = self
            .client
            .timed(
                ::redis::cmd("LRANGE")
                    .arg(command_key(router_id))
                    .arg(0)
                    .arg(-1)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(raw)
    }

    async fn delete_list(&self, router_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.client.connection();
        let _: () = self
            .client
            .timed(
                ::redis::cmd("DEL")
                    .arg(command_key(router_id))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    /// Drop a router's list so the next read falls back to the durable store
    async fn evict(&self, router_id: Uuid) {
        match self.delete_list(router_id).await {
            Ok(()) => debug!(router_id = %router_id, "evicted cached command list"),
            Err(e) => warn!(router_id = %router_id, error = %e, "failed to evict cached command list"),
        }
    }

    async fn compare_and_set(
        &self,
        router_id: Uuid,
        expected: &[String],
        updates: &[(usize, String)],
    ) -> anyhow::Result<bool> {
        let script = ::redis::Script::new(COMPARE_AND_SET_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(command_key(router_id)).arg(expected.len());
        for element in expected {
            invocation.arg(element);
        }
        for (position, element) in updates {
            invocation.arg(*position).arg(element);
        }

        let mut conn = self.client.connection();
        let applied: i64 = self
            .client
            .timed(invocation.invoke_async(&mut conn))
            .await?;
        Ok(applied == 1)
    }

    /// Apply the transition rule to the cached list, optionally limited to
    /// `ids`, and commit it only if nobody changed the list meanwhile
    async fn advance_within(
        &self,
        router_id: Uuid,
        ids: Option<&[Uuid]>,
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize> {
        if target.required_prior().is_none() {
            return Err(DomainError::InvalidStateTransition(format!(
                "{} is not a reachable target status",
                target
            )));
        }

        let raw = self
            .read_list(router_id)
            .await
            .map_err(DomainError::CacheWarning)?;

        let commands = match decode_all(&raw) {
            Ok(commands) => commands,
            Err(e) => {
                self.evict(router_id).await;
                return Err(DomainError::CacheWarning(
                    e.context("undecodable cached command list"),
                ));
            }
        };

        let planned = match ids {
            Some(ids) => plan_selected_transition(&commands, ids, target, at),
            None => plan_transition(&commands, target, at),
        };
        let planned = match planned {
            Ok(planned) => planned,
            Err(e) => {
                // A record that breaks the transition rule poisons the list
                self.evict(router_id).await;
                return Err(e);
            }
        };

        if planned.is_empty() {
            return Ok(0);
        }

        let updates = planned
            .iter()
            .map(|(position, command)| -> anyhow::Result<(usize, String)> {
                Ok((*position, encode(command)?))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(DomainError::CacheWarning)?;

        let applied = self
            .compare_and_set(router_id, &raw, &updates)
            .await
            .map_err(DomainError::CacheWarning)?;

        if !applied {
            self.evict(router_id).await;
            return Err(DomainError::CacheWarning(anyhow!(
                "cached command list for router {} changed during transition",
                router_id
            )));
        }

        debug!(moved = planned.len(), "advanced cached command status");
        Ok(planned.len())
    }
}

#[async_trait]
impl CommandStore for RedisCommandRepository {
    #[instrument(skip(self, command), fields(command_id = %command.id, router_id = %command.router_id))]
    async fn save_command(&self, command: &Command) -> DomainResult<()> {
        let json = encode(command).map_err(DomainError::CacheWarning)?;

        let script = ::redis::Script::new(APPEND_IF_PRESENT_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(command_key(command.router_id))
            .arg(json)
            .arg(self.ttl_secs);

        let mut conn = self.client.connection();
        let appended: anyhow::Result<i64> =
            self.client.timed(invocation.invoke_async(&mut conn)).await;

        // The append may or may not have landed; the list can no longer be
        // trusted to be complete
        let len = match appended {
            Ok(len) => len,
            Err(e) => {
                self.evict(command.router_id).await;
                return Err(DomainError::CacheWarning(e));
            }
        };

        if len == 0 {
            debug!("no cached command list, append skipped");
        } else {
            debug!(list_len = len, "cached command");
        }
        Ok(())
    }

    #[instrument(skip(self, router_id), fields(router_id = %router_id))]
    async fn list_commands(&self, router_id: Uuid) -> DomainResult<Vec<Command>> {
        let raw = self
            .read_list(router_id)
            .await
            .map_err(DomainError::CacheWarning)?;

        match decode_all(&raw) {
            Ok(commands) => {
                debug!("found {} cached commands", commands.len());
                Ok(commands)
            }
            Err(e) => {
                self.evict(router_id).await;
                Err(DomainError::CacheWarning(
                    e.context("undecodable cached command list"),
                ))
            }
        }
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

    #[instrument(skip(self, router_id, commands), fields(router_id = %router_id, count = commands.len()))]
    async fn warm_commands(&self, router_id: Uuid, commands: &[Command]) -> DomainResult<()> {
        if commands.is_empty() {
            return Ok(());
        }

        let encoded = commands
            .iter()
            .map(encode)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(DomainError::CacheWarning)?;

        let script = ::redis::Script::new(WARM_IF_ABSENT_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(command_key(router_id)).arg(self.ttl_secs);
        for element in &encoded {
            invocation.arg(element);
        }

        let mut conn = self.client.connection();
        let created: i64 = self
            .client
            .timed(invocation.invoke_async(&mut conn))
            .await
            .map_err(DomainError::CacheWarning)?;

        if created == 1 {
            debug!("warmed cached command list");
        }
        Ok(())
    }

    #[instrument(skip(self, router_id), fields(router_id = %router_id))]
    async fn invalidate(&self, router_id: Uuid) -> DomainResult<()> {
        self.delete_list(router_id)
            .await
            .map_err(DomainError::CacheWarning)?;
        debug!("invalidated cached command list");
        Ok(())
    }
}

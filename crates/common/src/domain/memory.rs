use crate::domain::{
    plan_selected_transition, plan_transition, Command, CommandStatus, CommandStore, DomainError,
    DomainResult, Router, RouterStore,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    routers: HashMap<Uuid, Router>,
    serial_index: HashMap<String, Uuid>,
    commands: HashMap<Uuid, Vec<Command>>,
}

#[derive(Default)]
struct Faults {
    command_saves: AtomicBool,
    invalidation: AtomicBool,
}

/// In-memory implementation of both store traits, for tests.
///
/// `new` behaves like the durable store: upserts by serial number keep the
/// first identity seen and lists come back in insertion order. `cache`
/// behaves like the fast path: appends only reach a list that already
/// exists, lists are created by `warm_commands` and dropped by `invalidate`.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    cache: bool,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache() -> Self {
        Self {
            cache: true,
            ..Self::default()
        }
    }

    /// Make every `save_command` fail as an unreachable fast path would
    pub fn fail_command_saves(&self, failing: bool) {
        self.faults.command_saves.store(failing, Ordering::SeqCst);
    }

    /// Make every `invalidate` fail
    pub fn fail_invalidation(&self, failing: bool) {
        self.faults.invalidation.store(failing, Ordering::SeqCst);
    }

    /// Whether a command list exists for the router
    pub async fn holds_list(&self, router_id: Uuid) -> bool {
        self.state.read().await.commands.contains_key(&router_id)
    }

    /// Overwrite a stored command, bypassing the transition rule
    pub async fn put_command(&self, command: Command) {
        let mut state = self.state.write().await;
        let queue = state.commands.entry(command.router_id).or_default();
        match queue.iter_mut().find(|c| c.id == command.id) {
            Some(existing) => *existing = command,
            None => queue.push(command),
        }
    }

    pub async fn command(&self, id: Uuid) -> Option<Command> {
        let state = self.state.read().await;
        state
            .commands
            .values()
            .flatten()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn router_count(&self) -> usize {
        self.state.read().await.routers.len()
    }
}

#[async_trait]
impl RouterStore for InMemoryStore {
    async fn save_router(&self, router: &Router) -> DomainResult<Router> {
        let mut state = self.state.write().await;

        let existing_id = state.serial_index.get(&router.serial_number).copied();
        let existing = existing_id.and_then(|id| state.routers.get_mut(&id));
        let stored = match existing {
            Some(existing) => {
                if router.ip_address.is_some() {
                    existing.ip_address = router.ip_address;
                }
                existing.last_seen_at = router.last_seen_at;
                existing.clone()
            }
            None => {
                state
                    .serial_index
                    .insert(router.serial_number.clone(), router.id);
                state.routers.insert(router.id, router.clone());
                router.clone()
            }
        };

        Ok(stored)
    }

    async fn find_router(&self, id: &str) -> DomainResult<Option<Router>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        Ok(self.state.read().await.routers.get(&id).cloned())
    }

    async fn find_router_by_serial(&self, serial_number: &str) -> DomainResult<Option<Router>> {
        let state = self.state.read().await;
        Ok(state
            .serial_index
            .get(serial_number)
            .and_then(|id| state.routers.get(id))
            .cloned())
    }
}

#[async_trait]
impl CommandStore for InMemoryStore {
    async fn save_command(&self, command: &Command) -> DomainResult<()> {
        if self.faults.command_saves.load(Ordering::SeqCst) {
            return Err(DomainError::CacheWarning(anyhow!("command save failed")));
        }

        let mut state = self.state.write().await;
        if self.cache {
            if let Some(queue) = state.commands.get_mut(&command.router_id) {
                queue.push(command.clone());
            }
        } else {
            state
                .commands
                .entry(command.router_id)
                .or_default()
                .push(command.clone());
        }
        Ok(())
    }

    async fn list_commands(&self, router_id: Uuid) -> DomainResult<Vec<Command>> {
        let state = self.state.read().await;
        Ok(state.commands.get(&router_id).cloned().unwrap_or_default())
    }

    async fn advance_status(
        &self,
        router_id: Uuid,
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize> {
        let mut state = self.state.write().await;
        let Some(queue) = state.commands.get_mut(&router_id) else {
            return plan_transition(&[], target, at).map(|_| 0);
        };

        let planned = plan_transition(queue, target, at)?;
        let moved = planned.len();
        for (position, command) in planned {
            queue[position] = command;
        }

        Ok(moved)
    }

    async fn advance_selected(
        &self,
        router_id: Uuid,
        ids: &[Uuid],
        target: CommandStatus,
        at: DateTime<Utc>,
    ) -> DomainResult<usize> {
        let mut state = self.state.write().await;
        let Some(queue) = state.commands.get_mut(&router_id) else {
            return plan_selected_transition(&[], ids, target, at).map(|_| 0);
        };

        let planned = plan_selected_transition(queue, ids, target, at)?;
        let moved = planned.len();
        for (position, command) in planned {
            queue[position] = command;
        }

        Ok(moved)
    }

    async fn warm_commands(&self, router_id: Uuid, commands: &[Command]) -> DomainResult<()> {
        if !self.cache || commands.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        state
            .commands
            .entry(router_id)
            .or_insert_with(|| commands.to_vec());
        Ok(())
    }

    async fn invalidate(&self, router_id: Uuid) -> DomainResult<()> {
        if !self.cache {
            return Ok(());
        }
        if self.faults.invalidation.load(Ordering::SeqCst) {
            return Err(DomainError::CacheWarning(anyhow!("invalidation failed")));
        }

        self.state.write().await.commands.remove(&router_id);
        Ok(())
    }
}

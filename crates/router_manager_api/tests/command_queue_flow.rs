use chrono::Utc;
use common::domain::{
    Command, CommandStatus, CommandStore, DomainError, InMemoryStore, Router, RouterStore,
};
use router_manager_api::domain::{
    AckRequest, CommandQueue, DispatchRequest, PollRequest, RouterIdentityResolver, RouterTarget,
};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    durable: InMemoryStore,
    fast_path: InMemoryStore,
    queue: CommandQueue,
}

impl Harness {
    fn new() -> Self {
        Self::with_stores(InMemoryStore::new(), InMemoryStore::cache())
    }

    fn with_stores(durable: InMemoryStore, fast_path: InMemoryStore) -> Self {
        let resolver = Arc::new(RouterIdentityResolver::new(
            Arc::new(durable.clone()),
            Arc::new(fast_path.clone()),
        ));
        let queue = CommandQueue::new(
            resolver,
            Arc::new(durable.clone()),
            Arc::new(fast_path.clone()),
        );
        Self {
            durable,
            fast_path,
            queue,
        }
    }

    async fn dispatch(&self, serials: &[&str], command_type: &str) -> Vec<Uuid> {
        self.queue
            .dispatch(DispatchRequest {
                routers: serials
                    .iter()
                    .map(|s| RouterTarget {
                        serial_number: s.to_string(),
                    })
                    .collect(),
                command_type: command_type.to_string(),
            })
            .await
            .unwrap()
    }

    async fn router_id(&self, serial: &str) -> String {
        self.durable
            .find_router_by_serial(serial)
            .await
            .unwrap()
            .unwrap()
            .id
            .to_string()
    }

    fn poll_request(router_id: &str, serial: &str) -> PollRequest {
        PollRequest {
            router_id: router_id.to_string(),
            serial_number: serial.to_string(),
        }
    }

    async fn poll(&self, router_id: &str) -> Vec<Uuid> {
        self.queue
            .poll(Self::poll_request(router_id, "SN1"))
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect()
    }

    async fn ack(&self, router_id: &str) {
        self.queue
            .ack(Self::ack_request(router_id, "SN1"))
            .await
            .unwrap();
    }

    async fn durable_status(&self, id: Uuid) -> CommandStatus {
        self.durable.command(id).await.unwrap().status
    }

    fn ack_request(router_id: &str, serial: &str) -> AckRequest {
        AckRequest {
            router_id: router_id.to_string(),
            serial_number: serial.to_string(),
            command_type: "REBOOT".to_string(),
        }
    }
}

#[tokio::test]
async fn test_registering_a_serial_twice_keeps_its_identity() {
    let harness = Harness::new();
    let resolver = harness.queue.resolver();

    let first = resolver.resolve_or_register("SN1").await.unwrap();
    let second = resolver.resolve_or_register("SN1").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(harness.durable.router_count().await, 1);
}

#[tokio::test]
async fn test_register_with_fresh_identity_returns_stored_identity() {
    let harness = Harness::new();
    let resolver = harness.queue.resolver();

    let first = resolver
        .register(Router::new("SN1", Utc::now()))
        .await
        .unwrap();
    let second = resolver
        .register(Router::new("SN1", Utc::now()))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_dispatch_poll_ack_lifecycle() {
    let harness = Harness::new();

    let ids = harness.dispatch(&["SN1"], "REBOOT").await;
    assert_eq!(ids.len(), 1);
    let command_id = ids[0];
    let router_id = harness.router_id("SN1").await;

    let delivered = harness
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, command_id);

    for store in [&harness.durable, &harness.fast_path] {
        let command = store.command(command_id).await.unwrap();
        assert_eq!(command.status, CommandStatus::Sent);
        assert!(command.sent_at.is_some());
        assert!(command.acked_at.is_none());
    }

    let status = harness
        .queue
        .ack(Harness::ack_request(&router_id, "SN1"))
        .await
        .unwrap();
    assert_eq!(status.to_string(), "ACKED");

    let acked = harness.durable.command(command_id).await.unwrap();
    assert_eq!(acked.status, CommandStatus::Acked);
    assert!(acked.acked_at.is_some());

    // Nothing left in SENT: a second ack is a no-op success
    let again = harness
        .queue
        .ack(Harness::ack_request(&router_id, "SN1"))
        .await
        .unwrap();
    assert_eq!(again, CommandStatus::Acked);

    let unchanged = harness.durable.command(command_id).await.unwrap();
    assert_eq!(unchanged, acked);
}

#[tokio::test]
async fn test_poll_returns_commands_in_creation_order() {
    let harness = Harness::new();
    let a = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let b = harness.dispatch(&["SN1"], "UPGRADE").await[0];
    let router_id = harness.router_id("SN1").await;

    let delivered = harness
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await
        .unwrap();

    let ids: Vec<Uuid> = delivered.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![a, b]);
}

#[tokio::test]
async fn test_repeated_poll_redelivers_without_restamping() {
    let harness = Harness::new();
    let id = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;

    harness
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await
        .unwrap();
    let first_sent_at = harness.durable.command(id).await.unwrap().sent_at;

    let redelivered = harness
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await
        .unwrap();

    assert_eq!(redelivered.len(), 1);
    assert_eq!(harness.durable.command(id).await.unwrap().sent_at, first_sent_at);
}

#[tokio::test]
async fn test_poll_after_ack_returns_acked_commands_unchanged() {
    let harness = Harness::new();
    let id = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;

    harness.poll(&router_id).await;
    harness.ack(&router_id).await;
    let acked = harness.durable.command(id).await.unwrap();

    let delivered = harness.poll(&router_id).await;

    assert_eq!(delivered, vec![id]);
    assert_eq!(harness.durable.command(id).await.unwrap(), acked);
}

#[tokio::test]
async fn test_command_whose_mirror_failed_is_still_delivered() {
    let harness = Harness::new();
    let reboot = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;
    harness.poll(&router_id).await;
    let router = Uuid::parse_str(&router_id).unwrap();
    assert!(harness.fast_path.holds_list(router).await);

    harness.fast_path.fail_command_saves(true);
    let upgrade = harness.dispatch(&["SN1"], "UPGRADE").await[0];
    harness.fast_path.fail_command_saves(false);
    assert!(!harness.fast_path.holds_list(router).await);

    let delivered = harness.poll(&router_id).await;

    assert_eq!(delivered, vec![reboot, upgrade]);
    assert_eq!(harness.durable_status(upgrade).await, CommandStatus::Sent);
}

#[tokio::test]
async fn test_command_missing_from_cached_list_is_delivered_before_ack() {
    let harness = Harness::new();
    let reboot = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;
    harness.poll(&router_id).await;

    // Neither the append nor the invalidation reaches the fast path
    harness.fast_path.fail_command_saves(true);
    harness.fast_path.fail_invalidation(true);
    let upgrade = harness.dispatch(&["SN1"], "UPGRADE").await[0];
    harness.fast_path.fail_command_saves(false);
    harness.fast_path.fail_invalidation(false);

    // The cached list still has outstanding work and is served as is
    let delivered = harness.poll(&router_id).await;
    assert_eq!(delivered, vec![reboot]);
    assert_eq!(harness.durable_status(upgrade).await, CommandStatus::Pending);

    harness.ack(&router_id).await;
    assert_eq!(harness.durable_status(reboot).await, CommandStatus::Acked);
    assert_eq!(harness.durable_status(upgrade).await, CommandStatus::Pending);

    // Drained list disagrees with the store of record and is replaced
    let delivered = harness.poll(&router_id).await;
    assert_eq!(delivered, vec![reboot, upgrade]);
    assert_eq!(harness.durable_status(upgrade).await, CommandStatus::Sent);
    let cached = harness.fast_path.command(upgrade).await.unwrap();
    assert_eq!(cached.status, CommandStatus::Sent);

    harness.ack(&router_id).await;
    let acked = harness.durable.command(upgrade).await.unwrap();
    assert_eq!(acked.status, CommandStatus::Acked);
    assert!(acked.sent_at.is_some());
}

#[tokio::test]
async fn test_poll_only_sends_commands_it_returned() {
    let harness = Harness::new();
    let reboot = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;
    let router = Uuid::parse_str(&router_id).unwrap();
    harness.poll(&router_id).await;

    // A command the cached list never saw
    let late = Command::pending(router, "UPGRADE", Utc::now());
    harness.durable.save_command(&late).await.unwrap();

    let delivered = harness.poll(&router_id).await;

    assert_eq!(delivered, vec![reboot]);
    assert_eq!(harness.durable_status(late.id).await, CommandStatus::Pending);
}

#[tokio::test]
async fn test_dispatch_to_two_routers_yields_distinct_ids() {
    let harness = Harness::new();

    let ids = harness.dispatch(&["SN1", "SN2"], "REBOOT").await;

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids.iter().all(|id| !id.is_nil()));
    assert_eq!(harness.durable.router_count().await, 2);
}

#[tokio::test]
async fn test_poll_unknown_router_is_not_found() {
    let harness = Harness::new();

    let result = harness
        .queue
        .poll(Harness::poll_request(&Uuid::new_v4().to_string(), "SN1"))
        .await;

    assert!(matches!(result, Err(DomainError::RouterNotFound(_))));
}

#[tokio::test]
async fn test_round_trip_preserves_type_and_payload() {
    let harness = Harness::new();
    harness.dispatch(&["SN1"], "FACTORY_RESET").await;
    let router_id = harness.router_id("SN1").await;

    let delivered = harness
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await
        .unwrap();

    assert_eq!(delivered[0].command_type, "FACTORY_RESET");
    assert_eq!(
        delivered[0].payload,
        serde_json::json!({ "command": "FACTORY_RESET" })
    );
}

#[tokio::test]
async fn test_poll_falls_back_to_durable_after_fast_path_loss() {
    let durable = InMemoryStore::new();
    let before_flush = Harness::with_stores(durable.clone(), InMemoryStore::cache());
    let id = before_flush.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = before_flush.router_id("SN1").await;

    // Same store of record, empty fast path
    let after_flush = Harness::with_stores(durable.clone(), InMemoryStore::cache());
    let delivered = after_flush
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await
        .unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, id);
    assert_eq!(
        durable.command(id).await.unwrap().status,
        CommandStatus::Sent
    );
}

#[tokio::test]
async fn test_illegal_fast_path_record_blocks_durable_transition() {
    let harness = Harness::new();
    let id = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;

    let mut corrupted = harness.durable.command(id).await.unwrap();
    corrupted.sent_at = Some(Utc::now());
    harness.fast_path.put_command(corrupted).await;

    let result = harness
        .queue
        .poll(Harness::poll_request(&router_id, "SN1"))
        .await;

    assert!(matches!(
        result,
        Err(DomainError::InvalidStateTransition(_))
    ));
    assert_eq!(
        harness.durable.command(id).await.unwrap().status,
        CommandStatus::Pending
    );
}

#[tokio::test]
async fn test_ack_before_poll_moves_nothing() {
    let harness = Harness::new();
    let id = harness.dispatch(&["SN1"], "REBOOT").await[0];
    let router_id = harness.router_id("SN1").await;

    harness
        .queue
        .ack(Harness::ack_request(&router_id, "SN1"))
        .await
        .unwrap();

    let command = harness.durable.command(id).await.unwrap();
    assert_eq!(command.status, CommandStatus::Pending);
    assert!(command.acked_at.is_none());
}

#[tokio::test]
async fn test_advance_to_pending_is_rejected() {
    let harness = Harness::new();
    harness.dispatch(&["SN1"], "REBOOT").await;
    let router = harness
        .durable
        .find_router_by_serial("SN1")
        .await
        .unwrap()
        .unwrap();

    let result = harness
        .queue
        .advance(router.id, CommandStatus::Pending)
        .await;

    assert!(matches!(
        result,
        Err(DomainError::InvalidStateTransition(_))
    ));
    let commands = harness.durable.list_commands(router.id).await.unwrap();
    assert!(commands.iter().all(|c| c.status == CommandStatus::Pending));
}

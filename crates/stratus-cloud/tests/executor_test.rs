//! Apply/destroy behaviour against the in-memory provider

use std::sync::Arc;
use std::time::Duration;
use stratus_cloud::{
    ActionType, CallKind, Executor, ExecutorOptions, MemoryProvider, NodeStatus, OutputValue,
    RetryConfig, RunOutcome, StackState, StateManager, plan_apply, synthesize,
};
use stratus_config::ConfigLoader;
use stratus_core::{
    DnsZoneSpec, ResourceGraph, ResourceNode, ResourceSpec, Stack, build_stack, outputs,
};

fn stack(json: serde_json::Value) -> Stack {
    let tree = ConfigLoader::new().json("test", json).load().unwrap();
    build_stack(tree, "staging").unwrap()
}

fn two_services() -> serde_json::Value {
    serde_json::json!({
        "stack": { "name": "shop" },
        "dns": { "domain_name": "example.com" },
        "certificate": { "arn": "arn:aws:acm:ap-northeast-1:123:certificate/abc" },
        "database": {
            "name": "shop",
            "instance_class": "t3",
            "instance_size": "micro",
            "allocated_storage_gb": 20,
            "username": "admin"
        },
        "services": {
            "files": { "image": "files:1", "subdomain": "files", "use_database": true },
            "web": { "image": "web:1", "subdomain": "www", "use_database": true }
        }
    })
}

fn options() -> ExecutorOptions {
    ExecutorOptions {
        parallelism: 4,
        timeout: Duration::from_secs(30),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
    }
}

fn executor(provider: &Arc<MemoryProvider>, options: ExecutorOptions) -> Executor {
    Executor::new(provider.clone(), options)
}

/// `count` hosted zones with no dependencies between them
fn independent_zones(count: usize) -> ResourceGraph {
    let mut graph = ResourceGraph::new();
    for i in 0..count {
        graph
            .insert(ResourceNode::new(
                format!("zone-{}", i),
                ResourceSpec::DnsZone(DnsZoneSpec {
                    domain_name: format!("z{}.example.com", i),
                }),
            ))
            .unwrap();
    }
    graph
}

fn calls_of(provider: &MemoryProvider, kind: CallKind, node: &str) -> usize {
    provider
        .calls()
        .iter()
        .filter(|c| c.kind == kind && c.node == node)
        .count()
}

#[tokio::test]
async fn test_apply_creates_everything() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    let mut state = StackState::new(stack.stack_id());

    let report = executor(&provider, options())
        .apply(&stack.graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.count(NodeStatus::Done), stack.graph.len());
    assert!(
        report
            .nodes
            .iter()
            .all(|n| n.action == Some(ActionType::Create))
    );
    assert_eq!(state.len(), stack.graph.len());
    assert_eq!(provider.resource_count(), stack.graph.len());

    // Service environment is resolved from the database outputs
    let payload = provider.payload("web").unwrap();
    assert_eq!(
        payload["properties"]["environment"]["MYSQL_HOST"],
        "shop-staging-db.db.memory.internal:3306"
    );
    assert!(payload["properties"]["secrets"]["MYSQL_PASSWORD"]["secret"].is_string());
}

#[tokio::test]
async fn test_database_failure_skips_dependent_services() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    provider.fail_on("database", "InsufficientDBInstanceCapacity");
    let mut state = StackState::new(stack.stack_id());

    let report = executor(&provider, options())
        .apply(&stack.graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);

    let database = report.get("database").unwrap();
    assert_eq!(database.status, NodeStatus::Failed);
    assert!(
        database
            .reason
            .as_deref()
            .unwrap()
            .contains("InsufficientDBInstanceCapacity")
    );

    for service in ["files", "web"] {
        let node = report.get(service).unwrap();
        assert_eq!(node.status, NodeStatus::Skipped, "{} should be skipped", service);
        assert_eq!(
            node.reason.as_deref(),
            Some("dependency 'database' failed")
        );
    }
    assert_eq!(report.get("web-dns").unwrap().status, NodeStatus::Skipped);

    // Independent nodes still completed and were recorded
    assert_eq!(report.get("network").unwrap().status, NodeStatus::Done);
    assert_eq!(report.get("web-lb").unwrap().status, NodeStatus::Done);
    assert!(state.contains("web-lb"));
    assert!(!state.contains("database"));
    assert!(!state.contains("web"));

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].node, "database");
    assert_eq!(report.nodes.len(), stack.graph.len());
}

#[tokio::test]
async fn test_reapply_issues_no_mutating_calls() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());
    let mut state = StackState::new(stack.stack_id());

    executor.apply(&stack.graph, &mut state).await.unwrap();
    let recorded = state.clone();
    provider.clear_calls();

    let report = executor.apply(&stack.graph, &mut state).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    assert!(provider.mutating_calls().is_empty());
    assert_eq!(provider.calls().len(), stack.graph.len());
    assert!(
        report
            .nodes
            .iter()
            .all(|n| n.action == Some(ActionType::NoOp))
    );
    assert_eq!(state, recorded);
}

#[tokio::test]
async fn test_changed_property_updates_only_that_node() {
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());

    let original = stack(two_services());
    let mut state = StackState::new(original.stack_id());
    executor.apply(&original.graph, &mut state).await.unwrap();
    provider.clear_calls();

    let mut json = two_services();
    json["services"]["web"]["desired_count"] = serde_json::json!(3);
    let changed = stack(json);

    let plan = plan_apply(&changed.graph, &state).unwrap();
    assert_eq!(plan.summary().update, 1);
    assert_eq!(plan.get("web").unwrap().changes[0].path, "desired_count");

    let report = executor.apply(&changed.graph, &mut state).await.unwrap();
    assert_eq!(report.get("web").unwrap().action, Some(ActionType::Update));

    let mutating = provider.mutating_calls();
    assert_eq!(mutating.len(), 1);
    assert_eq!(mutating[0].kind, CallKind::Update);
    assert_eq!(mutating[0].node, "web");
}

#[tokio::test]
async fn test_recreated_upstream_updates_dependents() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());
    let mut state = StackState::new(stack.stack_id());
    executor.apply(&stack.graph, &mut state).await.unwrap();
    let vpc_id = |state: &StackState| {
        state
            .get("network")
            .and_then(|r| r.outputs.plain(outputs::ID))
            .map(str::to_string)
            .unwrap()
    };
    let old_vpc = vpc_id(&state);

    // The VPC disappears outside stratus and comes back under a new ID
    assert!(provider.forget("network"));
    provider.clear_calls();

    let plan = plan_apply(&stack.graph, &state).unwrap();
    assert_eq!(plan.get("network").unwrap().action_type, ActionType::NoOp);

    let report = executor.apply(&stack.graph, &mut state).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.get("network").unwrap().action, Some(ActionType::Create));
    assert_eq!(report.get("cluster").unwrap().action, Some(ActionType::Update));
    assert_eq!(report.get("dns-zone").unwrap().action, Some(ActionType::NoOp));

    let new_vpc = vpc_id(&state);
    assert_ne!(new_vpc, old_vpc);
    assert_eq!(provider.payload("cluster").unwrap()["properties"]["vpc"], new_vpc);
    assert_eq!(
        state.get("cluster").unwrap().inputs["${network.id}"],
        OutputValue::Plain(new_vpc)
    );

    // Converged again
    provider.clear_calls();
    let report = executor.apply(&stack.graph, &mut state).await.unwrap();
    assert!(provider.mutating_calls().is_empty());
    assert_eq!(report.count(NodeStatus::Done), stack.graph.len());
}

#[tokio::test]
async fn test_parallelism_caps_nodes_in_flight() {
    let graph = independent_zones(8);
    let provider = Arc::new(MemoryProvider::new().with_delay(Duration::from_millis(20)));
    let mut state = StackState::new("zones-staging");
    let options = ExecutorOptions {
        parallelism: 3,
        ..options()
    };

    let report = executor(&provider, options)
        .apply(&graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(state.len(), 8);
    assert_eq!(provider.max_in_flight(), 3);
}

#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new().with_delay(Duration::from_millis(20)));
    let mut state = StackState::new(stack.stack_id());

    let report = executor(&provider, options())
        .apply(&stack.graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    // network, dns-zone and database-password have no dependencies
    assert!(provider.max_in_flight() > 1);
    assert!(provider.max_in_flight() <= options().parallelism);
}

#[tokio::test]
async fn test_parallelism_one_runs_sequentially() {
    let graph = independent_zones(4);
    let provider = Arc::new(MemoryProvider::new().with_delay(Duration::from_millis(5)));
    let mut state = StackState::new("zones-staging");
    let options = ExecutorOptions {
        parallelism: 1,
        ..options()
    };

    executor(&provider, options)
        .apply(&graph, &mut state)
        .await
        .unwrap();

    assert_eq!(provider.max_in_flight(), 1);
    assert_eq!(state.len(), 4);
}

#[tokio::test]
async fn test_failed_apply_keeps_orphans() {
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());

    let original = stack(two_services());
    let mut state = StackState::new(original.stack_id());
    executor.apply(&original.graph, &mut state).await.unwrap();
    provider.clear_calls();

    let mut json = two_services();
    json["services"]["files"] = serde_json::Value::Null;
    json["services"]["web"]["desired_count"] = serde_json::json!(3);
    let reduced = stack(json);
    provider.fail_on("web", "ServiceNotActiveException");

    let report = executor.apply(&reduced.graph, &mut state).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.get("web").unwrap().status, NodeStatus::Failed);

    assert_eq!(calls_of(&provider, CallKind::Delete, "files"), 0);
    for orphan in ["files", "files-lb", "files-dns"] {
        assert!(state.contains(orphan));
        assert!(provider.contains(orphan));
        let node = report.get(orphan).unwrap();
        assert_eq!(node.status, NodeStatus::Skipped);
        assert!(node.reason.as_deref().unwrap().contains("did not complete"));
    }

    // Once the apply succeeds the orphans go
    provider.clear_failures();
    let report = executor.apply(&reduced.graph, &mut state).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Success);
    assert!(!state.contains("files"));
}

#[tokio::test]
async fn test_removed_service_is_deleted_as_orphan() {
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());

    let original = stack(two_services());
    let mut state = StackState::new(original.stack_id());
    executor.apply(&original.graph, &mut state).await.unwrap();
    provider.clear_calls();

    let mut json = two_services();
    json["services"]["files"] = serde_json::Value::Null;
    let reduced = stack(json);

    let report = executor.apply(&reduced.graph, &mut state).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Success);

    let deleted: Vec<String> = provider
        .mutating_calls()
        .into_iter()
        .filter(|c| c.kind == CallKind::Delete)
        .map(|c| c.node)
        .collect();
    assert_eq!(deleted, vec!["files-dns", "files", "files-lb"]);
    assert!(!state.contains("files"));
    assert!(state.contains("web"));
}

#[tokio::test]
async fn test_destroy_tears_down_in_reverse_order() {
    let stack = stack(serde_json::json!({
        "dns": { "domain_name": "example.com" },
        "certificate": { "arn": "arn:cert" },
        "database": {
            "name": "app",
            "instance_class": "t3",
            "instance_size": "micro",
            "allocated_storage_gb": 20,
            "username": "admin"
        },
        "services": {
            "app": { "image": "app:1", "subdomain": "app", "use_database": true }
        }
    }));
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());
    let mut state = StackState::new(stack.stack_id());
    executor.apply(&stack.graph, &mut state).await.unwrap();
    provider.clear_calls();

    let report = executor.destroy(&stack.graph, &mut state).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Success);
    assert!(state.is_empty());
    assert_eq!(provider.resource_count(), 0);

    let deleted: Vec<String> = provider.calls().into_iter().map(|c| c.node).collect();
    let position = |name: &str| deleted.iter().position(|n| n == name).unwrap();
    assert!(position("app") < position("database"));
    assert!(position("database") < position("cluster"));
    assert!(position("cluster") < position("network"));
    assert!(position("database") < position("database-sg"));
}

#[tokio::test]
async fn test_destroy_skips_nodes_absent_from_state() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    let mut state = StackState::new(stack.stack_id());

    let report = executor(&provider, options())
        .destroy(&stack.graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.count(NodeStatus::Skipped), stack.graph.len());
    assert_eq!(report.outcome, RunOutcome::Success);
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_retain_policy_keeps_database() {
    let mut json = two_services();
    json["database"]["removal_policy"] = serde_json::json!("retain");
    let stack = stack(json);
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());
    let mut state = StackState::new(stack.stack_id());
    executor.apply(&stack.graph, &mut state).await.unwrap();

    let report = executor.destroy(&stack.graph, &mut state).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    assert!(provider.contains("database"));
    assert!(provider.contains("database-password"));
    assert!(provider.contains("network"));
    assert!(!provider.contains("web"));
    assert!(!provider.contains("cluster"));
    assert!(state.is_empty());
    assert_eq!(
        report.get("database").unwrap().action,
        Some(ActionType::NoOp)
    );
}

#[tokio::test]
async fn test_deadline_cancels_in_flight_and_skips_the_rest() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new().with_delay(Duration::from_millis(500)));
    let mut state = StackState::new(stack.stack_id());
    let options = ExecutorOptions {
        timeout: Duration::from_millis(50),
        ..options()
    };

    let report = executor(&provider, options)
        .apply(&stack.graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(report.count(NodeStatus::Done), 0);
    assert!(report.count(NodeStatus::Failed) > 0);
    for node in &report.nodes {
        match node.status {
            NodeStatus::Failed => {
                assert!(node.reason.as_deref().unwrap().contains("deadline"))
            }
            NodeStatus::Skipped => assert!(node.reason.is_some()),
            other => panic!("{} ended as {}", node.node, other),
        }
    }
    assert_eq!(report.get("web").unwrap().status, NodeStatus::Skipped);
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_create_is_not_repeated_when_resource_exists() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    provider.lose_create_response("network");
    provider.fail_transiently("cluster", 1);
    let mut state = StackState::new(stack.stack_id());

    let report = executor(&provider, options())
        .apply(&stack.graph, &mut state)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(calls_of(&provider, CallKind::Create, "network"), 1);
    assert_eq!(calls_of(&provider, CallKind::Create, "cluster"), 2);
    assert!(state.get("network").unwrap().outputs.plain(outputs::ID).is_some());
}

#[tokio::test]
async fn test_update_and_delete_are_not_retried() {
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    let executor = executor(&provider, options());
    let mut state = StackState::new(stack.stack_id());
    executor.apply(&stack.graph, &mut state).await.unwrap();

    provider.fail_on("network", "DependencyViolation");
    provider.clear_calls();
    let report = executor.destroy(&stack.graph, &mut state).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(calls_of(&provider, CallKind::Delete, "network"), 1);
    assert!(state.contains("network"));
}

#[tokio::test]
async fn test_secret_values_never_leave_the_provider() {
    let temp_dir = tempfile::tempdir().unwrap();
    let stack = stack(two_services());
    let provider = Arc::new(MemoryProvider::new());
    let mut state = StackState::new(stack.stack_id());
    executor(&provider, options())
        .apply(&stack.graph, &mut state)
        .await
        .unwrap();

    let handle = state
        .get("database-password")
        .unwrap()
        .outputs
        .secret(outputs::SECRET)
        .unwrap()
        .clone();
    let secret = provider.secret_value(&handle).unwrap();

    let manager = StateManager::new(temp_dir.path(), stack.stack_id());
    manager.save(&state).await.unwrap();
    let state_file = std::fs::read_to_string(manager.state_path()).unwrap();
    let plan = plan_apply(&stack.graph, &StackState::new(stack.stack_id()))
        .unwrap()
        .to_string();
    let synth = synthesize(&stack.stack_id(), &stack.graph)
        .unwrap()
        .to_json_pretty()
        .unwrap();
    let payload = provider.payload("web").unwrap().to_string();

    for text in [&state_file, &plan, &synth, &payload] {
        assert!(!text.contains(&secret));
    }
    assert!(payload.contains(handle.as_str()));
}

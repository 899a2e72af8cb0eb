//! Apply and destroy execution
//!
//! A single coordinating task owns every node's status. Independent nodes run
//! concurrently as Tokio tasks (bounded by `parallelism`) and report back over
//! their join handles. A run-wide deadline cancels in-flight calls through a
//! [`CancellationToken`].

use crate::action::ActionType;
use crate::error::{CloudError, ProvisioningError, Result, TimeoutError};
use crate::planner::{
    NOT_IN_STATE_NOTE, RETAINED_DEPENDENCY_NOTE, RETAINED_NOTE, is_retained, retained_nodes,
};
use crate::provider::{CloudProvider, Outputs, ResolvedInputs, RetryConfig, SecretHandle};
use crate::retry::{create_if_absent, read_with_retry};
use crate::state::{ResourceState, StackState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stratus_core::{ResourceGraph, ResourceKind, ResourceNode, ResourceSpec, outputs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);
const NOT_STARTED_REASON: &str = "not started before the deadline";
const ORPHAN_KEPT_REASON: &str = "kept because the apply did not complete";

/// Per-node execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Pending => write!(f, "pending"),
            NodeStatus::InProgress => write!(f, "in-progress"),
            NodeStatus::Done => write!(f, "done"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Success,
    Failed,
    TimedOut,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Failed => write!(f, "failed"),
            RunOutcome::TimedOut => write!(f, "timed-out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Apply,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Apply => write!(f, "apply"),
            Operation::Destroy => write!(f, "destroy"),
        }
    }
}

/// Terminal state of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: String,
    pub kind: ResourceKind,
    pub status: NodeStatus,
    /// Action actually taken
    pub action: Option<ActionType>,
    pub reason: Option<String>,
}

/// Result of an apply or destroy run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stack_id: String,
    pub operation: Operation,
    pub outcome: RunOutcome,
    /// Every node, in execution order
    pub nodes: Vec<NodeReport>,
    pub errors: Vec<ProvisioningError>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    pub fn get(&self, node: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == node)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }
}

/// Execution options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum number of nodes in flight
    pub parallelism: usize,
    /// Run-wide deadline
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

/// Walks a resource graph against a provider
pub struct Executor {
    provider: Arc<dyn CloudProvider>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(provider: Arc<dyn CloudProvider>, options: ExecutorOptions) -> Self {
        Self { provider, options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Apply the graph, recording progress into `state`
    ///
    /// `state` reflects every node that reached `done`, even when the run fails.
    #[instrument(skip_all, fields(stack = %state.stack_id, provider = self.provider.name()))]
    pub async fn apply(&self, graph: &ResourceGraph, state: &mut StackState) -> Result<RunReport> {
        state.bind_provider(self.provider.name())?;
        let started = Instant::now();
        let order = graph.topological_order()?;
        let mut tracker = Tracker::new(graph, &order);
        let timeout = TimeoutError {
            limit: self.options.timeout,
        };

        let token = CancellationToken::new();
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        let mut outputs: BTreeMap<String, Outputs> = BTreeMap::new();
        let mut tasks: JoinSet<(String, Result<Applied>)> = JoinSet::new();
        let mut timed_out = false;
        let parallelism = self.options.parallelism.max(1);

        info!(nodes = order.len(), parallelism, "Starting apply");

        loop {
            tracker.skip_blocked(graph);

            for name in &order {
                if tasks.len() >= parallelism {
                    break;
                }
                if tracker.status(name) != NodeStatus::Pending {
                    continue;
                }
                let Some(node) = graph.get(name) else {
                    continue;
                };
                if !node
                    .depends_on
                    .iter()
                    .all(|d| tracker.status(d) == NodeStatus::Done)
                {
                    continue;
                }

                let inputs = match ResolvedInputs::for_node(node, &outputs) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        tracker.fail(name, None, &e);
                        continue;
                    }
                };

                tracker.start(name);
                debug!(node = %name, "Node in progress");
                tasks.spawn(apply_node(
                    Arc::clone(&self.provider),
                    node.clone(),
                    inputs,
                    state.get(name).cloned(),
                    self.options.retry.clone(),
                    token.child_token(),
                ));
            }

            if tasks.is_empty() {
                // Newly failed nodes may have left dependents to skip
                if tracker.has_pending() && tracker.skip_blocked(graph) {
                    continue;
                }
                break;
            }

            tokio::select! {
                _ = &mut deadline => {
                    warn!(limit_secs = self.options.timeout.as_secs(), "Run deadline reached, cancelling");
                    timed_out = true;
                    token.cancel();
                    break;
                }
                Some(joined) = tasks.join_next() => {
                    let (name, result) = joined.map_err(|e| {
                        token.cancel();
                        CloudError::CommandFailed(format!("worker task failed: {}", e))
                    })?;
                    self.finish_apply(graph, state, &mut tracker, &mut outputs, &name, result, &timeout);
                }
            }
        }

        // Cancelled workers return promptly
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = joined
                .map_err(|e| CloudError::CommandFailed(format!("worker task failed: {}", e)))?;
            self.finish_apply(graph, state, &mut tracker, &mut outputs, &name, result, &timeout);
        }

        if timed_out {
            tracker.skip_pending(NOT_STARTED_REASON);
        } else {
            tracker.skip_blocked(graph);
            tracker.skip_pending("dependencies did not complete");
            if tracker.errors.is_empty() {
                timed_out = self
                    .delete_orphans(graph, state, &mut tracker, deadline.as_mut(), &timeout)
                    .await;
            } else {
                tracker.keep_orphans(graph, state);
            }
        }

        let outcome = tracker.outcome(timed_out, |_| false);
        let report = tracker.into_report(&state.stack_id, Operation::Apply, outcome, started);
        info!(
            outcome = %report.outcome,
            done = report.count(NodeStatus::Done),
            failed = report.count(NodeStatus::Failed),
            skipped = report.count(NodeStatus::Skipped),
            "Apply finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_apply(
        &self,
        graph: &ResourceGraph,
        state: &mut StackState,
        tracker: &mut Tracker,
        outputs: &mut BTreeMap<String, Outputs>,
        name: &str,
        result: Result<Applied>,
        timeout: &TimeoutError,
    ) {
        match result {
            Ok(applied) => {
                if let Some(node) = graph.get(name) {
                    let unchanged = applied.action == ActionType::NoOp
                        && state.get(name).map(|r| &r.outputs) == Some(&applied.outputs);
                    if !unchanged {
                        state.record(node, &applied.inputs, applied.outputs.clone());
                    }
                }
                info!(node = %name, action = %applied.action, "Node done");
                tracker.done(name, applied.action, None);
                outputs.insert(name.to_string(), applied.outputs);
            }
            Err(CloudError::Cancelled) => {
                tracker.fail_with(name, None, timeout.to_string());
            }
            Err(e) => {
                warn!(node = %name, error = %e, "Node failed");
                tracker.fail(name, None, &e);
            }
        }
    }

    /// Delete state entries no longer in the graph, most recently recorded first
    ///
    /// Returns whether the deadline fired.
    async fn delete_orphans(
        &self,
        graph: &ResourceGraph,
        state: &mut StackState,
        tracker: &mut Tracker,
        mut deadline: std::pin::Pin<&mut tokio::time::Sleep>,
        timeout: &TimeoutError,
    ) -> bool {
        let names: BTreeSet<&str> = graph.names().iter().map(String::as_str).collect();
        let orphans: Vec<(String, ResourceState)> = state
            .orphans(&names)
            .into_iter()
            .map(|(name, recorded)| (name.clone(), recorded.clone()))
            .collect();

        let mut still_present: BTreeSet<String> = BTreeSet::new();
        let mut timed_out = false;

        for (name, recorded) in orphans {
            tracker.add(&name, recorded.kind());

            if timed_out {
                tracker.skip(&name, NOT_STARTED_REASON);
                continue;
            }
            let blocker = orphan_blocker(state, &still_present, &name);
            if let Some(blocker) = blocker {
                tracker.skip(&name, format!("dependent '{}' was not deleted", blocker));
                still_present.insert(name);
                continue;
            }

            let node = recorded.to_node(&name);
            tracker.start(&name);
            info!(node = %name, "Deleting orphaned resource");
            let result = tokio::select! {
                _ = &mut deadline => None,
                result = self.provider.delete(&node, &recorded.outputs) => Some(result),
            };

            match result {
                None => {
                    timed_out = true;
                    tracker.fail_with(&name, Some(ActionType::Delete), timeout.to_string());
                    still_present.insert(name);
                }
                Some(Ok(())) | Some(Err(CloudError::ResourceNotFound(_))) => {
                    state.remove(&name);
                    tracker.done(&name, ActionType::Delete, None);
                }
                Some(Err(e)) => {
                    warn!(node = %name, error = %e, "Orphan deletion failed");
                    tracker.fail(&name, Some(ActionType::Delete), &e);
                    still_present.insert(name);
                }
            }
        }

        timed_out
    }

    /// Tear down everything in state, in strictly reverse topological order
    #[instrument(skip_all, fields(stack = %state.stack_id, provider = self.provider.name()))]
    pub async fn destroy(&self, graph: &ResourceGraph, state: &mut StackState) -> Result<RunReport> {
        state.ensure_provider(self.provider.name())?;
        let started = Instant::now();
        let order = graph.reverse_topological_order()?;
        let retained = retained_nodes(graph);
        let timeout = TimeoutError {
            limit: self.options.timeout,
        };

        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        // Orphans go first; they may depend on graph nodes
        let mut tracker = Tracker::new(&ResourceGraph::new(), &[]);
        let mut timed_out = self
            .delete_orphans(graph, state, &mut tracker, deadline.as_mut(), &timeout)
            .await;
        for name in &order {
            if let Some(node) = graph.get(name) {
                tracker.add(name, node.kind());
            }
        }

        info!(nodes = order.len(), "Starting destroy");
        let mut still_present: BTreeSet<String> = BTreeSet::new();
        let mut absent: BTreeSet<String> = BTreeSet::new();

        for name in &order {
            let Some(node) = graph.get(name) else {
                continue;
            };
            if timed_out {
                tracker.skip(name, NOT_STARTED_REASON);
                continue;
            }
            let Some(recorded) = state.get(name).cloned() else {
                tracker.skip(name, NOT_IN_STATE_NOTE);
                absent.insert(name.clone());
                continue;
            };
            if let Some(blocker) = graph
                .dependents(name)
                .into_iter()
                .find(|d| still_present.contains(*d))
            {
                tracker.skip(name, format!("dependent '{}' was not destroyed", blocker));
                still_present.insert(name.clone());
                continue;
            }
            if retained.contains(name) {
                info!(node = %name, "Retaining resource");
                state.remove(name);
                let note = if is_retained(node) {
                    RETAINED_NOTE
                } else {
                    RETAINED_DEPENDENCY_NOTE
                };
                tracker.done(name, ActionType::NoOp, Some(note.to_string()));
                continue;
            }

            tracker.start(name);
            info!(node = %name, kind = %node.kind(), "Deleting resource");
            let result = tokio::select! {
                _ = &mut deadline => None,
                result = self.provider.delete(node, &recorded.outputs) => Some(result),
            };

            match result {
                None => {
                    warn!(node = %name, "Run deadline reached during delete");
                    timed_out = true;
                    tracker.fail_with(name, Some(ActionType::Delete), timeout.to_string());
                    still_present.insert(name.clone());
                }
                Some(Ok(())) | Some(Err(CloudError::ResourceNotFound(_))) => {
                    state.remove(name);
                    tracker.done(name, ActionType::Delete, None);
                }
                Some(Err(e)) => {
                    warn!(node = %name, error = %e, "Delete failed");
                    tracker.fail(name, Some(ActionType::Delete), &e);
                    still_present.insert(name.clone());
                }
            }
        }

        // Already-absent nodes count as destroyed
        let outcome = tracker.outcome(timed_out, |name| absent.contains(name));
        let report = tracker.into_report(&state.stack_id, Operation::Destroy, outcome, started);
        info!(
            outcome = %report.outcome,
            deleted = report.count(NodeStatus::Done),
            failed = report.count(NodeStatus::Failed),
            "Destroy finished"
        );
        Ok(report)
    }
}

/// First orphan already kept in place that depends on `name`
fn orphan_blocker(
    state: &StackState,
    still_present: &BTreeSet<String>,
    name: &str,
) -> Option<String> {
    still_present
        .iter()
        .find(|other| {
            state
                .get(other)
                .is_some_and(|r| r.depends_on.contains(name))
        })
        .cloned()
}

/// Outcome of one node's worker
struct Applied {
    action: ActionType,
    /// Upstream values the node was converged with
    inputs: ResolvedInputs,
    outputs: Outputs,
}

async fn apply_node(
    provider: Arc<dyn CloudProvider>,
    node: ResourceNode,
    inputs: ResolvedInputs,
    recorded: Option<ResourceState>,
    retry: RetryConfig,
    token: CancellationToken,
) -> (String, Result<Applied>) {
    let result = tokio::select! {
        _ = token.cancelled() => Err(CloudError::Cancelled),
        result = converge(provider.as_ref(), &node, &inputs, recorded.as_ref(), &retry) => result,
    };
    (node.name, result)
}

/// Existence check, then create, update or nothing
async fn converge(
    provider: &dyn CloudProvider,
    node: &ResourceNode,
    inputs: &ResolvedInputs,
    recorded: Option<&ResourceState>,
    retry: &RetryConfig,
) -> Result<Applied> {
    let existing = read_with_retry(provider, retry, node, recorded.map(|r| &r.outputs)).await?;

    match existing {
        None => {
            info!(node = %node.name, kind = %node.kind(), "Creating resource");
            let outputs = match &node.spec {
                ResourceSpec::Secret(spec) => {
                    create_if_absent(provider, retry, node, move || async move {
                        let handle = provider.generate_secret(node, spec).await?;
                        Ok(secret_outputs(handle))
                    })
                    .await?
                }
                _ => {
                    create_if_absent(provider, retry, node, move || provider.create(node, inputs))
                        .await?
                }
            };
            Ok(Applied {
                action: ActionType::Create,
                inputs: inputs.clone(),
                outputs,
            })
        }
        Some(current) => match recorded {
            // An upstream recreated under a new ID changes the inputs, not the spec
            Some(r) if r.spec == node.spec && inputs.matches_recorded(&r.inputs) => {
                debug!(node = %node.name, "Resource unchanged");
                Ok(Applied {
                    action: ActionType::NoOp,
                    inputs: inputs.clone(),
                    outputs: current,
                })
            }
            _ => {
                info!(node = %node.name, kind = %node.kind(), "Updating resource");
                let outputs = provider.update(node, inputs, &current).await?;
                Ok(Applied {
                    action: ActionType::Update,
                    inputs: inputs.clone(),
                    outputs,
                })
            }
        },
    }
}

/// Outputs of a generated secret node
pub fn secret_outputs(handle: SecretHandle) -> Outputs {
    Outputs::new()
        .with_plain(outputs::ARN, handle.as_str())
        .with_secret(outputs::SECRET, handle)
}

/// Node statuses and reports, owned by the coordinating task
struct Tracker {
    order: Vec<String>,
    entries: BTreeMap<String, NodeReport>,
    errors: Vec<ProvisioningError>,
}

impl Tracker {
    fn new(graph: &ResourceGraph, order: &[String]) -> Self {
        let mut tracker = Self {
            order: Vec::new(),
            entries: BTreeMap::new(),
            errors: Vec::new(),
        };
        for name in order {
            if let Some(node) = graph.get(name) {
                tracker.add(name, node.kind());
            }
        }
        tracker
    }

    fn add(&mut self, name: &str, kind: ResourceKind) {
        if self.entries.contains_key(name) {
            return;
        }
        self.order.push(name.to_string());
        self.entries.insert(
            name.to_string(),
            NodeReport {
                node: name.to_string(),
                kind,
                status: NodeStatus::Pending,
                action: None,
                reason: None,
            },
        );
    }

    fn status(&self, name: &str) -> NodeStatus {
        self.entries
            .get(name)
            .map(|e| e.status)
            .unwrap_or(NodeStatus::Pending)
    }

    fn set(&mut self, name: &str, status: NodeStatus, action: Option<ActionType>, reason: Option<String>) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.status = status;
            entry.action = action;
            entry.reason = reason;
        }
    }

    fn start(&mut self, name: &str) {
        self.set(name, NodeStatus::InProgress, None, None);
    }

    fn done(&mut self, name: &str, action: ActionType, reason: Option<String>) {
        self.set(name, NodeStatus::Done, Some(action), reason);
    }

    fn fail(&mut self, name: &str, action: Option<ActionType>, error: &CloudError) {
        self.fail_with(name, action, error.to_string());
    }

    fn fail_with(&mut self, name: &str, action: Option<ActionType>, detail: String) {
        self.errors.push(ProvisioningError {
            node: name.to_string(),
            detail: detail.clone(),
        });
        self.set(name, NodeStatus::Failed, action, Some(detail));
    }

    fn skip(&mut self, name: &str, reason: impl Into<String>) {
        debug!(node = %name, "Node skipped");
        self.set(name, NodeStatus::Skipped, None, Some(reason.into()));
    }

    fn has_pending(&self) -> bool {
        self.entries.values().any(|e| e.status == NodeStatus::Pending)
    }

    /// Skip pending nodes whose dependencies failed or were skipped
    ///
    /// One pass in topological order reaches the fixpoint. Returns whether anything changed.
    fn skip_blocked(&mut self, graph: &ResourceGraph) -> bool {
        let mut changed = false;
        for name in self.order.clone() {
            if self.status(&name) != NodeStatus::Pending {
                continue;
            }
            let Some(node) = graph.get(&name) else {
                continue;
            };
            let blocker = node.depends_on.iter().find_map(|d| match self.status(d) {
                NodeStatus::Failed => Some(format!("dependency '{}' failed", d)),
                NodeStatus::Skipped => Some(format!("dependency '{}' was skipped", d)),
                _ => None,
            });
            if let Some(reason) = blocker {
                self.skip(&name, reason);
                changed = true;
            }
        }
        changed
    }

    /// Report orphaned state entries as skipped, leaving them in place
    fn keep_orphans(&mut self, graph: &ResourceGraph, state: &StackState) {
        let names: BTreeSet<&str> = graph.names().iter().map(String::as_str).collect();
        for (name, recorded) in state.orphans(&names) {
            self.add(name, recorded.kind());
            self.skip(name, ORPHAN_KEPT_REASON);
        }
    }

    fn skip_pending(&mut self, reason: &str) {
        for name in self.order.clone() {
            if self.status(&name) == NodeStatus::Pending {
                self.skip(&name, reason);
            }
        }
    }

    fn outcome(&self, timed_out: bool, satisfied: impl Fn(&str) -> bool) -> RunOutcome {
        if timed_out {
            RunOutcome::TimedOut
        } else if self
            .entries
            .values()
            .all(|e| e.status == NodeStatus::Done || satisfied(&e.node))
        {
            RunOutcome::Success
        } else {
            RunOutcome::Failed
        }
    }

    fn into_report(
        mut self,
        stack_id: &str,
        operation: Operation,
        outcome: RunOutcome,
        started: Instant,
    ) -> RunReport {
        let nodes = self
            .order
            .iter()
            .filter_map(|name| self.entries.remove(name))
            .collect();
        RunReport {
            stack_id: stack_id.to_string(),
            operation,
            outcome,
            nodes,
            errors: self.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

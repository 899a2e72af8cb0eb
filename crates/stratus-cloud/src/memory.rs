//! In-process provider backend
//!
//! Keeps resources in memory and records every call. Supports per-node failure
//! injection and artificial latency, which makes it the backend for tests and
//! for dry experiments with a configuration.

use crate::error::{CloudError, Result};
use crate::executor::secret_outputs;
use crate::provider::{AuthStatus, CloudProvider, Outputs, ResolvedInputs, SecretHandle};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use stratus_core::{ResourceKind, ResourceNode, ResourceSpec, SecretSpec, outputs};
use tracing::debug;

/// Kind of provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Create,
    Update,
    Delete,
    GenerateSecret,
}

impl CallKind {
    /// Whether the call changes provider-side resources
    pub fn is_mutating(&self) -> bool {
        !matches!(self, CallKind::Read)
    }
}

/// A recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    pub node: String,
}

/// Injected failure for one node
#[derive(Debug, Clone)]
enum Failure {
    /// Every mutating call fails
    Permanent(String),
    /// The next `remaining` creates fail with a throttling error
    Transient { remaining: u32 },
    /// The next create takes effect but its response is lost
    LostResponse,
}

#[derive(Debug, Clone)]
struct StoredResource {
    kind: ResourceKind,
    payload: serde_json::Value,
    outputs: Outputs,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, StoredResource>,
    secrets: BTreeMap<String, String>,
    calls: Vec<Call>,
    failures: BTreeMap<String, Failure>,
    next_id: u64,
    in_flight: usize,
    max_in_flight: usize,
}

/// Counts a call as in flight until dropped
struct InFlight<'a>(&'a Mutex<Inner>);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Mutex<Inner>) -> Self {
        if let Ok(mut inner) = inner.lock() {
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.lock() {
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
    }
}

/// In-memory provider
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    delay: Duration,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every mutating call for `node` fail
    pub fn fail_on(&self, node: impl Into<String>, detail: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .failures
                .insert(node.into(), Failure::Permanent(detail.into()));
        }
    }

    /// Make the next `times` creates of `node` fail transiently
    pub fn fail_transiently(&self, node: impl Into<String>, times: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .failures
                .insert(node.into(), Failure::Transient { remaining: times });
        }
    }

    /// Make the next create of `node` succeed but report a timeout
    pub fn lose_create_response(&self, node: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.insert(node.into(), Failure::LostResponse);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.clear();
        }
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .lock()
            .map(|inner| inner.calls.clone())
            .unwrap_or_default()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind.is_mutating())
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.calls.clear();
        }
    }

    /// Highest number of calls that were in flight at the same time
    pub fn max_in_flight(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.max_in_flight)
            .unwrap_or(0)
    }

    /// Drop a resource without a recorded call, as if deleted outside stratus
    pub fn forget(&self, node: &str) -> bool {
        self.inner
            .lock()
            .map(|mut inner| inner.resources.remove(node).is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.resources.contains_key(node))
            .unwrap_or(false)
    }

    pub fn resource_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.resources.len())
            .unwrap_or(0)
    }

    /// Last payload sent for `node`
    pub fn payload(&self, node: &str) -> Option<serde_json::Value> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.resources.get(node).map(|r| r.payload.clone()))
    }

    /// Stored value behind a secret handle
    pub fn secret_value(&self, handle: &SecretHandle) -> Option<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.secrets.get(handle.as_str()).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CloudError::StateError("memory provider lock poisoned".to_string()))
    }

    async fn begin(&self, kind: CallKind, node: &str) -> Result<()> {
        if !self.delay.is_zero() {
            let _in_flight = InFlight::enter(&self.inner);
            tokio::time::sleep(self.delay).await;
        }
        let mut inner = self.lock()?;
        inner.calls.push(Call {
            kind,
            node: node.to_string(),
        });
        debug!(call = ?kind, node, "Memory provider call");

        if !kind.is_mutating() {
            return Ok(());
        }
        match inner.failures.get_mut(node) {
            Some(Failure::Permanent(detail)) => Err(CloudError::ApiError(detail.clone())),
            Some(Failure::Transient { remaining }) if kind == CallKind::Create && *remaining > 0 => {
                *remaining -= 1;
                Err(CloudError::Throttled(format!("{} create throttled", node)))
            }
            _ => Ok(()),
        }
    }

    fn take_lost_response(&self, node: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        if matches!(inner.failures.get(node), Some(Failure::LostResponse)) {
            inner.failures.remove(node);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Outputs a real backend would return for a node
fn outputs_for(node: &ResourceNode, id: u64) -> Outputs {
    let arn = |service: &str, name: &str| format!("arn:memory:{}:{}:{}", service, name, id);
    match &node.spec {
        ResourceSpec::Network(spec) => Outputs::new()
            .with_plain(outputs::ID, format!("vpc-{:06}", id))
            .with_plain(
                outputs::SUBNET_IDS,
                (0..spec.subnet_cidrs.len())
                    .map(|i| format!("subnet-{:06}-{}", id, i))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        ResourceSpec::SecurityGroup(_) => {
            Outputs::new().with_plain(outputs::ID, format!("sg-{:06}", id))
        }
        ResourceSpec::Cluster(spec) => Outputs::new()
            .with_plain(outputs::ID, &spec.cluster_name)
            .with_plain(outputs::ARN, arn("ecs", &spec.cluster_name)),
        ResourceSpec::DnsZone(spec) => Outputs::new()
            .with_plain(outputs::ZONE_ID, format!("Z{:06}", id))
            .with_plain(
                outputs::NAME_SERVERS,
                format!("ns1.{0},ns2.{0}", spec.domain_name),
            ),
        ResourceSpec::Secret(spec) => {
            secret_outputs(SecretHandle::new(arn("secret", &spec.secret_name)))
        }
        ResourceSpec::Database(spec) => Outputs::new()
            .with_plain(outputs::ID, &spec.identifier)
            .with_plain(outputs::ARN, arn("rds", &spec.identifier))
            .with_plain(
                outputs::ENDPOINT_ADDRESS,
                format!("{}.db.memory.internal", spec.identifier),
            )
            .with_plain(outputs::ENDPOINT_PORT, spec.port.to_string()),
        ResourceSpec::LoadBalancer(spec) => Outputs::new()
            .with_plain(outputs::ARN, arn("elb", &spec.lb_name))
            .with_plain(
                outputs::DNS_NAME,
                format!("{}.elb.memory.internal", spec.lb_name),
            )
            .with_plain(outputs::CANONICAL_ZONE_ID, "ZMEMORYELB")
            .with_plain(outputs::TARGET_GROUP_ARN, arn("targetgroup", &spec.lb_name)),
        ResourceSpec::Service(spec) => Outputs::new()
            .with_plain(outputs::ID, &spec.service_name)
            .with_plain(outputs::ARN, arn("ecs-service", &spec.service_name)),
        ResourceSpec::DnsRecord(spec) => {
            Outputs::new().with_plain(outputs::FQDN, &spec.record_name)
        }
    }
}

/// Generate a random secret honouring the length and character exclusions
fn random_secret(spec: &SecretSpec) -> Result<String> {
    let charset: Vec<char> = (33u8..=126)
        .map(char::from)
        .chain(spec.include_space.then_some(' '))
        .filter(|c| !spec.exclude_characters.contains(*c))
        .collect();
    let mut rng = rand::thread_rng();
    (0..spec.length)
        .map(|_| {
            charset.choose(&mut rng).copied().ok_or_else(|| {
                CloudError::InvalidConfig("secret character set is empty".to_string())
            })
        })
        .collect()
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn display_name(&self) -> &str {
        "In-memory"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("in-process"))
    }

    fn render(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "kind": node.kind(),
            "name": node.name,
            "properties": inputs.render_properties(node)?,
        }))
    }

    async fn read(
        &self,
        node: &ResourceNode,
        _recorded: Option<&Outputs>,
    ) -> Result<Option<Outputs>> {
        self.begin(CallKind::Read, &node.name).await?;
        let inner = self.lock()?;
        Ok(inner.resources.get(&node.name).map(|r| r.outputs.clone()))
    }

    async fn create(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Outputs> {
        self.begin(CallKind::Create, &node.name).await?;
        let payload = self.render(node, inputs)?;
        let created = {
            let mut inner = self.lock()?;
            if inner.resources.contains_key(&node.name) {
                return Err(CloudError::ApiError(format!(
                    "{} already exists",
                    node.name
                )));
            }
            inner.next_id += 1;
            let created = outputs_for(node, inner.next_id);
            inner.resources.insert(
                node.name.clone(),
                StoredResource {
                    kind: node.kind(),
                    payload,
                    outputs: created.clone(),
                },
            );
            created
        };

        if self.take_lost_response(&node.name)? {
            return Err(CloudError::Timeout(format!("{} create response lost", node.name)));
        }
        Ok(created)
    }

    async fn update(
        &self,
        node: &ResourceNode,
        inputs: &ResolvedInputs,
        current: &Outputs,
    ) -> Result<Outputs> {
        self.begin(CallKind::Update, &node.name).await?;
        let payload = self.render(node, inputs)?;
        let mut inner = self.lock()?;
        let resource = inner
            .resources
            .get_mut(&node.name)
            .ok_or_else(|| CloudError::ResourceNotFound(node.name.clone()))?;
        if resource.kind != node.kind() {
            return Err(CloudError::InvalidConfig(format!(
                "{} cannot change kind from {} to {}",
                node.name,
                resource.kind,
                node.kind()
            )));
        }
        resource.payload = payload;
        Ok(current.clone())
    }

    async fn delete(&self, node: &ResourceNode, _recorded: &Outputs) -> Result<()> {
        self.begin(CallKind::Delete, &node.name).await?;
        let mut inner = self.lock()?;
        if let Some(removed) = inner.resources.remove(&node.name)
            && let Some(handle) = removed.outputs.secret(outputs::SECRET)
        {
            let handle = handle.as_str().to_string();
            inner.secrets.remove(&handle);
        }
        Ok(())
    }

    async fn generate_secret(
        &self,
        node: &ResourceNode,
        spec: &SecretSpec,
    ) -> Result<SecretHandle> {
        self.begin(CallKind::GenerateSecret, &node.name).await?;
        let value = random_secret(spec)?;
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let stored = outputs_for(node, inner.next_id);
        let handle = stored
            .secret(outputs::SECRET)
            .cloned()
            .ok_or_else(|| CloudError::InvalidConfig(format!("{} is not a secret", node.name)))?;

        inner.secrets.insert(handle.as_str().to_string(), value);
        inner.resources.insert(
            node.name.clone(),
            StoredResource {
                kind: node.kind(),
                payload: serde_json::to_value(spec)?,
                outputs: stored,
            },
        );
        Ok(handle)
    }
}

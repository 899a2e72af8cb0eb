//! Cloud provider trait definition

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use stratus_core::{Interpolated, Reference, ResourceNode, SecretSpec, Segment};

/// Cloud provider abstraction trait
///
/// One backend handles every resource kind, dispatching on the node's
/// [`stratus_core::ResourceSpec`] variant. Calls never see secret values:
/// secrets travel between nodes as [`SecretHandle`]s.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "aws", "memory")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Render the provider-native request payload for a node
    ///
    /// Secret handles render as `{"secret": "<handle>"}`.
    fn render(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<serde_json::Value>;

    /// Existence check. Returns the current outputs, or `None` if the resource is absent.
    async fn read(&self, node: &ResourceNode, recorded: Option<&Outputs>)
    -> Result<Option<Outputs>>;

    /// Create the resource
    async fn create(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Outputs>;

    /// Bring an existing resource in line with the node's properties
    async fn update(
        &self,
        node: &ResourceNode,
        inputs: &ResolvedInputs,
        current: &Outputs,
    ) -> Result<Outputs>;

    /// Delete the resource. Deleting an absent resource succeeds.
    async fn delete(&self, node: &ResourceNode, recorded: &Outputs) -> Result<()>;

    /// Generate and store a secret, returning its handle
    async fn generate_secret(&self, node: &ResourceNode, spec: &SecretSpec)
    -> Result<SecretHandle>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Opaque reference to a stored secret (e.g. a Secrets Manager ARN)
///
/// Never holds the secret value itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHandle(String);

impl SecretHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single node output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum OutputValue {
    Plain(String),
    Secret(SecretHandle),
}

impl OutputValue {
    /// JSON form used in rendered payloads
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            OutputValue::Plain(s) => serde_json::Value::String(s.clone()),
            OutputValue::Secret(handle) => serde_json::json!({ "secret": handle.as_str() }),
        }
    }
}

/// Outputs of one node, keyed by output name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outputs(BTreeMap<String, OutputValue>);

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plain(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_plain(key, value);
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, handle: SecretHandle) -> Self {
        self.0.insert(key.into(), OutputValue::Secret(handle));
        self
    }

    pub fn insert_plain(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), OutputValue::Plain(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.0.get(key)
    }

    /// Plain output value
    pub fn plain(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(OutputValue::Plain(s)) => Some(s),
            _ => None,
        }
    }

    pub fn secret(&self, key: &str) -> Option<&SecretHandle> {
        match self.0.get(key) {
            Some(OutputValue::Secret(h)) => Some(h),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutputValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Values of every reference a node makes, resolved from upstream outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInputs {
    values: BTreeMap<Reference, OutputValue>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve all references of `node` against the outputs collected so far
    pub fn for_node(node: &ResourceNode, outputs: &BTreeMap<String, Outputs>) -> Result<Self> {
        let mut resolved = Self::new();
        for reference in node.references() {
            let value = outputs
                .get(&reference.node)
                .and_then(|o| o.get(&reference.output))
                .ok_or_else(|| CloudError::UnresolvedOutput {
                    node: reference.node.clone(),
                    output: reference.output.clone(),
                })?;
            resolved.insert(reference.clone(), value.clone());
        }
        Ok(resolved)
    }

    pub fn insert(&mut self, reference: Reference, value: OutputValue) {
        self.values.insert(reference, value);
    }

    /// Resolved values keyed by `${node.output}`, in the form kept in state
    pub fn to_recorded(&self) -> BTreeMap<String, OutputValue> {
        self.values
            .iter()
            .map(|(reference, value)| (reference.to_string(), value.clone()))
            .collect()
    }

    /// Whether these values are the ones a resource was last applied with
    pub fn matches_recorded(&self, recorded: &BTreeMap<String, OutputValue>) -> bool {
        self.values.len() == recorded.len()
            && self
                .values
                .iter()
                .all(|(reference, value)| recorded.get(&reference.to_string()) == Some(value))
    }

    pub fn get(&self, reference: &Reference) -> Result<&OutputValue> {
        self.values
            .get(reference)
            .ok_or_else(|| CloudError::UnresolvedOutput {
                node: reference.node.clone(),
                output: reference.output.clone(),
            })
    }

    /// Plain value of a reference; secret handles are rejected
    pub fn plain(&self, reference: &Reference) -> Result<&str> {
        match self.get(reference)? {
            OutputValue::Plain(s) => Ok(s),
            OutputValue::Secret(_) => Err(CloudError::InvalidConfig(format!(
                "{} is a secret and cannot be used as a plain value",
                reference
            ))),
        }
    }

    pub fn secret(&self, reference: &Reference) -> Result<&SecretHandle> {
        match self.get(reference)? {
            OutputValue::Secret(h) => Ok(h),
            OutputValue::Plain(_) => Err(CloudError::InvalidConfig(format!(
                "{} is not a secret",
                reference
            ))),
        }
    }

    /// Payload JSON for a reference
    pub fn payload(&self, reference: &Reference) -> Result<serde_json::Value> {
        Ok(self.get(reference)?.to_payload())
    }

    /// Build the final string of an interpolated value
    pub fn interpolate(&self, value: &Interpolated) -> Result<String> {
        value.resolve(|r| self.plain(r).map(str::to_string))
    }

    /// The node's properties with every reference replaced by its resolved value
    ///
    /// A property that is exactly one reference takes the referenced output's
    /// payload form, so secrets stay as `{"secret": "<handle>"}`.
    pub fn render_properties(&self, node: &ResourceNode) -> Result<serde_json::Value> {
        self.render_value(node.spec.properties())
    }

    fn render_value(&self, value: serde_json::Value) -> Result<serde_json::Value> {
        use serde_json::Value;

        match value {
            Value::String(s) if s.contains("${") => {
                let interpolated = Interpolated::try_from(s).map_err(CloudError::InvalidConfig)?;
                match interpolated.0.as_slice() {
                    [Segment::Ref(reference)] => self.payload(reference),
                    _ => Ok(Value::String(self.interpolate(&interpolated)?)),
                }
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|v| self.render_value(v))
                    .collect::<Result<_>>()?,
            )),
            Value::Object(map) => Ok(Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.render_value(v)?)))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(other),
        }
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::{ClusterSpec, ResourceSpec, outputs};

    #[test]
    fn test_retry_delay_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_resolved_inputs_for_node() {
        let node = ResourceNode::new(
            "cluster",
            ResourceSpec::Cluster(ClusterSpec {
                cluster_name: "demo".to_string(),
                vpc: Reference::new("network", outputs::ID),
            }),
        );

        let mut all = BTreeMap::new();
        assert!(matches!(
            ResolvedInputs::for_node(&node, &all),
            Err(CloudError::UnresolvedOutput { .. })
        ));

        all.insert("network".to_string(), Outputs::new().with_plain("id", "vpc-123"));
        let inputs = ResolvedInputs::for_node(&node, &all).unwrap();
        assert_eq!(
            inputs.plain(&Reference::new("network", outputs::ID)).unwrap(),
            "vpc-123"
        );
    }

    #[test]
    fn test_render_properties_resolves_references() {
        let node = ResourceNode::new(
            "cluster",
            ResourceSpec::Cluster(ClusterSpec {
                cluster_name: "demo".to_string(),
                vpc: Reference::new("network", outputs::ID),
            }),
        );
        let mut inputs = ResolvedInputs::new();
        inputs.insert(
            Reference::new("network", outputs::ID),
            OutputValue::Plain("vpc-123".to_string()),
        );

        let rendered = inputs.render_properties(&node).unwrap();
        assert_eq!(
            rendered,
            serde_json::json!({ "cluster_name": "demo", "vpc": "vpc-123" })
        );
    }

    #[test]
    fn test_secret_payload_never_holds_value() {
        let value = OutputValue::Secret(SecretHandle::new("arn:secret:db"));
        assert_eq!(
            value.to_payload(),
            serde_json::json!({ "secret": "arn:secret:db" })
        );

        let mut inputs = ResolvedInputs::new();
        let reference = Reference::new("database-password", outputs::SECRET);
        inputs.insert(reference.clone(), value);
        assert!(inputs.plain(&reference).is_err());
        assert_eq!(inputs.secret(&reference).unwrap().as_str(), "arn:secret:db");
    }
}

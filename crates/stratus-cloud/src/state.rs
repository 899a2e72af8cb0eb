//! State management for applied resources
//!
//! Manages the `.stratus/<stack-id>/state.json` file which records, for each
//! applied node, the properties it was applied with and the outputs it produced.
//! The state never holds secret values, only secret handles.

use crate::error::{CloudError, Result};
use crate::provider::{OutputValue, Outputs, ResolvedInputs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use stratus_core::{ResourceKind, ResourceNode, ResourceSpec};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".stratus";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Recorded state of one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// State file version
    pub version: u32,

    pub stack_id: String,

    /// Name of the provider the resources were applied with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Applied resources indexed by node name
    pub resources: BTreeMap<String, ResourceState>,

    /// Sequence number handed to the next newly recorded resource
    #[serde(default)]
    next_sequence: u64,
}

impl StackState {
    pub fn new(stack_id: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            stack_id: stack_id.into(),
            provider: None,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    /// Fail when the recorded resources belong to a different provider
    ///
    /// An empty state belongs to no provider.
    pub fn ensure_provider(&self, provider: &str) -> Result<()> {
        match &self.provider {
            Some(recorded) if recorded != provider && !self.is_empty() => {
                Err(CloudError::StateError(format!(
                    "State of '{}' was applied with provider '{}', not '{}'",
                    self.stack_id, recorded, provider
                )))
            }
            _ => Ok(()),
        }
    }

    /// Claim the state for `provider` before changing anything
    pub fn bind_provider(&mut self, provider: &str) -> Result<()> {
        self.ensure_provider(provider)?;
        if self.provider.as_deref() != Some(provider) {
            self.provider = Some(provider.to_string());
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Record a node as applied with the given upstream values and outputs
    ///
    /// Keeps the original creation time and sequence of an existing entry.
    pub fn record(&mut self, node: &ResourceNode, inputs: &ResolvedInputs, outputs: Outputs) {
        let now = Utc::now();
        match self.resources.get_mut(&node.name) {
            Some(existing) => {
                existing.spec = node.spec.clone();
                existing.depends_on = node.depends_on.clone();
                existing.inputs = inputs.to_recorded();
                existing.outputs = outputs;
                existing.updated_at = now;
            }
            None => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.resources.insert(
                    node.name.clone(),
                    ResourceState {
                        spec: node.spec.clone(),
                        depends_on: node.depends_on.clone(),
                        inputs: inputs.to_recorded(),
                        outputs,
                        sequence,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        self.updated_at = now;
    }

    /// Remove a resource
    pub fn remove(&mut self, name: &str) -> Option<ResourceState> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Entries whose names are not in `names`, most recently recorded first
    pub fn orphans<'a>(&'a self, names: &BTreeSet<&str>) -> Vec<(&'a String, &'a ResourceState)> {
        let mut orphans: Vec<_> = self
            .resources
            .iter()
            .filter(|(name, _)| !names.contains(name.as_str()))
            .collect();
        orphans.sort_by(|a, b| b.1.sequence.cmp(&a.1.sequence));
        orphans
    }
}

/// State of a single applied resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Properties the resource was last applied with
    pub spec: ResourceSpec,

    pub depends_on: BTreeSet<String>,

    /// Upstream output values the references resolved to, keyed by `${node.output}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, OutputValue>,

    /// Outputs returned by the provider
    pub outputs: Outputs,

    /// Order in which the resource was first recorded
    pub sequence: u64,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Rebuild the node this entry was recorded from
    pub fn to_node(&self, name: &str) -> ResourceNode {
        ResourceNode {
            name: name.to_string(),
            spec: self.spec.clone(),
            depends_on: self.depends_on.clone(),
        }
    }
}

/// State manager for reading/writing state files
pub struct StateManager {
    /// Directory holding this stack's state
    state_dir: PathBuf,
    stack_id: String,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>, stack_id: impl Into<String>) -> Self {
        let stack_id = stack_id.into();
        Self {
            state_dir: project_root.as_ref().join(STATE_DIR).join(&stack_id),
            stack_id,
        }
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Get the backup file path
    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STATE_BACKUP)
    }

    /// Get the lock file path
    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<StackState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(StackState::new(&self.stack_id));
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        // Version check
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }
        if state.stack_id != self.stack_id {
            return Err(CloudError::StateError(format!(
                "State file belongs to stack '{}', expected '{}'",
                state.stack_id, self.stack_id
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state
    pub async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        // Create backup if state file exists
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created state backup");
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Acquire a lock for exclusive access
    ///
    /// The lock file is created exclusively, so two processes cannot both succeed.
    /// A lock older than an hour is taken over once.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        if !create_lock_file(&lock_path, &content).await? {
            let held = read_lock_info(&lock_path).await?;

            // Locks older than an hour are considered stale
            let age = Utc::now().signed_duration_since(held.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} since {}",
                    held.holder, held.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", held.holder);
            match fs::remove_file(&lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            if !create_lock_file(&lock_path, &content).await? {
                return Err(CloudError::LockError(
                    "State lock was taken by another process".to_string(),
                ));
            }
        }

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Create the lock file only if it does not exist yet. Returns whether it was created.
async fn create_lock_file(path: &Path, content: &str) -> Result<bool> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    match file {
        Ok(mut file) => {
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Holder of an existing lock. A lock still being written counts as freshly held.
async fn read_lock_info(path: &Path) -> Result<LockInfo> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content).unwrap_or_else(|_| LockInfo {
        holder: "another process".to_string(),
        acquired_at: Utc::now(),
    }))
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

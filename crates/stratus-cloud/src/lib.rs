//! Stratus Cloud Provisioning
//!
//! This crate turns a resource graph into provider calls: it defines the
//! provider abstraction, computes plans against the recorded state, and runs
//! apply/destroy with dependency ordering, bounded concurrency and a run-wide
//! deadline.
//!
//! # Supported Providers
//!
//! - **AWS**: VPC, ECS, RDS, Secrets Manager, Route 53, ELBv2 (via aws CLI, in `stratus-cloud-aws`)
//! - **Memory**: in-process backend for tests and dry experiments
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Stratus CLI                     │
//! │        (plan / apply / destroy / synth)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceGraph
//! ┌─────────────────▼───────────────────────────────┐
//! │                stratus-cloud                     │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │   Planner    │  │   Executor   │             │
//! │  └──────────────┘  └──────┬───────┘             │
//! │  ┌──────────────┐  ┌──────▼───────────────────┐ │
//! │  │  State Mgmt  │  │ trait CloudProvider {..} │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │      aws      │ │    memory     │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod executor;
pub mod memory;
pub mod planner;
pub mod provider;
pub mod retry;
pub mod state;
pub mod synth;

// Re-exports
pub use action::{Action, ActionType, Plan, PlanSummary, PropertyChange, diff_properties};
pub use error::{CloudError, ProvisioningError, Result, TimeoutError};
pub use executor::{
    Executor, ExecutorOptions, NodeReport, NodeStatus, Operation, RunOutcome, RunReport,
    secret_outputs,
};
pub use memory::{Call, CallKind, MemoryProvider};
pub use planner::{is_retained, plan_apply, plan_destroy, retained_nodes};
pub use provider::{
    AuthStatus, CloudProvider, OutputValue, Outputs, ResolvedInputs, RetryConfig, SecretHandle,
};
pub use state::{ResourceState, StackState, StateLock, StateManager};
pub use synth::{SynthDocument, SynthResource, synthesize};

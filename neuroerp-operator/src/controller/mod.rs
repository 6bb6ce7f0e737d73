//! Kubernetes controller for NeuroErp resources.
//!
//! A reconcile pass is split into small steps, each in its own module:
//!
//! - [`lifecycle`]: finalizer bookkeeping and deletion cleanup
//! - [`children`]: create-or-update of the Deployments and Services
//! - [`status`]: readiness aggregation and status write-back
//! - [`ErpController`]: sequences the steps and decides when to requeue
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use neuroerp_operator::controller::{reconcile, error_policy, ControllerContext};
//!
//! Controller::new(apps, watcher_config)
//!     .owns(deployments, watcher_config.clone())
//!     .owns(services, watcher_config)
//!     .run(reconcile, error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

pub mod children;
mod erp;
pub mod lifecycle;
mod pass;
pub mod status;

pub use erp::{ErpController, error_policy, reconcile};
pub use pass::PassScope;

use crate::config::OperatorConfig;
use crate::hooks::{ExtensionHooks, NoopHooks};
use crate::store::ResourceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared context for the controller.
///
/// Holds only injected capabilities and configuration; every piece of
/// mutable state lives in the objects fetched at the start of a pass.
pub struct ControllerContext {
    /// Resource store used for every read and write.
    pub store: Arc<dyn ResourceStore>,
    /// Integration hooks.
    pub hooks: Arc<dyn ExtensionHooks>,
    /// Operator configuration.
    pub config: OperatorConfig,
    /// Cancelled on shutdown; each pass runs under a child token.
    pub shutdown: CancellationToken,
}

impl ControllerContext {
    /// Create a context with no-op hooks and default configuration.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            hooks: Arc::new(NoopHooks),
            config: OperatorConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the integration hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn ExtensionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the given shutdown token.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Open a scope for one reconcile pass.
    pub fn pass_scope(&self) -> PassScope {
        PassScope::new(self.shutdown.child_token(), self.config.pass_timeout)
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration; zero means immediately.
    Requeue(Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl ReconcileAction {
    /// Requeue immediately, used after bootstrap writes.
    pub fn requeue_now() -> Self {
        Self::Requeue(Duration::ZERO)
    }

    /// Whether this action asks for an immediate re-invocation.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Requeue(d) if d.is_zero())
    }
}

impl From<ReconcileAction> for kube::runtime::controller::Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::Requeue(duration) => Self::requeue(duration),
            ReconcileAction::Done => Self::await_change(),
        }
    }
}

//! Extension points for optional NeuroErp integrations.
//!
//! Monitoring, backup, service mesh and AI integrations are not implemented by
//! the operator itself. The reconciler calls [`ExtensionHooks`] for every
//! enabled feature after the children have converged, and again during
//! deletion so an integration can release whatever it created outside the
//! cluster. [`NoopHooks`] is the default and does nothing.

use crate::crd::{Feature, FeatureSpec, NeuroErp};
use crate::error::OperatorResult;
use async_trait::async_trait;

/// Integration callbacks invoked by the reconciler.
///
/// Implementations must be idempotent: both methods may run on every pass and
/// `cleanup` may be retried after a partial failure.
#[async_trait]
pub trait ExtensionHooks: Send + Sync {
    /// Configure an enabled feature for a converged application.
    async fn configure(
        &self,
        app: &NeuroErp,
        feature: Feature,
        settings: &FeatureSpec,
    ) -> OperatorResult<()>;

    /// Release external side effects of a feature before the NeuroErp is deleted.
    async fn cleanup(
        &self,
        app: &NeuroErp,
        feature: Feature,
        settings: &FeatureSpec,
    ) -> OperatorResult<()>;
}

/// Hooks that accept every call and do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl ExtensionHooks for NoopHooks {
    async fn configure(
        &self,
        _app: &NeuroErp,
        feature: Feature,
        _settings: &FeatureSpec,
    ) -> OperatorResult<()> {
        tracing::trace!(feature = %feature, "No integration registered");
        Ok(())
    }

    async fn cleanup(
        &self,
        _app: &NeuroErp,
        feature: Feature,
        _settings: &FeatureSpec,
    ) -> OperatorResult<()> {
        tracing::trace!(feature = %feature, "No integration to clean up");
        Ok(())
    }
}

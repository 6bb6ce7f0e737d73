//! NeuroErp controller.
//!
//! Reconciles NeuroErp resources into Deployments and Services and reports
//! their aggregated readiness.

use super::{children, lifecycle, status, ControllerContext, PassScope, ReconcileAction};
use crate::crd::NeuroErp;
use crate::error::{OperatorError, OperatorResult};
use crate::resources;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;

/// Controller for NeuroErp resources.
#[derive(Clone)]
pub struct ErpController {
    ctx: Arc<ControllerContext>,
}

impl ErpController {
    /// Create a new NeuroErp controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile the NeuroErp behind a watch event.
    ///
    /// The event payload only identifies the object; the pass works on a
    /// fresh read.
    pub async fn reconcile(&self, app: Arc<NeuroErp>) -> OperatorResult<ReconcileAction> {
        let namespace = app
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("NeuroErp must be namespaced".into()))?;
        self.reconcile_identity(&namespace, &app.name_any()).await
    }

    /// Reconcile the NeuroErp with the given identity under a fresh pass scope.
    pub async fn reconcile_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<ReconcileAction> {
        let scope = self.ctx.pass_scope();
        self.reconcile_with(namespace, name, &scope).await
    }

    /// Run one pass for `namespace/name` inside `scope`.
    ///
    /// Steps run in order and the first one that writes ends the pass:
    /// 1. Attach the finalizer
    /// 2. Handle deletion
    /// 3. Initialize the status
    /// 4. Converge children, configure integrations and write the status
    pub async fn reconcile_with(
        &self,
        namespace: &str,
        name: &str,
        scope: &PassScope,
    ) -> OperatorResult<ReconcileAction> {
        let store = self.ctx.store.as_ref();

        let Some(app) = scope.run(store.get_app(namespace, name)).await? else {
            tracing::debug!(name = %name, namespace = %namespace, "NeuroErp not found, nothing to do");
            return Ok(ReconcileAction::Done);
        };

        tracing::info!(
            name = %name,
            namespace = %namespace,
            generation = ?app.metadata.generation,
            "Reconciling NeuroErp"
        );

        match lifecycle::LifecycleState::of(&app) {
            lifecycle::LifecycleState::Released => {
                tracing::debug!(name = %name, "Deletion in progress without our finalizer");
                Ok(ReconcileAction::Done)
            }
            lifecycle::LifecycleState::Unmanaged => self.attach_finalizer(app, scope).await,
            lifecycle::LifecycleState::Terminating => self.handle_deletion(app, scope).await,
            lifecycle::LifecycleState::Active => {
                if app.status.as_ref().and_then(|s| s.phase).is_none() {
                    return self.initialize_status(&app, scope).await;
                }

                match self.reconcile_body(&app, namespace, scope).await {
                    Ok(action) => Ok(action),
                    Err(e) => {
                        self.report_failure(&app, &e, scope).await;
                        Err(e)
                    }
                }
            }
        }
    }

    async fn attach_finalizer(
        &self,
        mut app: NeuroErp,
        scope: &PassScope,
    ) -> OperatorResult<ReconcileAction> {
        tracing::info!(name = %app.name_any(), "Adding finalizer");
        lifecycle::add_finalizer(&mut app.metadata);
        scope.run(self.ctx.store.update_app(&app)).await?;
        Ok(ReconcileAction::requeue_now())
    }

    async fn handle_deletion(
        &self,
        mut app: NeuroErp,
        scope: &PassScope,
    ) -> OperatorResult<ReconcileAction> {
        let name = app.name_any();
        tracing::info!(name = %name, "NeuroErp is being deleted, running cleanup");

        if let Err(e) = lifecycle::cleanup(&app, self.ctx.hooks.as_ref(), scope).await {
            tracing::warn!(name = %name, error = %e, "Cleanup failed, keeping finalizer");
            return Err(e);
        }

        lifecycle::remove_finalizer(&mut app.metadata);
        scope.run(self.ctx.store.update_app(&app)).await?;
        tracing::info!(name = %name, "Finalizer removed");
        Ok(ReconcileAction::Done)
    }

    async fn initialize_status(
        &self,
        app: &NeuroErp,
        scope: &PassScope,
    ) -> OperatorResult<ReconcileAction> {
        tracing::info!(name = %app.name_any(), "Initializing status");
        status::write_status(self.ctx.store.as_ref(), scope, app, status::initial_status()).await?;
        Ok(ReconcileAction::requeue_now())
    }

    async fn reconcile_body(
        &self,
        app: &NeuroErp,
        namespace: &str,
        scope: &PassScope,
    ) -> OperatorResult<ReconcileAction> {
        let store = self.ctx.store.as_ref();
        let name = app.name_any();
        let targets = resources::component_targets(app);

        let outcome = children::reconcile_children(store, scope, app, namespace, &targets).await?;
        if outcome.created > 0 || outcome.updated > 0 || outcome.deleted > 0 {
            tracing::info!(
                name = %name,
                created = outcome.created,
                updated = outcome.updated,
                deleted = outcome.deleted,
                "Children converged"
            );
        }

        for (feature, settings) in app.spec.enabled_features() {
            tracing::debug!(name = %name, feature = %feature, "Configuring integration");
            scope
                .run(self.ctx.hooks.configure(app, feature, settings))
                .await?;
        }

        let observation = status::observe(store, scope, namespace, &targets).await?;
        let next = status::compute_status(
            app,
            &observation,
            outcome.created > 0,
            self.ctx.config.max_conditions,
        );

        if status::status_changed(app.status.as_ref(), &next) {
            tracing::info!(
                name = %name,
                phase = ?next.phase,
                ready_replicas = next.ready_replicas,
                "Updating status"
            );
            status::write_status(store, scope, app, next).await?;
        }

        Ok(ReconcileAction::Requeue(
            self.ctx.config.resync_for(app.spec.modules.len()),
        ))
    }

    /// Best-effort `Failed` status after a body error.
    async fn report_failure(&self, app: &NeuroErp, error: &OperatorError, scope: &PassScope) {
        if matches!(error, OperatorError::Cancelled | OperatorError::DeadlineExceeded(_)) {
            return;
        }

        let failed = status::failed_status(app, error, self.ctx.config.max_conditions);
        if !status::status_changed(app.status.as_ref(), &failed) {
            tracing::debug!(name = %app.name_any(), "Failure already recorded");
            return;
        }
        if let Err(e) = status::write_status(self.ctx.store.as_ref(), scope, app, failed).await {
            tracing::warn!(
                name = %app.name_any(),
                error = %e,
                "Failed to record failure in status"
            );
        }
    }
}

/// Reconcile entry point for `kube::runtime::Controller`.
pub async fn reconcile(
    app: Arc<NeuroErp>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, OperatorError> {
    let controller = ErpController::new(ctx);
    controller.reconcile(app).await.map(Into::into)
}

/// Error policy for the NeuroErp controller.
pub fn error_policy(_app: Arc<NeuroErp>, error: &OperatorError, ctx: Arc<ControllerContext>) -> Action {
    tracing::error!(error = %error, "NeuroErp reconciliation error");
    Action::requeue(ctx.config.error_requeue)
}

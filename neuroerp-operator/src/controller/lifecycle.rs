//! Finalizer bookkeeping and deletion cleanup.
//!
//! A NeuroErp moves through these states:
//!
//! ```text
//! Unmanaged --(finalizer added)--> Active --(deletionTimestamp set)--> Terminating
//!     Terminating --(cleanup ok, finalizer removed)--> deleted by the store
//! ```
//!
//! Owned Deployments and Services are removed by the store's garbage collector
//! through their owner references; cleanup only covers side effects the
//! store cannot see.

use super::PassScope;
use crate::crd::NeuroErp;
use crate::error::{OperatorError, OperatorResult};
use crate::hooks::ExtensionHooks;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

/// Finalizer token guarding NeuroErp deletion.
pub const FINALIZER: &str = "erp.valeo.io/finalizer";

/// Where an object stands with respect to the finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Finalizer not yet attached.
    Unmanaged,
    /// Finalizer attached, no deletion requested.
    Active,
    /// Deletion requested, finalizer still blocking it.
    Terminating,
    /// Deletion requested and nothing of ours is blocking it.
    Released,
}

impl LifecycleState {
    /// Derive the state from the object's metadata.
    pub fn of(app: &NeuroErp) -> Self {
        let deleting = app.metadata.deletion_timestamp.is_some();
        match (has_finalizer(&app.metadata), deleting) {
            (false, false) => Self::Unmanaged,
            (true, false) => Self::Active,
            (true, true) => Self::Terminating,
            (false, true) => Self::Released,
        }
    }
}

/// Whether the metadata carries [`FINALIZER`].
pub fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == FINALIZER))
}

/// Add [`FINALIZER`]; returns `false` if it was already present.
pub fn add_finalizer(meta: &mut ObjectMeta) -> bool {
    if has_finalizer(meta) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER.to_string());
    true
}

/// Remove [`FINALIZER`]; returns `false` if it was not present.
pub fn remove_finalizer(meta: &mut ObjectMeta) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != FINALIZER);
    finalizers.len() != before
}

/// Release external side effects of every enabled feature.
///
/// Safe to call repeatedly; stops at the first failing hook.
pub async fn cleanup(
    app: &NeuroErp,
    hooks: &dyn ExtensionHooks,
    scope: &PassScope,
) -> OperatorResult<()> {
    let name = app.name_any();

    for (feature, settings) in app.spec.enabled_features() {
        tracing::debug!(name = %name, feature = %feature, "Cleaning up integration");
        scope
            .run(hooks.cleanup(app, feature, settings))
            .await
            .map_err(|e| OperatorError::CleanupError {
                name: name.clone(),
                cause: format!("{}: {}", feature, e),
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Feature, FeatureSpec, NeuroErpSpec};
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn app() -> NeuroErp {
        NeuroErp::new(
            "erp1",
            NeuroErpSpec {
                replicas: 1,
                image: "registry.valeo.io/neuroerp".to_string(),
                version: "1.0".to_string(),
                resources: None,
                modules: vec![],
                monitoring: Some(FeatureSpec {
                    enabled: true,
                    ..Default::default()
                }),
                backup: Some(FeatureSpec {
                    enabled: true,
                    ..Default::default()
                }),
                service_mesh: None,
                ai: Some(FeatureSpec::default()),
            },
        )
    }

    #[derive(Default)]
    struct RecordingHooks {
        cleaned: Mutex<Vec<Feature>>,
        fail_on: Option<Feature>,
    }

    #[async_trait]
    impl ExtensionHooks for RecordingHooks {
        async fn configure(
            &self,
            _app: &NeuroErp,
            _feature: Feature,
            _settings: &FeatureSpec,
        ) -> OperatorResult<()> {
            Ok(())
        }

        async fn cleanup(
            &self,
            _app: &NeuroErp,
            feature: Feature,
            _settings: &FeatureSpec,
        ) -> OperatorResult<()> {
            if self.fail_on == Some(feature) {
                return Err(OperatorError::store("backup-api", "unreachable"));
            }
            self.cleaned.lock().push(feature);
            Ok(())
        }
    }

    fn scope() -> PassScope {
        PassScope::new(CancellationToken::new(), Duration::from_secs(5))
    }

    #[test]
    fn finalizer_helpers() {
        let mut meta = ObjectMeta {
            finalizers: Some(vec!["other.io/keep".to_string()]),
            ..Default::default()
        };

        assert!(!has_finalizer(&meta));
        assert!(add_finalizer(&mut meta));
        assert!(!add_finalizer(&mut meta));
        assert!(has_finalizer(&meta));
        assert_eq!(meta.finalizers.as_ref().map(Vec::len), Some(2));

        assert!(remove_finalizer(&mut meta));
        assert!(!remove_finalizer(&mut meta));
        assert_eq!(meta.finalizers, Some(vec!["other.io/keep".to_string()]));
    }

    #[test]
    fn lifecycle_states() {
        let mut app = app();
        assert_eq!(LifecycleState::of(&app), LifecycleState::Unmanaged);

        add_finalizer(&mut app.metadata);
        assert_eq!(LifecycleState::of(&app), LifecycleState::Active);

        app.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(LifecycleState::of(&app), LifecycleState::Terminating);

        remove_finalizer(&mut app.metadata);
        assert_eq!(LifecycleState::of(&app), LifecycleState::Released);
    }

    #[tokio::test]
    async fn cleanup_visits_enabled_features() {
        let hooks = RecordingHooks::default();
        cleanup(&app(), &hooks, &scope()).await.expect("cleanup");
        assert_eq!(*hooks.cleaned.lock(), vec![Feature::Monitoring, Feature::Backup]);

        cleanup(&app(), &hooks, &scope()).await.expect("cleanup again");
        assert_eq!(hooks.cleaned.lock().len(), 4);
    }

    #[tokio::test]
    async fn cleanup_failure_is_reported() {
        let hooks = RecordingHooks {
            fail_on: Some(Feature::Backup),
            ..Default::default()
        };

        let err = cleanup(&app(), &hooks, &scope()).await.expect_err("backup fails");
        assert!(matches!(err, OperatorError::CleanupError { .. }));
        assert!(err.to_string().contains("backup"));
    }
}

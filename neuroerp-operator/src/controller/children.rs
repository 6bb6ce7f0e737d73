//! Create-or-update of NeuroErp children.
//!
//! The builder is the source of truth for a small set of managed fields.
//! Live objects are compared on those fields only and, when they differ, the
//! managed fields are overwritten in place. Everything else on the live object
//! (annotations, extra labels, injected sidecars, cluster-assigned fields) is
//! left alone.
//!
//! Managed fields:
//!
//! | Kind | Fields |
//! |------|--------|
//! | Deployment | replicas, container image, container env, container resources |
//! | Service | type, selector, ports |
//!
//! Owned children whose names no longer appear in the component table (a
//! removed module, or a switch between single and multi-component mode) are
//! deleted once the current targets have converged.

use super::PassScope;
use crate::crd::NeuroErp;
use crate::error::OperatorResult;
use crate::resources::{self, ComponentTarget, APP_LABEL_VALUE, CONTAINER_NAME};
use crate::store::ResourceStore;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ResourceRequirements, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// What a pass did to the children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildrenOutcome {
    /// Children created.
    pub created: usize,
    /// Children whose managed fields were overwritten.
    pub updated: usize,
    /// Owned children deleted because no target names them any more.
    pub deleted: usize,
}

impl ChildrenOutcome {
    fn record(&mut self, change: ChildChange) {
        match change {
            ChildChange::Created => self.created += 1,
            ChildChange::Updated => self.updated += 1,
            ChildChange::Unchanged => {}
        }
    }
}

/// Effect of reconciling a single child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildChange {
    Created,
    Updated,
    Unchanged,
}

/// Converge the Deployment and Service of every target.
pub async fn reconcile_children(
    store: &dyn ResourceStore,
    scope: &PassScope,
    app: &NeuroErp,
    namespace: &str,
    targets: &[ComponentTarget],
) -> OperatorResult<ChildrenOutcome> {
    let mut outcome = ChildrenOutcome::default();

    for target in targets {
        let change = reconcile_deployment(store, scope, app, namespace, target).await?;
        outcome.record(change);
        let change = reconcile_service(store, scope, app, namespace, target).await?;
        outcome.record(change);
    }

    outcome.deleted = prune_orphans(store, scope, app, namespace, targets).await?;
    Ok(outcome)
}

/// Delete owned Deployments and Services that no target names.
async fn prune_orphans(
    store: &dyn ResourceStore,
    scope: &PassScope,
    app: &NeuroErp,
    namespace: &str,
    targets: &[ComponentTarget],
) -> OperatorResult<usize> {
    let Some(uid) = app.uid() else {
        return Ok(0);
    };
    let selector = format!("app={}", APP_LABEL_VALUE);
    let mut deleted = 0;

    for deployment in scope.run(store.list_deployments(namespace, &selector)).await? {
        let name = deployment.name_any();
        if !is_orphan(&deployment.metadata, &uid, targets.iter().map(|t| &t.workload_name)) {
            continue;
        }
        tracing::info!(name = %name, namespace = %namespace, "Deleting orphaned Deployment");
        scope.run(store.delete_deployment(namespace, &name)).await?;
        deleted += 1;
    }

    for service in scope.run(store.list_services(namespace, &selector)).await? {
        let name = service.name_any();
        if !is_orphan(&service.metadata, &uid, targets.iter().map(|t| &t.service_name)) {
            continue;
        }
        tracing::info!(name = %name, namespace = %namespace, "Deleting orphaned Service");
        scope.run(store.delete_service(namespace, &name)).await?;
        deleted += 1;
    }

    Ok(deleted)
}

/// Owned by `owner_uid` and not named by any target.
fn is_orphan<'a>(
    meta: &ObjectMeta,
    owner_uid: &str,
    mut wanted: impl Iterator<Item = &'a String>,
) -> bool {
    let owned = meta
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == owner_uid));
    let name = meta.name.as_deref().unwrap_or_default();
    owned && !wanted.any(|w| w == name)
}

async fn reconcile_deployment(
    store: &dyn ResourceStore,
    scope: &PassScope,
    app: &NeuroErp,
    namespace: &str,
    target: &ComponentTarget,
) -> OperatorResult<ChildChange> {
    let mut desired = resources::build_deployment(app, target);
    let name = &target.workload_name;

    match scope.run(store.get_deployment(namespace, name)).await? {
        None => {
            resources::set_owner_reference(app, &mut desired.metadata)?;
            tracing::info!(name = %name, namespace = %namespace, "Creating Deployment");
            scope.run(store.create_deployment(namespace, &desired)).await?;
            Ok(ChildChange::Created)
        }
        Some(mut live) => {
            if !merge_deployment(&mut live, &desired) {
                tracing::debug!(name = %name, "Deployment up to date");
                return Ok(ChildChange::Unchanged);
            }
            tracing::info!(name = %name, namespace = %namespace, "Updating Deployment");
            scope.run(store.update_deployment(namespace, &live)).await?;
            Ok(ChildChange::Updated)
        }
    }
}

async fn reconcile_service(
    store: &dyn ResourceStore,
    scope: &PassScope,
    app: &NeuroErp,
    namespace: &str,
    target: &ComponentTarget,
) -> OperatorResult<ChildChange> {
    let mut desired = resources::build_service(app, target);
    let name = &target.service_name;

    match scope.run(store.get_service(namespace, name)).await? {
        None => {
            resources::set_owner_reference(app, &mut desired.metadata)?;
            tracing::info!(name = %name, namespace = %namespace, "Creating Service");
            scope.run(store.create_service(namespace, &desired)).await?;
            Ok(ChildChange::Created)
        }
        Some(mut live) => {
            if !merge_service(&mut live, &desired) {
                tracing::debug!(name = %name, "Service up to date");
                return Ok(ChildChange::Unchanged);
            }
            tracing::info!(name = %name, namespace = %namespace, "Updating Service");
            scope.run(store.update_service(namespace, &live)).await?;
            Ok(ChildChange::Updated)
        }
    }
}

/// Force the managed Deployment fields of `live` to match `desired`.
///
/// Returns whether anything changed.
pub fn merge_deployment(live: &mut Deployment, desired: &Deployment) -> bool {
    let Some(desired_spec) = desired.spec.as_ref() else {
        return false;
    };
    let Some(desired_container) = desired_spec
        .template
        .spec
        .as_ref()
        .and_then(|pod| pod.containers.iter().find(|c| c.name == CONTAINER_NAME))
    else {
        return false;
    };

    let mut changed = false;
    let live_spec = live.spec.get_or_insert_with(Default::default);

    if live_spec.replicas != desired_spec.replicas {
        tracing::debug!(
            live = ?live_spec.replicas,
            desired = ?desired_spec.replicas,
            "Replica drift"
        );
        live_spec.replicas = desired_spec.replicas;
        changed = true;
    }

    let pod = live_spec.template.spec.get_or_insert_with(Default::default);
    match pod.containers.iter_mut().find(|c| c.name == CONTAINER_NAME) {
        Some(container) => changed |= merge_container(container, desired_container),
        None => {
            pod.containers.push(desired_container.clone());
            changed = true;
        }
    }

    changed
}

fn merge_container(live: &mut Container, desired: &Container) -> bool {
    let mut changed = false;

    if live.image != desired.image {
        tracing::debug!(live = ?live.image, desired = ?desired.image, "Image drift");
        live.image = desired.image.clone();
        changed = true;
    }

    if live.env != desired.env {
        live.env = desired.env.clone();
        changed = true;
    }

    if !resources_equal(live.resources.as_ref(), desired.resources.as_ref()) {
        tracing::debug!("Resource requirement drift");
        live.resources = desired.resources.clone();
        changed = true;
    }

    changed
}

/// Compare resource requirements by their canonical JSON form.
///
/// Absent and empty requirements are equal. Quantities are compared by value,
/// so `1000m` and `1` match the way the API server stores them.
pub fn resources_equal(a: Option<&ResourceRequirements>, b: Option<&ResourceRequirements>) -> bool {
    canonical_resources(a) == canonical_resources(b)
}

fn canonical_resources(resources: Option<&ResourceRequirements>) -> serde_json::Value {
    let mut normalized = resources.cloned().unwrap_or_default();
    if normalized.requests.as_ref().is_some_and(|r| r.is_empty()) {
        normalized.requests = None;
    }
    if normalized.limits.as_ref().is_some_and(|l| l.is_empty()) {
        normalized.limits = None;
    }
    if normalized.claims.as_ref().is_some_and(|c| c.is_empty()) {
        normalized.claims = None;
    }
    normalized.requests = normalized.requests.map(canonical_quantities);
    normalized.limits = normalized.limits.map(canonical_quantities);
    serde_json::to_value(&normalized).unwrap_or(serde_json::Value::Null)
}

fn canonical_quantities(quantities: BTreeMap<String, Quantity>) -> BTreeMap<String, Quantity> {
    quantities
        .into_iter()
        .map(|(name, q)| match quantity_nanos(&q.0) {
            Some(nanos) => (name, Quantity(nanos.to_string())),
            None => (name, q),
        })
        .collect()
}

/// Value of a Kubernetes quantity string in billionths, rounded up.
///
/// Accepts decimal SI suffixes (`n` through `E`), binary suffixes (`Ki`
/// through `Ei`) and decimal exponents (`1e3`). Returns `None` for anything
/// else or on overflow.
pub fn quantity_nanos(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);

    // Scale to nanos as numerator / denominator.
    let (scale_num, scale_den): (i128, i128) = match suffix {
        "" => (10i128.pow(9), 1),
        "n" => (1, 1),
        "u" => (10i128.pow(3), 1),
        "m" => (10i128.pow(6), 1),
        "k" => (10i128.pow(12), 1),
        "M" => (10i128.pow(15), 1),
        "G" => (10i128.pow(18), 1),
        "T" => (10i128.pow(21), 1),
        "P" => (10i128.pow(24), 1),
        "E" => (10i128.pow(27), 1),
        "Ki" => (1i128 << 10, 1),
        "Mi" => (1i128 << 20, 1),
        "Gi" => (1i128 << 30, 1),
        "Ti" => (1i128 << 40, 1),
        "Pi" => (1i128 << 50, 1),
        "Ei" => (1i128 << 60, 1),
        exp if exp.starts_with(['e', 'E']) => {
            let power = exp[1..].parse::<i32>().ok()?.checked_add(9)?;
            if power >= 0 {
                (10i128.checked_pow(u32::try_from(power).ok()?)?, 1)
            } else {
                (1, 10i128.checked_pow(power.unsigned_abs())?)
            }
        }
        _ => return None,
    };
    // Binary suffixes still need the nano factor.
    let scale_num = if suffix.ends_with('i') {
        scale_num.checked_mul(10i128.pow(9))?
    } else {
        scale_num
    };

    let (negative, unsigned) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits: i128 = format!("{}{}", whole, fraction).parse().ok()?;
    let fraction_scale = 10i128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
    let numerator = digits.checked_mul(scale_num)?;
    let denominator = fraction_scale.checked_mul(scale_den)?;
    let value = numerator.checked_add(denominator - 1)? / denominator;

    Some(if negative { -value } else { value })
}

/// Force the managed Service fields of `live` to match `desired`.
///
/// `clusterIP` and other allocated fields are preserved.
pub fn merge_service(live: &mut Service, desired: &Service) -> bool {
    let Some(desired_spec) = desired.spec.as_ref() else {
        return false;
    };

    let mut changed = false;
    let live_spec = live.spec.get_or_insert_with(Default::default);

    if live_spec.type_ != desired_spec.type_ {
        live_spec.type_ = desired_spec.type_.clone();
        changed = true;
    }
    if live_spec.selector != desired_spec.selector {
        tracing::debug!("Service selector drift");
        live_spec.selector = desired_spec.selector.clone();
        changed = true;
    }
    if live_spec.ports != desired_spec.ports {
        live_spec.ports = desired_spec.ports.clone();
        changed = true;
    }

    changed
}

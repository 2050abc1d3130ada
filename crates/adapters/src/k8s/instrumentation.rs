// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use tracing::{info, warn};

use oca_core::DetectedApp;

use super::{K8sError, RolloutController, WorkloadKind};

const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

/// Maps a language hint from a `DetectedApp` to the CRD name the
/// `instrumentation.opentelemetry.io/inject-<lang>` annotation expects.
/// Exact set supported by the auto-instrumentation operator.
fn inject_annotation_key(language: &str) -> Option<&'static str> {
    match language.to_ascii_lowercase().as_str() {
        "nodejs" | "node.js" | "node" => Some("instrumentation.opentelemetry.io/inject-nodejs"),
        "java" => Some("instrumentation.opentelemetry.io/inject-java"),
        "python" => Some("instrumentation.opentelemetry.io/inject-python"),
        "go" | "golang" => Some("instrumentation.opentelemetry.io/inject-go"),
        "dotnet" | ".net" => Some("instrumentation.opentelemetry.io/inject-dotnet"),
        _ => None,
    }
}

/// Reconciles auto-instrumentation annotations for every detected workload.
///
/// Each app is handled independently: an unknown kind or language skips that
/// app (with a warning) rather than aborting the whole batch, per the k8s
/// reconciliation tick's instrumentation step.
pub async fn reconcile_instrumentation(
    ctl: &RolloutController,
    apps: &[DetectedApp],
) -> Vec<(DetectedApp, Result<(), K8sError>)> {
    let mut results = Vec::with_capacity(apps.len());
    for app in apps {
        let outcome = reconcile_one(ctl, app).await;
        if let Err(ref e) = outcome {
            warn!(namespace = %app.namespace, workload = %app.workload_name, kind = %app.kind, error = %e, "instrumentation reconcile failed");
        }
        results.push((app.clone(), outcome));
    }
    results
}

async fn reconcile_one(ctl: &RolloutController, app: &DetectedApp) -> Result<(), K8sError> {
    let inject_key = inject_annotation_key(&app.language)
        .ok_or_else(|| K8sError::UnknownLanguage(app.language.clone()))?;
    let inject_value = format!("{}/{}", app.namespace, app.workload_name);

    let kind = WorkloadKind::parse(&app.kind).ok_or_else(|| K8sError::UnknownKind(app.kind.clone()))?;

    let mut desired = BTreeMap::new();
    desired.insert(inject_key.to_string(), inject_value);
    desired.insert(RESTARTED_AT.to_string(), Utc::now().to_rfc3339());

    match kind {
        WorkloadKind::DaemonSet => {
            patch_templated::<DaemonSet>(ctl, &app.workload_name, desired).await
        }
        WorkloadKind::Deployment => {
            patch_templated::<Deployment>(ctl, &app.workload_name, desired).await
        }
        WorkloadKind::StatefulSet => {
            patch_templated::<StatefulSet>(ctl, &app.workload_name, desired).await
        }
        WorkloadKind::ReplicaSet => {
            patch_replicaset_with_deployment_fallback(ctl, &app.workload_name, desired).await
        }
        WorkloadKind::Pod => patch_pod(ctl, &app.workload_name, desired).await,
    }
}

/// A ReplicaSet created by a Deployment is itself unmanaged-in-place; when it
/// no longer exists (already rolled over), fall back to patching the
/// same-named Deployment instead of erroring.
async fn patch_replicaset_with_deployment_fallback(
    ctl: &RolloutController,
    name: &str,
    desired: BTreeMap<String, String>,
) -> Result<(), K8sError> {
    let api: Api<ReplicaSet> = Api::namespaced(ctl.client().clone(), ctl.namespace());
    match api.get(name).await {
        Ok(rs) => patch_if_needed_templated(&api, &rs, desired).await,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            info!(%name, "replicaset not found, falling back to deployment");
            patch_templated::<Deployment>(ctl, name, desired).await
        }
        Err(source) => Err(K8sError::Api {
            kind: "ReplicaSet".into(),
            namespace: ctl.namespace().to_string(),
            name: name.to_string(),
            source,
        }),
    }
}

async fn patch_templated<K>(
    ctl: &RolloutController,
    name: &str,
    desired: BTreeMap<String, String>,
) -> Result<(), K8sError>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + serde::Serialize,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(ctl.client().clone(), ctl.namespace());
    let existing = api.get(name).await.map_err(|source| K8sError::Api {
        kind: kind_name::<K>(),
        namespace: ctl.namespace().to_string(),
        name: name.to_string(),
        source,
    })?;
    patch_if_needed_templated(&api, &existing, desired).await
}

async fn patch_if_needed_templated<K>(
    api: &Api<K>,
    existing: &K,
    desired: BTreeMap<String, String>,
) -> Result<(), K8sError>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + serde::Serialize,
    K::DynamicType: Default,
{
    let current = template_annotations(existing);
    if is_subset(&desired, &current) {
        return Ok(());
    }

    let patch = serde_json::json!({
        "spec": { "template": { "metadata": { "annotations": desired } } }
    });
    api.patch(&existing.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|source| K8sError::Api {
            kind: kind_name::<K>(),
            namespace: existing.namespace().unwrap_or_default(),
            name: existing.name_any(),
            source,
        })?;
    Ok(())
}

async fn patch_pod(
    ctl: &RolloutController,
    name: &str,
    desired: BTreeMap<String, String>,
) -> Result<(), K8sError> {
    let api: Api<Pod> = Api::namespaced(ctl.client().clone(), ctl.namespace());
    let existing = api.get(name).await.map_err(|source| K8sError::Api {
        kind: "Pod".into(),
        namespace: ctl.namespace().to_string(),
        name: name.to_string(),
        source,
    })?;

    let current: BTreeMap<String, String> = existing.annotations().clone().into_iter().collect();
    if is_subset(&desired, &current) {
        return Ok(());
    }

    let patch = serde_json::json!({ "metadata": { "annotations": desired } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|source| K8sError::Api {
            kind: "Pod".into(),
            namespace: ctl.namespace().to_string(),
            name: name.to_string(),
            source,
        })?;
    Ok(())
}

/// Reads the pod template's annotations of a workload that carries one.
fn template_annotations<K: serde::Serialize>(resource: &K) -> BTreeMap<String, String> {
    let value = serde_json::to_value(resource).unwrap_or(serde_json::Value::Null);
    value
        .pointer("/spec/template/metadata/annotations")
        .and_then(|v| v.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Idempotence check: the patch is skipped when every desired key/value is
/// already present, not when the two maps are deeply equal — an existing
/// annotation map may carry other keys we don't own.
fn is_subset(desired: &BTreeMap<String, String>, current: &BTreeMap<String, String>) -> bool {
    desired.iter().all(|(k, v)| current.get(k) == Some(v))
}

fn kind_name<K: kube::Resource>() -> String
where
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_is_rejected() {
        assert!(inject_annotation_key("rust").is_none());
    }

    #[test]
    fn known_languages_map_to_expected_crd_suffix() {
        assert_eq!(
            inject_annotation_key("Node.Js"),
            Some("instrumentation.opentelemetry.io/inject-nodejs")
        );
        assert_eq!(
            inject_annotation_key("python"),
            Some("instrumentation.opentelemetry.io/inject-python")
        );
    }

    #[test]
    fn subset_check_ignores_unrelated_keys() {
        let mut desired = BTreeMap::new();
        desired.insert("a".to_string(), "1".to_string());

        let mut current = BTreeMap::new();
        current.insert("a".to_string(), "1".to_string());
        current.insert("unrelated".to_string(), "keep-me".to_string());

        assert!(is_subset(&desired, &current));
    }

    #[test]
    fn subset_check_detects_stale_value() {
        let mut desired = BTreeMap::new();
        desired.insert("a".to_string(), "2".to_string());

        let mut current = BTreeMap::new();
        current.insert("a".to_string(), "1".to_string());

        assert!(!is_subset(&desired, &current));
    }
}

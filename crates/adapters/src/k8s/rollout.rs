// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::info;

use super::{K8sError, RolloutController, WorkloadKind};

/// Implements the `kubectl rollout restart` idiom: `Get` the target to fail
/// fast when missing, then strategic-merge-patch the pod template's
/// `kubectl.kubernetes.io/restartedAt` annotation to the current time.
///
/// Grounded on `kube-core`'s own `Request::restart` helper, generalized
/// across the restartable workload kinds.
pub async fn trigger_rollout(
    ctl: &RolloutController,
    kind: WorkloadKind,
    name: &str,
) -> Result<(), K8sError> {
    match kind {
        WorkloadKind::DaemonSet => restart_templated::<DaemonSet>(ctl, name).await,
        WorkloadKind::Deployment => restart_templated::<Deployment>(ctl, name).await,
        WorkloadKind::StatefulSet => restart_templated::<StatefulSet>(ctl, name).await,
        WorkloadKind::ReplicaSet => restart_templated::<ReplicaSet>(ctl, name).await,
        WorkloadKind::Pod => Err(K8sError::UnknownKind(
            "Pod has no template to restart".into(),
        )),
    }
}

async fn restart_templated<K>(ctl: &RolloutController, name: &str) -> Result<(), K8sError>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(ctl.client().clone(), ctl.namespace());
    let to_api_err = |source| K8sError::Api {
        kind: kind_name::<K>(),
        namespace: ctl.namespace().to_string(),
        name: name.to_string(),
        source,
    };

    // Fail fast when missing, per spec.
    let existing = api.get(name).await.map_err(to_api_err)?;

    let patch = serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        "kubectl.kubernetes.io/restartedAt": Utc::now().to_rfc3339(),
                    }
                }
            }
        }
    });

    api.patch(&existing.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(to_api_err)?;

    info!(kind = kind_name::<K>(), %name, "triggered rollout");
    Ok(())
}

fn kind_name<K: Resource>() -> String
where
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).to_string()
}

//! Weights maps resource kinds to integer ordering weights.
//!
//! Apply walks resources in ascending weight, delete in descending, so
//! dependencies (namespaces, RBAC, config) exist before the workloads that
//! consume them.

/// DEFAULT_WEIGHT is used for kinds and groups with no table entry.
pub const DEFAULT_WEIGHT: i32 = 1000;

/// Weight_for_kind reports the ordering weight for a resource.
///
/// Lookup is by kind first; kinds not in the table fall back to a weight for
/// their API group, then to [DEFAULT_WEIGHT].
pub fn weight_for_kind(kind: &str, group: &str) -> i32 {
    if let Some(w) = kind_weight(kind) {
        return w;
    }
    if let Some(w) = group_weight(group) {
        return w;
    }
    DEFAULT_WEIGHT
}

fn kind_weight(kind: &str) -> Option<i32> {
    Some(match kind {
        "CustomResourceDefinition" => -100,
        "Namespace" => 0,
        "ResourceQuota" => 1,
        "LimitRange" => 2,
        "ServiceAccount" => 5,
        "ClusterRole" | "Role" => 10,
        "ClusterRoleBinding" | "RoleBinding" => 11,
        "Secret" | "ConfigMap" => 15,
        "StorageClass" => 20,
        "PersistentVolume" => 20,
        "PersistentVolumeClaim" => 20,
        "Service" => 50,
        "DaemonSet" => 100,
        "Deployment" => 100,
        "StatefulSet" => 100,
        "ReplicaSet" => 100,
        "Pod" => 105,
        "Job" => 110,
        "CronJob" => 110,
        "Ingress" | "IngressClass" => 150,
        "NetworkPolicy" => 150,
        "HorizontalPodAutoscaler" => 200,
        "PodDisruptionBudget" => 200,
        "MutatingWebhookConfiguration" => 500,
        "ValidatingWebhookConfiguration" => 500,
        _ => return None,
    })
}

fn group_weight(group: &str) -> Option<i32> {
    Some(match group {
        "apiextensions.k8s.io" => -100,
        "rbac.authorization.k8s.io" => 10,
        "storage.k8s.io" => 20,
        "networking.k8s.io" => 150,
        "autoscaling" => 200,
        "policy" => 200,
        "admissionregistration.k8s.io" => 500,
        _ => return None,
    })
}

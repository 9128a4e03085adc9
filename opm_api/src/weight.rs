//! Module `weight` holds the fixed apply-order weight table.
//!
//! Lower weights apply earlier and delete later. The table is keyed by kind
//! (with the group disambiguating where kinds collide across groups) and is
//! deliberately static: rendered output must sort identically on every
//! machine.

/// UNKNOWN_WEIGHT is assigned to kinds absent from the table, ordering them
/// after everything OPM knows about.
pub const UNKNOWN_WEIGHT: i32 = 1000;

/// Weight reports the apply-order weight for a group/kind pair.
pub fn weight(group: &str, kind: &str) -> i32 {
    match (group, kind) {
        ("apiextensions.k8s.io", "CustomResourceDefinition") => -100,
        ("", "Namespace") => 0,
        ("", "ServiceAccount") => 5,
        ("rbac.authorization.k8s.io", "Role") => 6,
        ("rbac.authorization.k8s.io", "ClusterRole") => 6,
        ("rbac.authorization.k8s.io", "RoleBinding") => 10,
        ("rbac.authorization.k8s.io", "ClusterRoleBinding") => 10,
        ("", "Secret") => 15,
        ("", "ConfigMap") => 15,
        ("storage.k8s.io", "StorageClass") => 20,
        ("", "PersistentVolume") => 20,
        ("", "PersistentVolumeClaim") => 20,
        ("", "Service") => 50,
        ("apps", "Deployment") => 100,
        ("apps", "StatefulSet") => 100,
        ("apps", "DaemonSet") => 100,
        ("apps", "ReplicaSet") => 100,
        ("", "Pod") => 100,
        ("batch", "Job") => 110,
        ("batch", "CronJob") => 110,
        ("networking.k8s.io", "Ingress") => 150,
        ("networking.k8s.io", "IngressClass") => 150,
        ("networking.k8s.io", "NetworkPolicy") => 150,
        ("autoscaling", "HorizontalPodAutoscaler") => 200,
        ("autoscaling.k8s.io", "VerticalPodAutoscaler") => 200,
        ("policy", "PodDisruptionBudget") => 200,
        ("admissionregistration.k8s.io", "ValidatingWebhookConfiguration") => 500,
        ("admissionregistration.k8s.io", "MutatingWebhookConfiguration") => 500,
        _ => UNKNOWN_WEIGHT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representative_order() {
        let crd = weight("apiextensions.k8s.io", "CustomResourceDefinition");
        let ns = weight("", "Namespace");
        let cm = weight("", "ConfigMap");
        let svc = weight("", "Service");
        let deploy = weight("apps", "Deployment");
        let hook = weight("admissionregistration.k8s.io", "ValidatingWebhookConfiguration");
        assert!(crd < ns);
        assert!(ns < cm);
        assert!(cm < svc);
        assert!(svc < deploy);
        assert!(deploy < hook);
        assert!(hook < UNKNOWN_WEIGHT);
    }

    #[test]
    fn unknown_sorts_last() {
        assert_eq!(weight("example.com", "Widget"), UNKNOWN_WEIGHT);
    }
}

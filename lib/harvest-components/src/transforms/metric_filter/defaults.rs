use super::FilterAction::{self, Allow, Deny};

type Rules = &'static [(FilterAction, &'static str)];

/// First minor version of Kubernetes 1.x whose sources expose the current metric names.
const CURRENT_MIN_MINOR: u32 = 20;

/// Rules shared by every table. Ordered from most to least specific.
static COMMON: Rules = &[
    // Low-value label and annotation series.
    (Deny, "^kube_.+_(labels|annotations)$"),
    (Deny, "^kube_.+_created$"),
    (Deny, "^kube_.+_metadata_generation$"),
    // Cluster state.
    (Allow, "^kube_node_(info|spec_unschedulable|status_condition|status_capacity|status_allocatable)$"),
    (Allow, "^kube_pod_(info|status_phase|status_ready|status_scheduled|status_reason)$"),
    (Allow, "^kube_pod_container_status_(ready|restarts_total|running|terminated|terminated_reason|waiting|waiting_reason)$"),
    (Allow, "^kube_deployment_(spec_replicas|status_replicas|status_replicas_available|status_replicas_unavailable|status_replicas_updated)$"),
    (Allow, "^kube_daemonset_status_(current_number_scheduled|desired_number_scheduled|number_available|number_misscheduled|number_ready|number_unavailable)$"),
    (Allow, "^kube_statefulset_(replicas|status_replicas|status_replicas_current|status_replicas_ready|status_replicas_updated)$"),
    (Allow, "^kube_replicaset_(spec_replicas|status_ready_replicas|status_replicas)$"),
    (Allow, "^kube_job_(status_active|status_failed|status_succeeded|complete|failed)$"),
    (Allow, "^kube_cronjob_(status_active|next_schedule_time|spec_suspend)$"),
    (Allow, "^kube_namespace_status_phase$"),
    (Allow, "^kube_persistentvolume_status_phase$"),
    (Allow, "^kube_persistentvolumeclaim_(status_phase|resource_requests_storage_bytes)$"),
    (Allow, "^kube_resourcequota$"),
    // Node and container resource usage.
    (Allow, "^(node|container|pod)_(cpu|memory)_(usage_seconds_total|working_set_bytes)$"),
    (Allow, "^kubelet_(running_pods|running_containers|volume_stats_(available|capacity|used)_bytes)$"),
    // API server.
    (Allow, "^apiserver_request_total$"),
    (Allow, "^apiserver_request_duration_seconds$"),
    (Allow, "^etcd_object_counts$"),
    // DNS.
    (Allow, "^coredns_(dns_requests_total|dns_responses_total|forward_requests_total|cache_hits_total|cache_misses_total)$"),
    (Allow, "^coredns_dns_request_duration_seconds$"),
];

static CATCH_ALL: Rules = &[(Deny, "^.+$")];

/// A built-in rule table: the common rules, then the version-specific rules, then a catch-all deny.
pub(super) struct RuleTable {
    specific: Rules,
}

impl RuleTable {
    pub(super) fn rules(&self) -> impl Iterator<Item = (FilterAction, &'static str)> {
        COMMON.iter().chain(self.specific).chain(CATCH_ALL).copied()
    }
}

/// Rule table for clusters older than 1.20.
static LEGACY: RuleTable = RuleTable {
    specific: &[
        (Allow, "^kube_hpa_(spec_max_replicas|spec_min_replicas|status_current_replicas|status_desired_replicas)$"),
        (Allow, "^kube_pod_container_resource_(requests|limits)_(cpu_cores|memory_bytes)$"),
    ],
};

/// Rule table for clusters running 1.20 or newer.
static CURRENT: RuleTable = RuleTable {
    specific: &[
        (Allow, "^kube_horizontalpodautoscaler_(spec_max_replicas|spec_min_replicas|status_current_replicas|status_desired_replicas)$"),
        (Allow, "^kube_pod_container_resource_(requests|limits)$"),
    ],
};

/// Returns the rule table for the given cluster API version, such as `v1.17` or `1.27.3`.
pub(super) fn table_for_version(version: &str) -> &'static RuleTable {
    match parse_minor(version) {
        Some((1, minor)) if minor < CURRENT_MIN_MINOR => &LEGACY,
        _ => &CURRENT,
    }
}

#[cfg(test)]
pub(super) fn all_tables() -> [&'static RuleTable; 2] {
    [&LEGACY, &CURRENT]
}

fn parse_minor(version: &str) -> Option<(u32, u32)> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);

    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    // Managed clusters report minors such as `27+`.
    let minor = parts.next()?.trim_end_matches('+').parse().ok()?;
    Some((major, minor))
}

//! Well-known label and annotation keys.

/// Label carrying the hash of a replica group's unit template.
pub const TEMPLATE_HASH_LABEL: &str = "orrery.io/template-hash";

/// Revision number of a replica group, mirrored on its workload.
pub const REVISION: &str = "orrery.io/revision";

/// Workload replica count recorded when a replica group was last scaled.
pub const DESIRED_REPLICAS: &str = "orrery.io/desired-replicas";

/// Workload replicas plus max surge recorded when a group was last scaled.
pub const MAX_REPLICAS: &str = "orrery.io/max-replicas";

/// Parse an integer annotation, ignoring malformed values.
#[must_use]
pub fn parse_i32(value: Option<&str>) -> Option<i32> {
    value.and_then(|v| v.parse().ok())
}

/// Parse a revision annotation. Missing or malformed values count as zero.
#[must_use]
pub fn parse_revision(value: Option<&str>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

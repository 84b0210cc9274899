//! Per-worker share computation.
//!
//! A host's limit is divided evenly across its active transfers. Hosts in a
//! rate-limit group are additionally clamped to the group's own per-member
//! share, so one busy host cannot starve its group.

/// Computes the bytes-per-second budget of one worker.
///
/// `host_limit` 0 means the host is unlimited; the result is then the group
/// clamp alone (or `None` for fully unlimited). `active` counts the host's
/// running workers including the one asking; a zero count is treated as one.
#[must_use]
pub fn per_process_share(
    host_limit: u64,
    active: u32,
    group: Option<(u64, u32)>,
) -> Option<u64> {
    let active = u64::from(active.max(1));
    let host_share = (host_limit > 0).then(|| (host_limit / active).max(1));
    let group_share = group.and_then(|(limit, members)| {
        (limit > 0).then(|| (limit / u64::from(members.max(1))).max(1))
    });
    match (host_share, group_share) {
        (Some(h), Some(g)) => Some(h.min(g)),
        (Some(h), None) => Some(h),
        (None, Some(g)) => Some(g),
        (None, None) => None,
    }
}

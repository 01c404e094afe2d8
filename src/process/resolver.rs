use std::collections::HashSet;
use std::iter::once;

use crate::prelude::*;
use crate::process::{Pid, ProcessDirectory, ProcessRecord};

/// Compute the transitive descendant set of `root_pids` over the ppid
/// relation, in BFS level order.
///
/// Roots unknown to the directory simply produce an empty set. ppid edges
/// come from actual process creation so cycles cannot occur in healthy data,
/// but a corrupted directory could loop: a `(pid, started_at)` identity seen
/// twice is reported and not expanded again, so traversal always terminates.
pub fn resolve(
    directory: &dyn ProcessDirectory,
    root_pids: &[Pid],
) -> Result<Vec<ProcessRecord>> {
    let mut descendants: Vec<ProcessRecord> = Vec::new();
    let mut visited: HashSet<(Pid, i64)> = HashSet::new();
    let mut frontier: Vec<Pid> = root_pids.to_vec();

    while !frontier.is_empty() {
        let mut next_frontier: Vec<Pid> = Vec::new();
        for record in directory.children_of(&frontier)? {
            if !visited.insert(record.identity()) {
                warn!(
                    "Process {} (started at {}) was reached twice while resolving descendants, \
                     the process directory may be corrupted",
                    record.pid, record.started_at
                );
                continue;
            }
            next_frontier.push(record.pid);
            descendants.push(record);
        }
        frontier = next_frontier;
    }

    Ok(descendants)
}

/// Pids of a descendant tree in the order termination signals must be sent:
/// every descendant strictly before the root, deepest levels first, so no
/// still-running child gets reparented before it is signaled.
pub fn termination_order(root_pid: Pid, descendants: &[ProcessRecord]) -> Vec<Pid> {
    descendants
        .iter()
        .rev()
        .map(|record| record.pid)
        .chain(once(root_pid))
        .collect()
}

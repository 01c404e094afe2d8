use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind, Users};

use crate::prelude::*;

pub mod resolver;

pub type Pid = libc::pid_t;

/// One observed process, as recorded by a process directory.
///
/// A pid may be reused by the OS over time, so the identity of a record is
/// `(pid, started_at)`, never the pid alone. `id` is a stable digest of that
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: String,
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub user: Option<String>,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn new(
        pid: Pid,
        ppid: Option<Pid>,
        user: Option<String>,
        command: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: record_id(pid, started_at),
            pid,
            ppid,
            user,
            command,
            started_at,
            inserted_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> (Pid, i64) {
        (self.pid, self.started_at.timestamp())
    }
}

fn record_id(pid: Pid, started_at: DateTime<Utc>) -> String {
    sha256::digest(format!("{}:{}", pid, started_at.timestamp()))
}

/// Read-only source of process records. The descendant resolver only needs
/// one lookup: all records whose parent is in a given pid set.
pub trait ProcessDirectory {
    fn children_of(&self, ppids: &[Pid]) -> Result<Vec<ProcessRecord>>;
}

/// Live process directory backed by a point-in-time snapshot of the OS
/// process table.
pub struct SystemDirectory {
    system: System,
    users: Users,
}

impl SystemDirectory {
    pub fn snapshot() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(
                ProcessRefreshKind::nothing()
                    .with_cmd(UpdateKind::Always)
                    .with_user(UpdateKind::Always),
            ),
        );
        let users = Users::new_with_refreshed_list();
        Self { system, users }
    }

    fn to_record(&self, process: &sysinfo::Process) -> ProcessRecord {
        let command = if process.cmd().is_empty() {
            process.name().to_string_lossy().into_owned()
        } else {
            shell_words::join(process.cmd().iter().map(|arg| arg.to_string_lossy()))
        };
        let user = process
            .user_id()
            .and_then(|uid| self.users.get_user_by_id(uid))
            .map(|user| user.name().to_string());
        let started_at = DateTime::from_timestamp(process.start_time() as i64, 0)
            .unwrap_or_else(Utc::now);

        ProcessRecord::new(
            process.pid().as_u32() as Pid,
            process.parent().map(|ppid| ppid.as_u32() as Pid),
            user,
            command,
            started_at,
        )
    }

    /// All processes of the snapshot, ordered by start time.
    pub fn records(&self) -> Vec<ProcessRecord> {
        let mut records: Vec<ProcessRecord> = self
            .system
            .processes()
            .values()
            .map(|process| self.to_record(process))
            .collect();
        records.sort_by_key(|record| (record.started_at, record.pid));
        records
    }
}

impl ProcessDirectory for SystemDirectory {
    fn children_of(&self, ppids: &[Pid]) -> Result<Vec<ProcessRecord>> {
        let parents: HashSet<Pid> = ppids.iter().copied().collect();
        let mut children: Vec<ProcessRecord> = self
            .system
            .processes()
            .values()
            .filter(|process| {
                process
                    .parent()
                    .is_some_and(|ppid| parents.contains(&(ppid.as_u32() as Pid)))
            })
            .map(|process| self.to_record(process))
            .collect();
        children.sort_by_key(|record| (record.started_at, record.pid));
        Ok(children)
    }
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::process::{Pid, ProcessRecord};

/// How downstream queries restrict observed activity to a session.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeMode {
    /// Only processes launched by the target command (its descendant set)
    LaunchedOnly,
    /// Only processes started after the session began
    NewOnly,
    /// Everything observed while the session ran
    All,
}

impl std::fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeMode::LaunchedOnly => write!(f, "launched processes"),
            ScopeMode::NewOnly => write!(f, "new processes"),
            ScopeMode::All => write!(f, "all processes"),
        }
    }
}

impl ScopeMode {
    /// Decide whether `record` belongs to the session under this mode.
    ///
    /// The exclusion set (the tracer's own descendant set) wins over every
    /// mode: the tracer must never show up as activity of the session it
    /// observed.
    pub fn includes(
        &self,
        record: &ProcessRecord,
        launched_pids: &HashSet<Pid>,
        excluded_pids: &HashSet<Pid>,
        cutoff: DateTime<Utc>,
    ) -> bool {
        if excluded_pids.contains(&record.pid) {
            return false;
        }
        match self {
            ScopeMode::LaunchedOnly => launched_pids.contains(&record.pid),
            ScopeMode::NewOnly => record.started_at >= cutoff,
            ScopeMode::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(pid: Pid, started_at: &str) -> ProcessRecord {
        let started_at = chrono::NaiveDateTime::parse_from_str(started_at, "%Y/%m/%d %H:%M:%S")
            .unwrap()
            .and_utc();
        ProcessRecord::new(pid, None, None, format!("proc-{pid}"), started_at)
    }

    fn cutoff() -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str("2024/01/01 00:00:00", "%Y/%m/%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_launched_only_partitions_by_pid() {
        let launched: HashSet<Pid> = [50, 51, 52].into();
        let excluded = HashSet::new();

        let launched_record = record(51, "2024/01/01 00:00:01");
        let foreign_record = record(60, "2024/01/01 00:00:01");
        assert!(ScopeMode::LaunchedOnly.includes(&launched_record, &launched, &excluded, cutoff()));
        assert!(!ScopeMode::LaunchedOnly.includes(&foreign_record, &launched, &excluded, cutoff()));
    }

    #[test]
    fn test_new_only_compares_against_session_start() {
        let launched = HashSet::new();
        let excluded = HashSet::new();

        let before = record(1, "2023/12/31 23:59:59");
        let at_start = record(2, "2024/01/01 00:00:00");
        let after = record(3, "2024/01/01 00:00:01");
        assert!(!ScopeMode::NewOnly.includes(&before, &launched, &excluded, cutoff()));
        assert!(ScopeMode::NewOnly.includes(&at_start, &launched, &excluded, cutoff()));
        assert!(ScopeMode::NewOnly.includes(&after, &launched, &excluded, cutoff()));
    }

    #[rstest]
    #[case(ScopeMode::LaunchedOnly)]
    #[case(ScopeMode::NewOnly)]
    #[case(ScopeMode::All)]
    fn test_excluded_pids_lose_under_every_mode(#[case] mode: ScopeMode) {
        // Tracer 999 spawned 1000; target 50 spawned 51 and 52
        let launched: HashSet<Pid> = [50, 51, 52, 1000].into();
        let excluded: HashSet<Pid> = [999, 1000].into();

        let tracer_child = record(1000, "2024/01/01 00:00:01");
        assert!(!mode.includes(&tracer_child, &launched, &excluded, cutoff()));

        let target_child = record(51, "2024/01/01 00:00:01");
        assert!(mode.includes(&target_child, &launched, &excluded, cutoff()));
    }

    #[test]
    fn test_all_mode_admits_everything_not_excluded() {
        let launched = HashSet::new();
        let excluded = HashSet::new();
        let ancient = record(1, "1999/01/01 00:00:00");
        assert!(ScopeMode::All.includes(&ancient, &launched, &excluded, cutoff()));
    }
}

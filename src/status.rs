//! A pure, side-effect-free snapshot of server state (spec §4.7).

use crate::center::Center;

#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub running: bool,
    pub start_time: i64,
    pub now: i64,
    pub request_count: u64,
    pub total_bytes: u64,
    pub base_path: camino::Utf8PathBuf,
    pub append_only: bool,
    pub policy_id: Option<String>,
    pub disk_used_pct: Option<f64>,
}

/// Snapshot configuration, running flag, counters, disk usage, and policy
/// id. Takes no lock longer than reading the state struct.
pub fn snapshot(center: &Center, now: i64) -> StatusSnapshot {
    let state = center.state.lock().unwrap();
    StatusSnapshot {
        running: state.running,
        start_time: state.start_time,
        now,
        request_count: state.request_count,
        total_bytes: state.total_bytes,
        base_path: center.storage.base_path().to_path_buf(),
        append_only: state.append_only,
        policy_id: state.policy.as_ref().map(|p| p.id.clone()),
        disk_used_pct: center.storage.disk_used_pct(),
    }
}

impl From<&StatusSnapshot> for airgapper_api::StatusWire {
    fn from(snapshot: &StatusSnapshot) -> Self {
        Self {
            running: snapshot.running,
            start_time: snapshot.start_time,
            now: snapshot.now,
            request_count: snapshot.request_count,
            total_bytes: snapshot.total_bytes,
            base_path: snapshot.base_path.clone(),
            append_only: snapshot.append_only,
            policy_id: snapshot.policy_id.clone(),
            disk_used_pct: snapshot.disk_used_pct,
        }
    }
}

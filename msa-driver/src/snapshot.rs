//! Snapshot reconciler.
//!
//! Snapshots hang off a base volume and are immutable. Deletion is by
//! *name* (the dialect's `delete snapshot` does not accept serials), so
//! the delete path first re-reads and cross-checks both the recorded
//! serial and the base volume before issuing the command.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use msa_client::Snapshot;

use crate::api::CommandApi;
use crate::error::{DriverError, Result};
use crate::lookup;
use crate::wait::{self, CREATE_WAITS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotPlan {
    pub name: String,
    /// Base volume the snapshot is taken from.
    pub volume_name: String,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Canonical identifier: the array-assigned serial number.
    pub id: String,
    pub name: String,
    pub volume_name: String,
    pub serial_number: Option<String>,
    pub durable_id: Option<String>,
    pub pool: Option<String>,
    pub vdisk: Option<String>,
    pub size: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

pub struct SnapshotReconciler<C> {
    api: C,
}

impl<C: CommandApi> SnapshotReconciler<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        plan: &SnapshotPlan,
    ) -> Result<SnapshotState> {
        let name = plan.name.trim();
        let volume_name = plan.volume_name.trim();
        if name.is_empty() || volume_name.is_empty() {
            return Err(DriverError::Validation(
                "name and volume_name are required".to_string(),
            ));
        }

        if lookup::find_snapshot(&self.api, cancel, name, "")
            .await?
            .is_some()
        {
            return Err(DriverError::AlreadyExists { kind: "snapshot" });
        }

        let mut should_validate = false;
        let create = self
            .api
            .execute(cancel, &["create", "snapshots", "volumes", volume_name, name])
            .await;
        if let Err(err) = create {
            match err.api() {
                Some(api_err) if is_nonfatal_create_response(api_err.message()) => {
                    debug!(
                        snapshot = name,
                        response = api_err.message(),
                        "create returned non-fatal status, revalidating"
                    );
                    should_validate = true;
                }
                _ => return Err(err.into()),
            }
        }

        let snapshot = wait::wait_for(cancel, &CREATE_WAITS, "snapshot", || {
            lookup::find_snapshot(&self.api, cancel, name, "")
        })
        .await?;

        if should_validate && !snapshot.base_volume_name.eq_ignore_ascii_case(volume_name) {
            return Err(DriverError::Collision {
                kind: "snapshot",
                detail: format!(
                    "snapshot {name:?} exists but does not belong to volume {volume_name:?}"
                ),
            });
        }

        info!(snapshot = name, volume = volume_name, "snapshot created");
        Ok(state_from(plan.clone(), &snapshot))
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &SnapshotState,
    ) -> Result<Option<SnapshotState>> {
        let snapshot =
            lookup::find_snapshot(&self.api, cancel, &state.name, state.id.trim()).await?;
        Ok(snapshot.map(|snapshot| state_from_state(state.clone(), &snapshot)))
    }

    /// Snapshots have no mutable attributes.
    pub fn update(&self) -> Result<()> {
        Err(DriverError::Validation(
            "snapshot updates require replacement: name and base volume are immutable"
                .to_string(),
        ))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &SnapshotState) -> Result<()> {
        if !state.allow_destroy {
            return Err(DriverError::ConsentRequired { kind: "snapshot" });
        }

        let Some(snapshot) =
            lookup::find_snapshot(&self.api, cancel, &state.name, state.id.trim()).await?
        else {
            // Already gone; nothing to do.
            return Ok(());
        };

        let id = state.id.trim();
        if !id.is_empty() && snapshot.serial_number != id {
            return Err(DriverError::Mismatch {
                kind: "snapshot",
                detail: "snapshot serial number does not match state".to_string(),
            });
        }
        let volume_name = state.volume_name.trim();
        if !volume_name.is_empty()
            && !snapshot.base_volume_name.eq_ignore_ascii_case(volume_name)
        {
            return Err(DriverError::Mismatch {
                kind: "snapshot",
                detail: "snapshot base volume does not match state".to_string(),
            });
        }

        let target = snapshot.name.trim();
        if target.is_empty() {
            return Err(DriverError::State(
                "snapshot name is required for deletion".to_string(),
            ));
        }

        self.api
            .execute(cancel, &["delete", "snapshot", target])
            .await?;
        info!(snapshot = target, "snapshot deleted");
        Ok(())
    }

    pub async fn import(
        &self,
        cancel: &CancellationToken,
        serial: &str,
    ) -> Result<SnapshotState> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(DriverError::Validation(
                "import requires a serial number".to_string(),
            ));
        }

        let snapshot = lookup::find_snapshot(&self.api, cancel, "", serial)
            .await?
            .ok_or(DriverError::NotFound { kind: "snapshot" })?;

        let plan = SnapshotPlan {
            name: snapshot.name.clone(),
            volume_name: snapshot.base_volume_name.clone(),
            allow_destroy: false,
        };
        Ok(state_from(plan, &snapshot))
    }
}

fn is_nonfatal_create_response(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("snapshot(s) were created")
        || (message.contains("name") && message.contains("already"))
}

fn state_from(plan: SnapshotPlan, snapshot: &Snapshot) -> SnapshotState {
    let mut state = SnapshotState {
        name: snapshot.name.clone(),
        volume_name: plan.volume_name,
        allow_destroy: plan.allow_destroy,
        ..SnapshotState::default()
    };
    apply_snapshot(&mut state, snapshot);
    state
}

fn state_from_state(mut state: SnapshotState, snapshot: &Snapshot) -> SnapshotState {
    state.name = snapshot.name.clone();
    apply_snapshot(&mut state, snapshot);
    state
}

fn apply_snapshot(state: &mut SnapshotState, snapshot: &Snapshot) {
    if !snapshot.base_volume_name.is_empty() {
        state.volume_name = snapshot.base_volume_name.clone();
    }
    if !snapshot.durable_id.is_empty() {
        state.durable_id = Some(snapshot.durable_id.clone());
    }
    if !snapshot.serial_number.is_empty() {
        state.serial_number = Some(snapshot.serial_number.clone());
        state.id = snapshot.serial_number.clone();
    }
    if !snapshot.pool_name.is_empty() {
        state.pool = Some(snapshot.pool_name.clone());
    }
    if !snapshot.vdisk_name.is_empty() {
        state.vdisk = Some(snapshot.vdisk_name.clone());
    }
    if !snapshot.size.is_empty() {
        state.size = Some(snapshot.size.clone());
    }
    state.properties = snapshot.properties.clone();
}

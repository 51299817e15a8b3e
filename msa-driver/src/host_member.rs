//! Host↔initiator membership reconciler.
//!
//! Attaches an existing initiator to an existing host. The composite
//! identity is `host:initiator-id`. Membership is confirmed by
//! cross-referencing the initiator's `host-key`/`host-id` against the
//! host's `durable-id`/`serial-number`, because the membership rows are
//! not directly queryable on every firmware revision.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use msa_client::{Host, Initiator};

use crate::api::CommandApi;
use crate::error::{DriverError, Result};
use crate::lookup;
use crate::validate::validate_host_name;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostMemberPlan {
    pub host_name: String,
    /// Initiator ID or nickname.
    pub initiator_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostMemberState {
    /// Composite identity `host:initiator-id`.
    pub id: String,
    pub host_name: String,
    pub initiator_id: String,
}

pub struct HostMemberReconciler<C> {
    api: C,
}

impl<C: CommandApi> HostMemberReconciler<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        plan: &HostMemberPlan,
    ) -> Result<HostMemberState> {
        let host_name = plan.host_name.trim();
        let initiator_id = plan.initiator_id.trim();
        validate_host_name(host_name)?;
        if initiator_id.is_empty() {
            return Err(DriverError::Validation(
                "initiator_id is required".to_string(),
            ));
        }

        self.api
            .execute(
                cancel,
                &["add", "host-members", "initiators", initiator_id, host_name],
            )
            .await?;

        info!(host = host_name, initiator = initiator_id, "host member added");
        Ok(HostMemberState {
            id: member_id(host_name, initiator_id),
            host_name: host_name.to_string(),
            initiator_id: initiator_id.to_string(),
        })
    }

    /// Confirms the membership still holds; `None` drops it from state.
    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &HostMemberState,
    ) -> Result<Option<HostMemberState>> {
        let host_name = state.host_name.trim();
        let initiator_id = state.initiator_id.trim();
        if host_name.is_empty() || initiator_id.is_empty() {
            return Err(DriverError::State(
                "host_name and initiator_id are required".to_string(),
            ));
        }

        let Some(host) = lookup::find_host(&self.api, cancel, host_name).await? else {
            return Ok(None);
        };
        let Some(initiator) =
            lookup::find_initiator(&self.api, cancel, initiator_id, initiator_id).await?
        else {
            return Ok(None);
        };

        if !initiator_belongs_to_host(&initiator, &host) {
            return Ok(None);
        }

        Ok(Some(HostMemberState {
            id: member_id(host_name, initiator_id),
            host_name: host.name.clone(),
            initiator_id: state.initiator_id.clone(),
        }))
    }

    /// Membership has no mutable attributes.
    pub fn update(&self) -> Result<()> {
        Err(DriverError::Validation(
            "host member updates require replacement: host and initiator are immutable"
                .to_string(),
        ))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &HostMemberState) -> Result<()> {
        let host_name = state.host_name.trim();
        let initiator_id = state.initiator_id.trim();
        if host_name.is_empty() || initiator_id.is_empty() {
            return Err(DriverError::State(
                "host_name and initiator_id are required for deletion".to_string(),
            ));
        }

        self.api
            .execute(
                cancel,
                &["remove", "host-members", "initiators", initiator_id, host_name],
            )
            .await?;
        info!(host = host_name, initiator = initiator_id, "host member removed");
        Ok(())
    }

    /// Import by composite `host:initiator-id` key.
    pub async fn import(&self, cancel: &CancellationToken, id: &str) -> Result<HostMemberState> {
        let Some((host_name, initiator_id)) = id.split_once(':') else {
            return Err(DriverError::Validation(
                "import id must be host_name:initiator_id".to_string(),
            ));
        };

        let state = HostMemberState {
            id: member_id(host_name.trim(), initiator_id.trim()),
            host_name: host_name.trim().to_string(),
            initiator_id: initiator_id.trim().to_string(),
        };

        match self.read(cancel, &state).await? {
            Some(state) => Ok(state),
            None => Err(DriverError::NotFound { kind: "host member" }),
        }
    }
}

fn member_id(host_name: &str, initiator_id: &str) -> String {
    format!("{host_name}:{initiator_id}")
}

fn initiator_belongs_to_host(initiator: &Initiator, host: &Host) -> bool {
    let matches = |left: &str, right: &str| {
        !left.is_empty() && !right.is_empty() && left.eq_ignore_ascii_case(right)
    };
    matches(&initiator.host_key, &host.durable_id)
        || matches(&initiator.host_id, &host.serial_number)
        || matches(&initiator.host_key, &host.serial_number)
        || matches(&initiator.host_id, &host.durable_id)
}

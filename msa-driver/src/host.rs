//! Host reconciler.
//!
//! A host aggregates initiators and must be created with at least one.
//! Name and profile are mutable through `set host`; the initiator set is
//! not, so membership changes go through the host-member reconciler or a
//! replacement.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use msa_client::Host;

use crate::api::CommandApi;
use crate::error::{DriverError, Result};
use crate::lookup;
use crate::validate::validate_host_name;
use crate::wait::{self, CREATE_WAITS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostPlan {
    pub name: String,
    /// Initiator IDs or nicknames to seed the host with.
    pub initiators: Vec<String>,
    pub host_group: Option<String>,
    pub profile: Option<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostState {
    /// Serial number when assigned, durable id otherwise.
    pub id: String,
    pub name: String,
    pub initiators: Vec<String>,
    pub host_group: Option<String>,
    pub profile: Option<String>,
    pub durable_id: Option<String>,
    pub serial_number: Option<String>,
    pub group_key: Option<String>,
    pub member_count: i64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

pub struct HostReconciler<C> {
    api: C,
}

impl<C: CommandApi> HostReconciler<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub async fn create(&self, cancel: &CancellationToken, plan: &HostPlan) -> Result<HostState> {
        let name = plan.name.trim();
        validate_host_name(name)?;

        let initiators = clean_list(&plan.initiators);
        if initiators.is_empty() {
            return Err(DriverError::Validation(
                "at least one initiator is required to create a host".to_string(),
            ));
        }
        let joined = initiators.join(",");

        let mut parts: Vec<&str> = vec!["create", "host"];
        let host_group = plan.host_group.as_deref().map(str::trim).unwrap_or("");
        if !host_group.is_empty() {
            parts.push("host-group");
            parts.push(host_group);
        }
        parts.push("initiators");
        parts.push(&joined);
        let profile = plan.profile.as_deref().map(str::trim).unwrap_or("");
        if !profile.is_empty() {
            parts.push("profile");
            parts.push(profile);
        }
        parts.push(name);

        self.api.execute(cancel, &parts).await?;

        let host = wait::wait_for(cancel, &CREATE_WAITS, "host", || {
            lookup::find_host(&self.api, cancel, name)
        })
        .await?;

        info!(host = name, initiators = %joined, "host created");
        Ok(state_from(plan.clone(), &host))
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &HostState,
    ) -> Result<Option<HostState>> {
        let name = state.name.trim();
        if name.is_empty() {
            return Err(DriverError::State("name is required".to_string()));
        }

        let host = lookup::find_host(&self.api, cancel, name).await?;
        Ok(host.map(|host| state_from_state(state.clone(), &host)))
    }

    /// Renames the host and/or changes its profile via `set host`. The
    /// initiator set is immutable here.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        state: &HostState,
        plan: &HostPlan,
    ) -> Result<HostState> {
        let current_name = state.name.trim();
        let new_name = plan.name.trim();
        if current_name.is_empty() {
            return Err(DriverError::State("name is required".to_string()));
        }
        validate_host_name(new_name)?;

        if clean_list(&plan.initiators) != clean_list(&state.initiators) {
            return Err(DriverError::Validation(
                "host initiator changes require replacement or host-member resources".to_string(),
            ));
        }

        let profile = plan.profile.as_deref().map(str::trim).unwrap_or("");
        let mut parts: Vec<&str> = vec!["set", "host"];
        let mut changed = false;
        if current_name != new_name {
            parts.push("name");
            parts.push(new_name);
            changed = true;
        }
        if !profile.is_empty() {
            parts.push("profile");
            parts.push(profile);
            changed = true;
        }
        parts.push(current_name);

        if changed {
            self.api.execute(cancel, &parts).await?;
            info!(host = current_name, new_name, "host updated");
        }

        let host = lookup::find_host(&self.api, cancel, new_name)
            .await?
            .ok_or(DriverError::NotFound { kind: "host" })?;
        Ok(state_from(plan.clone(), &host))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &HostState) -> Result<()> {
        if !state.allow_destroy {
            return Err(DriverError::ConsentRequired { kind: "host" });
        }

        let name = state.name.trim();
        if name.is_empty() {
            return Err(DriverError::State("name is required for deletion".to_string()));
        }

        self.api.execute(cancel, &["delete", "hosts", name]).await?;
        info!(host = name, "host deleted");
        Ok(())
    }

    /// Import by host name.
    pub async fn import(&self, cancel: &CancellationToken, name: &str) -> Result<HostState> {
        let name = name.trim();
        validate_host_name(name)?;

        let host = lookup::find_host(&self.api, cancel, name)
            .await?
            .ok_or(DriverError::NotFound { kind: "host" })?;

        let plan = HostPlan {
            name: host.name.clone(),
            ..HostPlan::default()
        };
        Ok(state_from(plan, &host))
    }
}

pub(crate) fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn state_from(plan: HostPlan, host: &Host) -> HostState {
    let mut state = HostState {
        name: host.name.clone(),
        initiators: clean_list(&plan.initiators),
        host_group: plan.host_group,
        profile: plan.profile,
        allow_destroy: plan.allow_destroy,
        ..HostState::default()
    };
    apply_host(&mut state, host);
    state
}

fn state_from_state(mut state: HostState, host: &Host) -> HostState {
    state.name = host.name.clone();
    apply_host(&mut state, host);
    state
}

fn apply_host(state: &mut HostState, host: &Host) {
    if !host.serial_number.is_empty() {
        state.serial_number = Some(host.serial_number.clone());
        state.id = host.serial_number.clone();
    } else if !host.durable_id.is_empty() {
        state.id = host.durable_id.clone();
    }
    if !host.durable_id.is_empty() {
        state.durable_id = Some(host.durable_id.clone());
    }
    if !host.host_group.is_empty() {
        state.host_group = Some(host.host_group.clone());
    }
    if !host.group_key.is_empty() {
        state.group_key = Some(host.group_key.clone());
    }
    state.member_count = host.member_count;
    state.properties = host.properties.clone();
}

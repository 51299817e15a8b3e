//! Host-group reconciler.
//!
//! Groups are mutable: rename via `set host-group name`, membership via an
//! add/remove diff against the observed members. A group can never be left
//! empty; removals that would drain it are refused so the operator deletes
//! the group explicitly instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use msa_client::HostGroup;

use crate::api::CommandApi;
use crate::error::{DriverError, Result};
use crate::host::clean_list;
use crate::lookup;
use crate::validate::validate_host_group_name;
use crate::wait::{self, CREATE_WAITS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostGroupPlan {
    pub name: String,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostGroupState {
    /// Serial number when assigned, durable id or name otherwise.
    pub id: String,
    pub name: String,
    pub hosts: Vec<String>,
    pub durable_id: Option<String>,
    pub serial_number: Option<String>,
    pub member_count: i64,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

pub struct HostGroupReconciler<C> {
    api: C,
}

impl<C: CommandApi> HostGroupReconciler<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        plan: &HostGroupPlan,
    ) -> Result<HostGroupState> {
        let name = plan.name.trim();
        validate_host_group_name(name)?;

        let hosts = unique_names(&plan.hosts);
        if hosts.is_empty() {
            return Err(DriverError::Validation(
                "at least one host is required to create a host group".to_string(),
            ));
        }

        if lookup::find_host_group(&self.api, cancel, name)
            .await?
            .is_some()
        {
            return Err(DriverError::AlreadyExists { kind: "host group" });
        }

        let joined = hosts.join(",");
        self.api
            .execute(cancel, &["create", "host-group", "hosts", &joined, name])
            .await?;

        let group = wait::wait_for(cancel, &CREATE_WAITS, "host group", || {
            lookup::find_host_group(&self.api, cancel, name)
        })
        .await?;

        info!(host_group = name, hosts = %joined, "host group created");
        Ok(state_from(plan.clone(), &group))
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &HostGroupState,
    ) -> Result<Option<HostGroupState>> {
        let name = state.name.trim();
        if name.is_empty() {
            return Err(DriverError::State("name is required".to_string()));
        }

        let group = lookup::find_host_group(&self.api, cancel, name).await?;
        Ok(group.map(|group| state_from_state(state.clone(), &group)))
    }

    /// Applies rename, then a membership diff: additions first, a re-read
    /// between, and removals last so the group never transits through an
    /// invalid shape.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        state: &HostGroupState,
        plan: &HostGroupPlan,
    ) -> Result<HostGroupState> {
        let mut current_name = state.name.trim().to_string();
        let desired_name = plan.name.trim();
        if current_name.is_empty() {
            return Err(DriverError::State("name is required".to_string()));
        }
        validate_host_group_name(desired_name)?;

        let desired_hosts = unique_names(&plan.hosts);
        if desired_hosts.is_empty() {
            return Err(DriverError::Validation(
                "at least one host must remain in a host group".to_string(),
            ));
        }

        if current_name != desired_name {
            self.api
                .execute(
                    cancel,
                    &["set", "host-group", "name", desired_name, &current_name],
                )
                .await?;
            info!(host_group = %current_name, new_name = desired_name, "host group renamed");
            current_name = desired_name.to_string();
        }

        let mut group = self.must_find(cancel, &current_name).await?;

        let (add, _) = diff_members(&desired_hosts, &member_names(&group));
        if !add.is_empty() {
            let joined = add.join(",");
            self.api
                .execute(
                    cancel,
                    &["add", "host-group-members", "hosts", &joined, &current_name],
                )
                .await?;
            group = self.must_find(cancel, &current_name).await?;
        }

        let (_, remove) = diff_members(&desired_hosts, &member_names(&group));
        if !remove.is_empty() {
            if remove.len() >= group.hosts.len() {
                return Err(DriverError::Validation(
                    "cannot remove all hosts: at least one host must remain in a host group; delete the group instead"
                        .to_string(),
                ));
            }
            let joined = remove.join(",");
            self.api
                .execute(
                    cancel,
                    &["remove", "host-group-members", "hosts", &joined, &current_name],
                )
                .await?;
            group = self.must_find(cancel, &current_name).await?;
        }

        Ok(state_from(plan.clone(), &group))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &HostGroupState) -> Result<()> {
        if !state.allow_destroy {
            return Err(DriverError::ConsentRequired { kind: "host group" });
        }

        let name = state.name.trim();
        if name.is_empty() {
            return Err(DriverError::State("name is required for deletion".to_string()));
        }

        self.api
            .execute(cancel, &["delete", "host-groups", name])
            .await?;
        info!(host_group = name, "host group deleted");
        Ok(())
    }

    /// Import by group name.
    pub async fn import(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<HostGroupState> {
        let name = name.trim();
        validate_host_group_name(name)?;

        let group = lookup::find_host_group(&self.api, cancel, name)
            .await?
            .ok_or(DriverError::NotFound { kind: "host group" })?;

        let plan = HostGroupPlan {
            name: group.name.clone(),
            hosts: member_names(&group),
            allow_destroy: false,
        };
        Ok(state_from(plan, &group))
    }

    async fn must_find(&self, cancel: &CancellationToken, name: &str) -> Result<HostGroup> {
        lookup::find_host_group(&self.api, cancel, name)
            .await?
            .ok_or(DriverError::NotFound { kind: "host group" })
    }
}

fn member_names(group: &HostGroup) -> Vec<String> {
    group
        .hosts
        .iter()
        .map(|host| host.name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-insensitive, trimmed, first-spelling-wins dedup.
fn unique_names(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    clean_list(values)
        .into_iter()
        .filter(|value| seen.insert(value.to_lowercase()))
        .collect()
}

/// Membership diff between desired and observed, both deduplicated.
/// `add` contains desired-only entries, `remove` observed-only entries.
pub(crate) fn diff_members(desired: &[String], actual: &[String]) -> (Vec<String>, Vec<String>) {
    let desired = unique_names(desired);
    let actual = unique_names(actual);

    let desired_keys: std::collections::BTreeSet<String> =
        desired.iter().map(|name| name.to_lowercase()).collect();
    let actual_keys: std::collections::BTreeSet<String> =
        actual.iter().map(|name| name.to_lowercase()).collect();

    let add = desired
        .into_iter()
        .filter(|name| !actual_keys.contains(&name.to_lowercase()))
        .collect();
    let remove = actual
        .into_iter()
        .filter(|name| !desired_keys.contains(&name.to_lowercase()))
        .collect();
    (add, remove)
}

fn state_from(plan: HostGroupPlan, group: &HostGroup) -> HostGroupState {
    let mut state = HostGroupState {
        name: group.name.clone(),
        allow_destroy: plan.allow_destroy,
        ..HostGroupState::default()
    };
    apply_group(&mut state, group);
    state
}

fn state_from_state(mut state: HostGroupState, group: &HostGroup) -> HostGroupState {
    state.name = group.name.clone();
    apply_group(&mut state, group);
    state
}

fn apply_group(state: &mut HostGroupState, group: &HostGroup) {
    if !group.serial_number.is_empty() {
        state.serial_number = Some(group.serial_number.clone());
        state.id = group.serial_number.clone();
    } else if !group.durable_id.is_empty() {
        state.id = group.durable_id.clone();
    } else if !group.name.is_empty() {
        state.id = group.name.clone();
    }
    if !group.durable_id.is_empty() {
        state.durable_id = Some(group.durable_id.clone());
    }
    state.member_count = group.member_count;
    state.hosts = member_names(group);
    state.properties = group.properties.clone();
}

//! Volume-mapping reconciler.
//!
//! The dialect maps hosts and host groups through the same `initiator`
//! parameter as raw initiators, using wildcard suffixes: `Host1.*` for a
//! host, `GroupA.*.*` for a host group. A mapping is immutable; its
//! composite identity is `<volume>:<target-spec>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use msa_client::{mappings_from_response, Mapping};

use crate::api::CommandApi;
use crate::error::{DriverError, Result};
use crate::wait::{self, CREATE_WAITS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingPlan {
    pub volume_name: String,
    /// `host`, `host_group`, or `initiator`.
    pub target_type: String,
    /// Host name, host group name, or initiator ID/nickname.
    pub target_name: String,
    /// `read-write`/`rw`, `read-only`/`ro`, or `no-access`; defaults to
    /// read-write.
    pub access: Option<String>,
    pub lun: Option<String>,
    /// Controller ports, e.g. ["a1", "b1"]. `None` leaves port selection
    /// to the array.
    pub ports: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingState {
    /// Composite identity `<volume>:<target-spec>`.
    pub id: String,
    pub volume_name: String,
    pub target_type: String,
    pub target_name: String,
    pub access: Option<String>,
    pub lun: Option<String>,
    pub ports: Option<Vec<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

pub struct MappingReconciler<C> {
    api: C,
}

impl<C: CommandApi> MappingReconciler<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        plan: &MappingPlan,
    ) -> Result<MappingState> {
        let volume = plan.volume_name.trim();
        if volume.is_empty() {
            return Err(DriverError::Validation(
                "volume_name is required".to_string(),
            ));
        }

        let target_spec = build_target_spec(&plan.target_type, &plan.target_name)?;
        let access = normalize_access(plan.access.as_deref())?;
        let ports = clean_ports(plan.ports.as_deref());
        let lun = plan.lun.as_deref().map(str::trim).unwrap_or("");

        if access != "no-access" && lun.is_empty() {
            return Err(DriverError::Validation(
                "lun is required for explicit mappings".to_string(),
            ));
        }
        if !ports.is_empty() && lun.is_empty() {
            return Err(DriverError::Validation(
                "lun is required when ports are specified".to_string(),
            ));
        }

        let ports_joined = ports.join(",");
        let mut parts: Vec<&str> = vec!["map", "volume"];
        if !access.is_empty() {
            parts.push("access");
            parts.push(&access);
        }
        if !ports_joined.is_empty() {
            parts.push("ports");
            parts.push(&ports_joined);
        }
        if !lun.is_empty() {
            parts.push("lun");
            parts.push(lun);
        }
        parts.push("initiator");
        parts.push(&target_spec);
        parts.push(volume);

        self.api.execute(cancel, &parts).await?;

        let mapping = wait::wait_for(cancel, &CREATE_WAITS, "mapping", || {
            self.find_mapping(cancel, volume, &target_spec)
        })
        .await?;

        info!(volume, target = %target_spec, access = %access, "volume mapped");
        let mut state = state_from(plan.clone(), &mapping);
        state.id = mapping_id(volume, &target_spec);
        Ok(state)
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &MappingState,
    ) -> Result<Option<MappingState>> {
        let volume = state.volume_name.trim();
        if volume.is_empty() {
            return Err(DriverError::State("volume_name is required".to_string()));
        }
        let target_spec = build_target_spec(&state.target_type, &state.target_name)?;

        let Some(mapping) = self.find_mapping(cancel, volume, &target_spec).await? else {
            return Ok(None);
        };

        let plan = MappingPlan {
            volume_name: state.volume_name.clone(),
            target_type: state.target_type.clone(),
            target_name: state.target_name.clone(),
            access: state.access.clone(),
            lun: state.lun.clone(),
            ports: state.ports.clone(),
        };
        let mut new_state = state_from(plan, &mapping);
        new_state.id = mapping_id(volume, &target_spec);
        Ok(Some(new_state))
    }

    /// Mappings have no mutable attributes.
    pub fn update(&self) -> Result<()> {
        Err(DriverError::Validation(
            "mapping updates require replacement: volume, target, access, lun, and ports are immutable"
                .to_string(),
        ))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &MappingState) -> Result<()> {
        let volume = state.volume_name.trim();
        if volume.is_empty() {
            return Err(DriverError::State("volume_name is required".to_string()));
        }
        let target_spec = build_target_spec(&state.target_type, &state.target_name)?;

        self.api
            .execute(cancel, &["unmap", "volume", "initiator", &target_spec, volume])
            .await?;
        info!(volume, target = %target_spec, "volume unmapped");
        Ok(())
    }

    /// Import by composite `volume:target_type:target_name` key.
    pub async fn import(&self, cancel: &CancellationToken, id: &str) -> Result<MappingState> {
        let segments: Vec<&str> = id.splitn(3, ':').collect();
        let (volume, target_type, target_name) = match segments.as_slice() {
            [volume, target_type, target_name] => (*volume, *target_type, *target_name),
            _ => {
                return Err(DriverError::Validation(
                    "import id must be volume_name:target_type:target_name".to_string(),
                ))
            }
        };

        let state = MappingState {
            volume_name: volume.trim().to_string(),
            target_type: target_type.trim().to_string(),
            target_name: target_name.trim().to_string(),
            ..MappingState::default()
        };

        match self.read(cancel, &state).await? {
            Some(state) => Ok(state),
            None => Err(DriverError::NotFound { kind: "mapping" }),
        }
    }

    /// Filtered view of `show maps initiator <spec>`, restricted to rows
    /// for the named volume.
    async fn find_mapping(
        &self,
        cancel: &CancellationToken,
        volume: &str,
        target_spec: &str,
    ) -> Result<Option<Mapping>> {
        let response = self
            .api
            .execute(cancel, &["show", "maps", "initiator", target_spec])
            .await?;

        Ok(mappings_from_response(&response)
            .into_iter()
            .find(|mapping| mapping.volume.eq_ignore_ascii_case(volume)))
    }
}

/// Synthesizes the wildcard target spec for `map volume`:
/// host → `name.*`, host group → `name.*.*`, initiator → the id as-is.
pub fn build_target_spec(target_type: &str, target_name: &str) -> Result<String> {
    let name = target_name.trim();
    if name.is_empty() {
        return Err(DriverError::Validation(
            "target_name is required".to_string(),
        ));
    }

    match target_type.trim() {
        "host" => Ok(format!("{name}.*")),
        "host_group" => Ok(format!("{name}.*.*")),
        "initiator" => Ok(name.to_string()),
        other => Err(DriverError::Validation(format!(
            "target_type must be host, host_group, or initiator (got {other:?})"
        ))),
    }
}

/// Canonical access spelling; unset defaults to read-write.
pub fn normalize_access(value: Option<&str>) -> Result<String> {
    let raw = value.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Ok("read-write".to_string());
    }

    match raw.to_lowercase().as_str() {
        "rw" | "read-write" => Ok("read-write".to_string()),
        "ro" | "read-only" => Ok("read-only".to_string()),
        "no-access" => Ok("no-access".to_string()),
        other => Err(DriverError::Validation(format!(
            "access must be read-write, read-only, no-access, rw, or ro (got {other:?})"
        ))),
    }
}

fn canonical_access(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "rw" | "read-write" => "read-write".to_string(),
        "ro" | "read-only" => "read-only".to_string(),
        "no-access" => "no-access".to_string(),
        other => other.to_string(),
    }
}

fn clean_ports(ports: Option<&[String]>) -> Vec<String> {
    ports
        .unwrap_or_default()
        .iter()
        .map(|port| port.trim())
        .filter(|port| !port.is_empty())
        .map(str::to_string)
        .collect()
}

fn mapping_id(volume: &str, target_spec: &str) -> String {
    format!("{volume}:{target_spec}")
}

fn state_from(plan: MappingPlan, mapping: &Mapping) -> MappingState {
    let mut state = MappingState {
        volume_name: mapping.volume.clone(),
        target_type: plan.target_type,
        target_name: plan.target_name,
        ..MappingState::default()
    };

    state.access = if !mapping.access.is_empty() {
        Some(canonical_access(&mapping.access))
    } else {
        plan.access
            .as_deref()
            .map(str::trim)
            .filter(|access| !access.is_empty())
            .map(str::to_string)
    };

    state.lun = if !mapping.lun.is_empty() {
        Some(mapping.lun.clone())
    } else {
        plan.lun
            .as_deref()
            .map(str::trim)
            .filter(|lun| !lun.is_empty())
            .map(str::to_string)
    };

    // A plan that never configured ports stays unconfigured even when the
    // array reports them; a configured plan reflects the array's list.
    state.ports = match plan.ports {
        None => None,
        Some(_) => {
            let reported: Vec<String> = mapping
                .ports
                .split(',')
                .map(str::trim)
                .filter(|port| !port.is_empty())
                .map(str::to_string)
                .collect();
            if reported.is_empty() {
                None
            } else {
                Some(reported)
            }
        }
    };

    state.properties = mapping.properties.clone();
    state
}

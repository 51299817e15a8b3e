//! Volume reconciler.
//!
//! Volumes are immutable once created: size, pool, and name changes all
//! require destroy+recreate, which the upstream plan layer signals as
//! replace-required. The create path is idempotence-aware because several
//! firmware revisions answer a successful create with a non-zero status
//! ("volume was created", "name already in use"); the reconciler always
//! re-reads and compares before trusting such a response.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use msa_client::Volume;

use crate::api::CommandApi;
use crate::destroy_lock::{DestroyLock, DestroyLockOptions};
use crate::error::{DriverError, Result};
use crate::guard::pre_delete_usage_guardrail;
use crate::lookup;
use crate::size::volume_size_matches;
use crate::wait::{self, CREATE_WAITS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumePlan {
    pub name: String,
    /// Requested size, e.g. "100GB" or "4GiB".
    pub size: String,
    pub pool: Option<String>,
    pub vdisk: Option<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeState {
    /// Canonical identifier: the array-assigned serial number.
    pub id: String,
    pub name: String,
    pub size: String,
    pub pool: Option<String>,
    pub vdisk: Option<String>,
    pub durable_id: Option<String>,
    pub serial_number: Option<String>,
    pub wwid: Option<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

pub struct VolumeReconciler<C> {
    api: C,
    default_pool: Option<String>,
    lock_options: Option<DestroyLockOptions>,
}

impl<C: CommandApi> VolumeReconciler<C> {
    pub fn new(api: C) -> Self {
        Self {
            api,
            default_pool: None,
            lock_options: None,
        }
    }

    /// Placement fallback for plans that name neither pool nor vdisk.
    pub fn with_default_pool(mut self, pool: Option<String>) -> Self {
        self.default_pool = pool.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_lock_options(mut self, options: DestroyLockOptions) -> Self {
        self.lock_options = Some(options);
        self
    }

    pub async fn create(
        &self,
        cancel: &CancellationToken,
        plan: &VolumePlan,
    ) -> Result<VolumeState> {
        let name = plan.name.trim();
        let size = plan.size.trim();
        if name.is_empty() || size.is_empty() {
            return Err(DriverError::Validation(
                "name and size are required".to_string(),
            ));
        }

        let target = self.resolve_target(cancel, plan).await?;

        if lookup::find_volume(&self.api, cancel, name, "")
            .await?
            .is_some()
        {
            return Err(DriverError::AlreadyExists { kind: "volume" });
        }

        // Initial access is no-access so an unmapped volume is never
        // inadvertently exposed; mappings grant access explicitly.
        let mut should_validate = false;
        let create = self
            .api
            .execute(
                cancel,
                &[
                    "create", "volume", name, "pool", &target, "size", size, "access",
                    "no-access",
                ],
            )
            .await;
        if let Err(err) = create {
            match err.api() {
                Some(api_err) if is_nonfatal_create_response(api_err.message()) => {
                    debug!(volume = name, response = api_err.message(), "create returned non-fatal status, revalidating");
                    should_validate = true;
                }
                _ => return Err(err.into()),
            }
        }

        let volume = wait::wait_for(cancel, &CREATE_WAITS, "volume", || {
            lookup::find_volume(&self.api, cancel, name, "")
        })
        .await?;

        if should_validate {
            if !volume_matches_target(&volume, &target) {
                return Err(DriverError::Collision {
                    kind: "volume",
                    detail: format!(
                        "volume {name:?} exists but does not match pool/vdisk {target:?}"
                    ),
                });
            }
            if !volume_size_matches(size, &volume)? {
                return Err(DriverError::Collision {
                    kind: "volume",
                    detail: format!(
                        "volume {name:?} exists but does not match requested size {size:?}"
                    ),
                });
            }
        }

        info!(volume = name, pool = %target, "volume created");
        Ok(state_from(plan.clone(), &volume))
    }

    /// Projects the array's record back into state. `None` means the volume
    /// is gone and the resource should be dropped from state.
    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &VolumeState,
    ) -> Result<Option<VolumeState>> {
        let volume =
            lookup::find_volume(&self.api, cancel, &state.name, state.id.trim()).await?;
        Ok(volume.map(|volume| state_from_state(state.clone(), &volume)))
    }

    /// Volumes have no mutable attributes.
    pub fn update(&self) -> Result<()> {
        Err(DriverError::Validation(
            "volume updates require replacement: name, size, and placement are immutable"
                .to_string(),
        ))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &VolumeState) -> Result<()> {
        delete_volume_like(
            &self.api,
            cancel,
            self.lock_options.as_ref(),
            "volume",
            state.allow_destroy,
            &state.name,
            state.id.trim(),
        )
        .await
    }

    /// Seeds state from an existing array volume, by serial number.
    /// Destruction consent is never inferred on import.
    pub async fn import(&self, cancel: &CancellationToken, serial: &str) -> Result<VolumeState> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(DriverError::Validation(
                "import requires a serial number".to_string(),
            ));
        }

        let volume = lookup::find_volume(&self.api, cancel, "", serial)
            .await?
            .ok_or(DriverError::NotFound { kind: "volume" })?;

        let plan = VolumePlan {
            name: volume.name.clone(),
            size: volume.size.clone(),
            ..VolumePlan::default()
        };
        Ok(state_from(plan, &volume))
    }

    async fn resolve_target(
        &self,
        cancel: &CancellationToken,
        plan: &VolumePlan,
    ) -> Result<String> {
        let pool = plan.pool.as_deref().map(str::trim).unwrap_or("");
        let vdisk = plan.vdisk.as_deref().map(str::trim).unwrap_or("");

        match (pool.is_empty(), vdisk.is_empty()) {
            (false, false) => Err(DriverError::Validation(
                "pool and vdisk are aliases; set exactly one".to_string(),
            )),
            (false, true) => Ok(pool.to_string()),
            (true, false) => Ok(vdisk.to_string()),
            (true, true) => match &self.default_pool {
                Some(default) => Ok(default.clone()),
                None => lookup::default_pool(&self.api, cancel).await,
            },
        }
    }
}

/// Shared delete path for volumes and clones: consent gate, cross-process
/// destroy lock, advisory usage probes, then the delete command.
pub(crate) async fn delete_volume_like<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    lock_options: Option<&DestroyLockOptions>,
    kind: &'static str,
    allow_destroy: bool,
    name: &str,
    serial: &str,
) -> Result<()> {
    if !allow_destroy {
        return Err(DriverError::ConsentRequired { kind });
    }

    let target = if serial.is_empty() { name.trim() } else { serial };
    if target.is_empty() {
        return Err(DriverError::State(format!(
            "{kind} id or name is required for deletion"
        )));
    }

    let options = match lock_options {
        Some(options) => options.clone(),
        None => DestroyLockOptions::from_env()?,
    };
    let owner = format!("{kind}/{target}");
    let lock = DestroyLock::acquire(cancel, &owner, &options).await?;

    if let Some(guardrail) =
        pre_delete_usage_guardrail(api, cancel, kind, &[name, serial]).await
    {
        drop(lock);
        return Err(DriverError::Guardrail(guardrail));
    }

    // The probes are advisory; past this point the array adjudicates, and
    // its rejection surfaces verbatim.
    let result = api.execute(cancel, &["delete", "volumes", target]).await;
    drop(lock);

    match result {
        Ok(_) => {
            info!(resource = kind, target, "deleted");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn is_nonfatal_create_response(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("volume was created")
        || message.contains("name is already in use")
        || message.contains("name already in use")
}

fn volume_matches_target(volume: &Volume, target: &str) -> bool {
    let target = target.trim();
    target.is_empty()
        || volume.pool_name.eq_ignore_ascii_case(target)
        || volume.vdisk_name.eq_ignore_ascii_case(target)
}

fn state_from(plan: VolumePlan, volume: &Volume) -> VolumeState {
    let mut state = VolumeState {
        name: volume.name.clone(),
        size: plan.size,
        pool: plan.pool,
        vdisk: plan.vdisk,
        allow_destroy: plan.allow_destroy,
        ..VolumeState::default()
    };
    apply_volume(&mut state, volume);
    state
}

fn state_from_state(mut state: VolumeState, volume: &Volume) -> VolumeState {
    state.name = volume.name.clone();
    apply_volume(&mut state, volume);
    state
}

fn apply_volume(state: &mut VolumeState, volume: &Volume) {
    if !volume.pool_name.is_empty() {
        state.pool = Some(volume.pool_name.clone());
    }
    if !volume.vdisk_name.is_empty() {
        state.vdisk = Some(volume.vdisk_name.clone());
    }
    if !volume.durable_id.is_empty() {
        state.durable_id = Some(volume.durable_id.clone());
    }
    if !volume.serial_number.is_empty() {
        state.serial_number = Some(volume.serial_number.clone());
        state.id = volume.serial_number.clone();
        state.wwid = Some(volume.serial_number.clone());
    }
}

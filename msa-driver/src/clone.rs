//! Clone reconciler and volume-copy conflict coordinator.
//!
//! A clone is produced by `copy volume` from a source snapshot; the result
//! is an ordinary volume. The array serializes copy jobs globally, so a
//! second copy while one runs fails with "existing volume copy in
//! progress". The coordinator discovers the running job, then waits on one
//! of two schedules: the job's advertised ETA plus a safety buffer (up to
//! three times), or a fixed ladder when no ETA is available. The ETA
//! strategy hands over to the ladder at most once, and the accumulated
//! conflict context travels with whatever error finally surfaces.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use msa_client::{
    select_best_active_job, volume_copy_jobs_from_response, ApiError, ClientError, Volume,
    VolumeCopyJob,
};

use crate::api::CommandApi;
use crate::destroy_lock::DestroyLockOptions;
use crate::error::{DriverError, Result};
use crate::lookup;
use crate::volume::delete_volume_like;
use crate::wait::{self, CLONE_WAITS};

const ETA_MAX_RETRIES: u32 = 3;
const ETA_SAFETY_BUFFER: Duration = Duration::from_secs(5);

const NO_ETA_WAITS: [Duration; 5] = [
    Duration::from_secs(15),
    Duration::from_secs(30),
    Duration::from_secs(45),
    Duration::from_secs(180),
    Duration::from_secs(300),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClonePlan {
    /// Destination volume name.
    pub name: String,
    /// Source snapshot name or serial number.
    pub source_snapshot: String,
    pub destination_pool: Option<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneState {
    /// Canonical identifier: the array-assigned serial number.
    pub id: String,
    pub name: String,
    pub source_snapshot: String,
    pub destination_pool: Option<String>,
    pub pool: Option<String>,
    pub vdisk: Option<String>,
    pub durable_id: Option<String>,
    pub serial_number: Option<String>,
    pub wwid: Option<String>,
    /// Host-visible SCSI WWN, when the array reports one.
    pub scsi_wwn: Option<String>,
    #[serde(default)]
    pub allow_destroy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryStrategy {
    Eta,
    NoEta,
}

/// Explicit retry-planner state: the chosen strategy plus two independent
/// budgets. The no-ETA counter keeps its position if the ETA budget runs
/// out after the ladder was already entered.
#[derive(Debug, Default)]
struct ConflictRetryPlanner {
    strategy: Option<RetryStrategy>,
    eta_retries: u32,
    no_eta_retries: usize,
    last_eta: Option<Duration>,
}

impl ConflictRetryPlanner {
    /// Plans the next wait, or `None` when every budget is spent.
    fn next(&mut self, job: Option<&VolumeCopyJob>) -> Option<(Duration, &'static str)> {
        if self.strategy.is_none() {
            self.strategy = Some(if job.is_some_and(|job| job.eta.is_some()) {
                RetryStrategy::Eta
            } else {
                RetryStrategy::NoEta
            });
        }

        if let Some(eta) = job.and_then(|job| job.eta) {
            self.last_eta = Some(eta);
        }

        if self.strategy == Some(RetryStrategy::Eta) {
            if self.eta_retries < ETA_MAX_RETRIES {
                self.eta_retries += 1;
                let wait = ETA_SAFETY_BUFFER + self.last_eta.unwrap_or(Duration::ZERO);
                return Some((wait, "eta"));
            }
            // ETA budget spent: hand over to the fixed ladder.
            self.strategy = Some(RetryStrategy::NoEta);
        }

        if self.no_eta_retries >= NO_ETA_WAITS.len() {
            return None;
        }
        let wait = NO_ETA_WAITS[self.no_eta_retries];
        self.no_eta_retries += 1;
        Some((wait, "no-eta"))
    }
}

/// Last-seen details of the conflicting job, rendered into every surfaced
/// error so the operator can see what held the copy slot.
#[derive(Debug, Clone, Default)]
struct ConflictContext {
    job_id: String,
    source: String,
    target: String,
    eta: String,
}

impl ConflictContext {
    fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.trim().to_string(),
            target: target.trim().to_string(),
            ..Self::default()
        }
    }

    fn update(&mut self, job: Option<&VolumeCopyJob>) {
        let Some(job) = job else { return };

        if !job.id.trim().is_empty() {
            self.job_id = job.id.trim().to_string();
        }
        if !job.source.trim().is_empty() {
            self.source = job.source.trim().to_string();
        }
        if !job.target.trim().is_empty() {
            self.target = job.target.trim().to_string();
        }
        if let Some(eta) = job.eta {
            self.eta = format!("{}s", eta.as_secs());
        } else if self.eta.is_empty() && !job.eta_raw.trim().is_empty() {
            self.eta = job.eta_raw.trim().to_string();
        }
    }
}

impl fmt::Display for ConflictContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |value: &str| {
            if value.is_empty() {
                "unknown".to_string()
            } else {
                value.to_string()
            }
        };
        write!(
            f,
            "job id={} source={} target={} eta={}",
            field(&self.job_id),
            field(&self.source),
            field(&self.target),
            field(&self.eta),
        )
    }
}

/// Looks up the active copy job best matching the hints, trying
/// `show volume-copy` and then `show volume-copies`. Command failures only
/// surface if every form fails.
pub(crate) async fn find_active_copy_job<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    source_hint: &str,
    target_hint: &str,
) -> std::result::Result<Option<VolumeCopyJob>, ClientError> {
    let commands: [&[&str]; 2] = [&["show", "volume-copy"], &["show", "volume-copies"]];

    let mut last_err = None;
    let mut any_succeeded = false;
    for parts in commands {
        match api.execute(cancel, parts).await {
            Ok(response) => {
                any_succeeded = true;
                let jobs = volume_copy_jobs_from_response(&response);
                if let Some(job) = select_best_active_job(&jobs, source_hint, target_hint) {
                    return Ok(Some(job.clone()));
                }
            }
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) => last_err = Some(err),
        }
    }

    if any_succeeded {
        return Ok(None);
    }
    match last_err {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

pub struct CloneReconciler<C> {
    api: C,
    lock_options: Option<DestroyLockOptions>,
}

impl<C: CommandApi> CloneReconciler<C> {
    pub fn new(api: C) -> Self {
        Self {
            api,
            lock_options: None,
        }
    }

    pub fn with_lock_options(mut self, options: DestroyLockOptions) -> Self {
        self.lock_options = Some(options);
        self
    }

    pub async fn create(&self, cancel: &CancellationToken, plan: &ClonePlan) -> Result<CloneState> {
        let name = plan.name.trim();
        if name.is_empty() {
            return Err(DriverError::Validation("name is required".to_string()));
        }
        let source = plan.source_snapshot.trim();
        if source.is_empty() {
            return Err(DriverError::Validation(
                "source_snapshot must be set to create a clone".to_string(),
            ));
        }

        let mut parts: Vec<&str> = vec!["copy", "volume"];
        let destination_pool = plan.destination_pool.as_deref().map(str::trim).unwrap_or("");
        if !destination_pool.is_empty() {
            parts.push("destination-pool");
            parts.push(destination_pool);
        }
        parts.push("name");
        parts.push(name);
        parts.push(source);

        self.execute_copy(cancel, source, name, &parts).await?;

        let volume = wait::wait_for(cancel, &CLONE_WAITS, "clone", || {
            lookup::find_volume(&self.api, cancel, name, "")
        })
        .await?;

        info!(clone = name, source = source, "clone created");
        Ok(state_from(plan.clone(), &volume))
    }

    pub async fn read(
        &self,
        cancel: &CancellationToken,
        state: &CloneState,
    ) -> Result<Option<CloneState>> {
        let name = state.name.trim();
        let id = state.id.trim();
        if name.is_empty() && id.is_empty() {
            return Err(DriverError::State("name or id is required".to_string()));
        }

        let volume = lookup::find_volume(&self.api, cancel, name, id).await?;
        Ok(volume.map(|volume| state_from_state(state.clone(), &volume)))
    }

    /// Clones have no mutable attributes.
    pub fn update(&self) -> Result<()> {
        Err(DriverError::Validation(
            "clone updates require replacement: name, source snapshot, and destination pool are immutable"
                .to_string(),
        ))
    }

    pub async fn delete(&self, cancel: &CancellationToken, state: &CloneState) -> Result<()> {
        delete_volume_like(
            &self.api,
            cancel,
            self.lock_options.as_ref(),
            "clone",
            state.allow_destroy,
            &state.name,
            state.id.trim(),
        )
        .await
    }

    pub async fn import(&self, cancel: &CancellationToken, serial: &str) -> Result<CloneState> {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(DriverError::Validation(
                "import requires a serial number".to_string(),
            ));
        }

        let volume = lookup::find_volume(&self.api, cancel, "", serial)
            .await?
            .ok_or(DriverError::NotFound { kind: "clone" })?;

        let plan = ClonePlan {
            name: volume.name.clone(),
            ..ClonePlan::default()
        };
        Ok(state_from(plan, &volume))
    }

    async fn execute_copy(
        &self,
        cancel: &CancellationToken,
        source: &str,
        target: &str,
        parts: &[&str],
    ) -> Result<()> {
        let err = match self.api.execute(cancel, parts).await {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        let Some(api_err) = err.api() else {
            return Err(err.into());
        };
        if is_already_exists_error(api_err) {
            return Err(DriverError::AlreadyExists { kind: "clone" });
        }
        if !is_copy_conflict_error(api_err) {
            return Err(err.into());
        }

        let initial = api_err.clone();
        self.retry_copy_conflict(cancel, source, target, parts, initial)
            .await
    }

    async fn retry_copy_conflict(
        &self,
        cancel: &CancellationToken,
        source: &str,
        target: &str,
        parts: &[&str],
        initial_err: ApiError,
    ) -> Result<()> {
        let mut planner = ConflictRetryPlanner::default();
        let mut context = ConflictContext::new(source, target);
        let mut last_err = initial_err;
        let mut attempts: u32 = 1;

        loop {
            let job = match find_active_copy_job(&self.api, cancel, source, target).await {
                Ok(job) => job,
                Err(err) if err.is_interrupted() => {
                    return Err(DriverError::CopyInterrupted {
                        attempts,
                        context: context.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        attempt = attempts,
                        error = %err,
                        "unable to query active volume-copy job during clone retry"
                    );
                    None
                }
            };
            context.update(job.as_ref());

            let Some((wait, retry_path)) = planner.next(job.as_ref()) else {
                return Err(DriverError::CopyConflict {
                    attempts,
                    context: context.to_string(),
                    source: last_err,
                });
            };

            info!(
                attempt = attempts,
                retry_path,
                wait_seconds = wait.as_secs(),
                context = %context,
                "clone copy blocked by active volume-copy; waiting before retry"
            );

            if wait::sleep(cancel, wait).await.is_err() {
                return Err(DriverError::CopyInterrupted {
                    attempts,
                    context: context.to_string(),
                });
            }

            attempts += 1;
            let err = match self.api.execute(cancel, parts).await {
                Ok(_) => return Ok(()),
                Err(err) => err,
            };
            let Some(api_err) = err.api() else {
                return Err(err.into());
            };
            if is_already_exists_error(api_err) {
                return Err(DriverError::AlreadyExists { kind: "clone" });
            }
            if !is_copy_conflict_error(api_err) {
                return Err(err.into());
            }
            last_err = api_err.clone();
        }
    }
}

fn is_already_exists_error(err: &ApiError) -> bool {
    let message = err.message().to_lowercase();
    message.contains("name already in use") || message.contains("already exists")
}

fn is_copy_conflict_error(err: &ApiError) -> bool {
    err.message()
        .to_lowercase()
        .contains("existing volume copy in progress")
}

fn state_from(plan: ClonePlan, volume: &Volume) -> CloneState {
    let mut state = CloneState {
        name: volume.name.clone(),
        source_snapshot: plan.source_snapshot,
        destination_pool: plan.destination_pool,
        allow_destroy: plan.allow_destroy,
        ..CloneState::default()
    };
    apply_volume(&mut state, volume);
    state
}

fn state_from_state(mut state: CloneState, volume: &Volume) -> CloneState {
    state.name = volume.name.clone();
    apply_volume(&mut state, volume);
    state
}

fn apply_volume(state: &mut CloneState, volume: &Volume) {
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
    state.scsi_wwn = if volume.wwn.is_empty() {
        None
    } else {
        Some(volume.wwn.clone())
    };
}

//! Reconciliation engine for HPE MSA 2050-class arrays.
//!
//! Sits between a declarative state manager and the array's XML command
//! API: each reconciler compares a planned desired state with the prior
//! stored state and issues the minimal command sequence to converge,
//! re-reading after every mutation because the dialect's response codes
//! alone are not a reliable success signal.
//!
//! The engine is organized as:
//!
//! - one reconciler per managed entity (volume, snapshot, clone,
//!   initiator, host, host group, host membership, volume mapping)
//! - a copy-conflict coordinator that retries `copy volume` around the
//!   array's single global copy slot
//! - pre-delete usage guardrails that classify what blocks a deletion
//! - a cross-process destroy lock serializing destructive operations

pub mod api;
pub mod clone;
pub mod config;
pub mod destroy_lock;
pub mod error;
pub mod guard;
pub mod host;
pub mod host_group;
pub mod host_member;
pub mod initiator;
pub mod lookup;
pub mod mapping;
pub mod size;
pub mod snapshot;
pub mod validate;
pub mod volume;

mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use api::CommandApi;
pub use config::{ProviderConfig, ResolvedConfig};
pub use destroy_lock::{DestroyLock, DestroyLockOptions};
pub use error::{DriverError, Result};
pub use guard::Guardrail;

pub use clone::{ClonePlan, CloneReconciler, CloneState};
pub use host::{HostPlan, HostReconciler, HostState};
pub use host_group::{HostGroupPlan, HostGroupReconciler, HostGroupState};
pub use host_member::{HostMemberPlan, HostMemberReconciler, HostMemberState};
pub use initiator::{InitiatorPlan, InitiatorReconciler, InitiatorState};
pub use mapping::{MappingPlan, MappingReconciler, MappingState};
pub use snapshot::{SnapshotPlan, SnapshotReconciler, SnapshotState};
pub use volume::{VolumePlan, VolumeReconciler, VolumeState};

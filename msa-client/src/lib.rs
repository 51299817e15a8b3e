//! XML command client for HPE MSA 2050-class dual-controller arrays.
//!
//! The array exposes a command-style API over HTTPS: CLI-like token
//! sequences are encoded as URL path segments under `/api/`, and every
//! response is an XML `RESPONSE/OBJECT/PROPERTY` tree. This crate provides:
//!
//! - the authenticated HTTP channel with retry/backoff and session caching
//! - the XML decoder for the fixed response shape
//! - per-entity projections (volumes, snapshots, hosts, host groups,
//!   initiators, mappings, volume-copy jobs) from the generic property tree

pub mod client;
pub mod command;
pub mod error;
pub mod host;
pub mod host_group;
pub mod initiator;
pub mod mapping;
pub mod pool;
pub mod retry;
pub mod snapshot;
pub mod volume;
pub mod volume_copy;
pub mod xml;

mod metrics;

pub use client::{Client, Config};
pub use error::{ApiError, ClientError, Result};
pub use retry::RetryConfig;
pub use xml::{Object, Property, Response, Status};

pub use host::{hosts_from_response, Host};
pub use host_group::{host_groups_from_response, HostGroup};
pub use initiator::{initiators_from_response, Initiator};
pub use mapping::{mappings_from_response, Mapping};
pub use pool::{pool_names_from_response, pools_from_response, Pool};
pub use snapshot::{snapshots_from_response, Snapshot};
pub use volume::{volumes_from_response, Volume};
pub use volume_copy::{
    parse_copy_eta, select_best_active_job, volume_copy_jobs_from_response, VolumeCopyJob,
};

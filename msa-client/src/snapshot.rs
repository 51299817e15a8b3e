//! Snapshot projection from the generic property tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::xml::{first_non_empty, first_prop, prop, Object, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub serial_number: String,
    pub durable_id: String,
    pub base_volume_name: String,
    pub pool_name: String,
    pub vdisk_name: String,
    pub size: String,
    pub size_numeric: String,
    pub properties: BTreeMap<String, String>,
}

pub fn snapshots_from_response(response: &Response) -> Vec<Snapshot> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| is_snapshot_object(obj))
        .map(snapshot_from_object)
        .collect()
}

fn is_snapshot_object(obj: &Object) -> bool {
    obj.basetype == "snapshots"
        || obj.property_value("base-volume").is_some()
        || obj.property_value("master-volume-name").is_some()
        || obj.property_value("volume-parent").is_some()
}

fn snapshot_from_object(obj: &Object) -> Snapshot {
    let props = obj.property_map();

    Snapshot {
        name: first_non_empty(&[prop(&props, "name"), &obj.name]).to_string(),
        serial_number: prop(&props, "serial-number").to_string(),
        durable_id: prop(&props, "durable-id").to_string(),
        base_volume_name: first_prop(
            &props,
            &["base-volume", "master-volume-name", "volume-parent"],
        )
        .to_string(),
        pool_name: first_prop(
            &props,
            &["storage-pool-name", "storage-poolname", "pool-name"],
        )
        .to_string(),
        vdisk_name: first_prop(
            &props,
            &["virtual-disk-name", "virtual-diskname", "vdisk-name"],
        )
        .to_string(),
        size: first_prop(&props, &["total-size", "size"]).to_string(),
        size_numeric: first_prop(&props, &["total-size-numeric", "size-numeric"]).to_string(),
        properties: props,
    }
}

//! Volume projection from the generic property tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::xml::{first_non_empty, first_prop, prop, Object, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub serial_number: String,
    pub durable_id: String,
    pub pool_name: String,
    pub vdisk_name: String,
    /// Human-readable size as reported, e.g. "99.9GB".
    pub size: String,
    /// Size in 512-byte blocks, as a raw string.
    pub size_numeric: String,
    /// Host-visible SCSI WWN/NAA identifier, when reported.
    pub wwn: String,
    pub properties: BTreeMap<String, String>,
}

pub fn volumes_from_response(response: &Response) -> Vec<Volume> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| is_volume_object(obj))
        .map(volume_from_object)
        .collect()
}

fn is_volume_object(obj: &Object) -> bool {
    obj.basetype == "volumes" || obj.property_value("volume-name").is_some()
}

fn volume_from_object(obj: &Object) -> Volume {
    let props = obj.property_map();

    Volume {
        name: first_non_empty(&[prop(&props, "volume-name"), prop(&props, "name"), &obj.name])
            .to_string(),
        serial_number: prop(&props, "serial-number").to_string(),
        durable_id: prop(&props, "durable-id").to_string(),
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
        size: prop(&props, "size").to_string(),
        size_numeric: prop(&props, "size-numeric").to_string(),
        wwn: first_prop(&props, &["wwn", "world-wide-name"]).to_string(),
        properties: props,
    }
}

//! Host projection. Hosts are returned nested under host-group objects by
//! `show host-groups`; the flattening in [`Response::objects_without_status`]
//! surfaces them regardless of nesting depth.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::xml::{first_non_empty, prop, Object, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub durable_id: String,
    pub serial_number: String,
    pub host_group: String,
    pub group_key: String,
    pub member_count: i64,
    pub properties: BTreeMap<String, String>,
}

pub fn hosts_from_response(response: &Response) -> Vec<Host> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| is_host_object(obj))
        .map(host_from_object)
        .collect()
}

pub(crate) fn is_host_object(obj: &Object) -> bool {
    obj.basetype == "host"
}

pub(crate) fn host_from_object(obj: &Object) -> Host {
    let props = obj.property_map();
    let member_count = prop(&props, "member-count").parse().unwrap_or(0);

    Host {
        name: first_non_empty(&[prop(&props, "name"), &obj.name]).to_string(),
        durable_id: prop(&props, "durable-id").to_string(),
        serial_number: prop(&props, "serial-number").to_string(),
        host_group: prop(&props, "host-group").to_string(),
        group_key: prop(&props, "group-key").to_string(),
        member_count,
        properties: props,
    }
}

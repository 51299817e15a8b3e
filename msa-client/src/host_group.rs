//! Host-group projection, including the nested host members.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::host::{host_from_object, is_host_object, Host};
use crate::xml::{first_non_empty, prop, Object, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostGroup {
    pub name: String,
    pub durable_id: String,
    pub serial_number: String,
    pub member_count: i64,
    pub hosts: Vec<Host>,
    pub properties: BTreeMap<String, String>,
}

pub fn host_groups_from_response(response: &Response) -> Vec<HostGroup> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| obj.basetype == "host-group")
        .map(host_group_from_object)
        .collect()
}

fn host_group_from_object(obj: &Object) -> HostGroup {
    let props = obj.property_map();
    let member_count = prop(&props, "member-count").parse().unwrap_or(0);

    let mut hosts = Vec::new();
    collect_hosts(obj, &mut hosts);

    HostGroup {
        name: first_non_empty(&[prop(&props, "name"), &obj.name]).to_string(),
        durable_id: prop(&props, "durable-id").to_string(),
        serial_number: prop(&props, "serial-number").to_string(),
        member_count,
        hosts,
        properties: props,
    }
}

fn collect_hosts(obj: &Object, out: &mut Vec<Host>) {
    for child in &obj.objects {
        if is_host_object(child) {
            out.push(host_from_object(child));
        }
        collect_hosts(child, out);
    }
}

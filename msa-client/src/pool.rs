//! Pool projection. Pools and vdisks are interchangeable placement targets
//! in this dialect; the adapter accepts either shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::xml::{first_non_empty, prop, Object, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub serial_number: String,
    pub total_size: String,
    pub available_size: String,
    pub properties: BTreeMap<String, String>,
}

pub fn pools_from_response(response: &Response) -> Vec<Pool> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| is_pool_object(obj))
        .filter_map(pool_from_object)
        .collect()
}

/// Distinct pool names, first occurrence wins, case-insensitive dedup.
pub fn pool_names_from_response(response: &Response) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut names = Vec::new();
    for pool in pools_from_response(response) {
        let key = pool.name.to_lowercase();
        if seen.insert(key) {
            names.push(pool.name);
        }
    }
    names
}

fn is_pool_object(obj: &Object) -> bool {
    obj.basetype == "pools" || obj.basetype == "pool" || obj.property_value("pool-name").is_some()
}

fn pool_from_object(obj: &Object) -> Option<Pool> {
    let props = obj.property_map();

    // Some firmware emits a placeholder "pools" container row.
    if obj.name == "pools"
        && prop(&props, "pool-name").is_empty()
        && prop(&props, "serial-number").is_empty()
    {
        return None;
    }

    let name =
        first_non_empty(&[prop(&props, "pool-name"), prop(&props, "name"), &obj.name]).to_string();
    if name.is_empty() {
        return None;
    }

    Some(Pool {
        name,
        serial_number: prop(&props, "serial-number").to_string(),
        total_size: prop(&props, "total-size").to_string(),
        available_size: prop(&props, "total-avail").to_string(),
        properties: props,
    })
}

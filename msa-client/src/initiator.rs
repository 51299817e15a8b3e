//! Initiator projection from the generic property tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::xml::{prop, Object, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Initiator {
    /// WWPN, IQN, EUI, or NAA identifier.
    pub id: String,
    pub nickname: String,
    pub profile: String,
    pub host_id: String,
    pub host_key: String,
    pub host_bus_type: String,
    pub discovered: String,
    pub mapped: String,
    pub properties: BTreeMap<String, String>,
}

pub fn initiators_from_response(response: &Response) -> Vec<Initiator> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| is_initiator_object(obj))
        .map(initiator_from_object)
        .collect()
}

fn is_initiator_object(obj: &Object) -> bool {
    obj.basetype == "initiator" || obj.property_value("id").is_some()
}

fn initiator_from_object(obj: &Object) -> Initiator {
    let props = obj.property_map();

    Initiator {
        id: prop(&props, "id").to_string(),
        nickname: prop(&props, "nickname").to_string(),
        profile: prop(&props, "profile").to_string(),
        host_id: prop(&props, "host-id").to_string(),
        host_key: prop(&props, "host-key").to_string(),
        host_bus_type: prop(&props, "host-bus-type").to_string(),
        discovered: prop(&props, "discovered").to_string(),
        mapped: prop(&props, "mapped").to_string(),
        properties: props,
    }
}

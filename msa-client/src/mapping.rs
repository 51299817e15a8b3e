//! Mapping-row projection. The mapping views do not carry a dedicated
//! basetype across firmware revisions, so rows are recognized by the
//! presence of a volume reference plus a LUN.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::xml::{first_non_empty, first_prop, prop, Response};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mapping {
    pub volume: String,
    pub volume_serial: String,
    pub lun: String,
    pub access: String,
    /// Comma-joined controller port list as reported.
    pub ports: String,
    pub properties: BTreeMap<String, String>,
}

pub fn mappings_from_response(response: &Response) -> Vec<Mapping> {
    let mut mappings = Vec::new();
    for obj in response.objects_without_status() {
        let props = obj.property_map();
        let volume = first_non_empty(&[
            prop(&props, "volume"),
            prop(&props, "volume-name"),
            prop(&props, "name"),
        ])
        .to_string();
        if volume.is_empty() || prop(&props, "lun").is_empty() {
            continue;
        }

        mappings.push(Mapping {
            volume,
            volume_serial: first_prop(&props, &["volume-serial", "serial-number"]).to_string(),
            lun: prop(&props, "lun").to_string(),
            access: prop(&props, "access").to_string(),
            ports: prop(&props, "ports").to_string(),
            properties: props,
        });
    }
    mappings
}

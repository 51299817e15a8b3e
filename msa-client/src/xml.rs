//! Decoder for the array's fixed `RESPONSE/OBJECT/PROPERTY` XML shape.
//!
//! The decoder is tolerant: unknown attributes and properties are carried
//! through untouched, missing ones default to empty strings. `OBJECT` nodes
//! nest (host groups contain hosts, mapping views contain rows), so the
//! flattening helpers walk the tree depth-first.

use std::collections::BTreeMap;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub version: String,
    pub objects: Vec<Object>,
}

#[derive(Debug, Clone, Default)]
pub struct Object {
    pub basetype: String,
    pub name: String,
    pub oid: String,
    pub properties: Vec<Property>,
    pub objects: Vec<Object>,
}

#[derive(Debug, Clone, Default)]
pub struct Property {
    pub name: String,
    pub prop_type: String,
    pub size: String,
    pub value: String,
}

/// The command status record every response carries.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub response_type: String,
    pub response_type_numeric: i64,
    pub response: String,
    pub return_code: i64,
    pub component_id: String,
    pub time_stamp: String,
}

impl Status {
    /// A response succeeded iff the numeric type is zero and the textual
    /// type is absent or literally "success".
    pub fn success(&self) -> bool {
        if self.response_type_numeric != 0 {
            return false;
        }
        self.response_type.is_empty() || self.response_type.eq_ignore_ascii_case("success")
    }
}

impl Object {
    /// Trimmed value of the named property, if present.
    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|prop| prop.name == name)
            .map(|prop| prop.value.trim())
    }

    /// All properties as a trimmed name→value map.
    pub fn property_map(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .map(|prop| (prop.name.clone(), prop.value.trim().to_string()))
            .collect()
    }

    fn collect_nested<'a>(&'a self, out: &mut Vec<&'a Object>) {
        for obj in &self.objects {
            out.push(obj);
            obj.collect_nested(out);
        }
    }

    fn is_status(&self) -> bool {
        self.basetype == "status" || self.name == "status"
    }
}

impl Response {
    /// Depth-first flattening of every object in the response.
    pub fn all_objects(&self) -> Vec<&Object> {
        let mut out = Vec::with_capacity(self.objects.len());
        for obj in &self.objects {
            out.push(obj);
            obj.collect_nested(&mut out);
        }
        out
    }

    /// Flattened objects with the status record filtered out.
    pub fn objects_without_status(&self) -> Vec<&Object> {
        self.all_objects()
            .into_iter()
            .filter(|obj| !obj.is_status())
            .collect()
    }

    /// The status record, if the response carries one.
    pub fn status(&self) -> Option<Status> {
        let obj = self.all_objects().into_iter().find(|obj| obj.is_status())?;
        Some(Status {
            response_type: obj.property_value("response-type").unwrap_or("").to_string(),
            response_type_numeric: parse_int(obj.property_value("response-type-numeric")),
            response: obj.property_value("response").unwrap_or("").to_string(),
            return_code: parse_int(obj.property_value("return-code")),
            component_id: obj.property_value("component-id").unwrap_or("").to_string(),
            time_stamp: obj.property_value("time-stamp").unwrap_or("").to_string(),
        })
    }
}

fn parse_int(value: Option<&str>) -> i64 {
    value.unwrap_or("").trim().parse().unwrap_or(0)
}

/// Parses a raw response body.
pub fn parse_response(body: &[u8]) -> Result<Response> {
    let text = String::from_utf8_lossy(body);
    let doc = roxmltree::Document::parse(&text)
        .map_err(|err| ClientError::Parse(err.to_string()))?;
    let root = doc.root_element();
    if !root.has_tag_name("RESPONSE") {
        return Err(ClientError::Parse(format!(
            "unexpected root element <{}>",
            root.tag_name().name()
        )));
    }

    Ok(Response {
        version: root.attribute("VERSION").unwrap_or("").to_string(),
        objects: root
            .children()
            .filter(|node| node.is_element() && node.has_tag_name("OBJECT"))
            .map(object_from_node)
            .collect(),
    })
}

fn object_from_node(node: roxmltree::Node<'_, '_>) -> Object {
    let mut object = Object {
        basetype: node.attribute("basetype").unwrap_or("").to_string(),
        name: node.attribute("name").unwrap_or("").to_string(),
        oid: node.attribute("oid").unwrap_or("").to_string(),
        ..Object::default()
    };

    for child in node.children().filter(|child| child.is_element()) {
        if child.has_tag_name("PROPERTY") {
            object.properties.push(Property {
                name: child.attribute("name").unwrap_or("").to_string(),
                prop_type: child.attribute("type").unwrap_or("").to_string(),
                size: child.attribute("size").unwrap_or("").to_string(),
                value: child.text().unwrap_or("").to_string(),
            });
        } else if child.has_tag_name("OBJECT") {
            object.objects.push(object_from_node(child));
        }
    }

    object
}

/// First non-empty value (after trimming) from a list of candidates.
pub(crate) fn first_non_empty<'a>(values: &[&'a str]) -> &'a str {
    values
        .iter()
        .copied()
        .find(|value| !value.trim().is_empty())
        .unwrap_or("")
}

/// Convenience lookup into a property map, defaulting to "".
pub(crate) fn prop<'a>(props: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    props.get(key).map(String::as_str).unwrap_or("")
}

/// First non-empty value among the named keys of a property map.
pub(crate) fn first_prop<'a>(props: &'a BTreeMap<String, String>, keys: &[&str]) -> &'a str {
    keys.iter()
        .map(|key| prop(props, key))
        .find(|value| !value.trim().is_empty())
        .unwrap_or("")
}

//! Plan-level name and identifier validation. These run before any command
//! is sent, so a bad plan never reaches the array.

use crate::error::{DriverError, Result};

const MAX_HOST_NAME_LENGTH: usize = 255;
const MAX_HOST_GROUP_NAME_BYTES: usize = 32;

/// An initiator ID is a 16-hex-digit WWPN (with optional `:`/`-`/`.`
/// separators), an IQN, `eui.` + 16 hex digits, or `naa.` + 16 or 32 hex
/// digits. Prefixes are case-insensitive.
pub fn validate_initiator_id(value: &str) -> Result<()> {
    if is_valid_initiator_id(value) {
        Ok(())
    } else {
        Err(DriverError::Validation(format!(
            "initiator id {value:?} must be a WWPN (hex, with or without separators) or an iSCSI name (iqn., eui., naa.)"
        )))
    }
}

pub fn is_valid_initiator_id(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if lower.starts_with("iqn.") {
        return is_valid_iqn(trimmed);
    }
    if let Some(body) = lower.strip_prefix("eui.") {
        return !has_whitespace(trimmed) && body.len() == 16 && is_hex(body);
    }
    if let Some(body) = lower.strip_prefix("naa.") {
        return !has_whitespace(trimmed) && (body.len() == 16 || body.len() == 32) && is_hex(body);
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    cleaned.len() == 16 && is_hex(&cleaned)
}

fn is_valid_iqn(value: &str) -> bool {
    if has_whitespace(value) {
        return false;
    }

    let lower = value.to_lowercase();
    let Some((prefix, identifier)) = lower.split_once(':') else {
        return false;
    };
    if identifier.trim().is_empty() {
        return false;
    }

    let Some(base) = prefix.strip_prefix("iqn.") else {
        return false;
    };
    let Some((date, authority)) = base.split_once('.') else {
        return false;
    };

    // Date part is YYYY-MM.
    let bytes = date.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    if !date[..4].bytes().all(|b| b.is_ascii_digit())
        || !date[5..].bytes().all(|b| b.is_ascii_digit())
    {
        return false;
    }

    is_hostname_like(authority)
}

fn has_whitespace(value: &str) -> bool {
    value.chars().any(char::is_whitespace)
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_hostname_like(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Host names: non-empty after trimming, at most 255 characters.
pub fn validate_host_name(value: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DriverError::Validation(
            "host name must be non-empty after trimming whitespace".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_HOST_NAME_LENGTH {
        return Err(DriverError::Validation(format!(
            "host name must be {MAX_HOST_NAME_LENGTH} characters or fewer"
        )));
    }
    Ok(())
}

/// Host group names: non-empty, at most 32 bytes, excluding `" . < \`.
pub fn validate_host_group_name(value: &str) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DriverError::Validation(
            "host group name must be non-empty after trimming whitespace".to_string(),
        ));
    }
    if trimmed.len() > MAX_HOST_GROUP_NAME_BYTES {
        return Err(DriverError::Validation(format!(
            "host group name must be {MAX_HOST_GROUP_NAME_BYTES} bytes or fewer"
        )));
    }
    if trimmed.contains(|c| matches!(c, '"' | '.' | '<' | '\\' | ',')) {
        return Err(DriverError::Validation(
            "host group name cannot include \", . < or \\".to_string(),
        ));
    }
    Ok(())
}

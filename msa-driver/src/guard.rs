//! Pre-delete usage guardrails.
//!
//! Before a volume or clone is deleted, the array is probed for anything
//! that would make the delete fail or orphan active I/O: live mappings,
//! an in-flight volume-copy job, and open host/initiator sessions. The
//! probes never mutate; a probe command the firmware does not support
//! falls through to the next candidate and, in the limit, to the raw
//! delete so the array itself adjudicates.

use std::collections::BTreeMap;
use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use msa_client::{
    mappings_from_response, volume_copy_jobs_from_response, ClientError, Object, VolumeCopyJob,
};

use crate::api::CommandApi;

/// What blocked a deletion, and whether a rerun can clear it.
#[derive(Debug, Clone)]
pub struct Guardrail {
    pub summary: String,
    pub detail: String,
    /// `true` when waiting and rerunning can succeed; `false` when the
    /// operator must change configuration first.
    pub retryable: bool,
}

impl fmt::Display for Guardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.summary, self.detail)
    }
}

/// Probes the array before deleting a volume-like resource. `hints` are
/// the identities the resource is known by (name, serial). Returns `None`
/// when nothing blocks the delete.
pub async fn pre_delete_usage_guardrail<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    resource_kind: &str,
    hints: &[&str],
) -> Option<Guardrail> {
    let identities = identity_hints(hints);
    if identities.is_empty() {
        return None;
    }

    let resource_kind = if resource_kind.trim().is_empty() {
        "volume"
    } else {
        resource_kind.trim()
    };
    let resource_label = title_case(resource_kind);
    let target_label = identities[0].clone();

    match probe_mappings(api, cancel, &identities).await {
        Ok(Some((count, command))) => {
            return Some(Guardrail {
                summary: format!("{resource_label} deletion blocked: mapped"),
                detail: with_classification(false, &format!(
                    "{resource_label} {target_label:?} is still mapped ({count} {} detected via `{command}`). \
                     Remove the related volume-mapping resource (or unmap directly on the array), then apply again.",
                    pluralize(count, "mapping entry", "mapping entries"),
                )),
                retryable: false,
            });
        }
        Ok(None) => {}
        Err(err) if err.is_interrupted() => {
            return Some(interrupted_guardrail(&resource_label, "mapping"));
        }
        Err(err) => {
            warn!(
                resource_kind,
                target = %target_label,
                error = %err,
                "pre-delete mapping probe failed; falling back to delete command"
            );
        }
    }

    match probe_active_copy_job(api, cancel, &identities).await {
        Ok(Some((job, command))) => {
            let job_context = copy_job_context(&job);
            return Some(Guardrail {
                summary: format!("{resource_label} deletion blocked: active copy"),
                detail: with_classification(true, &format!(
                    "{resource_label} {target_label:?} is participating in an active volume-copy job \
                     ({job_context}, discovered via `{command}`). Wait for the copy to finish, then apply again.",
                )),
                retryable: true,
            });
        }
        Ok(None) => {}
        Err(err) if err.is_interrupted() => {
            return Some(interrupted_guardrail(&resource_label, "volume-copy"));
        }
        Err(err) => {
            warn!(
                resource_kind,
                target = %target_label,
                error = %err,
                "pre-delete copy probe failed; falling back to delete command"
            );
        }
    }

    match probe_active_connections(api, cancel, &identities).await {
        Ok(Some((count, command))) => {
            return Some(Guardrail {
                summary: format!("{resource_label} deletion blocked: active sessions"),
                detail: with_classification(true, &format!(
                    "{resource_label} {target_label:?} still has {count} active host/initiator connection {} \
                     (detected via `{command}`). Disconnect active hosts or end sessions, then apply again.",
                    pluralize(count, "entry", "entries"),
                )),
                retryable: true,
            });
        }
        Ok(None) => {}
        Err(err) if err.is_interrupted() => {
            return Some(interrupted_guardrail(&resource_label, "connection/session"));
        }
        Err(err) => {
            warn!(
                resource_kind,
                target = %target_label,
                error = %err,
                "pre-delete connection probe failed; falling back to delete command"
            );
        }
    }

    None
}

/// Prefixes the verdict so the operator can tell a rerun-later block from
/// one that needs a configuration change.
fn with_classification(retryable: bool, detail: &str) -> String {
    if retryable {
        format!("[retryable] {detail}")
    } else {
        format!("[terminal] {detail}")
    }
}

fn interrupted_guardrail(resource_label: &str, probe: &str) -> Guardrail {
    Guardrail {
        summary: format!("{resource_label} deletion interrupted"),
        detail: with_classification(
            true,
            &format!("pre-delete {probe} probe was interrupted before deletion could continue"),
        ),
        retryable: true,
    }
}

async fn probe_mappings<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    identities: &[String],
) -> Result<Option<(usize, String)>, ClientError> {
    let mut commands: Vec<Vec<String>> = identities
        .iter()
        .map(|identity| command(&["show", "maps", "volume", identity]))
        .collect();
    commands.push(command(&["show", "maps"]));

    let mut last_err = None;
    for parts in &commands {
        let response = match execute(api, cancel, parts).await {
            Ok(response) => response,
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) if is_skippable_probe_error(&err) => continue,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };

        let count = mappings_from_response(&response)
            .iter()
            .filter(|mapping| {
                identity_matches(&mapping.volume, identities)
                    || identity_matches(&mapping.volume_serial, identities)
            })
            .count();
        if count > 0 {
            return Ok(Some((count, parts.join(" "))));
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

async fn probe_active_copy_job<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    identities: &[String],
) -> Result<Option<(VolumeCopyJob, String)>, ClientError> {
    let commands = [command(&["show", "volume-copy"]), command(&["show", "volume-copies"])];

    let mut last_err = None;
    for parts in &commands {
        let response = match execute(api, cancel, parts).await {
            Ok(response) => response,
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) if is_skippable_probe_error(&err) => continue,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };

        for job in volume_copy_jobs_from_response(&response) {
            if !job.active {
                continue;
            }
            if identity_matches(&job.source, identities) || identity_matches(&job.target, identities)
            {
                return Ok(Some((job, parts.join(" "))));
            }
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

async fn probe_active_connections<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    identities: &[String],
) -> Result<Option<(usize, String)>, ClientError> {
    let mut commands = Vec::with_capacity(identities.len() * 2 + 3);
    for identity in identities {
        commands.push(command(&["show", "connections", "volume", identity]));
        commands.push(command(&["show", "sessions", "volume", identity]));
    }
    commands.push(command(&["show", "connections"]));
    commands.push(command(&["show", "sessions"]));
    commands.push(command(&["show", "host-connections"]));

    let mut last_err = None;
    for parts in &commands {
        let response = match execute(api, cancel, parts).await {
            Ok(response) => response,
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) if is_skippable_probe_error(&err) => continue,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };

        let count = response
            .objects_without_status()
            .into_iter()
            .filter(|obj| {
                let props = obj.property_map();
                is_connection_object(obj, &props)
                    && connection_references_volume(&props, identities)
                    && connection_is_active(&props)
            })
            .count();
        if count > 0 {
            return Ok(Some((count, parts.join(" "))));
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

async fn execute<C: CommandApi>(
    api: &C,
    cancel: &CancellationToken,
    parts: &[String],
) -> Result<msa_client::Response, ClientError> {
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    api.execute(cancel, &refs).await
}

fn is_connection_object(obj: &Object, props: &BTreeMap<String, String>) -> bool {
    let shape = format!("{} {}", obj.basetype, obj.name).to_lowercase();
    if shape.contains("connection") || shape.contains("session") {
        return true;
    }
    props
        .keys()
        .any(|key| contains_any(&key.to_lowercase(), &["connection", "session"]))
}

fn connection_references_volume(props: &BTreeMap<String, String>, identities: &[String]) -> bool {
    for (key, value) in props {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        if contains_any(&key, &["volume", "serial", "durable", "wwn", "wwid"]) {
            if identity_matches(value, identities) {
                return true;
            }
            continue;
        }
        if key == "name"
            && identity_matches(value, identities)
            && props.keys().any(|other| {
                contains_any(
                    &other.to_lowercase(),
                    &["volume", "serial", "durable", "lun"],
                )
            })
        {
            return true;
        }
    }
    false
}

fn connection_is_active(props: &BTreeMap<String, String>) -> bool {
    const INACTIVE_MARKERS: &[&str] = &[
        "disconnected",
        "logged out",
        "logout",
        "inactive",
        "offline",
        "closed",
        "down",
        "failed",
        "not connected",
        "no session",
    ];

    for (key, value) in props {
        let key = key.trim().to_lowercase();
        if !contains_any(&key, &["status", "state", "session", "connection", "login"]) {
            continue;
        }
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            continue;
        }
        if contains_any(&value, INACTIVE_MARKERS) {
            return false;
        }
    }

    // No status-shaped field, or nothing marking the session closed: live.
    true
}

/// Trimmed, case-insensitively deduplicated identity hints, order kept.
pub(crate) fn identity_hints(values: &[&str]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut identities = Vec::new();
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            identities.push(trimmed.to_string());
        }
    }
    identities
}

/// Lenient identity match: case-insensitive equality, equality after
/// stripping `:`/`-`/`_`/`.` separators, token equality on word-broken
/// values, and substring containment for identities of at least 8 chars.
pub(crate) fn identity_matches(value: &str, identities: &[String]) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }

    let normalized = value.to_lowercase();
    let compact = compact_identity(&normalized);
    let tokens = split_identity_tokens(&normalized);

    for identity in identities {
        let identity = identity.trim();
        if identity.is_empty() {
            continue;
        }
        let normalized_identity = identity.to_lowercase();
        if normalized == normalized_identity {
            return true;
        }

        let compact_id = compact_identity(&normalized_identity);
        if !compact_id.is_empty() && compact == compact_id {
            return true;
        }

        for token in &tokens {
            if *token == normalized_identity {
                return true;
            }
            let compact_token = compact_identity(token);
            if !compact_token.is_empty() && compact_token == compact_id {
                return true;
            }
        }

        if normalized_identity.len() >= 8 && normalized.contains(&normalized_identity) {
            return true;
        }
    }

    false
}

fn split_identity_tokens(value: &str) -> Vec<String> {
    value
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn compact_identity(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '_' | '.' | ' '))
        .collect()
}

fn is_skippable_probe_error(err: &ClientError) -> bool {
    const UNSUPPORTED: &[&str] = &[
        "invalid command",
        "unknown command",
        "unrecognized command",
        "command not recognized",
        "not supported",
        "unsupported",
        "not available",
        "syntax error",
        "invalid option",
        "illegal parameter",
        "invalid parameter",
    ];
    const NOT_FOUND: &[&str] = &[
        "no such volume",
        "volume does not exist",
        "no object",
        "not found",
        "does not exist",
    ];

    let Some(api_err) = err.api() else {
        return false;
    };
    let message = api_err.message().to_lowercase();
    if message.is_empty() {
        return false;
    }
    contains_any(&message, UNSUPPORTED) || contains_any(&message, NOT_FOUND)
}

fn contains_any(value: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|candidate| value.contains(candidate))
}

fn copy_job_context(job: &VolumeCopyJob) -> String {
    let mut parts = Vec::with_capacity(4);
    if !job.id.trim().is_empty() {
        parts.push(format!("job id={}", job.id.trim()));
    }
    if !job.source.trim().is_empty() {
        parts.push(format!("source={}", job.source.trim()));
    }
    if !job.target.trim().is_empty() {
        parts.push(format!("target={}", job.target.trim()));
    }
    if let Some(eta) = job.eta {
        parts.push(format!("eta={}s", eta.as_secs()));
    }

    if parts.is_empty() {
        "job details unavailable".to_string()
    } else {
        parts.join(" ")
    }
}

fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn pluralize(count: usize, singular: &'static str, plural: &'static str) -> &'static str {
    if count == 1 {
        singular
    } else {
        plural
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{api_error, cancelled_token, response_with, FakeApi, Scripted};

    fn hints() -> Vec<String> {
        identity_hints(&["vol-data-01", "00c0ff2a4e5f0000d2a8c26101000000"])
    }

    #[test]
    fn test_identity_hints_dedup() {
        let identities = identity_hints(&["Vol01", "vol01", "", "  ", "serial-1"]);
        assert_eq!(identities, vec!["Vol01", "serial-1"]);
    }

    #[test]
    fn test_identity_matches_forms() {
        let identities = hints();
        assert!(identity_matches("vol-data-01", &identities));
        assert!(identity_matches("VOL-DATA-01", &identities));
        assert!(identity_matches("voldata01", &identities)); // compacted
        assert!(identity_matches("lun for vol-data-01 (A1)", &identities)); // token
        // Long identities match by containment.
        assert!(identity_matches(
            "naa.00c0ff2a4e5f0000d2a8c26101000000",
            &identities
        ));
        assert!(!identity_matches("vol-data-02", &identities));
        assert!(!identity_matches("", &identities));
    }

    #[test]
    fn test_skippable_probe_errors() {
        for msg in ["Invalid command.", "command not SUPPORTED here", "no such volume"] {
            let err = ClientError::Api(api_error(msg));
            assert!(is_skippable_probe_error(&err), "{msg:?}");
        }
        assert!(!is_skippable_probe_error(&ClientError::Api(api_error(
            "internal failure"
        ))));
        assert!(!is_skippable_probe_error(&ClientError::HttpStatus(500)));
    }

    fn mapping_object(volume: &str) -> String {
        format!(
            r#"<OBJECT basetype="volume-view" name="mapping" oid="9">
                <PROPERTY name="volume">{volume}</PROPERTY>
                <PROPERTY name="lun">10</PROPERTY>
            </OBJECT>"#
        )
    }

    #[tokio::test]
    async fn test_mapping_probe_is_terminal() {
        let api = FakeApi::new();
        api.on(
            "show maps volume vol-data-01",
            Scripted::Ok(response_with(&mapping_object("vol-data-01"))),
        );

        let cancel = CancellationToken::new();
        let guardrail =
            pre_delete_usage_guardrail(&api, &cancel, "volume", &["vol-data-01"]).await;

        let guardrail = guardrail.expect("mapping should block");
        assert_eq!(guardrail.summary, "Volume deletion blocked: mapped");
        assert!(!guardrail.retryable);
        assert!(guardrail.detail.contains("show maps volume vol-data-01"));
        assert!(guardrail.detail.contains("terminal"));
    }

    #[tokio::test]
    async fn test_mapping_probe_falls_through_to_bare_show_maps() {
        let api = FakeApi::new();
        // Per-identity form unsupported on this firmware; unscripted
        // commands answer "Invalid command." in the fake.
        api.on("show maps", Scripted::Ok(response_with(&mapping_object("vol-data-01"))));

        let cancel = CancellationToken::new();
        let guardrail =
            pre_delete_usage_guardrail(&api, &cancel, "volume", &["vol-data-01"]).await;

        let guardrail = guardrail.expect("bare show maps should still find the mapping");
        assert!(guardrail.detail.contains("`show maps`"));
        assert!(api.called("show maps volume vol-data-01"));
    }

    #[tokio::test]
    async fn test_copy_probe_is_retryable() {
        let api = FakeApi::new();
        api.on("show maps volume clone01", Scripted::Ok(response_with("")));
        api.on("show maps", Scripted::Ok(response_with("")));
        api.on(
            "show volume-copy",
            Scripted::Ok(response_with(
                r#"<OBJECT basetype="volume-copy-status" name="volume-copy" oid="7">
                    <PROPERTY name="copy-job-id">job-42</PROPERTY>
                    <PROPERTY name="source-volume-name">snap-X</PROPERTY>
                    <PROPERTY name="destination-volume-name">clone01</PROPERTY>
                    <PROPERTY name="copy-status">In Progress</PROPERTY>
                    <PROPERTY name="estimated-time-remaining">120</PROPERTY>
                </OBJECT>"#,
            )),
        );

        let cancel = CancellationToken::new();
        let guardrail = pre_delete_usage_guardrail(&api, &cancel, "clone", &["clone01"]).await;

        let guardrail = guardrail.expect("active copy should block");
        assert_eq!(guardrail.summary, "Clone deletion blocked: active copy");
        assert!(guardrail.retryable);
        assert!(guardrail.detail.contains("job id=job-42"));
        assert!(guardrail.detail.contains("eta=120s"));
    }

    #[tokio::test]
    async fn test_connection_probe_ignores_inactive_sessions() {
        let api = FakeApi::new();
        api.on("show maps volume vol01", Scripted::Ok(response_with("")));
        api.on("show maps", Scripted::Ok(response_with("")));
        api.on("show volume-copy", Scripted::Ok(response_with("")));
        api.on(
            "show connections volume vol01",
            Scripted::Ok(response_with(
                r#"<OBJECT basetype="sessions" name="session" oid="7">
                    <PROPERTY name="volume">vol01</PROPERTY>
                    <PROPERTY name="session-state">Logged Out</PROPERTY>
                </OBJECT>"#,
            )),
        );

        let cancel = CancellationToken::new();
        let guardrail = pre_delete_usage_guardrail(&api, &cancel, "volume", &["vol01"]).await;
        assert!(guardrail.is_none(), "logged-out session should not block");
    }

    #[tokio::test]
    async fn test_connection_probe_blocks_active_session() {
        let api = FakeApi::new();
        api.on("show maps volume vol01", Scripted::Ok(response_with("")));
        api.on("show maps", Scripted::Ok(response_with("")));
        api.on("show volume-copy", Scripted::Ok(response_with("")));
        api.on(
            "show connections volume vol01",
            Scripted::Ok(response_with(
                r#"<OBJECT basetype="sessions" name="session" oid="7">
                    <PROPERTY name="volume">vol01</PROPERTY>
                    <PROPERTY name="session-state">Connected</PROPERTY>
                </OBJECT>"#,
            )),
        );

        let cancel = CancellationToken::new();
        let guardrail = pre_delete_usage_guardrail(&api, &cancel, "volume", &["vol01"]).await;

        let guardrail = guardrail.expect("active session should block");
        assert_eq!(guardrail.summary, "Volume deletion blocked: active sessions");
        assert!(guardrail.retryable);
    }

    #[tokio::test]
    async fn test_all_probes_clear() {
        let api = FakeApi::new();
        api.on("show maps volume vol01", Scripted::Ok(response_with("")));
        api.on("show maps", Scripted::Ok(response_with("")));
        api.on("show volume-copy", Scripted::Ok(response_with("")));
        api.on("show connections volume vol01", Scripted::Ok(response_with("")));
        api.on("show sessions volume vol01", Scripted::Ok(response_with("")));
        api.on("show connections", Scripted::Ok(response_with("")));
        api.on("show sessions", Scripted::Ok(response_with("")));
        api.on("show host-connections", Scripted::Ok(response_with("")));

        let cancel = CancellationToken::new();
        assert!(pre_delete_usage_guardrail(&api, &cancel, "volume", &["vol01"])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_no_hints_no_probes() {
        let api = FakeApi::new();
        let cancel = CancellationToken::new();
        assert!(pre_delete_usage_guardrail(&api, &cancel, "volume", &["", "  "])
            .await
            .is_none());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_yields_interrupted_guardrail() {
        struct InterruptingApi;

        #[async_trait::async_trait]
        impl CommandApi for InterruptingApi {
            async fn execute(
                &self,
                _cancel: &CancellationToken,
                _parts: &[&str],
            ) -> Result<msa_client::Response, ClientError> {
                Err(ClientError::Interrupted)
            }
        }

        let guardrail =
            pre_delete_usage_guardrail(&InterruptingApi, &cancelled_token(), "volume", &["vol01"])
                .await
                .expect("interruption should surface as a guardrail");
        assert!(guardrail.retryable);
        assert!(guardrail.summary.contains("interrupted"));
    }
}

//! Volume-copy job projection.
//!
//! Copy jobs are observable via `show volume-copy` / `show volume-copies`,
//! but the row shape varies noticeably between firmware revisions. Every
//! interesting attribute is therefore resolved through an alias priority
//! list, and a job with an unrecognized status is treated as still active
//! so a racing delete or copy never sees a false completion.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::xml::{first_non_empty, first_prop, Object, Response};

const JOB_ID_KEYS: &[&str] = &["job-id", "copy-job-id", "serial-number", "id"];

const SOURCE_KEYS: &[&str] = &[
    "source-volume-name",
    "source-volume",
    "source-name",
    "source",
    "base-volume",
    "base-volume-name",
    "master-volume-name",
];

const TARGET_KEYS: &[&str] = &[
    "destination-volume-name",
    "destination-volume",
    "destination-name",
    "destination",
    "target-volume-name",
    "target-volume",
    "target-name",
    "target",
    "volume-name",
    "name",
];

const STATUS_KEYS: &[&str] = &["copy-status", "status", "state", "job-status", "progress-status"];

const ETA_KEYS: &[&str] = &[
    "estimated-time-remaining",
    "estimated-time-to-completion",
    "estimated-time-left",
    "time-remaining",
    "time-to-complete",
    "remaining-time",
    "eta",
    "seconds-to-completion",
    "estimated-seconds-to-complete",
];

const PROGRESS_KEYS: &[&str] = &["progress", "progress-percent", "copy-progress", "percent-complete"];

const TERMINAL_STATUSES: &[&str] = &[
    "complete",
    "completed",
    "success",
    "succeeded",
    "failed",
    "failure",
    "error",
    "aborted",
    "canceled",
    "cancelled",
    "stopped",
    "done",
];

const ACTIVE_STATUSES: &[&str] = &[
    "progress",
    "running",
    "copy",
    "active",
    "queued",
    "pending",
    "starting",
    "in-progress",
];

#[derive(Debug, Clone, Default)]
pub struct VolumeCopyJob {
    pub id: String,
    pub source: String,
    pub target: String,
    pub status: String,
    /// ETA text as reported, before parsing.
    pub eta_raw: String,
    /// Parsed ETA, when the array advertises a usable one.
    pub eta: Option<Duration>,
    pub active: bool,
    pub properties: BTreeMap<String, String>,
}

pub fn volume_copy_jobs_from_response(response: &Response) -> Vec<VolumeCopyJob> {
    response
        .objects_without_status()
        .into_iter()
        .filter(|obj| is_volume_copy_object(obj))
        .map(job_from_object)
        .collect()
}

/// Picks the active job best matching the caller's source/target hints.
/// Scoring: +6 target match, +4 source match, +2 has-eta, +1 has-id.
pub fn select_best_active_job<'a>(
    jobs: &'a [VolumeCopyJob],
    source_hint: &str,
    target_hint: &str,
) -> Option<&'a VolumeCopyJob> {
    let source_hint = source_hint.trim().to_lowercase();
    let target_hint = target_hint.trim().to_lowercase();

    let mut best: Option<(&VolumeCopyJob, i32)> = None;
    for job in jobs.iter().filter(|job| job.active) {
        let mut score = 0;
        if !source_hint.is_empty() && matches_hint(&job.source, &source_hint) {
            score += 4;
        }
        if !target_hint.is_empty() && matches_hint(&job.target, &target_hint) {
            score += 6;
        }
        if job.eta.is_some() {
            score += 2;
        }
        if !job.id.trim().is_empty() {
            score += 1;
        }

        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((job, score));
        }
    }

    best.map(|(job, _)| job)
}

fn matches_hint(value: &str, hint: &str) -> bool {
    !hint.is_empty() && value.trim().eq_ignore_ascii_case(hint)
}

fn is_volume_copy_object(obj: &Object) -> bool {
    let basetype = obj.basetype.trim().to_lowercase();
    let name = obj.name.trim().to_lowercase();
    if basetype.contains("volume-copy") || name.contains("volume-copy") {
        return true;
    }
    if basetype.contains("copy") && basetype.contains("volume") {
        return true;
    }

    let props = obj.property_map();
    !first_prop(&props, SOURCE_KEYS).is_empty() && !first_prop(&props, TARGET_KEYS).is_empty()
}

fn job_from_object(obj: &Object) -> VolumeCopyJob {
    let props = obj.property_map();
    let eta_raw = first_prop(&props, ETA_KEYS).to_string();
    let eta = parse_copy_eta(&eta_raw);
    let status = first_prop(&props, STATUS_KEYS).to_string();
    let active = is_job_active(&status, &props);

    VolumeCopyJob {
        id: first_non_empty(&[first_prop(&props, JOB_ID_KEYS), obj.oid.trim()]).to_string(),
        source: first_prop(&props, SOURCE_KEYS).to_string(),
        target: first_prop(&props, TARGET_KEYS).to_string(),
        status,
        eta_raw,
        eta,
        active,
        properties: props,
    }
}

fn is_job_active(status: &str, props: &BTreeMap<String, String>) -> bool {
    let normalized = status.trim().to_lowercase();
    if !normalized.is_empty() {
        if TERMINAL_STATUSES.iter().any(|term| normalized.contains(term)) {
            return false;
        }
        if ACTIVE_STATUSES.iter().any(|term| normalized.contains(term)) {
            return true;
        }
    }

    let progress = first_prop(props, PROGRESS_KEYS);
    if let Some(percent) = parse_progress_percent(progress) {
        return percent < 100.0;
    }

    // Unknown status: assume the job is still running.
    true
}

fn parse_progress_percent(value: &str) -> Option<f64> {
    let trimmed = value.trim().trim_end_matches('%').trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}

/// Parses the array's assorted ETA spellings: integer seconds, `HH:MM:SS`
/// or `MM:SS`, compact durations (`2m30s`), and human forms
/// (`3 minutes 5 seconds`). Placeholders and negatives yield `None`.
pub fn parse_copy_eta(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let normalized = value.to_lowercase();
    if matches!(normalized.as_str(), "n/a" | "na" | "none" | "unknown" | "-" | "--") {
        return None;
    }

    if let Some(parsed) = parse_colon_duration(value) {
        return Some(parsed);
    }

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds as u64));
    }

    let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(parsed) = parse_compact_duration(&compact) {
        return Some(parsed);
    }

    parse_human_duration(&normalized)
}

fn parse_colon_duration(value: &str) -> Option<Duration> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in parts {
        let parsed: i64 = part.trim().parse().ok()?;
        if parsed < 0 {
            return None;
        }
        values.push(parsed as u64);
    }

    Some(if values.len() == 2 {
        Duration::from_secs(values[0] * 60 + values[1])
    } else {
        Duration::from_secs(values[0] * 3600 + values[1] * 60 + values[2])
    })
}

/// `2m30s`, `1h2m`, `90s`, `1d` — digit runs followed by a unit letter.
fn parse_compact_duration(value: &str) -> Option<Duration> {
    if value.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut matched = false;

    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let amount: u64 = digits.parse().ok()?;
        digits.clear();

        total += match c {
            'd' => Duration::from_secs(amount * 24 * 3600),
            'h' => Duration::from_secs(amount * 3600),
            'm' => Duration::from_secs(amount * 60),
            's' => Duration::from_secs(amount),
            _ => return None,
        };
        matched = true;
    }

    if !digits.is_empty() || !matched {
        return None;
    }
    Some(total)
}

/// `3 minutes 5 seconds`, `1 hour, 2 minutes` — amount/unit word pairs.
fn parse_human_duration(value: &str) -> Option<Duration> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() < 2 {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut matched = false;
    let mut i = 0;
    while i + 1 < fields.len() {
        let Ok(amount) = fields[i].trim().parse::<u64>() else {
            i += 1;
            continue;
        };

        let unit = fields[i + 1].trim().trim_matches(',');
        let step = match unit.chars().next() {
            Some('d') => Duration::from_secs(amount * 24 * 3600),
            Some('h') => Duration::from_secs(amount * 3600),
            Some('m') => Duration::from_secs(amount * 60),
            Some('s') => Duration::from_secs(amount),
            _ => {
                i += 1;
                continue;
            }
        };

        total += step;
        matched = true;
        i += 2;
    }

    matched.then_some(total)
}

//! Turns fetched PagerDuty payloads into coverage records.
//!
//! This is the only place malformed upstream data is rejected. Records built
//! here are well-formed: every entry satisfies `end >= start`.

use serde::Deserialize;
use serde_json::Value;

use crate::dates::parse_isotime;
use crate::error::{CoverageError, Result};
use crate::models::{Coverage, EscalationRuleCoverage, ScheduleCoverage, TimeInterval};

#[derive(Debug, Deserialize)]
struct ScheduleEnvelope {
    schedule: SchedulePayload,
}

#[derive(Debug, Deserialize)]
struct SchedulePayload {
    id: String,
    name: String,
    html_url: String,
    final_schedule: FinalSchedulePayload,
}

#[derive(Debug, Deserialize)]
struct FinalSchedulePayload {
    #[serde(default)]
    rendered_coverage_percentage: Option<f64>,
    #[serde(default)]
    rendered_schedule_entries: Vec<EntryPayload>,
}

#[derive(Debug, Deserialize)]
struct EntryPayload {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct PolicyPayload {
    id: String,
    name: String,
    html_url: String,
    #[serde(default)]
    escalation_rules: Vec<RulePayload>,
}

#[derive(Debug, Deserialize)]
struct RulePayload {
    #[serde(default)]
    targets: Vec<TargetPayload>,
}

#[derive(Debug, Deserialize)]
struct TargetPayload {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    summary: Option<String>,
}

impl TargetPayload {
    fn is_schedule(&self) -> bool {
        matches!(self.kind.as_str(), "schedule" | "schedule_reference")
    }
}

fn parse_entry(entry: &EntryPayload) -> Result<TimeInterval> {
    let start = parse_isotime(&entry.start)?;
    let end = parse_isotime(&entry.end)?;
    TimeInterval::new(start, end).ok_or_else(|| {
        CoverageError::mapping(format!(
            "entry ends before it starts: {} -> {}",
            entry.start, entry.end
        ))
    })
}

impl ScheduleCoverage {
    /// Build from a schedule detail response (`{"schedule": {...}}`).
    pub fn build_from(payload: &Value) -> Result<Self> {
        let envelope = ScheduleEnvelope::deserialize(payload)
            .map_err(|err| CoverageError::mapping(format!("schedule payload: {err}")))?;
        let schedule = envelope.schedule;

        let entries = schedule
            .final_schedule
            .rendered_schedule_entries
            .iter()
            .map(parse_entry)
            .collect::<Result<Vec<_>>>()
            .map_err(|err| match err {
                CoverageError::Mapping(msg) => {
                    CoverageError::mapping(format!("schedule {}: {msg}", schedule.id))
                }
                other => other,
            })?;

        Ok(Self {
            id: schedule.id,
            name: schedule.name,
            url: schedule.html_url,
            coverage_percentage: schedule
                .final_schedule
                .rendered_coverage_percentage
                .unwrap_or(0.0),
            entries,
            is_fully_covered: Coverage::Unknown,
        })
    }
}

impl EscalationRuleCoverage {
    /// Fan one escalation policy out into one record per rule.
    pub fn build_from(payload: &Value) -> Result<Vec<Self>> {
        let policy = PolicyPayload::deserialize(payload)
            .map_err(|err| CoverageError::mapping(format!("escalation policy payload: {err}")))?;

        let records = policy
            .escalation_rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| Self {
                policy_id: policy.id.clone(),
                rule_index: idx + 1,
                name: policy.name.clone(),
                url: policy.html_url.clone(),
                rule_target_names: rule
                    .targets
                    .iter()
                    .map(|target| target.summary.clone().unwrap_or_else(|| target.id.clone()))
                    .collect(),
                rule_target_ids: rule
                    .targets
                    .iter()
                    .filter(|target| target.is_schedule())
                    .map(|target| target.id.clone())
                    .collect(),
                is_fully_covered: Coverage::Unknown,
            })
            .collect();

        Ok(records)
    }
}

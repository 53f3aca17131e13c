use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::aggregator::CoverageResults;
use crate::dates::to_isotime;
use crate::error::{CoverageError, Result};
use crate::models::{EscalationRuleCoverage, ScheduleCoverage};

#[derive(Debug, Serialize)]
struct ScheduleRow<'a> {
    id: &'a str,
    name: &'a str,
    url: &'a str,
    coverage_percentage: f64,
    entry_count: usize,
    entries: String,
    is_fully_covered: Option<bool>,
}

#[derive(Debug, Serialize)]
struct EscalationRuleRow<'a> {
    policy_id: &'a str,
    rule_index: usize,
    name: &'a str,
    url: &'a str,
    rule_target_names: String,
    rule_target_ids: String,
    is_fully_covered: Option<bool>,
}

impl<'a> From<&'a ScheduleCoverage> for ScheduleRow<'a> {
    fn from(schedule: &'a ScheduleCoverage) -> Self {
        let entries = schedule
            .entries
            .iter()
            .map(|entry| format!("{}/{}", to_isotime(entry.start), to_isotime(entry.end)))
            .collect::<Vec<_>>()
            .join(";");

        Self {
            id: &schedule.id,
            name: &schedule.name,
            url: &schedule.url,
            coverage_percentage: schedule.coverage_percentage,
            entry_count: schedule.entries.len(),
            entries,
            is_fully_covered: schedule.is_fully_covered.as_bool(),
        }
    }
}

impl<'a> From<&'a EscalationRuleCoverage> for EscalationRuleRow<'a> {
    fn from(rule: &'a EscalationRuleCoverage) -> Self {
        Self {
            policy_id: &rule.policy_id,
            rule_index: rule.rule_index,
            name: &rule.name,
            url: &rule.url,
            rule_target_names: rule.rule_target_names.join(";"),
            rule_target_ids: rule.rule_target_ids.join(";"),
            is_fully_covered: rule.is_fully_covered.as_bool(),
        }
    }
}

fn to_csv_string<T: Serialize>(
    rows: impl IntoIterator<Item = T>,
    header: &[&str],
) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| CoverageError::Io(err.into_error()))?;
    String::from_utf8(bytes).map_err(|err| {
        CoverageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })
}

pub fn schedule_csv(schedules: &[ScheduleCoverage]) -> Result<String> {
    to_csv_string(
        schedules.iter().map(ScheduleRow::from),
        &[
            "id",
            "name",
            "url",
            "coverage_percentage",
            "entry_count",
            "entries",
            "is_fully_covered",
        ],
    )
}

pub fn escalation_csv(rules: &[EscalationRuleCoverage]) -> Result<String> {
    to_csv_string(
        rules.iter().map(EscalationRuleRow::from),
        &[
            "policy_id",
            "rule_index",
            "name",
            "url",
            "rule_target_names",
            "rule_target_ids",
            "is_fully_covered",
        ],
    )
}

/// File names for a run, dated from the window start.
pub fn report_file_names(results: &CoverageResults) -> (String, String) {
    let date = results.window.since.format("%Y-%m-%d");
    (
        format!("schedule_gap_report{date}.csv"),
        format!("escalation_rule_gap_report{date}.csv"),
    )
}

/// Write both reports into `out_dir`, returning the paths written.
pub fn write_reports(out_dir: &Path, results: &CoverageResults) -> Result<(PathBuf, PathBuf)> {
    let (schedule_name, escalation_name) = report_file_names(results);
    let schedule_path = out_dir.join(schedule_name);
    let escalation_path = out_dir.join(escalation_name);

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(&schedule_path, schedule_csv(&results.schedules)?)?;
    std::fs::write(&escalation_path, escalation_csv(&results.rules)?)?;

    Ok((schedule_path, escalation_path))
}

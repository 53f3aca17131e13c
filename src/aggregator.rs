//! Drives a coverage gap run: map schedules, map escalation rules, then
//! hydrate every verdict against the run window.
//!
//! Schedules must be fully mapped before hydration. Per-schedule fetch and
//! mapping failures only drop that record; listing failures end the run.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::coverage;
use crate::dates::{to_isotime, ReportWindow};
use crate::error::Result;
use crate::models::{Coverage, EscalationRuleCoverage, RuleKey, ScheduleCoverage, TimeInterval};
use crate::pagerduty::CoverageSource;

#[derive(Debug, Clone)]
pub struct CoverageResults {
    pub window: ReportWindow,
    pub schedules: Vec<ScheduleCoverage>,
    pub rules: Vec<EscalationRuleCoverage>,
}

pub struct CoverageGapReport<S> {
    source: S,
    window: ReportWindow,
    schedule_map: BTreeMap<String, ScheduleCoverage>,
    escalation_map: BTreeMap<RuleKey, EscalationRuleCoverage>,
}

impl<S: CoverageSource> CoverageGapReport<S> {
    pub fn new(source: S, window: ReportWindow) -> Self {
        Self {
            source,
            window,
            schedule_map: BTreeMap::new(),
            escalation_map: BTreeMap::new(),
        }
    }

    pub async fn run_reports(mut self) -> Result<CoverageResults> {
        let schedule_ids = self.source.list_schedule_ids().await?;
        info!(count = schedule_ids.len(), "discovered schedules");
        self.map_schedule_coverages(&schedule_ids).await?;

        let policies = self.source.list_escalation_policies().await?;
        info!(count = policies.len(), "discovered escalation policies");
        self.map_escalation_coverages(&policies);

        self.hydrate_coverage_flags();

        Ok(CoverageResults {
            window: self.window,
            schedules: self.schedule_map.into_values().collect(),
            rules: self.escalation_map.into_values().collect(),
        })
    }

    /// Fetch and map one schedule. Per-schedule failures are logged and
    /// yield `Ok(None)`; only fatal errors are returned.
    pub async fn get_schedule_coverage(
        &self,
        schedule_id: &str,
    ) -> Result<Option<ScheduleCoverage>> {
        let built = match self.source.fetch_schedule(schedule_id, &self.window).await {
            Ok(payload) => ScheduleCoverage::build_from(&payload),
            Err(err) => Err(err),
        };

        match built {
            Ok(schedule) => Ok(Some(schedule)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                error!(schedule_id, error = %err, "skipping schedule");
                Ok(None)
            }
        }
    }

    async fn map_schedule_coverages(&mut self, schedule_ids: &BTreeSet<String>) -> Result<()> {
        info!(count = schedule_ids.len(), "pulling schedules for coverage");

        for (idx, schedule_id) in schedule_ids.iter().enumerate() {
            debug!(schedule_id = %schedule_id, "pulling {} of {}", idx + 1, schedule_ids.len());

            if let Some(schedule) = self.get_schedule_coverage(schedule_id).await? {
                self.schedule_map.insert(schedule_id.clone(), schedule);
            }
        }

        Ok(())
    }

    fn map_escalation_coverages(&mut self, policies: &[Value]) {
        info!(count = policies.len(), "mapping escalation policies for coverage");

        for policy in policies {
            let rules = match EscalationRuleCoverage::build_from(policy) {
                Ok(rules) => rules,
                Err(err) => {
                    warn!(
                        policy_id = policy["id"].as_str().unwrap_or("<unknown>"),
                        error = %err,
                        "skipping unmappable escalation policy"
                    );
                    continue;
                }
            };

            for rule in rules {
                self.escalation_map.insert(rule.key(), rule);
            }
        }

        info!(count = self.escalation_map.len(), "escalation rules mapped");
    }

    fn hydrate_coverage_flags(&mut self) {
        let since = Some(self.window.since);
        let until = Some(self.window.until);

        for schedule in self.schedule_map.values_mut() {
            let covered = coverage::is_covered(&schedule.entries, since, until);
            schedule.is_fully_covered.hydrate(covered);
        }

        for rule in self.escalation_map.values_mut() {
            let entries = extract_entries(&self.schedule_map, &rule.rule_target_ids);
            let covered = !rule.rule_target_ids.is_empty()
                && coverage::is_covered(&entries, since, until);

            let hydrated = rule.is_fully_covered.hydrate(covered);
            debug_assert!(hydrated, "rule records start unhydrated");

            if rule.is_fully_covered == Coverage::Gapped {
                let gaps = coverage::find_gaps(&entries, self.window.since, self.window.until);
                warn!(
                    policy_id = %rule.policy_id,
                    rule_index = rule.rule_index,
                    gaps = gaps.len(),
                    first_gap = %gaps.first().map(|gap| to_isotime(gap.start)).unwrap_or_default(),
                    "escalation rule has coverage gaps"
                );
            }
        }
    }
}

/// Entries of every referenced schedule that was mapped. Unknown ids add nothing.
fn extract_entries(
    schedule_map: &BTreeMap<String, ScheduleCoverage>,
    schedule_ids: &[String],
) -> Vec<TimeInterval> {
    schedule_ids
        .iter()
        .filter_map(|id| schedule_map.get(id))
        .flat_map(|schedule| schedule.entries.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_isotime;
    use crate::error::CoverageError;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct FakeSource {
        schedules: BTreeMap<String, Value>,
        unreachable: BTreeSet<String>,
        policies: Vec<Value>,
        fail_listing: bool,
    }

    #[async_trait]
    impl CoverageSource for FakeSource {
        async fn list_schedule_ids(&self) -> Result<BTreeSet<String>> {
            if self.fail_listing {
                return Err(CoverageError::QueryFailure {
                    path: "/schedules".to_string(),
                    status: 401,
                    body: String::new(),
                });
            }
            Ok(self
                .schedules
                .keys()
                .chain(self.unreachable.iter())
                .cloned()
                .collect())
        }

        async fn fetch_schedule(&self, schedule_id: &str, _window: &ReportWindow) -> Result<Value> {
            self.schedules
                .get(schedule_id)
                .cloned()
                .ok_or_else(|| CoverageError::DetailFetchFailure {
                    schedule_id: schedule_id.to_string(),
                    reason: "status 404 Not Found".to_string(),
                })
        }

        async fn list_escalation_policies(&self) -> Result<Vec<Value>> {
            Ok(self.policies.clone())
        }
    }

    fn schedule(id: &str, entries: &[(&str, &str)]) -> Value {
        let entries: Vec<Value> = entries
            .iter()
            .map(|(start, end)| json!({"start": start, "end": end}))
            .collect();
        json!({
            "schedule": {
                "id": id,
                "name": format!("Schedule {id}"),
                "html_url": format!("https://example.pagerduty.com/schedules/{id}"),
                "final_schedule": {
                    "rendered_coverage_percentage": 56.3,
                    "rendered_schedule_entries": entries
                }
            }
        })
    }

    fn policy(id: &str, rules: &[&[&str]]) -> Value {
        let rules: Vec<Value> = rules
            .iter()
            .map(|targets| {
                let targets: Vec<Value> = targets
                    .iter()
                    .map(|target| {
                        json!({"id": target, "type": "schedule_reference", "summary": target})
                    })
                    .collect();
                json!({"targets": targets})
            })
            .collect();
        json!({
            "id": id,
            "name": format!("Policy {id}"),
            "html_url": format!("https://example.pagerduty.com/escalation_policies/{id}"),
            "escalation_rules": rules
        })
    }

    fn shift_schedules() -> BTreeMap<String, Value> {
        let mut schedules = BTreeMap::new();
        schedules.insert(
            "sch1".to_string(),
            schedule(
                "sch1",
                &[
                    ("2022-07-29T04:18:19Z", "2022-07-29T12:00:00Z"),
                    ("2022-07-30T00:00:00Z", "2022-07-30T12:00:00Z"),
                    ("2022-07-31T00:00:00Z", "2022-07-31T12:00:00Z"),
                ],
            ),
        );
        schedules.insert(
            "sch2".to_string(),
            schedule(
                "sch2",
                &[
                    ("2022-07-29T04:18:19Z", "2022-07-30T00:00:00Z"),
                    ("2022-07-30T12:30:00Z", "2022-07-31T00:00:00Z"),
                    ("2022-07-31T12:30:00Z", "2022-08-01T00:00:00Z"),
                ],
            ),
        );
        schedules.insert(
            "sch3".to_string(),
            schedule(
                "sch3",
                &[
                    ("2022-07-29T04:18:19Z", "2022-07-30T00:00:00Z"),
                    ("2022-07-30T12:00:00Z", "2022-07-31T00:00:00Z"),
                    ("2022-07-31T12:00:00Z", "2022-08-01T00:00:00Z"),
                ],
            ),
        );
        schedules.insert(
            "sch4".to_string(),
            schedule(
                "sch4",
                &[
                    ("2022-07-29T04:18:19Z", "2022-07-30T00:00:00Z"),
                    ("2022-07-30T12:00:00Z", "2022-07-31T00:00:00Z"),
                    ("2022-07-31T12:00:00Z", "2022-07-31T23:00:00Z"),
                ],
            ),
        );
        schedules
    }

    fn window() -> ReportWindow {
        ReportWindow::new(
            parse_isotime("2022-07-29T04:18:19Z").unwrap(),
            parse_isotime("2022-08-01T00:00:00Z").unwrap(),
        )
    }

    fn verdict(results: &CoverageResults, policy_id: &str, rule_index: usize) -> Coverage {
        results
            .rules
            .iter()
            .find(|rule| rule.policy_id == policy_id && rule.rule_index == rule_index)
            .map(|rule| rule.is_fully_covered)
            .unwrap()
    }

    #[tokio::test]
    async fn rules_are_covered_only_when_schedules_fill_each_other() {
        let source = FakeSource {
            schedules: shift_schedules(),
            policies: vec![
                policy("PGAP", &[&["sch1", "sch2"]]),
                policy("PNOGAP", &[&["sch1", "sch3"]]),
                policy("PSHORT", &[&["sch1", "sch4"]]),
            ],
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(verdict(&results, "PGAP", 1), Coverage::Gapped);
        assert_eq!(verdict(&results, "PNOGAP", 1), Coverage::Covered);
        assert_eq!(verdict(&results, "PSHORT", 1), Coverage::Gapped);
    }

    #[tokio::test]
    async fn every_schedule_gets_its_own_verdict() {
        let mut schedules = shift_schedules();
        schedules.insert(
            "full".to_string(),
            schedule("full", &[("2022-07-29T00:00:00Z", "2022-08-02T00:00:00Z")]),
        );
        let source = FakeSource {
            schedules,
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(results.schedules.len(), 5);
        for schedule in &results.schedules {
            let expected = if schedule.id == "full" {
                Coverage::Covered
            } else {
                Coverage::Gapped
            };
            assert_eq!(schedule.is_fully_covered, expected, "{}", schedule.id);
        }
    }

    #[tokio::test]
    async fn rule_without_schedule_targets_is_not_covered() {
        let source = FakeSource {
            schedules: shift_schedules(),
            policies: vec![policy("PUSERS", &[&[]])],
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(verdict(&results, "PUSERS", 1), Coverage::Gapped);
    }

    #[tokio::test]
    async fn failed_schedule_fetch_is_omitted_and_contributes_nothing() {
        let mut schedules = shift_schedules();
        schedules.remove("sch3");
        let source = FakeSource {
            schedules,
            unreachable: BTreeSet::from(["sch3".to_string()]),
            policies: vec![policy("PNOGAP", &[&["sch1", "sch3"]])],
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(results.schedules.len(), 3);
        assert!(results.schedules.iter().all(|s| s.id != "sch3"));
        assert_eq!(verdict(&results, "PNOGAP", 1), Coverage::Gapped);
    }

    #[tokio::test]
    async fn unknown_schedule_ids_are_skipped() {
        let source = FakeSource {
            schedules: shift_schedules(),
            policies: vec![policy("PNOGAP", &[&["sch1", "deleted", "sch3"]])],
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(verdict(&results, "PNOGAP", 1), Coverage::Covered);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let mut schedules = shift_schedules();
        schedules.insert(
            "broken".to_string(),
            schedule("broken", &[("2022-07-29T12:00:00Z", "2022-07-29T04:00:00Z")]),
        );
        let source = FakeSource {
            schedules,
            policies: vec![
                json!({"id": "PBROKEN", "escalation_rules": []}),
                policy("PNOGAP", &[&["sch1", "sch3"]]),
            ],
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(results.schedules.len(), 4);
        assert_eq!(results.rules.len(), 1);
        assert_eq!(verdict(&results, "PNOGAP", 1), Coverage::Covered);
    }

    #[tokio::test]
    async fn listing_failure_aborts_the_run() {
        let source = FakeSource {
            schedules: shift_schedules(),
            fail_listing: true,
            ..Default::default()
        };

        let err = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap_err();

        assert!(matches!(err, CoverageError::QueryFailure { status: 401, .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn same_index_in_different_policies_are_distinct() {
        let source = FakeSource {
            schedules: shift_schedules(),
            policies: vec![
                policy("PGAP", &[&["sch1", "sch2"], &["sch1", "sch3"]]),
                policy("PNOGAP", &[&["sch1", "sch3"]]),
            ],
            ..Default::default()
        };

        let results = CoverageGapReport::new(source, window())
            .run_reports()
            .await
            .unwrap();

        assert_eq!(results.rules.len(), 3);
        assert_eq!(verdict(&results, "PGAP", 1), Coverage::Gapped);
        assert_eq!(verdict(&results, "PGAP", 2), Coverage::Covered);
        assert_eq!(verdict(&results, "PNOGAP", 1), Coverage::Covered);
    }

    #[tokio::test]
    async fn schedule_fetch_failure_yields_none() {
        let report = CoverageGapReport::new(FakeSource::default(), window());

        let result = report.get_schedule_coverage("PG3MDI8").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn schedule_fetch_maps_payload() {
        let source = FakeSource {
            schedules: shift_schedules(),
            ..Default::default()
        };
        let report = CoverageGapReport::new(source, window());

        let schedule = report.get_schedule_coverage("sch1").await.unwrap().unwrap();
        assert_eq!(schedule.id, "sch1");
        assert_eq!(schedule.entries.len(), 3);
        assert_eq!(schedule.is_fully_covered, Coverage::Unknown);
    }

    #[test]
    fn reprocessed_rule_replaces_the_earlier_record() {
        let mut report = CoverageGapReport::new(FakeSource::default(), window());

        report.map_escalation_coverages(&[policy("PDUP", &[&["sch1"]])]);
        report.map_escalation_coverages(&[policy("PDUP", &[&["sch3"]])]);

        assert_eq!(report.escalation_map.len(), 1);
        let key = RuleKey {
            policy_id: "PDUP".to_string(),
            rule_index: 1,
        };
        assert_eq!(report.escalation_map[&key].rule_target_ids, vec!["sch3"]);
    }

    #[test]
    fn extract_entries_unions_known_schedules() {
        let mut schedule_map = BTreeMap::new();
        for (id, payload) in shift_schedules() {
            schedule_map.insert(id, ScheduleCoverage::build_from(&payload).unwrap());
        }

        let ids = vec!["sch1".to_string(), "missing".to_string(), "sch2".to_string()];
        assert_eq!(extract_entries(&schedule_map, &ids).len(), 6);
        assert!(extract_entries(&schedule_map, &[]).is_empty());
    }
}

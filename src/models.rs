use chrono::{DateTime, Utc};

/// Half-open span `[start, end)` on the UTC timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Returns `None` when `end` is before `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }
}

/// Full-coverage verdict. Starts `Unknown`, set once during hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    #[default]
    Unknown,
    Covered,
    Gapped,
}

impl Coverage {
    pub fn from_covered(covered: bool) -> Self {
        if covered {
            Coverage::Covered
        } else {
            Coverage::Gapped
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Coverage::Unknown => None,
            Coverage::Covered => Some(true),
            Coverage::Gapped => Some(false),
        }
    }

    /// Moves `Unknown` to a verdict. Returns false, leaving the value alone,
    /// if a verdict was already recorded.
    pub fn hydrate(&mut self, covered: bool) -> bool {
        if *self != Coverage::Unknown {
            return false;
        }
        *self = Coverage::from_covered(covered);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCoverage {
    pub id: String,
    pub name: String,
    pub url: String,
    pub coverage_percentage: f64,
    /// Entries in the order received; may overlap or touch.
    pub entries: Vec<TimeInterval>,
    pub is_fully_covered: Coverage,
}

/// Unique key of an escalation rule across a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleKey {
    pub policy_id: String,
    pub rule_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationRuleCoverage {
    pub policy_id: String,
    /// 1-based position of the rule in its policy.
    pub rule_index: usize,
    pub name: String,
    pub url: String,
    pub rule_target_names: Vec<String>,
    /// Schedule targets only.
    pub rule_target_ids: Vec<String>,
    pub is_fully_covered: Coverage,
}

impl EscalationRuleCoverage {
    pub fn key(&self) -> RuleKey {
        RuleKey {
            policy_id: self.policy_id.clone(),
            rule_index: self.rule_index,
        }
    }
}

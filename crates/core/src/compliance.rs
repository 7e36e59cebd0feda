//! Advance Beneficiary Notice (ABN) determination.
//!
//! [`ComplianceEvaluator::evaluate`] is a pure function of the patient's insurance, the
//! facility's policies and the tests being ordered. It has two independent triggers:
//!
//! - **Policy**: a test code matches a policy's pattern, the policy requires a notice, and
//!   the patient's primary payer name contains the policy's payer type.
//! - **High-cost keyword**: the test's display name contains one of the configured keywords.
//!   This fires regardless of payer.

use crate::constants::HIGH_COST_NOTICE_REASON;
use crate::directory::CompendiumItem;
use crate::order::{FacilityId, OrderTest};
use serde::{Deserialize, Serialize};

/// A facility-scoped rule saying which payers need a notice for which tests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompliancePolicy {
    pub facility_id: FacilityId,
    /// Test-code pattern with an optional leading and/or trailing `%` wildcard.
    pub test_code_pattern: String,
    /// Matched case-insensitively as a substring of the payer name, e.g. `medicare`.
    pub payer_type: String,
    pub requires_notice: bool,
    pub reason: String,
}

/// A test-code pattern. `%` is only a wildcard at either end; a pattern with `%` anywhere
/// else never matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WildcardPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Never,
}

impl WildcardPattern {
    pub fn parse(pattern: &str) -> Self {
        let upper = pattern.trim().to_uppercase();
        let leading = upper.starts_with('%');
        let trailing = upper.len() > 1 && upper.ends_with('%');
        let start = usize::from(leading);
        let end = upper.len() - usize::from(trailing);
        let core = if start <= end { &upper[start..end] } else { "" };

        if core.contains('%') {
            return WildcardPattern::Never;
        }
        let core = core.to_owned();
        match (leading, trailing) {
            (true, true) => WildcardPattern::Contains(core),
            (true, false) => WildcardPattern::Suffix(core),
            (false, true) => WildcardPattern::Prefix(core),
            (false, false) => WildcardPattern::Exact(core),
        }
    }

    pub fn matches(&self, code: &str) -> bool {
        let code = code.trim().to_uppercase();
        match self {
            WildcardPattern::Exact(p) => code == *p,
            WildcardPattern::Prefix(p) => code.starts_with(p.as_str()),
            WildcardPattern::Suffix(p) => code.ends_with(p.as_str()),
            WildcardPattern::Contains(p) => code.contains(p.as_str()),
            WildcardPattern::Never => false,
        }
    }
}

/// The payer information the evaluator needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatientInsurance {
    pub primary_payer: Option<String>,
}

impl PatientInsurance {
    pub fn new(primary_payer: Option<String>) -> Self {
        Self { primary_payer }
    }

    fn payer_matches(&self, payer_type: &str) -> bool {
        let payer_type = payer_type.trim().to_lowercase();
        if payer_type.is_empty() {
            return false;
        }
        self.primary_payer
            .as_deref()
            .is_some_and(|payer| payer.to_lowercase().contains(&payer_type))
    }
}

/// The code and display name of one test under evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComplianceTest {
    pub code: String,
    pub name: String,
}

impl From<&OrderTest> for ComplianceTest {
    fn from(test: &OrderTest) -> Self {
        Self {
            code: test.code.to_string(),
            name: test.name.to_string(),
        }
    }
}

impl From<&CompendiumItem> for ComplianceTest {
    fn from(item: &CompendiumItem) -> Self {
        Self {
            code: item.code.clone(),
            name: item.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCompliance {
    pub code: String,
    pub name: String,
    pub required: bool,
    pub reasons: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceAssessment {
    pub required: bool,
    /// Distinct reasons, in the order they first triggered.
    pub reasons: Vec<String>,
    /// One entry per evaluated test, in input order.
    pub per_test: Vec<TestCompliance>,
}

#[derive(Clone, Debug)]
pub struct ComplianceEvaluator {
    keywords: Vec<String>,
}

impl Default for ComplianceEvaluator {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_HIGH_COST_KEYWORDS
                .iter()
                .map(|k| (*k).to_owned())
                .collect(),
        )
    }
}

impl ComplianceEvaluator {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_uppercase()).collect(),
        }
    }

    pub fn evaluate(
        &self,
        insurance: &PatientInsurance,
        policies: &[CompliancePolicy],
        tests: &[ComplianceTest],
    ) -> ComplianceAssessment {
        let compiled: Vec<(WildcardPattern, &CompliancePolicy)> = policies
            .iter()
            .map(|policy| (WildcardPattern::parse(&policy.test_code_pattern), policy))
            .collect();

        let mut assessment = ComplianceAssessment::default();
        for test in tests {
            let mut reasons: Vec<String> = Vec::new();
            let matching_requiring = compiled
                .iter()
                .filter(|(pattern, policy)| policy.requires_notice && pattern.matches(&test.code))
                .map(|(_, policy)| *policy);

            for policy in matching_requiring.clone() {
                if insurance.payer_matches(&policy.payer_type) {
                    push_unique(&mut reasons, &policy.reason);
                }
            }

            if self.is_high_cost(&test.name) {
                let reason = matching_requiring
                    .map(|policy| policy.reason.as_str())
                    .next()
                    .unwrap_or(HIGH_COST_NOTICE_REASON);
                push_unique(&mut reasons, reason);
            }

            for reason in &reasons {
                push_unique(&mut assessment.reasons, reason);
            }
            assessment.per_test.push(TestCompliance {
                code: test.code.clone(),
                name: test.name.clone(),
                required: !reasons.is_empty(),
                reasons,
            });
        }

        assessment.required = !assessment.reasons.is_empty();
        assessment
    }

    fn is_high_cost(&self, name: &str) -> bool {
        let name = name.to_uppercase();
        self.keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && name.contains(keyword.as_str()))
    }
}

fn push_unique(reasons: &mut Vec<String>, reason: &str) {
    if !reasons.iter().any(|r| r == reason) {
        reasons.push(reason.to_owned());
    }
}

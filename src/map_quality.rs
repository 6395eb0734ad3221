// ✅ Map Quality - Diagnostics over the loaded change maps
//
// Nothing here stops a run. The checks surface the irregularities that make
// reconciliation results harder to read: family prefixes nested inside other
// family prefixes, one old code sent to two places, rules that chain into
// later rules.

use crate::mapping::{CodeMapping, FULL_CODE_LEN};
use crate::prefix_index::PrefixIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // The rule cannot be applied as written
    Warning,  // The rule applies, but results need a second look
    Info,     // Worth knowing, harmless
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    InvalidCode,
    OverlappingPrefix,
    ConflictingTarget,
    SelfMapping,
    DuplicateRule,
    Chained,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub old_code: String,
    pub detail: String,
}

impl MapIssue {
    fn new(severity: Severity, kind: IssueKind, old_code: &str, detail: String) -> Self {
        MapIssue {
            severity,
            kind,
            old_code: old_code.to_string(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapQualityReport {
    pub rules_checked: usize,
    pub issues: Vec<MapIssue>,
}

impl MapQualityReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.count(Severity::Critical) > 0
    }

    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &MapIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rules checked: {} critical, {} warnings, {} info",
            self.rules_checked,
            self.count(Severity::Critical),
            self.count(Severity::Warning),
            self.count(Severity::Info)
        )
    }
}

// ============================================================================
// MAP QUALITY ENGINE
// ============================================================================

pub struct MapQualityEngine;

impl MapQualityEngine {
    pub fn new() -> Self {
        MapQualityEngine
    }

    /// Run every check; issues come back ordered by severity, then old code
    pub fn inspect(&self, mappings: &[CodeMapping]) -> MapQualityReport {
        let mut issues = Vec::new();

        issues.extend(self.check_codes(mappings));
        issues.extend(self.check_self_mappings(mappings));
        issues.extend(self.check_duplicates(mappings));
        issues.extend(self.check_conflicting_targets(mappings));
        issues.extend(self.check_overlapping_prefixes(mappings));
        issues.extend(self.check_chains(mappings));

        issues.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.old_code.cmp(&b.old_code))
        });

        MapQualityReport {
            rules_checked: mappings.len(),
            issues,
        }
    }

    fn check_codes(&self, mappings: &[CodeMapping]) -> Vec<MapIssue> {
        let mut issues = Vec::new();

        for m in mappings {
            for code in [&m.old_code, &m.new_code] {
                if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                    issues.push(MapIssue::new(
                        Severity::Critical,
                        IssueKind::InvalidCode,
                        &m.old_code,
                        format!("'{}' contains characters outside A-Z, 0-9", code),
                    ));
                } else if code.len() > FULL_CODE_LEN {
                    issues.push(MapIssue::new(
                        Severity::Critical,
                        IssueKind::InvalidCode,
                        &m.old_code,
                        format!("'{}' is longer than {} characters", code, FULL_CODE_LEN),
                    ));
                }
            }
        }

        issues
    }

    fn check_self_mappings(&self, mappings: &[CodeMapping]) -> Vec<MapIssue> {
        mappings
            .iter()
            .filter(|m| m.old_code == m.new_code)
            .map(|m| {
                MapIssue::new(
                    Severity::Warning,
                    IssueKind::SelfMapping,
                    &m.old_code,
                    format!("maps to itself from {}", m.effective_date),
                )
            })
            .collect()
    }

    fn check_duplicates(&self, mappings: &[CodeMapping]) -> Vec<MapIssue> {
        let mut seen: BTreeMap<&CodeMapping, usize> = BTreeMap::new();
        for m in mappings {
            *seen.entry(m).or_insert(0) += 1;
        }

        seen.into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(m, n)| {
                MapIssue::new(
                    Severity::Info,
                    IssueKind::DuplicateRule,
                    &m.old_code,
                    format!(
                        "{} -> {} ({}) listed {} times",
                        m.old_code, m.new_code, m.effective_date, n
                    ),
                )
            })
            .collect()
    }

    fn check_conflicting_targets(&self, mappings: &[CodeMapping]) -> Vec<MapIssue> {
        let mut targets: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for m in mappings {
            targets
                .entry(m.old_code.as_str())
                .or_default()
                .insert(m.new_code.as_str());
        }

        targets
            .into_iter()
            .filter(|(_, news)| news.len() > 1)
            .map(|(old, news)| {
                MapIssue::new(
                    Severity::Warning,
                    IssueKind::ConflictingTarget,
                    old,
                    format!(
                        "mapped to {} different codes: {}",
                        news.len(),
                        news.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                )
            })
            .collect()
    }

    /// Old codes nested inside shorter old codes; the longer one takes its facts
    fn check_overlapping_prefixes(&self, mappings: &[CodeMapping]) -> Vec<MapIssue> {
        let index = PrefixIndex::new(mappings.iter().map(|m| m.old_code.as_str()));

        index
            .iter()
            .flat_map(|code| {
                index
                    .all_matches(code)
                    .into_iter()
                    .filter(move |shorter| *shorter != code)
                    .map(move |shorter| {
                        MapIssue::new(
                            Severity::Warning,
                            IssueKind::OverlappingPrefix,
                            shorter,
                            format!(
                                "{} nests inside {}; codes starting {} follow the longer rule",
                                code, shorter, code
                            ),
                        )
                    })
            })
            .collect()
    }

    fn check_chains(&self, mappings: &[CodeMapping]) -> Vec<MapIssue> {
        let mut by_old: HashMap<&str, Vec<&CodeMapping>> = HashMap::new();
        for m in mappings {
            by_old.entry(m.old_code.as_str()).or_default().push(m);
        }

        let mut issues = Vec::new();
        for m in mappings.iter().filter(|m| m.old_code != m.new_code) {
            let Some(next_rules) = by_old.get(m.new_code.as_str()) else {
                continue;
            };
            for next in next_rules.iter().filter(|n| n.effective_date > m.effective_date) {
                issues.push(MapIssue::new(
                    Severity::Info,
                    IssueKind::Chained,
                    &m.old_code,
                    format!(
                        "{} -> {} ({}) -> {} ({})",
                        m.old_code, m.new_code, m.effective_date, next.new_code, next.effective_date
                    ),
                ));
            }
        }
        issues
    }
}

impl Default for MapQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rule(old: &str, new: &str, year: i32) -> CodeMapping {
        CodeMapping::new(old, new, NaiveDate::from_ymd_opt(year, 1, 1).unwrap())
    }

    #[test]
    fn test_clean_map() {
        let report = MapQualityEngine::new().inspect(&[
            rule("0304000A0AAAAAA", "0304000B0AAAAAA", 2015),
            rule("0601", "0602", 2016),
        ]);

        assert!(report.issues.is_empty());
        assert_eq!(report.rules_checked, 2);
        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_overlapping_prefixes_flagged() {
        let report = MapQualityEngine::new().inspect(&[
            rule("0304", "0399", 2015),
            rule("030402", "030499", 2015),
            rule("0304020Z0", "0304020Z1", 2016),
        ]);

        let overlaps: Vec<&MapIssue> = report.of_kind(IssueKind::OverlappingPrefix).collect();
        // 030402 inside 0304; 0304020Z0 inside both
        assert_eq!(overlaps.len(), 3);
        assert!(overlaps.iter().all(|i| i.severity == Severity::Warning));
        assert_eq!(overlaps.iter().filter(|i| i.old_code == "0304").count(), 2);
    }

    #[test]
    fn test_conflicting_targets_and_duplicates() {
        let report = MapQualityEngine::new().inspect(&[
            rule("0304", "0305", 2015),
            rule("0304", "0305", 2015),
            rule("0304", "0306", 2017),
        ]);

        assert_eq!(report.of_kind(IssueKind::DuplicateRule).count(), 1);
        let conflict: Vec<&MapIssue> = report.of_kind(IssueKind::ConflictingTarget).collect();
        assert_eq!(conflict.len(), 1);
        assert!(conflict[0].detail.contains("0305, 0306"));
    }

    #[test]
    fn test_self_mapping_and_invalid_code() {
        let report = MapQualityEngine::new().inspect(&[
            rule("0304", "0304", 2015),
            rule("03 04", "0305", 2015),
        ]);

        assert_eq!(report.of_kind(IssueKind::SelfMapping).count(), 1);
        assert!(report.has_critical_issues());
        // Critical issues sort first
        assert_eq!(report.issues[0].kind, IssueKind::InvalidCode);
    }

    #[test]
    fn test_chained_rules() {
        let report = MapQualityEngine::new().inspect(&[
            rule("A1", "B1", 2015),
            rule("B1", "C1", 2017),
            // Earlier rule on the new code is not a chain
            rule("C1", "D1", 2014),
        ]);

        let chains: Vec<&MapIssue> = report.of_kind(IssueKind::Chained).collect();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].old_code, "A1");
        assert!(chains[0].detail.contains("C1"));
    }
}

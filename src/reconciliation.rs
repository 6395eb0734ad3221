// ⚖️ Reconciliation Engine - Prescribing still recorded under old codes
//
// For every fact, find the most specific old code that prefixes its BNF
// code, keep it only if it was prescribed AFTER that code's change date,
// and total what is left per (old_code, new_code, name, change date).
//
// Then look at the "new" side of each rule: if the new code already carries
// prescribing of its own, the two coexist. That is a signal for a human,
// never a verdict.

use crate::facts::PrescribingFact;
use crate::mapping::CodeMapping;
use crate::prefix_index::PrefixIndex;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

// ============================================================================
// RESULT RECORDS
// ============================================================================

/// Old-code prescribing after the change date, totalled per rule and name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub old_code: String,
    pub new_code: String,
    pub name: String,
    pub effective_date: NaiveDate,
    pub total_items: i64,
    pub latest_period: NaiveDate,
}

/// What the new code of a reconciled rule is carrying on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionRecord {
    pub old_code: String,
    pub new_code: String,
    pub old_name: String,
    pub effective_date: NaiveDate,
    pub old_code_items: i64,
    pub new_code_items: i64,
    pub new_code_names: Vec<String>,
    pub new_code_latest_period: Option<NaiveDate>,
}

impl CollisionRecord {
    /// Both sides of the rule still carry prescribing
    pub fn coexisting(&self) -> bool {
        self.old_code_items != 0 && self.new_code_items != 0
    }
}

/// Matched rows for family-level (partial) old codes, before date filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMatch {
    pub old_code: String,
    pub new_code: String,
    pub matched_code: String,
    pub name: String,
    pub total_items: i64,
}

/// Row counts per stage, so an empty table can be traced to the stage that emptied it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStats {
    pub mappings: usize,
    pub facts_considered: usize,
    pub facts_matched: usize,
    pub facts_unmatched: usize,
    pub matches_after_change: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub reconciled: Vec<ReconciledRecord>,
    pub collisions: Vec<CollisionRecord>,
    pub partial_matches: Vec<PartialMatch>,
    pub stats: ReconciliationStats,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.reconciled.is_empty()
    }

    pub fn coexisting_count(&self) -> usize {
        self.collisions.iter().filter(|c| c.coexisting()).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} facts, {} matched an old code, {} after the change date → \
             {} lingering rules ({} items), {} coexisting with new-code prescribing",
            self.stats.facts_considered,
            self.stats.facts_matched,
            self.stats.matches_after_change,
            self.reconciled.len(),
            self.reconciled.iter().map(|r| r.total_items).sum::<i64>(),
            self.coexisting_count()
        )
    }
}

/// A fact joined to the rule it falls under
#[derive(Debug, Clone, Copy)]
pub struct MatchedFact<'a> {
    pub mapping: &'a CodeMapping,
    pub fact: &'a PrescribingFact,
}

impl MatchedFact<'_> {
    pub fn after_change(&self) -> bool {
        self.fact.period > self.mapping.effective_date
    }
}

type GroupKey = (String, String, String, NaiveDate);

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine<'a> {
    mappings: &'a [CodeMapping],
    index: PrefixIndex,
    by_old_code: HashMap<&'a str, BTreeSet<&'a CodeMapping>>,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(mappings: &'a [CodeMapping]) -> Self {
        // Identical rules repeated across rows or files join a fact only once
        let mut by_old_code: HashMap<&str, BTreeSet<&CodeMapping>> = HashMap::new();
        for mapping in mappings {
            by_old_code
                .entry(mapping.old_code.as_str())
                .or_default()
                .insert(mapping);
        }

        ReconciliationEngine {
            mappings,
            index: PrefixIndex::new(mappings.iter().map(|m| m.old_code.as_str())),
            by_old_code,
        }
    }

    /// Run every check over the facts
    ///
    /// Example:
    /// ```
    /// use bnf_map_checker::{CodeMapping, PrescribingFact, ReconciliationEngine};
    /// use chrono::NaiveDate;
    ///
    /// let jan = |y| NaiveDate::from_ymd_opt(y, 1, 1).unwrap();
    /// let maps = vec![CodeMapping::new("0304", "0305", jan(2015))];
    /// let facts = vec![PrescribingFact::new(jan(2016), "0304000A0", "DrugX", 10)];
    ///
    /// let report = ReconciliationEngine::new(&maps).reconcile(&facts);
    /// assert_eq!(report.reconciled.len(), 1);
    /// assert_eq!(report.reconciled[0].total_items, 10);
    /// ```
    pub fn reconcile(&self, facts: &[PrescribingFact]) -> ReconciliationReport {
        let matched = self.match_facts(facts);
        let retained: Vec<MatchedFact> = matched
            .iter()
            .copied()
            .filter(|m| m.after_change())
            .collect();

        let facts_matched = facts
            .iter()
            .filter(|f| self.index.longest_match(&f.code).is_some())
            .count();

        let reconciled = self.aggregate(&retained);
        let collisions = self.check_collisions(&reconciled, facts);
        let partial_matches = self.partial_matches(&matched);

        let stats = ReconciliationStats {
            mappings: self.mappings.len(),
            facts_considered: facts.len(),
            facts_matched,
            facts_unmatched: facts.len() - facts_matched,
            matches_after_change: retained.len(),
        };

        let report = ReconciliationReport {
            reconciled,
            collisions,
            partial_matches,
            stats,
            reconciled_at: chrono::Utc::now(),
        };
        info!("{}", report.summary());
        report
    }

    /// Join each fact to the rules of its most specific old code
    ///
    /// Facts with no matching old code are dropped. When one old code
    /// appears in several rules the fact is joined to each of them.
    pub fn match_facts<'f>(&'f self, facts: &'f [PrescribingFact]) -> Vec<MatchedFact<'f>> {
        let mut matched = Vec::new();

        for fact in facts {
            let Some(prefix) = self.index.longest_match(&fact.code) else {
                continue;
            };
            if let Some(rules) = self.by_old_code.get(prefix) {
                for &mapping in rules {
                    matched.push(MatchedFact { mapping, fact });
                }
            }
        }

        matched
    }

    /// Total items and latest month per (old_code, new_code, name, change date)
    ///
    /// Largest totals first; ties fall back to the key so output is stable.
    pub fn aggregate(&self, matches: &[MatchedFact]) -> Vec<ReconciledRecord> {
        let mut groups: BTreeMap<GroupKey, (i64, NaiveDate)> = BTreeMap::new();

        for m in matches {
            let key = (
                m.mapping.old_code.clone(),
                m.mapping.new_code.clone(),
                m.fact.name.clone(),
                m.mapping.effective_date,
            );
            let entry = groups.entry(key).or_insert((0, m.fact.period));
            entry.0 += m.fact.quantity;
            entry.1 = entry.1.max(m.fact.period);
        }

        let mut records: Vec<ReconciledRecord> = groups
            .into_iter()
            .map(|(key, (total_items, latest_period))| {
                let (old_code, new_code, name, effective_date) = key;
                ReconciledRecord {
                    old_code,
                    new_code,
                    name,
                    effective_date,
                    total_items,
                    latest_period,
                }
            })
            .collect();

        // BTreeMap iteration already orders by key; a stable sort keeps that for ties
        records.sort_by(|a, b| b.total_items.cmp(&a.total_items));
        records
    }

    /// For each reconciled rule, what the new code carries independently
    pub fn check_collisions(
        &self,
        reconciled: &[ReconciledRecord],
        facts: &[PrescribingFact],
    ) -> Vec<CollisionRecord> {
        let mut by_code: HashMap<&str, Vec<&PrescribingFact>> = HashMap::new();
        for fact in facts {
            by_code.entry(fact.code.as_str()).or_default().push(fact);
        }

        reconciled
            .iter()
            .map(|record| {
                let on_new_code = by_code
                    .get(record.new_code.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);

                let names: BTreeSet<&str> = on_new_code.iter().map(|f| f.name.as_str()).collect();

                CollisionRecord {
                    old_code: record.old_code.clone(),
                    new_code: record.new_code.clone(),
                    old_name: record.name.clone(),
                    effective_date: record.effective_date,
                    old_code_items: record.total_items,
                    new_code_items: on_new_code.iter().map(|f| f.quantity).sum(),
                    new_code_names: names.into_iter().map(str::to_string).collect(),
                    new_code_latest_period: on_new_code.iter().map(|f| f.period).max(),
                }
            })
            .collect()
    }

    /// Matches made through family-level old codes, for checking they map as intended
    pub fn partial_matches(&self, matches: &[MatchedFact]) -> Vec<PartialMatch> {
        let mut groups: BTreeMap<(String, String, String, String), i64> = BTreeMap::new();

        for m in matches.iter().filter(|m| m.mapping.is_partial()) {
            let key = (
                m.mapping.old_code.clone(),
                m.mapping.new_code.clone(),
                m.fact.code.clone(),
                m.fact.name.clone(),
            );
            *groups.entry(key).or_insert(0) += m.fact.quantity;
        }

        groups
            .into_iter()
            .map(|((old_code, new_code, matched_code, name), total_items)| PartialMatch {
                old_code,
                new_code,
                matched_code,
                name,
                total_items,
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

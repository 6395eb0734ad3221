// 📋 Report Output - Tables for people, JSON for everything else

use crate::error::Result;
use crate::map_quality::MapQualityReport;
use crate::mapping::CodeMapping;
use crate::period::format_period;
use crate::reconciliation::{CollisionRecord, PartialMatch, ReconciledRecord, ReconciliationReport};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// Column-aligned plain text table
struct TextTable {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
    total_rows: usize,
}

impl TextTable {
    fn new(headers: Vec<&'static str>, total_rows: usize) -> Self {
        TextTable {
            headers,
            rows: Vec::new(),
            total_rows,
        }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let line = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, &w)| format!("{:<width$}", cell, width = w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = String::new();
        out.push_str(&line(self.headers.clone()));
        out.push('\n');
        let dashes: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
        out.push_str(&line(dashes.iter().map(String::as_str).collect()));
        out.push('\n');

        if self.rows.is_empty() {
            out.push_str("(no rows)\n");
        }
        for row in &self.rows {
            out.push_str(&line(row.iter().map(String::as_str).collect()));
            out.push('\n');
        }
        if self.total_rows > self.rows.len() {
            out.push_str(&format!("... {} more rows\n", self.total_rows - self.rows.len()));
        }
        out
    }
}

pub fn render_reconciled(records: &[ReconciledRecord], limit: usize) -> String {
    let mut table = TextTable::new(
        vec!["old_code", "new_code", "name", "change_date", "items", "latest_month"],
        records.len(),
    );
    for r in records.iter().take(limit) {
        table.push(vec![
            r.old_code.clone(),
            r.new_code.clone(),
            r.name.clone(),
            format_period(r.effective_date),
            r.total_items.to_string(),
            format_period(r.latest_period),
        ]);
    }
    table.render()
}

pub fn render_collisions(records: &[CollisionRecord], limit: usize) -> String {
    let mut table = TextTable::new(
        vec![
            "old_code",
            "new_code",
            "old_name",
            "change_date",
            "old_items",
            "new_items",
            "new_code_names",
            "new_latest",
        ],
        records.len(),
    );
    for c in records.iter().take(limit) {
        table.push(vec![
            c.old_code.clone(),
            c.new_code.clone(),
            c.old_name.clone(),
            format_period(c.effective_date),
            c.old_code_items.to_string(),
            c.new_code_items.to_string(),
            c.new_code_names.join("; "),
            c.new_code_latest_period.map(format_period).unwrap_or_default(),
        ]);
    }
    table.render()
}

pub fn render_partial(records: &[PartialMatch], limit: usize) -> String {
    let mut table = TextTable::new(
        vec!["old_code", "new_code", "matched_code", "name", "items"],
        records.len(),
    );
    for p in records.iter().take(limit) {
        table.push(vec![
            p.old_code.clone(),
            p.new_code.clone(),
            p.matched_code.clone(),
            p.name.clone(),
            p.total_items.to_string(),
        ]);
    }
    table.render()
}

pub fn render_mappings(mappings: &[CodeMapping], limit: usize) -> String {
    let mut table = TextTable::new(vec!["old_code", "new_code", "change_date"], mappings.len());
    for m in mappings.iter().take(limit) {
        table.push(vec![
            m.old_code.clone(),
            m.new_code.clone(),
            format_period(m.effective_date),
        ]);
    }
    table.render()
}

pub fn render_issues(report: &MapQualityReport, limit: usize) -> String {
    let mut table = TextTable::new(
        vec!["severity", "kind", "old_code", "detail"],
        report.issues.len(),
    );
    for issue in report.issues.iter().take(limit) {
        table.push(vec![
            format!("{:?}", issue.severity),
            format!("{:?}", issue.kind),
            issue.old_code.clone(),
            issue.detail.clone(),
        ]);
    }
    table.render()
}

/// Write the whole report as pretty JSON, creating parent directories
pub fn write_json(report: &ReconciliationReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::ReconciliationStats;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn record(old: &str, name: &str, items: i64) -> ReconciledRecord {
        ReconciledRecord {
            old_code: old.to_string(),
            new_code: "0305".to_string(),
            name: name.to_string(),
            effective_date: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
            total_items: items,
            latest_period: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_render_reconciled_aligns_columns() {
        let records = [record("0304", "DrugX", 10), record("030402", "Reslizumab", 7)];
        let out = render_reconciled(&records, 10);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("old_code  new_code  name"));
        assert!(lines[2].starts_with("0304      0305      DrugX"));
        assert!(lines[3].contains("Reslizumab  2015-01-01"));
    }

    #[test]
    fn test_render_respects_limit() {
        let records: Vec<ReconciledRecord> =
            (0..5).map(|i| record("0304", &format!("D{}", i), i)).collect();
        let out = render_reconciled(&records, 2);

        assert_eq!(out.lines().count(), 5);
        assert!(out.ends_with("... 3 more rows\n"));
    }

    #[test]
    fn test_render_empty_table() {
        let out = render_collisions(&[], 10);
        assert!(out.contains("(no rows)"));
    }

    #[test]
    fn test_write_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let report = ReconciliationReport {
            reconciled: vec![record("0304", "DrugX", 10)],
            collisions: vec![],
            partial_matches: vec![],
            stats: ReconciliationStats::default(),
            reconciled_at: chrono::Utc::now(),
        };

        write_json(&report, &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["reconciled"][0]["old_code"], "0304");
        assert_eq!(value["reconciled"][0]["effective_date"], "2015-01-01");
    }
}

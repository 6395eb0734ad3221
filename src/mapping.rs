// 🗺️ Map Loader - BNF code change maps
//
// Each yearly file is tab-separated, two columns, no header:
//   old_bnf_code <TAB> new_bnf_code
// The change takes effect on January 1 of the year in the file name.
// An old code may be a family prefix rather than a full 15-character code.

use crate::error::{CheckerError, Result};
use crate::listing::{MapFile, MapSource};
use crate::period::effective_date_from_file_name;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Length of a full presentation-level BNF code
pub const FULL_CODE_LEN: usize = 15;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One remapping rule from a yearly map file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodeMapping {
    pub old_code: String,
    pub new_code: String,
    pub effective_date: NaiveDate,
}

impl CodeMapping {
    pub fn new(old_code: &str, new_code: &str, effective_date: NaiveDate) -> Self {
        CodeMapping {
            old_code: old_code.to_string(),
            new_code: new_code.to_string(),
            effective_date,
        }
    }

    /// True when the old code names a whole family rather than one presentation
    pub fn is_partial(&self) -> bool {
        self.old_code.len() != FULL_CODE_LEN
    }
}

/// Rows parsed from one map file
#[derive(Debug, Clone, Default)]
pub struct ParsedMapFile {
    pub mappings: Vec<CodeMapping>,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapFileSummary {
    pub name: String,
    pub effective_date: NaiveDate,
    pub rows: usize,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// Everything the Map Loader produced, including what it had to skip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLoadReport {
    pub mappings: Vec<CodeMapping>,
    pub files: Vec<MapFileSummary>,
    pub skipped_files: Vec<SkippedFile>,
}

impl MapLoadReport {
    /// Old codes followed by new codes, duplicates removed, first occurrence kept
    pub fn code_list(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.mappings
            .iter()
            .map(|m| &m.old_code)
            .chain(self.mappings.iter().map(|m| &m.new_code))
            .filter(|code| seen.insert(code.as_str()))
            .cloned()
            .collect()
    }

    pub fn skipped_row_count(&self) -> usize {
        self.files.iter().map(|f| f.skipped_rows).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} mappings from {} files ({} files skipped, {} rows skipped)",
            self.mappings.len(),
            self.files.len(),
            self.skipped_files.len(),
            self.skipped_row_count()
        )
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse the text of one map file
///
/// Rows without exactly two non-empty columns are skipped and counted.
pub fn parse_map_text(content: &str, effective_date: NaiveDate) -> ParsedMapFile {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut parsed = ParsedMapFile::default();

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "unreadable map row");
                parsed.skipped_rows += 1;
                continue;
            }
        };

        // Whitespace-only lines survive the reader as a single empty field
        if record.len() == 1 && record.get(0).map_or(true, str::is_empty) {
            continue;
        }

        match (record.len(), record.get(0), record.get(1)) {
            (2, Some(old), Some(new)) if !old.is_empty() && !new.is_empty() => {
                parsed
                    .mappings
                    .push(CodeMapping::new(old, new, effective_date));
            }
            _ => parsed.skipped_rows += 1,
        }
    }

    parsed
}

// ============================================================================
// LOADER
// ============================================================================

/// Load every yearly map a source lists
///
/// A file that cannot be named, fetched, or read is skipped with a warning.
/// Listing failure, or ending up with no rows at all, is fatal.
pub fn load_maps(source: &dyn MapSource) -> Result<MapLoadReport> {
    info!(source = %source.describe(), "loading code change maps");

    let mut listing = source.list()?;
    listing.sort_by(|a, b| a.name.cmp(&b.name));

    let mut batches: Vec<Vec<CodeMapping>> = Vec::new();
    let mut files = Vec::new();
    let mut skipped_files = Vec::new();

    for file in listing {
        if !file.is_map_file() {
            debug!(name = %file.name, "ignoring non-map entry");
            continue;
        }

        match load_one(source, &file) {
            Ok((summary, mappings)) => {
                if summary.skipped_rows > 0 {
                    warn!(
                        file = %summary.name,
                        skipped = summary.skipped_rows,
                        "skipped malformed map rows"
                    );
                }
                files.push(summary);
                batches.push(mappings);
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "skipping map file");
                skipped_files.push(SkippedFile {
                    name: file.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mappings: Vec<CodeMapping> = batches.into_iter().flatten().collect();
    if mappings.is_empty() {
        return Err(CheckerError::NoMaps);
    }

    let report = MapLoadReport {
        mappings,
        files,
        skipped_files,
    };
    info!("{}", report.summary());
    Ok(report)
}

fn load_one(source: &dyn MapSource, file: &MapFile) -> Result<(MapFileSummary, Vec<CodeMapping>)> {
    let effective_date = effective_date_from_file_name(&file.name)?;
    let content = source.fetch(file)?;
    let parsed = parse_map_text(&content, effective_date);

    let summary = MapFileSummary {
        name: file.name.clone(),
        effective_date,
        rows: parsed.mappings.len(),
        skipped_rows: parsed.skipped_rows,
    };
    Ok((summary, parsed.mappings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticSource {
        files: HashMap<String, Option<String>>,
    }

    impl StaticSource {
        fn new(files: &[(&str, Option<&str>)]) -> Self {
            StaticSource {
                files: files
                    .iter()
                    .map(|(n, c)| (n.to_string(), c.map(str::to_string)))
                    .collect(),
            }
        }
    }

    impl MapSource for StaticSource {
        fn list(&self) -> Result<Vec<MapFile>> {
            Ok(self
                .files
                .keys()
                .map(|name| MapFile::new(name, &format!("mem://{}", name)))
                .collect())
        }

        fn fetch(&self, file: &MapFile) -> Result<String> {
            match self.files.get(&file.name) {
                Some(Some(content)) => Ok(content.clone()),
                _ => Err(CheckerError::HttpStatus {
                    url: file.download_url.clone(),
                    status: 404,
                }),
            }
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    fn jan1(year: i32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, 1, 1).unwrap()
    }

    #[test]
    fn test_parse_map_text() {
        let parsed = parse_map_text("0304\t0305\n0601023AAAAAAAA\t0601023ABBBBBBB\n", jan1(2015));

        assert_eq!(parsed.skipped_rows, 0);
        assert_eq!(parsed.mappings.len(), 2);
        assert_eq!(parsed.mappings[0], CodeMapping::new("0304", "0305", jan1(2015)));
        assert!(parsed.mappings[0].is_partial());
        assert!(!parsed.mappings[1].is_partial());
    }

    #[test]
    fn test_parse_skips_malformed_rows() {
        let content = "0304\t0305\nonly_one_column\na\tb\tc\n\t0999\n\n0401\t0402\n";
        let parsed = parse_map_text(content, jan1(2016));

        assert_eq!(parsed.mappings.len(), 2);
        assert_eq!(parsed.skipped_rows, 3);
        assert_eq!(parsed.mappings[1].old_code, "0401");
    }

    #[test]
    fn test_parse_trims_whitespace_and_crlf() {
        let parsed = parse_map_text(" 0304 \t 0305\r\n", jan1(2017));
        assert_eq!(parsed.mappings, vec![CodeMapping::new("0304", "0305", jan1(2017))]);
    }

    #[test]
    fn test_load_maps_tags_effective_date() {
        let source = StaticSource::new(&[
            ("2015.txt", Some("0304\t0305\n")),
            ("2016.txt", Some("0401\t0402\n")),
            ("README.md", Some("not a map")),
        ]);

        let report = load_maps(&source).unwrap();

        assert_eq!(report.mappings.len(), 2);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.mappings[0].effective_date, jan1(2015));
        assert_eq!(report.mappings[1].effective_date, jan1(2016));
        assert!(report.skipped_files.is_empty());
    }

    #[test]
    fn test_load_maps_skips_failed_and_misnamed_files() {
        let source = StaticSource::new(&[
            ("2015.txt", Some("0304\t0305\n")),
            ("2016.txt", None),
            ("notes.txt", Some("a\tb\n")),
        ]);

        let report = load_maps(&source).unwrap();

        assert_eq!(report.mappings.len(), 1);
        assert_eq!(report.skipped_files.len(), 2);
        let names: Vec<&str> = report.skipped_files.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["2016.txt", "notes.txt"]);
        assert!(report.skipped_files[0].reason.contains("404"));
    }

    #[test]
    fn test_load_maps_with_nothing_loaded_is_fatal() {
        let source = StaticSource::new(&[("2016.txt", None), ("2017.txt", Some("garbage\n"))]);
        assert!(matches!(load_maps(&source), Err(CheckerError::NoMaps)));
    }

    #[test]
    fn test_code_list_old_then_new_deduplicated() {
        let report = MapLoadReport {
            mappings: vec![
                CodeMapping::new("A1", "B1", jan1(2015)),
                CodeMapping::new("A2", "A1", jan1(2016)),
                CodeMapping::new("A1", "B2", jan1(2017)),
            ],
            files: vec![],
            skipped_files: vec![],
        };

        assert_eq!(report.code_list(), vec!["A1", "A2", "B1", "B2"]);
    }
}

// 💊 Fact Loader - Prescribing rows for every mapped code
//
// Pulls (month, bnf_code, bnf_name, items) for every code that starts with
// any old or new code in the maps. One call to the fact source at most; a
// local CSV cache can stand in for it when the caller asks.

use crate::error::{CheckerError, Result};
use crate::period::{format_period, parse_period};
use crate::prefix_index::PrefixIndex;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CACHE_DIGEST_PREFIX: &str = "# filter-sha256:";

// ============================================================================
// CORE TYPES
// ============================================================================

/// One warehouse record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescribingFact {
    pub period: NaiveDate,
    pub code: String,
    pub name: String,
    pub quantity: i64,
}

impl PrescribingFact {
    pub fn new(period: NaiveDate, code: &str, name: &str, quantity: i64) -> Self {
        PrescribingFact {
            period,
            code: code.to_string(),
            name: name.to_string(),
            quantity,
        }
    }
}

/// CSV shape of a fact, matching the warehouse column names
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FactRow {
    month: String,
    bnf_code: String,
    bnf_name: String,
    items: i64,
}

impl TryFrom<FactRow> for PrescribingFact {
    type Error = CheckerError;

    fn try_from(row: FactRow) -> Result<Self> {
        Ok(PrescribingFact {
            period: parse_period(&row.month)?,
            code: row.bnf_code,
            name: row.bnf_name,
            quantity: row.items,
        })
    }
}

impl From<&PrescribingFact> for FactRow {
    fn from(fact: &PrescribingFact) -> Self {
        FactRow {
            month: format_period(fact.period),
            bnf_code: fact.code.clone(),
            bnf_name: fact.name.clone(),
            items: fact.quantity,
        }
    }
}

// ============================================================================
// CODE FILTER
// ============================================================================

/// Prefix filter: selects every fact whose code begins with one of the codes
#[derive(Debug, Clone)]
pub struct CodeFilter {
    prefixes: Vec<String>,
    index: PrefixIndex,
}

impl CodeFilter {
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = PrefixIndex::new(codes);
        let prefixes = index.iter().map(str::to_string).collect();
        CodeFilter { prefixes, index }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn matches(&self, code: &str) -> bool {
        self.index.longest_match(code).is_some()
    }

    /// `(col LIKE 'a%' OR col LIKE 'b%')` for running against an external warehouse
    pub fn to_sql_where(&self, column: &str) -> String {
        if self.prefixes.is_empty() {
            return "(FALSE)".to_string();
        }

        let clauses: Vec<String> = self
            .prefixes
            .iter()
            .map(|p| format!("{} LIKE '{}%'", column, p.replace('\'', "''")))
            .collect();
        format!("({})", clauses.join(" OR "))
    }

    /// Stable digest of the prefix set, recorded in cache files
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for prefix in &self.prefixes {
            hasher.update(prefix.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// FACT SOURCES
// ============================================================================

/// FactSource - the external analytical data source
pub trait FactSource {
    /// Every fact whose code matches the filter
    fn fetch(&self, filter: &CodeFilter) -> Result<Vec<PrescribingFact>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// A warehouse extract on disk: `month,bnf_code,bnf_name,items`
pub struct CsvFactFile {
    path: PathBuf,
}

impl CsvFactFile {
    pub fn new(path: &Path) -> Self {
        CsvFactFile {
            path: path.to_path_buf(),
        }
    }
}

impl FactSource for CsvFactFile {
    fn fetch(&self, filter: &CodeFilter) -> Result<Vec<PrescribingFact>> {
        let file = File::open(&self.path)?;
        let facts = read_facts_csv(file)?;
        Ok(facts.into_iter().filter(|f| filter.matches(&f.code)).collect())
    }

    fn describe(&self) -> String {
        format!("CSV extract {}", self.path.display())
    }
}

pub fn read_facts_csv<R: Read>(reader: R) -> Result<Vec<PrescribingFact>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut facts = Vec::new();
    for result in rdr.deserialize::<FactRow>() {
        facts.push(PrescribingFact::try_from(result?)?);
    }
    Ok(facts)
}

pub fn write_facts_csv<W: Write>(writer: W, facts: &[PrescribingFact]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for fact in facts {
        wtr.serialize(FactRow::from(fact))?;
    }
    wtr.flush()?;
    Ok(())
}

// ============================================================================
// CACHED READ
// ============================================================================

/// Whether a previous result on disk may stand in for the fact source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    ForceRefresh,
    UseCacheIfPresent,
}

impl CachePolicy {
    pub fn from_use_cache(use_cache: bool) -> Self {
        if use_cache {
            CachePolicy::UseCacheIfPresent
        } else {
            CachePolicy::ForceRefresh
        }
    }
}

#[derive(Debug, Clone)]
pub struct FactLoad {
    pub facts: Vec<PrescribingFact>,
    pub from_cache: bool,
}

/// Load facts for `filter`, from the cache or with a single source call
///
/// A failed source call is fatal. A freshly fetched result is always written
/// back to `cache_path`.
pub fn load_facts(
    source: &dyn FactSource,
    filter: &CodeFilter,
    cache_path: &Path,
    policy: CachePolicy,
) -> Result<FactLoad> {
    if policy == CachePolicy::UseCacheIfPresent && cache_path.exists() {
        let facts = read_cache(cache_path, filter)?;
        info!(path = %cache_path.display(), rows = facts.len(), "using cached facts");
        return Ok(FactLoad {
            facts,
            from_cache: true,
        });
    }

    info!(
        source = %source.describe(),
        prefixes = filter.prefixes().len(),
        "querying fact source"
    );
    let facts = source
        .fetch(filter)
        .map_err(|e| CheckerError::FactSource(format!("{}: {}", source.describe(), e)))?;

    write_cache(cache_path, filter, &facts)?;
    info!(path = %cache_path.display(), rows = facts.len(), "cached facts");

    Ok(FactLoad {
        facts,
        from_cache: false,
    })
}

fn write_cache(path: &Path, filter: &CodeFilter, facts: &[PrescribingFact]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(path)?;
    writeln!(file, "{}{}", CACHE_DIGEST_PREFIX, filter.digest())?;
    write_facts_csv(file, facts)
}

fn read_cache(path: &Path, filter: &CodeFilter) -> Result<Vec<PrescribingFact>> {
    let content = fs::read_to_string(path)?;

    let body = match content.split_once('\n') {
        Some((first, rest)) if first.starts_with(CACHE_DIGEST_PREFIX) => {
            let recorded = first.trim_end()[CACHE_DIGEST_PREFIX.len()..].trim();
            if recorded != filter.digest() {
                warn!(
                    path = %path.display(),
                    "cached facts belong to a different code list; pass --refresh to re-query"
                );
            }
            rest
        }
        // Caches written by other tools carry no digest line
        _ => content.as_str(),
    };

    read_facts_csv(body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    struct CountingSource {
        facts: Vec<PrescribingFact>,
        calls: Cell<usize>,
        fail: bool,
    }

    impl CountingSource {
        fn new(facts: Vec<PrescribingFact>) -> Self {
            CountingSource {
                facts,
                calls: Cell::new(0),
                fail: false,
            }
        }
    }

    impl FactSource for CountingSource {
        fn fetch(&self, filter: &CodeFilter) -> Result<Vec<PrescribingFact>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(CheckerError::FactSource("warehouse unavailable".to_string()));
            }
            Ok(self
                .facts
                .iter()
                .filter(|f| filter.matches(&f.code))
                .cloned()
                .collect())
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn sample_facts() -> Vec<PrescribingFact> {
        vec![
            PrescribingFact::new(month(2016, 1), "0304000A0", "DrugX", 10),
            PrescribingFact::new(month(2016, 2), "0305000B0", "DrugY", 4),
            PrescribingFact::new(month(2016, 2), "0601000C0", "DrugZ", 7),
        ]
    }

    #[test]
    fn test_code_filter_prefix_semantics() {
        let filter = CodeFilter::from_codes(["0305", "0304", "0304", ""]);

        assert_eq!(filter.prefixes(), &["0304".to_string(), "0305".to_string()]);
        assert!(filter.matches("0304000A0"));
        assert!(!filter.matches("0603040"));
        assert!(!filter.matches("030"));
    }

    #[test]
    fn test_sql_where_clause() {
        let filter = CodeFilter::from_codes(["0304", "0305"]);
        assert_eq!(
            filter.to_sql_where("bnf_code"),
            "(bnf_code LIKE '0304%' OR bnf_code LIKE '0305%')"
        );

        let quoted = CodeFilter::from_codes(["O'1"]);
        assert_eq!(quoted.to_sql_where("c"), "(c LIKE 'O''1%')");

        assert_eq!(CodeFilter::from_codes(Vec::<String>::new()).to_sql_where("c"), "(FALSE)");
    }

    #[test]
    fn test_digest_ignores_input_order() {
        let a = CodeFilter::from_codes(["0304", "0305"]);
        let b = CodeFilter::from_codes(["0305", "0304"]);
        let c = CodeFilter::from_codes(["0304"]);

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_read_facts_csv_accepts_bigquery_months() {
        let csv = "month,bnf_code,bnf_name,items\n2016-01-01 00:00:00 UTC,0304000A0,DrugX,10\n";
        let facts = read_facts_csv(csv.as_bytes()).unwrap();

        assert_eq!(facts, vec![PrescribingFact::new(month(2016, 1), "0304000A0", "DrugX", 10)]);
    }

    #[test]
    fn test_read_facts_csv_bad_month_is_error() {
        let csv = "month,bnf_code,bnf_name,items\nsoon,0304000A0,DrugX,10\n";
        assert!(matches!(
            read_facts_csv(csv.as_bytes()),
            Err(CheckerError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_force_refresh_queries_and_writes_cache() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("data").join("items_df.csv");
        let source = CountingSource::new(sample_facts());
        let filter = CodeFilter::from_codes(["0304", "0305"]);

        let load = load_facts(&source, &filter, &cache, CachePolicy::ForceRefresh).unwrap();

        assert!(!load.from_cache);
        assert_eq!(load.facts.len(), 2);
        assert_eq!(source.calls.get(), 1);
        assert!(cache.exists());

        let written = fs::read_to_string(&cache).unwrap();
        assert!(written.starts_with(CACHE_DIGEST_PREFIX));
    }

    #[test]
    fn test_use_cache_skips_source() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("items_df.csv");
        let filter = CodeFilter::from_codes(["0304", "0305"]);

        let first = CountingSource::new(sample_facts());
        load_facts(&first, &filter, &cache, CachePolicy::UseCacheIfPresent).unwrap();
        assert_eq!(first.calls.get(), 1);

        let second = CountingSource::new(vec![]);
        let load = load_facts(&second, &filter, &cache, CachePolicy::UseCacheIfPresent).unwrap();

        assert!(load.from_cache);
        assert_eq!(second.calls.get(), 0);
        assert_eq!(load.facts.len(), 2);
        assert_eq!(load.facts[0].name, "DrugX");
    }

    #[test]
    fn test_force_refresh_ignores_existing_cache() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("items_df.csv");
        let filter = CodeFilter::from_codes(["0304"]);

        let first = CountingSource::new(sample_facts());
        load_facts(&first, &filter, &cache, CachePolicy::ForceRefresh).unwrap();

        let fresh = CountingSource::new(vec![]);
        let load = load_facts(&fresh, &filter, &cache, CachePolicy::ForceRefresh).unwrap();

        assert_eq!(fresh.calls.get(), 1);
        assert!(load.facts.is_empty());
    }

    #[test]
    fn test_source_failure_is_fatal_and_leaves_no_cache() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("items_df.csv");
        let mut source = CountingSource::new(sample_facts());
        source.fail = true;

        let filter = CodeFilter::from_codes(["0304"]);
        let result = load_facts(&source, &filter, &cache, CachePolicy::UseCacheIfPresent);

        assert!(matches!(result, Err(CheckerError::FactSource(_))));
        assert!(!cache.exists());
    }

    #[test]
    fn test_cache_without_digest_line_is_readable() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("items_df.csv");
        fs::write(
            &cache,
            "month,bnf_code,bnf_name,items\n2016-01-01,0304000A0,DrugX,10\n",
        )
        .unwrap();

        let load = load_facts(
            &CountingSource::new(vec![]),
            &CodeFilter::from_codes(["0304"]),
            &cache,
            CachePolicy::UseCacheIfPresent,
        )
        .unwrap();

        assert_eq!(load.facts.len(), 1);
    }

    #[test]
    fn test_csv_fact_file_applies_filter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extract.csv");
        write_facts_csv(File::create(&path).unwrap(), &sample_facts()).unwrap();

        let facts = CsvFactFile::new(&path)
            .fetch(&CodeFilter::from_codes(["06"]))
            .unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].code, "0601000C0");
    }
}

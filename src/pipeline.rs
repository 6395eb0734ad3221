// 🔗 Pipeline - Map Loader → Fact Loader → Reconciler, strictly in order

use crate::error::Result;
use crate::facts::{load_facts, CachePolicy, CodeFilter, FactSource};
use crate::listing::MapSource;
use crate::map_quality::{MapQualityEngine, MapQualityReport};
use crate::mapping::{load_maps, MapLoadReport};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use std::path::Path;
use tracing::info_span;

/// Everything one run produced, stage by stage
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub maps: MapLoadReport,
    pub map_quality: MapQualityReport,
    pub facts_from_cache: bool,
    pub report: ReconciliationReport,
}

pub fn run_check(
    map_source: &dyn MapSource,
    fact_source: &dyn FactSource,
    cache_path: &Path,
    policy: CachePolicy,
) -> Result<CheckOutcome> {
    let run_id = uuid::Uuid::new_v4();
    let _span = info_span!("check", %run_id).entered();

    let maps = load_maps(map_source)?;
    let map_quality = MapQualityEngine::new().inspect(&maps.mappings);

    let filter = CodeFilter::from_codes(maps.code_list());
    let facts = load_facts(fact_source, &filter, cache_path, policy)?;

    let report = ReconciliationEngine::new(&maps.mappings).reconcile(&facts.facts);

    Ok(CheckOutcome {
        maps,
        map_quality,
        facts_from_cache: facts.from_cache,
        report,
    })
}

// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;

use bnf_map_checker::logging::init_logging;
use bnf_map_checker::report::{
    render_collisions, render_issues, render_mappings, render_partial, render_reconciled,
    write_json,
};
use bnf_map_checker::{
    import_csv, load_maps, run_check, setup_database, verify_count, CachePolicy, CodeFilter,
    Config, CsvFactFile, FactSource, GithubListing, ImportOutcome, LocalDirectory,
    MapQualityEngine, MapSource, PrescribingFact, SqliteWarehouse,
};

#[derive(Parser)]
#[command(name = "bnf-map-checker")]
#[command(about = "Checks BNF code change maps against prescribing data")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to bnf-map-checker.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Remote listing of map files
    #[arg(long, env = "BNF_LISTING_URL")]
    listing_url: Option<String>,

    /// Read map files from a local directory instead of the remote listing
    #[arg(long)]
    map_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full check and print the results
    Check {
        #[command(flatten)]
        source: SourceArgs,

        /// Ignore the cached facts and query the warehouse again
        #[arg(long)]
        refresh: bool,

        /// SQLite fact warehouse
        #[arg(long, env = "BNF_WAREHOUSE")]
        warehouse: Option<PathBuf>,

        /// Read facts from a month,bnf_code,bnf_name,items file instead of the warehouse
        #[arg(long)]
        facts_csv: Option<PathBuf>,

        /// Cached fact extract
        #[arg(long, env = "BNF_CACHE_PATH")]
        cache: Option<PathBuf>,

        /// Also write the report as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Rows shown per table
        #[arg(long, default_value_t = 200)]
        limit: usize,

        /// Browse the report in the terminal UI
        #[arg(long)]
        tui: bool,
    },
    /// Print the loaded code map and its diagnostics
    Maps {
        #[command(flatten)]
        source: SourceArgs,

        /// Rows shown per table
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// Print the WHERE clause used to pull facts for the loaded map
    Filter {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Import a month,bnf_code,bnf_name,items extract into the warehouse
    Import {
        csv: PathBuf,

        /// SQLite fact warehouse
        #[arg(long, env = "BNF_WAREHOUSE")]
        warehouse: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Check {
            source,
            refresh,
            warehouse,
            facts_csv,
            cache,
            json,
            limit,
            tui,
        } => {
            apply_source_args(&mut config, source);
            if let Some(path) = warehouse {
                config.warehouse = path;
            }
            if let Some(path) = cache {
                config.cache_path = path;
            }
            if refresh {
                config.use_cache = false;
            }

            let options = CheckOptions {
                facts_csv,
                json,
                limit,
                tui,
            };
            run_check_command(&config, &options)?;
        }
        Commands::Maps { source, limit } => {
            apply_source_args(&mut config, source);
            run_maps_command(&config, limit)?;
        }
        Commands::Filter { source } => {
            apply_source_args(&mut config, source);
            run_filter_command(&config)?;
        }
        Commands::Import { csv, warehouse } => {
            if let Some(path) = warehouse {
                config.warehouse = path;
            }
            run_import_command(&config, &csv)?;
        }
    }

    Ok(())
}

fn apply_source_args(config: &mut Config, source: SourceArgs) {
    if let Some(url) = source.listing_url {
        config.listing_url = url;
    }
    if let Some(dir) = source.map_dir {
        config.map_dir = Some(dir);
    }
}

fn map_source(config: &Config) -> Result<Box<dyn MapSource>> {
    config.validate().context("Invalid configuration")?;
    match &config.map_dir {
        Some(dir) => Ok(Box::new(LocalDirectory::new(dir))),
        None => {
            let listing =
                GithubListing::new(&config.listing_url, &config.user_agent, config.timeout_secs)
                    .context("Failed to build HTTP client")?;
            Ok(Box::new(listing))
        }
    }
}

/// Opens the warehouse only when facts are actually fetched, so a cached run needs no database
struct WarehouseOnDemand {
    path: PathBuf,
}

impl FactSource for WarehouseOnDemand {
    fn fetch(&self, filter: &CodeFilter) -> bnf_map_checker::Result<Vec<PrescribingFact>> {
        SqliteWarehouse::open(&self.path)?.fetch(filter)
    }

    fn describe(&self) -> String {
        format!("SQLite warehouse {}", self.path.display())
    }
}

struct CheckOptions {
    facts_csv: Option<PathBuf>,
    json: Option<PathBuf>,
    limit: usize,
    tui: bool,
}

fn run_check_command(config: &Config, options: &CheckOptions) -> Result<()> {
    println!("🔎 BNF Map Checker - old codes still prescribed after their change date");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let maps = map_source(config)?;
    let facts: Box<dyn FactSource> = match &options.facts_csv {
        Some(path) => Box::new(CsvFactFile::new(path)),
        None => Box::new(WarehouseOnDemand {
            path: config.warehouse.clone(),
        }),
    };
    let policy = CachePolicy::from_use_cache(config.use_cache);

    println!("\n📂 Maps:  {}", maps.describe());
    println!("🗄️  Facts: {} (cache {})", facts.describe(), config.cache_path.display());

    let outcome = run_check(maps.as_ref(), facts.as_ref(), &config.cache_path, policy)
        .context("Check failed")?;

    println!("\n✓ {}", outcome.maps.summary());
    for skipped in &outcome.maps.skipped_files {
        println!("   ⚠️  skipped {}: {}", skipped.name, skipped.reason);
    }
    println!(
        "✓ {} facts {}",
        outcome.report.stats.facts_considered,
        if outcome.facts_from_cache { "read from cache" } else { "fetched from warehouse" }
    );
    if outcome.map_quality.has_critical_issues() {
        println!("⚠️  {}", outcome.map_quality.summary());
    }

    let report = &outcome.report;

    if let Some(path) = &options.json {
        write_json(report, path).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("✓ Report written to {}", path.display());
    }

    if options.tui {
        return browse(report);
    }

    println!("\n📊 Old codes prescribed after their change date");
    println!("{}", render_reconciled(&report.reconciled, options.limit));

    println!("\n🔁 Prescribing already recorded under the new codes");
    println!("{}", render_collisions(&report.collisions, options.limit));

    if !report.partial_matches.is_empty() {
        println!("\n🧩 Matches through family-level old codes");
        println!("{}", render_partial(&report.partial_matches, options.limit));
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.is_clean() {
        // Say which stage emptied the result
        let stats = &report.stats;
        println!("✅ No old code is prescribed after its change date");
        println!("   mappings loaded:      {}", stats.mappings);
        println!("   facts considered:     {}", stats.facts_considered);
        println!("   facts on an old code: {}", stats.facts_matched);
        println!("   after change date:    {}", stats.matches_after_change);
    } else {
        println!("❌ {}", report.summary());
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn browse(report: &bnf_map_checker::ReconciliationReport) -> Result<()> {
    let mut app = ui::App::new(report.clone());
    ui::run_ui(&mut app)
}

#[cfg(not(feature = "tui"))]
fn browse(_report: &bnf_map_checker::ReconciliationReport) -> Result<()> {
    bail!("Built without the tui feature; rebuild with --features tui")
}

fn run_maps_command(config: &Config, limit: usize) -> Result<()> {
    let source = map_source(config)?;
    let maps = load_maps(source.as_ref()).context("Failed to load code maps")?;

    println!("📂 {}", maps.summary());
    for file in &maps.files {
        println!(
            "   {} → {} rules from {} ({} rows skipped)",
            file.name, file.rows, file.effective_date, file.skipped_rows
        );
    }
    for skipped in &maps.skipped_files {
        println!("   ⚠️  skipped {}: {}", skipped.name, skipped.reason);
    }

    println!("\n{}", render_mappings(&maps.mappings, limit));

    let quality = MapQualityEngine::new().inspect(&maps.mappings);
    println!("\n🔍 {}", quality.summary());
    if !quality.issues.is_empty() {
        println!("{}", render_issues(&quality, limit));
    }

    Ok(())
}

fn run_filter_command(config: &Config) -> Result<()> {
    let source = map_source(config)?;
    let maps = load_maps(source.as_ref()).context("Failed to load code maps")?;
    let filter = CodeFilter::from_codes(maps.code_list());

    info!(prefixes = filter.prefixes().len(), digest = %filter.digest(), "built code filter");
    println!("WHERE {}", filter.to_sql_where("bnf_code"));

    Ok(())
}

fn run_import_command(config: &Config, csv_path: &Path) -> Result<()> {
    println!("🗄️  Importing {}", csv_path.display());

    if !csv_path.exists() {
        bail!("File not found: {}", csv_path.display());
    }

    if let Some(parent) = config.warehouse.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let conn = Connection::open(&config.warehouse)
        .with_context(|| format!("Failed to open {}", config.warehouse.display()))?;
    setup_database(&conn)?;
    println!("✓ Warehouse ready at {} (WAL mode)", config.warehouse.display());

    let run_id = uuid::Uuid::new_v4().to_string();
    match import_csv(&conn, csv_path, &run_id).context("Import failed")? {
        ImportOutcome::Imported { rows } => println!("✓ Imported {} rows", rows),
        ImportOutcome::AlreadyImported { imported_at } => {
            println!("↷ Same file already imported at {}; nothing to do", imported_at)
        }
    }

    let count = verify_count(&conn)?;
    println!("✓ Warehouse holds {} rows", count);

    Ok(())
}

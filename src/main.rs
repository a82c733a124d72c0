use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pattern_kb::discovery::{self, DiscoveryConfig, KbHandle, PassthroughMiner};
use pattern_kb::loader;
use pattern_kb::model::{Direction, Status};
use pattern_kb::query::{self, PatternFilter};
use pattern_kb::scoring::{self, ScoringConfig, StatsIndex};
use pattern_kb::validate;
use pattern_kb::versioning::{self, BumpLevel};
use pattern_kb::KbError;

#[derive(Parser)]
#[command(name = "pattern-kb")]
#[command(version, about = "Versioned knowledge base of statistically discovered trading patterns", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one canonical KB file or a set of fragments
    Validate {
        /// KB file(s) or fragment directory
        paths: Vec<PathBuf>,
    },

    /// List distinct markets derived from the KB's datasets
    ListMarkets {
        /// KB file or fragment directory
        #[arg(long)]
        kb: PathBuf,
    },

    /// List timeframes available for a market
    ListTimeframes {
        /// KB file or fragment directory
        #[arg(long)]
        kb: PathBuf,

        /// Market identifier (e.g. BTCUSDT_PERP)
        #[arg(long)]
        market: String,
    },

    /// List patterns for a market/timeframe with optional filters
    ListPatterns {
        /// KB file or fragment directory
        #[arg(long)]
        kb: PathBuf,

        /// Market identifier
        #[arg(long)]
        market: String,

        /// Timeframe (e.g. 4h, 5m)
        #[arg(long)]
        timeframe: String,

        /// Minimum confidence filter
        #[arg(long)]
        min_conf: Option<f64>,

        /// Required tag (repeatable; all must be present)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Regime filter (case-insensitive)
        #[arg(long)]
        regime: Option<String>,

        /// Direction filter (long/short/filter_only)
        #[arg(long)]
        direction: Option<String>,

        /// Window length filter
        #[arg(long)]
        window_size: Option<u32>,

        /// Status filter (e.g. active, candidate)
        #[arg(long)]
        status: Option<String>,
    },

    /// Classify patterns from a performance summary and print tiers/scores
    Classify {
        /// KB file or fragment directory
        #[arg(long)]
        kb: PathBuf,

        /// Performance-summary YAML keyed by pattern ID
        #[arg(long)]
        stats: PathBuf,

        /// Minimum support before a pattern is scored
        #[arg(long)]
        min_support: Option<u64>,

        /// Medium-band proximity fraction below the strong cuts
        #[arg(long)]
        proximity: Option<f64>,

        /// Emit JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Run the discovery loop to its fixed point and commit the result
    Evolve {
        /// Canonical KB file
        #[arg(long)]
        kb: PathBuf,

        /// Performance-summary YAML keyed by pattern ID
        #[arg(long)]
        stats: PathBuf,

        /// Safety cap on the number of waves
        #[arg(long, default_value = "16")]
        max_waves: usize,

        /// Consecutive unproductive waves before demotion
        #[arg(long, default_value = "3")]
        max_unproductive: u32,

        /// Write the evolved KB here instead of committing in place
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Bump the KB version and record the reason in the version history
    Bump {
        /// Canonical KB file
        #[arg(long)]
        kb: PathBuf,

        /// Bump level (major/minor/patch)
        #[arg(long, default_value = "patch")]
        level: String,

        /// Reason stored in the version history notes
        #[arg(long, default_value = "kb upgrade")]
        reason: String,
    },
}

/// Render a plain aligned table
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if cell.len() > widths[idx] {
                widths[idx] = cell.len();
            }
        }
    }

    let header_line = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| format!("{:<width$}", h, width = widths[idx]))
        .collect::<Vec<_>>()
        .join(" | ");
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");

    let mut lines = vec![header_line, separator];
    for row in rows {
        lines.push(
            row.iter()
                .enumerate()
                .map(|(idx, cell)| format!("{:<width$}", cell, width = widths[idx]))
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }
    lines.join("\n")
}

fn cmd_validate(paths: Vec<PathBuf>) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("no paths given");
    }

    let result = if paths.len() == 1 {
        loader::load_path(&paths[0])
    } else {
        loader::load(&paths)
    };

    match result {
        Ok(kb) => {
            println!(
                "{} KB v{} valid ({} patterns, {} datasets, {} trading rules)",
                "[OK]".bright_green().bold(),
                kb.meta.kb_version,
                kb.patterns.len(),
                kb.datasets.len(),
                kb.trading_rules.len()
            );
            Ok(())
        }
        Err(KbError::Integrity { violations }) => {
            eprintln!(
                "{} {} integrity violation(s):",
                "[FAIL]".bright_red().bold(),
                violations.len()
            );
            for violation in &violations {
                eprintln!("  - {violation}");
            }
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("{} {err}", "[FAIL]".bright_red().bold());
            std::process::exit(1);
        }
    }
}

fn cmd_list_markets(kb_path: PathBuf) -> Result<()> {
    let kb = loader::load_path(&kb_path)?;
    let markets = query::list_markets(&kb);
    let rows: Vec<Vec<String>> = markets.into_iter().map(|m| vec![m]).collect();
    println!("{}", render_table(&["Market"], &rows));
    Ok(())
}

fn cmd_list_timeframes(kb_path: PathBuf, market: String) -> Result<()> {
    let kb = loader::load_path(&kb_path)?;
    let timeframes = query::list_timeframes(&kb, &market);
    let rows: Vec<Vec<String>> = timeframes.into_iter().map(|tf| vec![tf]).collect();
    println!("{}", render_table(&["Timeframe"], &rows));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_list_patterns(
    kb_path: PathBuf,
    market: String,
    timeframe: String,
    min_conf: Option<f64>,
    tags: Vec<String>,
    regime: Option<String>,
    direction: Option<String>,
    window_size: Option<u32>,
    status: Option<String>,
) -> Result<()> {
    let kb = loader::load_path(&kb_path)?;

    let filter = PatternFilter {
        min_confidence: min_conf,
        tags,
        regime,
        direction: direction
            .map(|d| d.parse::<Direction>().map_err(|e| anyhow!(e)))
            .transpose()?,
        window_size,
        status: status
            .map(|s| s.parse::<Status>().map_err(|e| anyhow!(e)))
            .transpose()?,
    };

    let scoped = query::patterns_by_market_timeframe(&kb, &market, &timeframe);
    let filtered = query::filter_pattern_slice(scoped, &filter);

    let rows: Vec<Vec<String>> = filtered
        .iter()
        .map(|p| {
            vec![
                p.id.clone(),
                p.name.clone(),
                p.timeframe.clone(),
                p.dataset_used.clone().unwrap_or_default(),
                p.tags.join(","),
                p.status.to_string(),
                p.effective_confidence()
                    .map(|c| format!("{c:.3}"))
                    .unwrap_or_default(),
            ]
        })
        .collect();

    println!(
        "{}",
        render_table(
            &["ID", "Name", "Timeframe", "Dataset", "Tags", "Status", "Confidence"],
            &rows
        )
    );
    Ok(())
}

fn cmd_classify(
    kb_path: PathBuf,
    stats_path: PathBuf,
    min_support: Option<u64>,
    proximity: Option<f64>,
    json: bool,
) -> Result<()> {
    let kb = loader::load_path(&kb_path)?;
    let stats = StatsIndex::load(&stats_path)
        .with_context(|| format!("loading performance summary {stats_path:?}"))?;

    let mut cfg = ScoringConfig::default();
    if let Some(min) = min_support {
        cfg.min_support = min;
    }
    if let Some(p) = proximity {
        cfg.proximity = p;
    }

    let scores = scoring::score_patterns(&kb.patterns, &stats, &cfg);
    let families = scoring::score_families(&kb.patterns, &stats, &cfg);

    if json {
        let doc = serde_json::json!({
            "patterns": scores,
            "families": families,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let rows: Vec<Vec<String>> = scores
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                s.tier.to_string(),
                s.accuracy.map(|a| a.to_string()).unwrap_or_default(),
                s.score.map(|v| format!("{v:.4}")).unwrap_or_default(),
            ]
        })
        .collect();
    println!(
        "{}",
        render_table(&["ID", "Tier", "Accuracy", "Score"], &rows)
    );

    if !families.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = families
            .iter()
            .map(|f| {
                vec![
                    f.key.to_string(),
                    f.members.to_string(),
                    f.agg_support.to_string(),
                    format!("{:.3}", f.agg_lift),
                    format!("{:.3}", f.agg_stability),
                    f.tier.to_string(),
                    format!("{:.4}", f.score),
                ]
            })
            .collect();
        println!(
            "{}",
            render_table(
                &["Family", "Members", "Support", "Lift", "Stability", "Tier", "Score"],
                &rows
            )
        );
    }
    Ok(())
}

fn cmd_evolve(
    kb_path: PathBuf,
    stats_path: PathBuf,
    max_waves: usize,
    max_unproductive: u32,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut handle = KbHandle::open(&kb_path)?;
    let mut stats = StatsIndex::load(&stats_path)
        .with_context(|| format!("loading performance summary {stats_path:?}"))?;

    let cfg = DiscoveryConfig {
        scoring: ScoringConfig::default(),
        max_waves,
        max_unproductive_waves: max_unproductive,
    };
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let report = discovery::run_waves(&mut handle.kb, &mut stats, &PassthroughMiner, &cfg, &today);

    for wave in &report.waves {
        println!(
            "wave {}: {} promoted, {} recycled, {} demoted",
            wave.wave,
            wave.promoted.len().to_string().bright_green(),
            wave.recycled.len(),
            wave.demoted.len().to_string().bright_yellow(),
        );
    }

    match out {
        Some(out_path) => {
            // Same write discipline as the commit path: never persist an
            // unvalidated graph.
            validate::validate(&handle.kb)?;
            versioning::bump_kb_version(
                &mut handle.kb.meta,
                "discovery loop",
                BumpLevel::Patch,
                chrono::Utc::now(),
            )?;
            loader::write_atomic(&out_path, &handle.kb)?;
            println!(
                "{} evolved KB v{} written to {}",
                "[OK]".bright_green().bold(),
                handle.kb.meta.kb_version,
                out_path.display()
            );
        }
        None => {
            handle.commit("discovery loop", BumpLevel::Patch)?;
            println!(
                "{} committed KB v{} to {}",
                "[OK]".bright_green().bold(),
                handle.loaded_version(),
                kb_path.display()
            );
        }
    }
    Ok(())
}

fn cmd_bump(kb_path: PathBuf, level: String, reason: String) -> Result<()> {
    let level = level.parse::<BumpLevel>().map_err(|e| anyhow!(e))?;
    let mut handle = KbHandle::open(&kb_path)?;
    handle.commit(&reason, level)?;
    println!(
        "{} KB bumped to v{}",
        "[OK]".bright_green().bold(),
        handle.loaded_version()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter_layer = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new("info")
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("pattern-kb v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Validate { paths } => cmd_validate(paths)?,
        Commands::ListMarkets { kb } => cmd_list_markets(kb)?,
        Commands::ListTimeframes { kb, market } => cmd_list_timeframes(kb, market)?,
        Commands::ListPatterns {
            kb,
            market,
            timeframe,
            min_conf,
            tags,
            regime,
            direction,
            window_size,
            status,
        } => cmd_list_patterns(
            kb,
            market,
            timeframe,
            min_conf,
            tags,
            regime,
            direction,
            window_size,
            status,
        )?,
        Commands::Classify {
            kb,
            stats,
            min_support,
            proximity,
            json,
        } => cmd_classify(kb, stats, min_support, proximity, json)?,
        Commands::Evolve {
            kb,
            stats,
            max_waves,
            max_unproductive,
            out,
        } => cmd_evolve(kb, stats, max_waves, max_unproductive, out)?,
        Commands::Bump { kb, level, reason } => cmd_bump(kb, level, reason)?,
    }

    Ok(())
}

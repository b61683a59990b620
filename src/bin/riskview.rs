//! RiskView command-line client
//!
//! `riskview <file.csv> [options]` uploads a CSV, follows the job and
//! prints the filtered view. `riskview serve <fixture.json> [port]` runs
//! the in-memory stub API for local development.

use anyhow::{Context, Result};
use riskview::{
    AppState, ClientConfig, Expansion, HttpBackend, PollUpdate, RawAnalysisResult, SortKey,
    StubBackend, TierFilter, Upload, VirtualGrid,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  riskview <file.csv> [--tier all|critical|high|medium|low] [--search TEXT]
                      [--sort probability-desc|highest-risk|lowest-risk|id-asc]
                      [--filter CATEGORY=VALUE]... [--expand ID]
                      [--width PX] [--height PX] [--scroll PX]
  riskview serve <fixture.json> [port]";

#[derive(Debug)]
struct ViewArgs {
    file: String,
    tier: TierFilter,
    search: String,
    sort: SortKey,
    filters: Vec<(String, String)>,
    expand: Option<String>,
    width: f64,
    height: f64,
    scroll: f64,
}

fn parse_view_args(args: &[String]) -> Result<ViewArgs> {
    let mut parsed = ViewArgs {
        file: String::new(),
        tier: TierFilter::All,
        search: String::new(),
        sort: SortKey::Unsorted,
        filters: Vec::new(),
        expand: None,
        width: 1280.0,
        height: 900.0,
        scroll: 0.0,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{} needs a value", flag))
        };
        match arg.as_str() {
            "--tier" => parsed.tier = value("--tier")?.parse().map_err(anyhow::Error::msg)?,
            "--search" => parsed.search = value("--search")?,
            "--sort" => parsed.sort = value("--sort")?.parse().map_err(anyhow::Error::msg)?,
            "--filter" => {
                let raw = value("--filter")?;
                let (category, wanted) = raw
                    .split_once('=')
                    .with_context(|| format!("--filter expects CATEGORY=VALUE, got '{}'", raw))?;
                parsed.filters.push((category.to_string(), wanted.to_string()));
            }
            "--expand" => parsed.expand = Some(value("--expand")?),
            "--width" => parsed.width = value("--width")?.parse().context("--width")?,
            "--height" => parsed.height = value("--height")?.parse().context("--height")?,
            "--scroll" => parsed.scroll = value("--scroll")?.parse().context("--scroll")?,
            other if other.starts_with("--") => anyhow::bail!("unknown option {}\n{}", other, USAGE),
            file => parsed.file = file.to_string(),
        }
    }

    if parsed.file.is_empty() {
        anyhow::bail!("{}", USAGE);
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("serve") => serve(&args[1..]).await,
        Some("--help") | Some("-h") | None => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(_) => analyze(parse_view_args(&args)?).await,
    }
}

async fn serve(args: &[String]) -> Result<()> {
    let fixture_path = args.first().context("serve needs a fixture JSON file")?;
    let port: u16 = match args.get(1) {
        Some(p) => p.parse().context("port must be a number")?,
        None => 8000,
    };
    let raw = tokio::fs::read_to_string(fixture_path)
        .await
        .with_context(|| format!("reading {}", fixture_path))?;
    let fixture: RawAnalysisResult = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", fixture_path))?;

    println!("RiskView stub API");
    println!("   Fixture: {}", fixture_path);
    println!("   Listening on http://127.0.0.1:{}", port);

    riskview::stub_server::run_server(StubBackend::new(fixture, 2), port).await
}

async fn analyze(args: ViewArgs) -> Result<()> {
    let config = ClientConfig::from_env()?;
    println!("RiskView {}", env!("CARGO_PKG_VERSION"));
    println!("   Backend: {}", config.backend_url);
    println!();

    let backend = HttpBackend::with_timeout(&config.backend_url, config.request_timeout)?;
    let mut state = AppState::new(Arc::new(backend), config.poller);

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file))?;
    let file_name = Path::new(&args.file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.clone());

    let task_id = state.upload(Upload::new(file_name, bytes)).await?;
    println!("Submitted as task {}", task_id);

    while let Some(update) = state.next_update().await {
        match update {
            PollUpdate::Phase { phase, .. } => println!("   ... {}", phase),
            PollUpdate::Done { .. } => println!("   ... done"),
            PollUpdate::Failed { error, .. } => anyhow::bail!(error),
        }
    }

    for warning in state.warnings() {
        eprintln!("warning: {}", warning);
    }

    state.set_tier_filter(args.tier);
    state.set_search_text(args.search);
    state.set_sort_key(args.sort);
    for (category, value) in args.filters {
        state.set_category_filter(category, value);
    }
    if let Some(id) = args.expand {
        state.set_expansion(Expansion::Expanded(id));
    }

    let summary = state.summary();
    println!();
    println!(
        "{} of {} entities (critical {}, high {}, medium {}, low {})",
        summary.visible, summary.total, summary.critical, summary.high, summary.medium, summary.low
    );
    println!();

    let mut grid = VirtualGrid::new(config.grid, args.width, args.height);
    grid.scroll_to(args.scroll);
    let window = state.render(&mut grid, args.width, args.height);
    let columns = grid.geometry().column_count;
    println!(
        "Grid: {} columns x {:.0}px, rows {:?} of {} ({:.0}px tall)",
        columns,
        grid.geometry().column_width,
        window.row_indices(),
        grid.row_count(),
        window.total_height
    );

    for row in &window.rows {
        for cell in &row.cells {
            let entity = &state.view()[cell.index];
            println!(
                "[row {:>3} col {}] {:<16} {:>6.1}  {:<6}  {}",
                row.index, cell.column, entity.id, entity.risk_score, entity.risk_tier.as_str(), entity.reason
            );
            if cell.expanded {
                println!("      strategy: {}", entity.strategy);
                for (feature, value) in entity.top_attributions(5) {
                    println!("      {:<24} {:+.4}", feature, value);
                }
            }
        }
    }

    Ok(())
}

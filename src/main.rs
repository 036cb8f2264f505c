use std::error::Error;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fieldroute::batch::{run_batch, BatchOptions};
use fieldroute::cache::Cache;
use fieldroute::config::Settings;
use fieldroute::jobboard::{DateRange, DateRangeType, HttpJobBoard, JobBoard};
use fieldroute::orchestrator::{DefaultProviderFactory, Orchestrator};
use fieldroute::provider::ProviderKind;
use fieldroute::shorten::UrlShortener;

#[derive(Parser)]
#[command(author, version, about = "Generate daily optimized route links for field technicians")]
struct Args {
    #[arg(long, help = "route a single subject id instead of every active subject")]
    user: Option<u64>,

    #[arg(long, help = "override the route origin address")]
    origin: Option<String>,

    #[arg(long, help = "override the route destination address")]
    destination: Option<String>,

    #[arg(long, default_value = "google", help = "mapping provider: google, mapbox or osm")]
    provider: String,

    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "all",
        help = "print assignments, stops and the URL for a subject id (or 'all') without writing back"
    )]
    preview_stops: Option<String>,

    #[arg(long, help = "build and log URLs without writing them back")]
    dry_run: bool,

    #[arg(long, help = "start of the assignment date range (YYYY-MM-DD, default today)")]
    start_date: Option<NaiveDate>,

    #[arg(long, help = "end of the assignment date range (YYYY-MM-DD, default start date)")]
    end_date: Option<NaiveDate>,

    #[arg(long, default_value = "scheduled", help = "date field the range filters on: scheduled, created or completed")]
    date_range_type: String,
}

fn date_range(args: &Args) -> Result<DateRange, Box<dyn Error>> {
    let range = match (args.start_date, args.end_date) {
        (None, None) => DateRange::today(),
        (Some(start), None) => DateRange::new(start, start),
        (Some(start), Some(end)) => DateRange::new(start, end),
        (None, Some(_)) => return Err("--end-date requires --start-date".into()),
    };
    if range.end < range.start {
        return Err("date range ends before it starts".into());
    }
    Ok(range)
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env();
    if settings.board_base_url.is_empty() || settings.board_api_key.is_empty() {
        return Err("JOBBOARD_BASE_URL and JOBBOARD_API_KEY must be set".into());
    }

    let provider: ProviderKind = args.provider.parse()?;
    let range = date_range(&args)?;
    let range_type: DateRangeType = args.date_range_type.parse()?;

    let board = HttpJobBoard::new(&settings.board_base_url, &settings.board_api_key)?;
    let factory = DefaultProviderFactory::new(settings.clone());
    let orchestrator = Orchestrator::new(board, factory, settings.default_origin.clone());

    // Preview mode: print diagnostics, write nothing back.
    if let Some(selector) = &args.preview_stops {
        let subject_ids: Vec<u64> = if selector.eq_ignore_ascii_case("all") {
            orchestrator
                .board()
                .active_subjects()?
                .iter()
                .map(|s| s.id)
                .collect()
        } else {
            vec![selector.parse::<u64>().map_err(|_| {
                format!("--preview-stops takes a subject id or 'all', got '{selector}'")
            })?]
        };

        for id in subject_ids {
            println!("########## subject {id} ##########");
            match orchestrator.preview(provider, id, args.origin.as_deref()) {
                Ok(preview) => println!("{preview}"),
                Err(err) => println!("[ERROR] {err}\n"),
            }
        }
        return Ok(());
    }

    let shortener_cache = match &settings.cache_dir {
        Some(dir) => Cache::persistent(dir, "short_urls", Duration::from_secs(24 * 60 * 60)),
        None => Cache::new("short_urls", Duration::from_secs(24 * 60 * 60)),
    };
    let shortener = UrlShortener::new(settings.shortener_base_url.clone(), shortener_cache)?;

    let options = BatchOptions {
        provider,
        subject: args.user,
        origin: args.origin.clone(),
        destination: args.destination.clone(),
        dry_run: args.dry_run,
        range,
        range_type,
    };

    // Per-subject failures are already counted in the summary; the run
    // itself still succeeds so cron reruns are not triggered needlessly.
    let summary = run_batch(&orchestrator, &shortener, &settings.route_field_name, &options)?;
    println!(
        "routed {} subject(s), skipped {}, failed {}",
        summary.routed, summary.skipped, summary.failed
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        tracing::error!(%err, "run failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

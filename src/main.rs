use clap::Parser;
use lib::{
    AppConfig, CycleReport, OpenWeatherMapSource, ReadingSource, SimpleLogger, Statistics,
    Tracker, WeatherError, load_from_env, or_unknown,
};
use log::{debug, error, warn};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, MissedTickBehavior};

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run a single refresh cycle, print the report and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Print reports as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Disable the auto-refresh timer (refresh with Enter only)
    #[arg(long, default_value_t = false)]
    manual: bool,

    /// City to track (overrides WEATHER_CITY)
    #[arg(long)]
    city: Option<String>,

    /// History CSV file (overrides WEATHER_DATA_FILE)
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Directory holding comparison CSV files (defaults to the history file's directory)
    #[arg(long)]
    comparison_dir: Option<PathBuf>,

    /// Auto-refresh interval in milliseconds (overrides WEATHER_REFRESH_INTERVAL_MS)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Log level for output
    #[arg(long, default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), WeatherError> {
    // Initialize logger and configuration
    log::set_logger(&LOGGER)
        .map_err(|e| WeatherError::Config(format!("cannot install logger: {}", e)))?;
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }

    let config = apply_overrides(load_from_env()?, &args);
    debug!("Arguments: {:?}", args);
    config.log_config();

    // Storage directory must exist before anything else
    if let Some(parent) = config.data_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let source = OpenWeatherMapSource::from_config(&config)?;
    if let Err(e) = source.ensure_ready() {
        error!("{}", e);
        println!("Error: API key not configured - refreshes are disabled until it is set");
    }

    let interval_ms = config.refresh_interval_ms;
    let tracker = Tracker::new(config, source);

    if args.once {
        let report = tracker.run_cycle().await?;
        print_report(&report, args.json, tracker.config().recent_days)?;
        return Ok(());
    }

    println!("{} Weather", tracker.config().city);
    print_statistics(&tracker.snapshot(), tracker.config().recent_days);

    refresh(&tracker, args.json).await;
    run_loop(&tracker, &args, interval_ms).await;

    println!("\nApplication closed by user");
    // The runtime would otherwise wait on the blocking stdin reader
    std::process::exit(0);
}

fn apply_overrides(mut config: AppConfig, args: &Args) -> AppConfig {
    if let Some(city) = &args.city {
        config.city = city.clone();
    }
    if let Some(data_file) = &args.data_file {
        config = config.with_data_file(data_file.clone(), args.comparison_dir.clone());
    } else if let Some(dir) = &args.comparison_dir {
        config.comparison_dir = dir.clone();
    }
    if let Some(interval_ms) = args.interval_ms {
        config.refresh_interval_ms = interval_ms;
    }
    config
}

/// Waits for refresh triggers until the user quits.
///
/// Triggers are the auto-refresh timer (unless `--manual`) and a line on
/// stdin. Each cycle is awaited before the next trigger is looked at, so
/// cycles never overlap.
async fn run_loop<S: ReadingSource>(tracker: &Tracker<S>, args: &Args, interval_ms: u64) {
    let period = Duration::from_millis(interval_ms.max(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    if args.manual {
        println!("Press Enter to refresh, 'q' then Enter to quit.");
    } else {
        println!(
            "Auto-refresh every {:.0?}. Press Enter to refresh now, 'q' then Enter to quit.",
            period
        );
    }

    loop {
        tokio::select! {
            _ = ticker.tick(), if !args.manual => {
                debug!("Auto-refresh tick");
                refresh(tracker, args.json).await;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(input)) if input.trim().eq_ignore_ascii_case("q") => break,
                Ok(Some(_)) => refresh(tracker, args.json).await,
                Ok(None) => {
                    stdin_open = false;
                    if args.manual {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Cannot read from stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

/// Runs one cycle and prints the outcome; failures are reported, not fatal.
async fn refresh<S: ReadingSource>(tracker: &Tracker<S>, json: bool) {
    println!("Fetching weather data...");
    match tracker.run_cycle().await {
        Ok(report) => {
            if let Err(e) = print_report(&report, json, tracker.config().recent_days) {
                error!("Could not print report: {}", e);
            }
        }
        Err(e) => {
            error!("Refresh failed: {}", e);
            println!("Error: failed to fetch weather data ({})", e);
        }
    }
}

fn print_report(report: &CycleReport, json: bool, days: i64) -> Result<(), WeatherError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let current = &report.current;
    let location = match &current.state {
        Some(state) => format!("{}, {}", current.city, state),
        None => current.city.clone(),
    };

    println!("\nCurrent Weather: {}", location);
    println!("  Temperature  : {}°F", or_unknown(current.temperature));
    println!("  Feels like   : {}°F", or_unknown(current.feels_like));
    println!(
        "  Conditions   : {}",
        or_unknown(current.description.as_deref())
    );
    println!("  Humidity     : {}%", or_unknown(current.humidity));
    println!("  Last updated : {}", or_unknown(current.time.as_deref()));

    print_statistics(&report.statistics, days);

    if report.comparisons.is_empty() {
        println!("\nNo comparison cities found");
    } else {
        println!("\nCity Comparison (closest first):");
        for result in &report.comparisons {
            let city = &result.external;
            let name = match &city.state {
                Some(state) => format!("{}, {}", city.city, state),
                None => city.city.clone(),
            };
            let humidity = result
                .humidity_difference
                .map(|d| format!("{:+}% humidity", d))
                .unwrap_or_else(|| "humidity --".to_string());
            println!(
                "  {:<20} {:>4}°F  {:<18} {:<16} [{}]",
                name,
                city.temperature,
                or_unknown(result.temp_comparison),
                humidity,
                city.source_file
            );
        }
    }

    println!("\nWeather data updated successfully");
    Ok(())
}

fn print_statistics(stats: &Statistics, days: i64) {
    println!("\n{}-Day Statistics ({} readings):", days, stats.readings);
    println!(
        "  Weekly Average     : {}°F",
        or_unknown(stats.weekly_average.map(|avg| format!("{:.1}", avg)))
    );
    println!("  Min Temperature    : {}°F", or_unknown(stats.min_temp));
    println!("  Max Temperature    : {}°F", or_unknown(stats.max_temp));
    println!("  Since Last Reading : {}", stats.delta);
}

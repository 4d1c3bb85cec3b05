//! OpenSky tracker CLI
//!
//! Polls OpenSky Network for the aircraft inside a bounding box and prints
//! every state vector it receives.

use clap::{Parser, Subcommand};
use skywatch::{
    client::{BoundingBox, ClientConfig, OpenSkyClient},
    protocol,
    tracker::{Tracker, TrackerConfig},
    types::{Response, State},
};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "skywatch")]
#[command(about = "Prints flight records for a monitored region", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a region continuously and print its state vectors
    Track {
        /// Minimum latitude of the monitored area
        #[arg(
            long,
            env = "SKYWATCH_MIN_LATITUDE",
            default_value = "-40.110403",
            allow_negative_numbers = true
        )]
        min_latitude: f64,

        /// Maximum latitude of the monitored area
        #[arg(
            long,
            env = "SKYWATCH_MAX_LATITUDE",
            default_value = "-24.267845",
            allow_negative_numbers = true
        )]
        max_latitude: f64,

        /// Minimum longitude of the monitored area
        #[arg(
            long,
            env = "SKYWATCH_MIN_LONGITUDE",
            default_value = "139.147805",
            allow_negative_numbers = true
        )]
        min_longitude: f64,

        /// Maximum longitude of the monitored area
        #[arg(
            long,
            env = "SKYWATCH_MAX_LONGITUDE",
            default_value = "154.590532",
            allow_negative_numbers = true
        )]
        max_longitude: f64,

        /// Poll interval in seconds
        #[arg(short, long, env = "SKYWATCH_FREQUENCY", default_value = "5")]
        frequency: u64,

        /// OpenSky account name
        #[arg(long, env = "OPENSKY_USERNAME", requires = "password")]
        username: Option<String>,

        /// OpenSky account password
        #[arg(long, env = "OPENSKY_PASSWORD", hide_env_values = true, requires = "username")]
        password: Option<String>,

        /// OpenSky API root
        #[arg(long, default_value = ClientConfig::DEFAULT_BASE_URL)]
        base_url: String,

        /// Print responses as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a saved /states/all response (for testing)
    Decode {
        /// Path to the JSON file
        file: PathBuf,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Track {
            min_latitude,
            max_latitude,
            min_longitude,
            max_longitude,
            frequency,
            username,
            password,
            base_url,
            json,
        } => {
            let mut client_config = ClientConfig::new()
                .with_base_url(base_url)
                .with_timeout(Duration::from_secs(30));

            if let (Some(user), Some(pass)) = (username, password) {
                tracing::info!("Authenticating as {}", user);
                client_config = client_config.with_credentials(user, pass);
            }

            let bbox = BoundingBox::new(min_latitude, max_latitude, min_longitude, max_longitude);
            track(client_config, bbox, frequency, json).await?;
        }

        Commands::Decode { file, json } => {
            decode_file(&file, json)?;
        }
    }

    Ok(())
}

async fn track(
    client_config: ClientConfig,
    bbox: BoundingBox,
    frequency: u64,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Refuse to start on a bad area
    bbox.validate()?;

    tracing::info!("Starting OpenSky tracker");
    tracing::info!("Poll interval: {}s", frequency);
    tracing::info!(
        "Monitoring area: lat [{}, {}], lon [{}, {}]",
        bbox.min_latitude,
        bbox.max_latitude,
        bbox.min_longitude,
        bbox.max_longitude
    );

    let client = OpenSkyClient::new(client_config)?;
    let tracker_config = TrackerConfig {
        poll_interval: Duration::from_secs(frequency.max(1)),
        bbox,
        ..Default::default()
    };

    let poll_interval = tracker_config.poll_interval;
    let tracker = Arc::new(Tracker::new(client, tracker_config)?);
    let stats = tracker.stats();
    let (tx, mut rx) = tracker.channel();

    let printer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            if let Err(e) = print_response(&response, json) {
                tracing::error!("Error printing flight data: {}", e);
            }
        }
    });

    let mut tracker_handle = tokio::spawn({
        let tracker = Arc::clone(&tracker);
        async move { tracker.run(tx).await }
    });

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            tracker.stop();

            // Let an in-flight poll finish, bounded by one request timeout
            let grace = poll_interval + Duration::from_secs(30);
            match tokio::time::timeout(grace, &mut tracker_handle).await {
                Ok(result) => Some(result),
                Err(_) => {
                    tracing::warn!("Tracker did not stop within {:?}, aborting", grace);
                    tracker_handle.abort();
                    None
                }
            }
        }
        result = &mut tracker_handle => Some(result),
    };

    match result {
        Some(Ok(Err(e))) => tracing::error!("Tracker error: {}", e),
        Some(Err(e)) => tracing::error!("Tracker task failed: {}", e),
        Some(Ok(Ok(()))) | None => {}
    }

    printer.abort();

    let s = stats.snapshot();
    tracing::info!("Final statistics:");
    tracing::info!("  Total polls: {}", s.fetches);
    tracing::info!("  States decoded: {}", s.states_decoded);
    tracing::info!("  Records dropped: {}", s.records_dropped);
    tracing::info!("  Total errors: {}", s.errors);
    tracing::info!("  Network received: {} KB", s.bytes_received / 1024);

    Ok(())
}

fn decode_file(path: &PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Decoding file: {}", path.display());

    let raw = protocol::load_response(path)?;
    let decoded = protocol::decode_response(&raw);

    if !decoded.is_complete() {
        tracing::warn!(
            "Decoded with {} problems across {} records",
            decoded.failures.len(),
            raw.record_count()
        );
    }

    print_response(&decoded.response, json)?;
    Ok(())
}

fn print_response(response: &Response, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("Got {} records.", response.states.len());
    println!("Time: {}", or_dash(response.time));

    for state in &response.states {
        print_state(state);
    }

    Ok(())
}

fn print_state(s: &State) {
    let sensors = s.sensors.as_ref().map(|list| {
        list.iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    });

    println!(
        "ICAO24: {}\tCallSign: {}\tOriginCountry: {}\tTimePosition: {}\tLastContact: {}\t\
         Longitude: {}\tLatitude: {}\tBaroAltitude: {}\tOnGround: {}\tVelocity: {}\t\
         Heading: {}\tVerticalRate: {}\tSensors: {}\tGeoAltitude: {}\tSquawk: {}\t\
         Spi: {}\tPositionSource: {}",
        s.icao24,
        or_dash(s.callsign_trimmed()),
        s.origin_country,
        or_dash(s.time_position),
        s.last_contact,
        or_dash(s.longitude),
        or_dash(s.latitude),
        or_dash(s.baro_altitude),
        s.on_ground,
        or_dash(s.velocity),
        or_dash(s.true_track),
        or_dash(s.vertical_rate),
        or_dash(sensors),
        or_dash(s.geo_altitude),
        or_dash(s.squawk.as_deref()),
        s.spi,
        s.position_source
    );
}

fn or_dash<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub mod models {
    pub mod dose;
}

pub mod config;
pub mod db {
    #[cfg(test)]
    pub(crate) mod memory;
    pub mod models;
    pub mod store;
}
pub mod devices;
pub mod schema;
pub mod units;
pub mod utils;
pub mod services {
    pub mod flight_log;
    pub mod flight_window;
    pub mod import;
    pub mod ingest;
    pub mod refs;
}

use crate::config::{Config, parse_year};
use crate::db::store::{DoseStore, PgStore};
use crate::devices::{DeviceRegistry, RawFile};
use crate::models::dose::DeviceKind;
use crate::services::import::{self, DeviceUpload, Importer};
use crate::services::refs;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Parser)]
#[command(name = "flight-dose", version, about = "Import in-flight radiation dosimeter logs")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import a flight log and the instrument files recorded during it
    Import {
        #[arg(long, value_name = "PATH")]
        flight_log: PathBuf,
        /// Year of the log's day/month dates (defaults to FLIGHT_LOG_YEAR)
        #[arg(long, value_parser = parse_year_arg)]
        year: Option<i32>,
        /// Instrument file as KIND[@VERSION]=PATH, or PATH to guess the kind from its name
        #[arg(long = "data", value_name = "FILE", value_parser = parse_upload_arg)]
        data: Vec<UploadArg>,
    },
    /// Register a device version
    AddVersion {
        #[arg(long)]
        kind: DeviceKind,
        #[arg(long)]
        version: String,
    },
    /// Register a device
    AddDevice {
        #[arg(long)]
        kind: DeviceKind,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        serial: String,
    },
    /// Add a LET calibration to a device
    AddCalibration {
        #[arg(long)]
        device: i64,
        #[arg(long, value_name = "YYYY-MM-DD")]
        from: NaiveDate,
        #[arg(long)]
        low: Decimal,
        #[arg(long)]
        high: Decimal,
    },
    /// Print the dose-rate curve of a file over a leg as JSON
    DoseRate {
        #[arg(long)]
        file: i64,
        #[arg(long)]
        leg: i64,
    },
    /// Print the integrated doses of a file as JSON
    Doses {
        #[arg(long)]
        file: i64,
    },
    DeleteFile {
        #[arg(long)]
        id: i64,
    },
    DeleteFlightLog {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Debug, Clone)]
struct UploadArg {
    kind: Option<DeviceKind>,
    version: Option<String>,
    path: PathBuf,
}

impl UploadArg {
    fn into_upload(self, registry: &DeviceRegistry) -> Result<DeviceUpload, String> {
        let file = RawFile::open(&self.path).map_err(|e| format!("read {}: {}", self.path.display(), e))?;
        let kind = match self.kind {
            Some(kind) => kind,
            None => registry
                .guess_kind(file.name())
                .ok_or_else(|| format!("cannot tell the device kind of {}; use KIND=PATH", self.path.display()))?,
        };
        Ok(DeviceUpload {
            kind,
            version: self.version,
            file,
        })
    }
}

fn parse_upload_arg(s: &str) -> Result<UploadArg, String> {
    let Some((device, path)) = s.split_once('=') else {
        return Ok(UploadArg {
            kind: None,
            version: None,
            path: PathBuf::from(s),
        });
    };
    if path.trim().is_empty() {
        return Err(format!("missing path in {:?}", s));
    }
    let (kind, version) = match device.split_once('@') {
        Some((kind, version)) => (kind, Some(version.trim().to_string()).filter(|v| !v.is_empty())),
        None => (device, None),
    };
    Ok(UploadArg {
        kind: Some(kind.parse()?),
        version,
        path: PathBuf::from(path),
    })
}

fn parse_year_arg(s: &str) -> Result<i32, String> {
    parse_year(s).ok_or_else(|| format!("{:?} is not a four-digit year", s))
}

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("JSON encoding failed: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn run(command: Command) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env().map_err(|e| e.to_string())?;
    info!(
        "Config loaded (home_timezone={}, flight_log_year={})",
        cfg.home_timezone,
        cfg.flight_log_year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    // 2) Connect DB
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");

    // 3) Apply pending database migrations
    apply_database_migrations(&mut conn)?;

    let mut store = PgStore::new(&mut conn);
    let registry = DeviceRegistry::standard();
    let importer = Importer::new(&registry, cfg.home_timezone);

    match command {
        Command::Import { flight_log, year, data } => {
            let mut log_file =
                RawFile::open(&flight_log).map_err(|e| format!("read {}: {}", flight_log.display(), e))?;
            let uploads = data
                .into_iter()
                .map(|arg| arg.into_upload(&registry))
                .collect::<Result<Vec<_>, _>>()?;

            let report = importer
                .import_batch(&mut store, &mut log_file, year.or(cfg.flight_log_year), uploads)
                .map_err(|e| format!("{} ({})", e.user_message(), e))?;
            info!(
                "Flight log {} has {} leg(s)",
                report.flight_log.id,
                report.legs.len()
            );
            for leg in &report.legs {
                info!(
                    "  leg {} {} {}-{} airborne {} to {}",
                    leg.id, leg.leg_number, leg.origin, leg.destination, leg.wheels_off, leg.wheels_on
                );
            }
            for outcome in &report.files {
                match &outcome.result {
                    Ok(file) => info!(
                        "{} [{}]: stored as file {} for {} ({} samples, {} in flight, dose on {} leg(s))",
                        outcome.filename,
                        outcome.kind,
                        file.file.id,
                        file.device,
                        file.samples,
                        file.assigned,
                        file.doses.len()
                    ),
                    Err(e) => error!("{} [{}]: {}", outcome.filename, outcome.kind, e.user_message()),
                }
            }
            if report.failures() > 0 {
                return Err(format!("{} of {} file(s) failed", report.failures(), report.files.len()));
            }
        }
        Command::AddVersion { kind, version } => {
            refs::ensure_device_version(&mut store, kind, &version)?;
        }
        Command::AddDevice { kind, version, serial } => {
            refs::ensure_device(&mut store, kind, version.as_deref(), &serial)?;
        }
        Command::AddCalibration { device, from, low, high } => {
            refs::add_calibration(&mut store, device, from, low, high)?;
        }
        Command::DoseRate { file, leg } => {
            let report = importer
                .dose_rate_report(&mut store, file, leg)
                .map_err(|e| format!("dose rate for file {} leg {}: {}", file, leg, e))?;
            if report.rate.is_empty() {
                warn!("File {} has no samples during leg {}", file, leg);
            }
            print_json(&report)?;
        }
        Command::Doses { file } => {
            let rows = store
                .integrated_doses(file)
                .map_err(|e| format!("integrated doses for file {}: {}", file, e))?;
            print_json(&rows)?;
        }
        Command::DeleteFile { id } => {
            if !import::delete_instrument_file(&mut store, id).map_err(|e| e.to_string())? {
                return Err(format!("instrument file {} does not exist", id));
            }
        }
        Command::DeleteFlightLog { id } => {
            if !import::delete_flight_log(&mut store, id).map_err(|e| e.to_string())? {
                return Err(format!("flight log {} does not exist", id));
            }
        }
    }

    Ok(())
}

fn load_env_file(explicit: Option<&Path>) -> Result<Option<LoadedEnvFile>, String> {
    // dotenvy never overrides variables already set in the process environment
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        dotenvy::from_path(path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        return Ok(Some(LoadedEnvFile {
            path: path.to_path_buf(),
            explicit: true,
        }));
    }
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(LoadedEnvFile { path, explicit: false })),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(format!("failed to load .env: {}", e)),
    }
}

fn main() {
    let cli = Cli::parse();
    let loaded_env = match load_env_file(cli.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "flight-dose {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_arg_forms() {
        let arg = parse_upload_arg("liulin@MDU-5=/data/flight.s01").unwrap();
        assert_eq!(arg.kind, Some(DeviceKind::Spectrometer));
        assert_eq!(arg.version.as_deref(), Some("MDU-5"));
        assert_eq!(arg.path, PathBuf::from("/data/flight.s01"));

        let arg = parse_upload_arg("gamma_neutron=1234567.txt").unwrap();
        assert_eq!((arg.kind, arg.version), (Some(DeviceKind::GammaNeutron), None));

        let arg = parse_upload_arg("HAWK_0042.txt").unwrap();
        assert_eq!(arg.kind, None);

        assert!(parse_upload_arg("geiger=x.txt").is_err());
        assert!(parse_upload_arg("hawk=").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "flight-dose",
            "import",
            "--flight-log",
            "crew.csv",
            "--year",
            "2024",
            "--data",
            "epdn2=1234567.txt",
            "--data",
            "flight.s01",
        ])
        .unwrap();
        match cli.command {
            Command::Import { year, data, .. } => {
                assert_eq!(year, Some(2024));
                assert_eq!(data.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "flight-dose",
            "add-calibration",
            "--device",
            "3",
            "--from",
            "2024-01-01",
            "--low",
            "1.25",
            "--high",
            "0.8",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::AddCalibration { device: 3, .. }));
        assert!(Cli::try_parse_from(["flight-dose", "import", "--flight-log", "x", "--year", "24"]).is_err());
    }
}

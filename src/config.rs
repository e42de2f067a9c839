use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::ArgMatches;
use rusoto_core::Region;

use super::error::Error;
use super::layout;
use super::retry::Policy;
use super::store::s3::{UploadTuning, MIN_PART_SIZE};

#[derive(Debug, Clone)]
pub enum Command {
    Reset { seed_dir: PathBuf, upload: UploadTuning },
    Clean,
    Status,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bucket: String,
    pub region: Region,
    pub policy: Policy,
    pub working_prefixes: Vec<String>,
    pub concurrency: usize,
    pub command: Command,
}

impl Settings {
    pub fn from_matches(matches: &ArgMatches) -> Result<Settings, Error> {
        let bucket = matches
            .value_of("bucket")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::config("--bucket (or S3RESET_BUCKET) is required"))?
            .to_string();
        let region = region(matches.value_of("region"), matches.value_of("endpoint"))?;

        let defaults = Policy::default();
        let timeout_secs: u64 = parse_or(matches, "timeout", defaults.timeout.as_secs())?;
        let max_attempts: u32 = parse_or(matches, "max_attempts", defaults.max_attempts)?;
        if timeout_secs == 0 || max_attempts == 0 {
            return Err(Error::config("--timeout and --max-attempts must be positive"));
        }
        let policy = Policy {
            max_attempts,
            timeout: Duration::from_secs(timeout_secs),
            ..defaults
        };

        let mut working_prefixes = layout::default_working_prefixes();
        let mut concurrency = working_prefixes.len();
        let command = match matches.subcommand() {
            ("reset", Some(sub)) => Command::Reset {
                seed_dir: sub
                    .value_of_os("seed_dir")
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::config("--seed-dir is required"))?,
                upload: upload_tuning(sub)?,
            },
            ("clean", Some(sub)) => {
                if let Some(values) = sub.values_of("prefix") {
                    let raw: Vec<String> = values.map(str::to_string).collect();
                    working_prefixes = layout::validate_working_prefixes(&raw)?;
                }
                concurrency = parse_or(sub, "concurrency", working_prefixes.len())?.max(1);
                Command::Clean
            }
            ("status", _) => Command::Status,
            _ => return Err(Error::config("a subcommand is required")),
        };

        Ok(Settings {
            bucket,
            region,
            policy,
            working_prefixes,
            concurrency,
            command,
        })
    }
}

/// A custom endpoint keeps the region name for signing.
fn region(name: Option<&str>, endpoint: Option<&str>) -> Result<Region, Error> {
    let name = match name {
        Some(name) => name.to_string(),
        None => Region::default().name().to_string(),
    };
    match endpoint.filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            tracing::info!(endpoint, region = %name, "using non-standard S3 endpoint");
            Ok(Region::Custom {
                name,
                endpoint: endpoint.to_string(),
            })
        }
        None => Region::from_str(&name)
            .map_err(|e| Error::config(format!("unknown region {}: {}", name, e))),
    }
}

fn upload_tuning(sub: &ArgMatches) -> Result<UploadTuning, Error> {
    let defaults = UploadTuning::default();
    let upload = UploadTuning {
        multipart_threshold: parse_or(sub, "multipart_threshold", defaults.multipart_threshold)?,
        part_size: parse_or(sub, "part_size", defaults.part_size)?,
        part_concurrency: parse_or(sub, "part_concurrency", defaults.part_concurrency)?.max(1),
    };
    if upload.part_size < MIN_PART_SIZE {
        return Err(Error::config(format!(
            "--part-size must be at least {} bytes",
            MIN_PART_SIZE
        )));
    }
    Ok(upload)
}

fn parse_or<T>(matches: &ArgMatches, name: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match matches.value_of(name) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|e| Error::config(format!("failed to parse {} {:?}: {}", name, v, e))),
    }
}

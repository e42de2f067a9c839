use tokio_compat::runtime;

use std::process;

use clap::{App, AppSettings, Arg, SubCommand};
use rusoto_s3::S3Client;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod file_entry;
mod layout;
mod manager;
mod mmap;
mod retry;
mod seed;
mod store;

use config::{Command, Settings};
use error::Error;
use manager::{BucketStateManager, Report};
use seed::SeedSource;
use store::S3Store;

fn app() -> App<'static, 'static> {
    App::new("s3reset")
        .about("Reset and clean the working bucket of the image pipeline")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("bucket")
                .short("b")
                .long("bucket")
                .value_name("NAME")
                .env("S3RESET_BUCKET")
                .help("Sets the S3 bucket")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("region")
                .short("r")
                .long("region")
                .value_name("REGION")
                .env("AWS_REGION")
                .help("Sets the bucket region")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("endpoint")
                .long("endpoint")
                .value_name("URL")
                .env("S3_ENDPOINT")
                .help("Sets a non-standard S3 endpoint")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .value_name("SECS")
                .help("Sets the timeout of each remote call")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max_attempts")
                .long("max-attempts")
                .value_name("NUM")
                .help("Sets the attempts per remote call on transient failures")
                .takes_value(true),
        )
        .subcommand(
            SubCommand::with_name("reset")
                .about("Deletes every object, then uploads the seed tree")
                .arg(
                    Arg::with_name("seed_dir")
                        .short("C")
                        .long("seed-dir")
                        .value_name("DIR")
                        .help("Sets the directory holding images/, prompt.txt and sam3-model.tar.gz")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("multipart_threshold")
                        .long("multipart-threshold")
                        .value_name("SIZE")
                        .help("Sets the file size in bytes from which multipart upload is used")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("part_size")
                        .short("s")
                        .long("part-size")
                        .value_name("SIZE")
                        .help("Sets the part size in bytes")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("part_concurrency")
                        .short("P")
                        .long("part-concurrency")
                        .value_name("NUM")
                        .help("Sets the concurrency of parts")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("clean")
                .about("Deletes everything under the working prefixes")
                .arg(
                    Arg::with_name("prefix")
                        .short("p")
                        .long("prefix")
                        .value_name("PREFIX")
                        .help("Sets a working prefix to clean, replacing the default set")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                )
                .arg(
                    Arg::with_name("concurrency")
                        .short("F")
                        .long("concurrency")
                        .value_name("NUM")
                        .help("Sets how many prefixes are cleaned at once")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("status").about("Prints the top level and state of the bucket"),
        )
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let matches = app().get_matches();

    let settings = match Settings::from_matches(&matches) {
        Ok(settings) => settings,
        Err(e) => exit_with(e),
    };

    let mut rt = match runtime::Builder::default().core_threads(4).build() {
        Ok(rt) => rt,
        Err(e) => exit_with(Error::from(e)),
    };

    let status = match settings.command {
        Command::Status => true,
        _ => false,
    };
    match rt.block_on_std(run(settings)) {
        Ok(report) => {
            if report.listing.is_empty() {
                tracing::info!("bucket is empty");
            }
            print!("{}", report.listing);
            if status {
                println!("state: {}", report.state);
            }
            tracing::info!(
                state = %report.state,
                deleted = report.deleted,
                uploaded = report.uploaded,
                "done"
            );
        }
        Err(e) => exit_with(e),
    }
}

async fn run(settings: Settings) -> Result<Report, Error> {
    let Settings {
        bucket,
        region,
        policy,
        working_prefixes,
        concurrency,
        command,
    } = settings;
    let client = S3Client::new(region);

    match command {
        Command::Reset { seed_dir, upload } => {
            let seed = SeedSource::scan(&seed_dir).await?;
            let store = S3Store::new(client, bucket, policy, upload);
            BucketStateManager::new(store, working_prefixes, concurrency)
                .reset(&seed)
                .await
        }
        Command::Clean => {
            let store = S3Store::new(client, bucket, policy, Default::default());
            BucketStateManager::new(store, working_prefixes, concurrency)
                .clean()
                .await
        }
        Command::Status => {
            let store = S3Store::new(client, bucket, policy, Default::default());
            BucketStateManager::new(store, working_prefixes, concurrency)
                .status()
                .await
        }
    }
}

fn exit_with(e: Error) -> ! {
    tracing::error!(error = %e, "failed");
    eprintln!("s3reset: {}", e);
    process::exit(e.exit_code())
}

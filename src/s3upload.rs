use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};

use s3_upload::config::parse_bool;
use s3_upload::s3::{S3Client, TransferOptions};
use s3_upload::{Parameters, RunOutcome, UploadError, UploadRequest, Uploader};

#[derive(Parser, Debug)]
#[command(
    name = "s3upload",
    version = env!("CARGO_PKG_VERSION"),
    about = "Upload a file or directory to an S3 bucket as a build step",
    long_about = "Uploads a single file, or the contents of a directory, to an S3 bucket. \
                  Objects are written with a canned ACL (public-read by default). \
                  Every option falls back to an S3_UPLOAD_* environment variable, which may come from a .env file.",
    after_help = "Examples:\n  \
                  s3upload target/app.jar -b my-bucket -d releases     # Upload one file to releases/app.jar\n  \
                  s3upload dist -b my-site --recursive                 # Upload a directory tree\n  \
                  s3upload dist -b my-site --make-public=false         # Keep objects private\n  \
                  s3upload dist -b my-site --dry-run                   # Validate without uploading\n\n\
                  Configuration (.env):\n  \
                  S3_UPLOAD_REGION=ap-northeast-2\n  \
                  S3_UPLOAD_BUCKET_NAME=my-bucket\n  \
                  S3_UPLOAD_DESTINATION=releases\n  \
                  S3_UPLOAD_ACCESS_KEY / S3_UPLOAD_SECRET_KEY (optional, default credential chain otherwise)"
)]
struct Cli {
    /// File or directory to upload
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// Bucket to upload into
    #[arg(long, short = 'b')]
    bucket_name: Option<String>,

    /// Key prefix (in the bucket) to upload under
    #[arg(long, short = 'd')]
    destination: Option<String>,

    /// AWS region of the bucket [default: ap-northeast-2]
    #[arg(long)]
    region: Option<String>,

    /// Access key; used only together with --secret-key
    #[arg(long)]
    access_key: Option<String>,

    /// Secret key; used only together with --access-key
    #[arg(long)]
    secret_key: Option<String>,

    /// Upload the contents of subdirectories too
    #[arg(long, short = 'r', value_name = "BOOL", num_args = 0..=1, require_equals = true,
          default_missing_value = "true", value_parser = parse_flag)]
    recursive: Option<bool>,

    /// Make uploaded objects publicly readable [default: true]
    #[arg(long, value_name = "BOOL", num_args = 0..=1, require_equals = true,
          default_missing_value = "true", value_parser = parse_flag)]
    make_public: Option<bool>,

    /// Perform every step except the upload itself
    #[arg(long, visible_alias = "dry-run", value_name = "BOOL", num_args = 0..=1,
          require_equals = true, default_missing_value = "true", value_parser = parse_flag)]
    do_not_upload: Option<bool>,

    /// Maximum number of concurrent object uploads for directories [default: 4]
    #[arg(long, short = 'c')]
    max_concurrent: Option<usize>,
}

impl Cli {
    fn into_parameters(self) -> Parameters {
        Parameters {
            access_key: self.access_key,
            secret_key: self.secret_key,
            region: self.region,
            do_not_upload: self.do_not_upload,
            source: self.source,
            bucket_name: self.bucket_name,
            destination: self.destination,
            recursive: self.recursive,
            make_public: self.make_public,
            max_concurrent: self.max_concurrent,
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    parse_bool(raw).ok_or_else(|| format!("'{}' is not a boolean (use true/false)", raw))
}

#[tokio::main]
async fn main() {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    // Initialize tracing/logging with support for LOG_LEVEL from .env
    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("✗").red().bold(), style(e.user_message()).red());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> s3_upload::Result<()> {
    let request = UploadRequest::from_env(cli.into_parameters())?;

    info!("S3 Upload Tool v{}", env!("CARGO_PKG_VERSION"));

    let options = TransferOptions {
        max_concurrent: request.max_concurrent,
        ..Default::default()
    };
    let uploader = Uploader::new(request);

    let outcome = uploader
        .run(
            |settings| async move {
                Ok::<_, UploadError>(
                    S3Client::connect(settings, options)
                        .await?
                        .with_progress_bar(progress_bar()),
                )
            },
            interrupted(),
        )
        .await?;

    match outcome {
        RunOutcome::DryRun => {
            println!(
                "{}",
                style("🔍 DRY RUN - nothing was uploaded").yellow().bold()
            );
        }
        RunOutcome::Uploaded { location, outcome } => {
            println!(
                "{} {} {}",
                style("✓").green(),
                style(location).green().bold(),
                style(format!("({})", format_size(outcome.bytes_transferred))).dim()
            );
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; never interrupt
        std::future::pending::<()>().await;
    }
    warn!("Interrupted, canceling transfer");
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

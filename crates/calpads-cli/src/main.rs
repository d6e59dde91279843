//! calpads: command-line front end for the CALPADS client.

mod commands;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(
    name = "calpads",
    about = "Drive the CALPADS web application from the command line",
    version,
    after_help = "Credentials are read from CALPADS_USERNAME and CALPADS_PASSWORD."
)]
struct Cli {
    /// JSON config file (host, timeouts, login paths).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and report whether the session is connected.
    Check,

    /// List the LEAs available to the signed-in user.
    Leas,

    /// Download a report, or describe its parameters with --dry-run.
    Report {
        /// LEA code, e.g. 0123456.
        lea: String,
        /// Report code as shown on the category page, e.g. 1.1.
        code: String,
        /// Report category (snapshot, ods).
        #[arg(long, default_value = "snapshot")]
        category: String,
        /// Output format (csv, excel, word, powerpoint, pdf, tiff, mhtml, xml, datafeed).
        #[arg(long, default_value = "csv")]
        format: String,
        /// Parameter values as a JSON object.
        #[arg(long)]
        values: Option<String>,
        /// File to write the report to.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Print accepted parameters instead of downloading.
        #[arg(long)]
        dry_run: bool,
    },

    /// Request or download extracts.
    Extract {
        #[command(subcommand)]
        action: ExtractAction,
    },

    /// Upload a file, or describe the upload form with --dry-run.
    Upload {
        lea: String,
        /// File to upload.
        file: PathBuf,
        /// Upload form values as a JSON object.
        #[arg(long)]
        values: Option<String>,
        /// Print accepted parameters instead of uploading.
        #[arg(long)]
        dry_run: bool,
    },

    /// Upload a file, wait for review and post the job.
    Post {
        lea: String,
        file: PathBuf,
        #[arg(long)]
        values: Option<String>,
        /// Seconds between job status checks.
        #[arg(long, default_value = "30")]
        interval: u64,
        /// Seconds to wait for the job to be ready for review.
        #[arg(long, default_value = "600")]
        timeout: u64,
        /// Post even when records were rejected.
        #[arg(long)]
        override_rejections: bool,
        /// Save the rejected-records extract here when not posting.
        #[arg(long)]
        rejections: Option<PathBuf>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ExtractAction {
    /// Request an extract.
    Request {
        lea: String,
        /// Extract type, e.g. SENR.
        extract_type: String,
        /// Form variant (default, date-range, as-of-date).
        #[arg(long, default_value = "default")]
        variant: String,
        #[arg(long)]
        values: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Wait for the most recent extract request and download it.
    Download {
        lea: String,
        #[arg(long, default_value = "30")]
        interval: u64,
        #[arg(long, default_value = "600")]
        timeout: u64,
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Check => commands::check(config),
        Commands::Leas => commands::leas(config),
        Commands::Report {
            lea,
            code,
            category,
            format,
            values,
            output,
            dry_run,
        } => commands::report(
            config,
            commands::ReportArgs {
                lea,
                code,
                category,
                format,
                values,
                output,
                dry_run,
            },
        ),
        Commands::Extract { action } => match action {
            ExtractAction::Request {
                lea,
                extract_type,
                variant,
                values,
                dry_run,
            } => commands::request_extract(config, &lea, &extract_type, &variant, values.as_deref(), dry_run),
            ExtractAction::Download {
                lea,
                interval,
                timeout,
                output,
            } => commands::download_extract(config, &lea, interval, timeout, &output),
        },
        Commands::Upload {
            lea,
            file,
            values,
            dry_run,
        } => commands::upload(config, &lea, file, values.as_deref(), dry_run),
        Commands::Post {
            lea,
            file,
            values,
            interval,
            timeout,
            override_rejections,
            rejections,
        } => commands::post(
            config,
            commands::PostArgs {
                lea,
                file,
                values,
                interval,
                timeout,
                override_rejections,
                rejections,
            },
        ),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "calpads", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}

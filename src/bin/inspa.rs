//! Inspa command line
//!
//! Builds installer containers and inspects, extracts or installs them

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use inspa_rs::archive::ExtractOptions;
use inspa_rs::progress::{NoProgress, ProgressEvent};
use inspa_rs::runtime::{extract_container, InstallOptions, Installer, ScriptStatus};
use inspa_rs::{inspect, BuildConfig, Builder};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "inspa")]
#[command(about = "Build and run self-extracting installers", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an installer from a TOML config
    Build {
        /// Path to the build config
        #[arg(short, long)]
        config: PathBuf,

        /// Runtime stub executable (overrides `stub` in the config)
        #[arg(long)]
        stub: Option<PathBuf>,

        /// Output path (overrides `output` in the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show header and layout information
    Inspect {
        installer: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// List packaged files
        #[arg(long)]
        files: bool,
    },

    /// Extract files without running post-install actions
    Extract {
        installer: PathBuf,
        dest: PathBuf,
    },

    /// Install: extract and run post-install actions
    Install {
        installer: PathBuf,

        /// Install directory (overrides the header default)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Skip post-install actions
        #[arg(long)]
        no_scripts: bool,

        /// Keep going when individual files cannot be written
        #[arg(long)]
        keep_going: bool,
    },
}

fn log_event(event: ProgressEvent) {
    match event {
        ProgressEvent::Started { stage } => info!("{}...", stage),
        ProgressEvent::Finished { stage } => info!("{} done", stage),
        ProgressEvent::Failed { stage, error } => warn!("{} failed: {}", stage, error),
        ProgressEvent::Progress { .. } => {}
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Build {
            config,
            stub,
            output,
        } => {
            let config = BuildConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let mut builder = Builder::new(config).with_progress(log_event);
            if let Some(stub) = stub {
                let bytes =
                    fs::read(&stub).with_context(|| format!("reading stub {}", stub.display()))?;
                builder = builder.with_stub(bytes);
            }
            if let Some(output) = output {
                builder = builder.with_output(output);
            }

            let report = builder.build().context("build failed")?;
            println!(
                "Built {} ({} bytes, {} files, {} -> {} bytes)",
                report.output.display(),
                report.container_size,
                report.stats.file_count,
                report.stats.original_size,
                report.stats.compressed_size
            );
        }

        Command::Inspect {
            installer,
            json,
            files,
        } => {
            let report = inspect(&installer, files)
                .with_context(|| format!("cannot parse installer {}", installer.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }

        Command::Extract { installer, dest } => {
            let summary = extract_container(
                &installer,
                &dest,
                &ExtractOptions::default(),
                &NoProgress,
                None,
            )
            .with_context(|| format!("extracting {}", installer.display()))?;
            println!(
                "Extracted {} files ({} bytes) to {}",
                summary.files_written,
                summary.bytes_written,
                dest.display()
            );
        }

        Command::Install {
            installer,
            dir,
            no_scripts,
            keep_going,
        } => {
            let options = InstallOptions {
                install_dir: dir,
                continue_on_io_error: keep_going,
                run_scripts: !no_scripts,
                ..InstallOptions::default()
            };
            let outcome = Installer::new(&installer, options)
                .with_progress(log_event)
                .run()
                .context("cannot parse installer")?;

            for (path, reason) in &outcome.failed_files {
                warn!("Not written: {} ({})", path, reason);
            }
            for script in &outcome.scripts {
                if script.status != ScriptStatus::Succeeded {
                    warn!("{}: {:?}", script.command, script.status);
                }
            }
            if let Some(error) = &outcome.error {
                warn!("Extraction stopped: {}", error);
            }

            if !outcome.success {
                bail!(
                    "installation into {} did not complete ({} files written)",
                    outcome.install_dir.display(),
                    outcome.files_written
                );
            }
            println!(
                "Installed {} files to {}",
                outcome.files_written,
                outcome.install_dir.display()
            );
        }
    }

    Ok(())
}

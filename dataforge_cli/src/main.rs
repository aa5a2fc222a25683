use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dataforge_cli::config::{AppConfig, ConfigManager, get_config};
use dataforge_cli::error::CliError;
use dataforge_cli::orchestrators::{
    IngestOptions, IngestOrchestrator, PipelineFile, PipelineOrchestrator, build_stage_configs,
};
use dataforge_cli::output::{OutputFormat, OutputFormatter, create_formatter};
use dataforge_cli::{paths, terminal};
use dataforge_core::stages::StageRegistry;
use dataforge_core::storage::FileSystemStore;
use dataforge_core::{DataForge, DatasetFormat, ExportFormat, JobStatus};

#[derive(Parser)]
#[command(name = "dataforge")]
#[command(author, version, about = "DataForge - dataset ingestion and cleaning pipelines", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format (defaults to output.default_format)
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,

    /// Disable progress bar display
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file and report its detected format and column statistics
    Ingest {
        /// File to ingest
        file: PathBuf,

        /// Dataset name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Input format, skipping detection (csv, tsv, json, jsonl, parquet, xlsx, pdf, txt, md, html, docx)
        #[arg(long)]
        format: Option<String>,
    },

    /// Show the first rows of a file as the engine parses them
    Preview {
        /// File to preview
        file: PathBuf,

        /// Input format, skipping detection
        #[arg(long)]
        format: Option<String>,

        /// Number of rows to show
        #[arg(short = 'n', long)]
        rows: Option<usize>,
    },

    /// Ingest a file and run a cleaning pipeline over it
    Run {
        /// File to process
        file: PathBuf,

        /// Stage to run, in order (repeatable)
        #[arg(short, long = "stage", value_name = "STAGE")]
        stages: Vec<String>,

        /// Stage option as stage.option=value (repeatable)
        #[arg(short, long = "option", value_name = "STAGE.OPTION=VALUE")]
        options: Vec<String>,

        /// JSON pipeline file instead of --stage flags
        #[arg(short, long, conflicts_with = "stages")]
        pipeline: Option<PathBuf>,

        /// Input format, skipping detection
        #[arg(long)]
        format: Option<String>,

        /// Artifact format (csv, jsonl, json)
        #[arg(short, long)]
        export: Option<String>,

        /// Directory to write artifacts into
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Number of pipeline workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List the available stages and their options
    Stages,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a configuration file holding the default values
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Get a configuration value
    Get {
        /// Configuration key (e.g., engine.worker_count)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., engine.worker_count)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration values
    List,
}

/// Settings shared by every command that talks to the engine
struct Session {
    config: AppConfig,
    formatter: Box<dyn OutputFormatter>,
    show_progress: bool,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self> {
        let config = get_config().context("Failed to load configuration")?;
        let format = match cli.output {
            Some(format) => format,
            None => OutputFormat::from_string(&config.output.default_format)?,
        };
        let use_color = terminal::should_use_color(config.output.color_enabled);
        if !use_color {
            colored::control::set_override(false);
        }
        let show_progress = !cli.no_progress
            && config.output.progress_enabled
            && terminal::should_show_progress_by_default();

        Ok(Self {
            formatter: create_formatter(format, use_color),
            config,
            show_progress,
        })
    }

    fn engine(&self, out_dir: Option<PathBuf>) -> Result<DataForge> {
        let mut builder = DataForge::builder(self.config.engine.clone());
        if let Some(dir) = out_dir {
            builder = builder.with_store(Arc::new(FileSystemStore::new(dir)));
        }
        Ok(builder.build()?)
    }
}

fn parse_format(format: Option<&str>) -> Result<Option<DatasetFormat>> {
    format
        .map(|f| {
            f.parse::<DatasetFormat>()
                .map_err(|e| anyhow::Error::from(CliError::misuse(&e.to_string())))
        })
        .transpose()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug = cli.debug;

    if debug {
        env_logger::Builder::from_env(env_logger::Env::default())
            .filter_level(log::LevelFilter::Debug)
            .filter_module("dataforge_core", log::LevelFilter::Debug)
            .filter_module("dataforge_cli", log::LevelFilter::Debug)
            .format_timestamp_millis()
            .init();
        eprintln!("Debug logging enabled");
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    if let Err(error) = run(cli).await {
        let error = CliError::from(error);
        eprint!("{}", error.format_for_user(debug));
        std::process::exit(error.exit_code().code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Ingest { file, name, format } => {
            let session = Session::new(&cli)?;
            let forge = session.engine(None)?;
            let options = IngestOptions {
                name: name.clone(),
                format: parse_format(format.as_deref())?,
                show_progress: session.show_progress,
            };

            let outcome = IngestOrchestrator::new(&forge).ingest_file(file, &options).await;
            forge.shutdown().await;
            let (dataset, stats) = outcome?;
            println!(
                "{}",
                session.formatter.format_dataset(&dataset, stats.as_deref())?
            );
        }
        Commands::Preview { file, format, rows } => {
            let mut session = Session::new(&cli)?;
            if let Some(rows) = rows {
                session.config.engine.preview_rows = (*rows).max(1);
            }
            let forge = session.engine(None)?;
            let options = IngestOptions {
                name: None,
                format: parse_format(format.as_deref())?,
                show_progress: false,
            };

            let outcome = IngestOrchestrator::new(&forge).ingest_file(file, &options).await;
            let preview = outcome.and_then(|(dataset, _)| Ok(forge.preview(dataset.id)?));
            forge.shutdown().await;
            println!("{}", session.formatter.format_preview(&preview?)?);
        }
        Commands::Run {
            file,
            stages,
            options,
            pipeline,
            format,
            export,
            out_dir,
            workers,
        } => {
            let mut session = Session::new(&cli)?;
            session.config.apply_cli_overrides(*workers, None);

            let schemas = StageRegistry::global().describe();
            let (stage_configs, file_format) = match pipeline {
                Some(path) => PipelineFile::load(path)?.into_parts(),
                None => (build_stage_configs(stages, options, &schemas)?, None),
            };
            if pipeline.is_some() && !options.is_empty() {
                return Err(CliError::misuse("--option cannot be combined with --pipeline").into());
            }
            let output_format = match export {
                Some(raw) => Some(
                    raw.parse::<ExportFormat>()
                        .map_err(|e| CliError::misuse(&e.to_string()))?,
                ),
                None => file_format,
            };

            let artifacts = out_dir
                .clone()
                .unwrap_or_else(|| paths::artifacts_dir(&session.config.engine.data_dir));
            let forge = session.engine(Some(artifacts))?;
            let ingest = IngestOptions {
                name: None,
                format: parse_format(format.as_deref())?,
                show_progress: session.show_progress,
            };

            let outcome: Result<_> = async {
                let (dataset, _) = IngestOrchestrator::new(&forge)
                    .ingest_file(file, &ingest)
                    .await?;
                PipelineOrchestrator::new(&forge, session.show_progress)
                    .run(dataset.id, stage_configs, output_format)
                    .await
            }
            .await;
            forge.shutdown().await;

            let job = outcome?;
            println!("{}", session.formatter.format_job(&job)?);
            match job.status {
                JobStatus::Completed => {}
                status => {
                    let reason = job
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("job ended {status}"));
                    return Err(CliError::job_failed(&reason).into());
                }
            }
        }
        Commands::Stages => {
            let session = Session::new(&cli)?;
            let schemas = StageRegistry::global().describe();
            print!("{}", session.formatter.format_stages(&schemas)?);
        }
        Commands::Config { command } => {
            config_command(command)?;
        }
        Commands::Completions { shell } => {
            generate_completions(*shell);
        }
    }

    Ok(())
}

fn config_command(command: &ConfigCommand) -> Result<()> {
    let mut manager = ConfigManager::new();

    match command {
        ConfigCommand::Init { force } => {
            if manager.init(*force)? {
                eprintln!("{}", "✓ Configuration written".green());
                eprintln!("Config file: {}", manager.get_config_path().display());
            } else {
                eprintln!(
                    "{}",
                    "Configuration already exists. Use --force to overwrite.".yellow()
                );
                eprintln!("Config file: {}", manager.get_config_path().display());
            }
        }
        ConfigCommand::Get { key } => {
            let value = manager
                .get(key)
                .map_err(|e| CliError::misuse(&format!("{e:#}")))?;
            println!("{value}");
        }
        ConfigCommand::Set { key, value } => {
            manager
                .set(key, value)
                .map_err(|e| CliError::misuse(&format!("{e:#}")))?;
            eprintln!("{}", format!("Set {key} = {value}").green());
            eprintln!(
                "Configuration saved to: {}",
                manager.get_config_path().display()
            );
        }
        ConfigCommand::List => {
            let items = manager.list()?;
            eprintln!("{}", "Configuration:".bold().blue());
            eprintln!("Config file: {}", manager.get_config_path().display());
            eprintln!();

            let mut sections: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
            for (key, value) in items {
                let section = key.split('.').next().unwrap_or("general").to_string();
                sections.entry(section).or_default().push((key, value));
            }

            for (section, items) in sections {
                println!("[{}]", section.yellow());
                for (key, value) in items {
                    let display_key = key.split_once('.').map(|(_, k)| k).unwrap_or(&key);
                    println!("  {} = {}", display_key.cyan(), value);
                }
                println!();
            }
        }
    }

    Ok(())
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

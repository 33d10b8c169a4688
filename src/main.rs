//! Seedbed CLI - build SQLite schemas and seed data from YAML documents

use clap::{Parser, Subcommand};
use seedbed::config::{self, SeedbedConfig};
use seedbed::ui::{self, ClassRow, Icons};
use seedbed::{Exporter, Loader, Options, SqliteStore};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "seedbed")]
#[command(version)]
#[command(about = "Declarative schema and seed data loader for SQLite")]
#[command(long_about = r#"
Seedbed reads YAML documents describing classes and their records, builds
the matching SQLite tables and loads the records with every cross-reference
resolved. Loading the same document twice does not duplicate rows.

Example usage:
  seedbed load fixtures/*.yaml --database seed.db
  seedbed export fixtures/models.yaml --output schema.sql
  seedbed stats --models fixtures/models.yaml
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ./seedbed.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build classes and load records from one or more documents
    Load {
        /// Documents or glob patterns
        #[arg(required = true)]
        files: Vec<String>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Resolve references missing from the document against the database
        #[arg(short, long)]
        auto_load: bool,

        /// Separator between key fields
        #[arg(short, long)]
        separator: Option<String>,
    },

    /// Build classes and create their tables only
    Models {
        /// Models document
        file: PathBuf,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Load records into tables built from a separate models document
    Instances {
        /// Instances document
        file: PathBuf,

        /// Models document defining the classes
        #[arg(short, long)]
        models: PathBuf,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Resolve references missing from the document against the database
        #[arg(short, long)]
        auto_load: bool,

        /// Separator between key fields
        #[arg(short, long)]
        separator: Option<String>,
    },

    /// Render a models document as a SQL schema script
    Export {
        /// Models document
        file: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show row counts for every class of a models document
    Stats {
        /// Models document defining the classes
        #[arg(short, long)]
        models: PathBuf,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a starter seedbed.toml
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match config::load_config(cli.config.as_deref())? {
        Some(settings) => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            ui::info("Config", &path.display().to_string());
            settings
        }
        None => SeedbedConfig::default(),
    };

    match cli.command {
        Commands::Load {
            files,
            database,
            auto_load,
            separator,
        } => {
            let started = Instant::now();
            let paths = expand_patterns(&files)?;
            let (store, db_path) = open_store(database, &settings)?;
            let options = options(&settings, separator, auto_load);
            let mut loader = Loader::with_options(&store, options);

            ui::header(&format!("Loading {} document(s)", paths.len()));
            ui::status(Icons::DATABASE, "Database", &db_path.display().to_string());

            for path in paths {
                ui::status(Icons::FILE, "Document", &path.display().to_string());
                let report = loader.load(path.as_path())?;
                ui::status(Icons::PACKAGE, "Classes", &report.classes.len().to_string());
                ui::summary_row("instances", &report.instances.to_string());
                ui::summary_row("inserted", &report.stats.inserted.to_string());
                ui::status(Icons::LINK, "Linked", &report.stats.linked.to_string());
                if report.stats.inserted == 0 {
                    ui::warn("Nothing new to insert; every record was already stored");
                }
            }

            ui::success("Load complete");
            ui::timing(&format!("{:.2?}", started.elapsed()));
        }

        Commands::Models { file, database } => {
            let (store, _) = open_store(database, &settings)?;
            let mut loader = Loader::with_options(&store, Options::from_config(&settings));

            ui::header(&format!("Building classes from {}", file.display()));
            let classes = loader.load_models(file.as_path())?;
            for class_name in &classes {
                let entity = loader.catalog().entity(class_name)?;
                ui::class_built(class_name, &entity.table_name);
            }
            ui::success(&format!("{} classes ready", classes.len()));
        }

        Commands::Instances {
            file,
            models,
            database,
            auto_load,
            separator,
        } => {
            let (store, _) = open_store(database, &settings)?;
            let auto_load = auto_load || settings.auto_load.unwrap_or(false);
            let mut loader = Loader::with_options(&store, options(&settings, separator, auto_load));
            loader.load_models(models.as_path())?;

            ui::header(&format!("Loading instances from {}", file.display()));
            let mut session = loader.load_instances(file.as_path(), auto_load, None)?;
            let stats = loader.commit(&mut session)?;
            ui::summary_row("instances", &session.len().to_string());
            ui::summary_row("inserted", &stats.inserted.to_string());
            ui::summary_row("linked", &stats.linked.to_string());
            ui::success("Instances committed");
        }

        Commands::Export { file, output } => {
            let exporter = Exporter::with_options(Options::from_config(&settings));
            match output {
                Some(path) => {
                    let mut out = std::fs::File::create(&path)?;
                    let classes = exporter.export_to_sql(file.as_path(), &mut out)?;
                    ui::success(&format!(
                        "Exported {} classes to {}",
                        classes.len(),
                        path.display()
                    ));
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut out = stdout.lock();
                    exporter.export_to_sql(file.as_path(), &mut out)?;
                }
            }
        }

        Commands::Stats {
            models,
            database,
            format,
        } => {
            let (store, db_path) = open_store(database, &settings)?;
            let mut loader = Loader::with_options(&store, Options::from_config(&settings));
            loader.load_models(models.as_path())?;

            let mut rows = Vec::new();
            for entity in loader.catalog().entities() {
                rows.push(ClassRow {
                    class: entity.class_name.clone(),
                    table: entity.table_name.clone(),
                    rows: loader.count(&entity.class_name)?,
                });
            }

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                ui::header(&format!("Seedbed Statistics ({})", db_path.display()));
                println!("{}", ui::class_table(&rows));
                ui::section(&format!(" {} Totals ", Icons::STATS));
                let stats = store.stats(loader.catalog())?;
                let classes = rows.len().to_string();
                let total = stats.total_rows().to_string();
                println!(
                    "{}",
                    ui::stats_table(&[("Classes", classes.as_str()), ("Total rows", total.as_str())])
                );
            }
        }

        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(config::default_config_path);
            if path.exists() && !force {
                ui::warn(&format!("{} already exists (use --force to overwrite)", path.display()));
                return Ok(());
            }
            config::write_config(&path, &SeedbedConfig::starter(), force)?;
            ui::status(Icons::GEAR, "Config", &path.display().to_string());
            ui::success(&format!("Wrote {}", path.display()));
        }
    }

    Ok(())
}

/// Options from the config file, overridden by command-line flags
fn options(settings: &SeedbedConfig, separator: Option<String>, auto_load: bool) -> Options {
    let mut options = Options::from_config(settings);
    if let Some(separator) = separator {
        options.separator = separator;
    }
    if auto_load {
        options.auto_load = true;
    }
    options
}

fn open_store(database: Option<PathBuf>, settings: &SeedbedConfig) -> anyhow::Result<(SqliteStore, PathBuf)> {
    let path = database
        .or_else(|| settings.database.as_ref().map(PathBuf::from))
        .unwrap_or_else(config::default_database_path);
    config::ensure_db_dir(&path)?;
    let store = SqliteStore::open(&path)?;
    Ok((store, path))
}

/// Expand glob patterns; a pattern matching nothing must name an existing file.
fn expand_patterns(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let mut matched = false;
        for entry in glob::glob(pattern)? {
            paths.push(entry?);
            matched = true;
        }
        if !matched {
            let literal = Path::new(pattern);
            if !literal.exists() {
                anyhow::bail!("no documents match {}", pattern);
            }
            paths.push(literal.to_path_buf());
        }
    }
    Ok(paths)
}

//! CLI entry point for `mailsearch`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailsearch::config::{self, Config};
use mailsearch::folder::Folder;
use mailsearch::index::builder;
use mailsearch::model::message::MessageInfo;
use mailsearch::search::router::{self, FolderSearch};
use mailsearch::sql::{LegacyCompiler, RecursiveCompiler, SqlCompiler};
use mailsearch::store::MailFolder;

#[derive(Parser)]
#[command(
    name = "mailsearch",
    version,
    about = "Search mail folders with s-expression queries, in memory or through SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Force rebuild index even if one already exists
    #[arg(short, long, global = true)]
    force: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the messages matching an expression
    Search {
        path: PathBuf,
        /// Query, e.g. '(match-all (system-flag "seen"))'; empty matches everything
        expression: String,
        /// Only consider these uids (forces in-memory evaluation)
        #[arg(long = "uid", value_name = "UID")]
        uids: Vec<String>,
        /// SQLite database holding the folder table
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        /// Never route to the database
        #[arg(long)]
        memory: bool,
        /// Lower to SQL with the stack-based compiler
        #[arg(long)]
        legacy: bool,
        #[arg(long)]
        json: bool,
    },
    /// Count the messages matching an expression
    Count {
        path: PathBuf,
        expression: String,
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
    },
    /// Print the SQL WHERE fragment for an expression
    Compile {
        expression: String,
        /// Use the stack-based compiler
        #[arg(long)]
        legacy: bool,
    },
    /// Build the folder index and print statistics
    Index { path: PathBuf },
    /// Write the folder summary into a SQLite table
    Sync {
        path: PathBuf,
        #[arg(long, value_name = "PATH")]
        db: PathBuf,
    },
    /// Show the effective configuration, or write it with --write
    Config {
        /// Save the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    let force = cli.force;

    match cli.command {
        Commands::Search {
            path,
            expression,
            uids,
            db,
            memory,
            legacy,
            json,
        } => {
            if db.is_some() {
                config.store.database = db;
            }
            config.search.memory_only |= memory;
            cmd_search(&path, &expression, &uids, legacy, json, &config, force)
        }
        Commands::Count { path, expression, db } => {
            if db.is_some() {
                config.store.database = db;
            }
            cmd_count(&path, &expression, &config, force)
        }
        Commands::Compile { expression, legacy } => cmd_compile(&expression, legacy),
        Commands::Index { path } => cmd_index(&path, &config, force),
        Commands::Sync { path, db } => {
            config.store.database = Some(db);
            cmd_sync(&path, &config, force)
        }
        Commands::Config { write } => cmd_config(&config, write),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_path.file_name().unwrap_or_default();
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn progress_bar(len: u64, message: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} {message} [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{eta}})"
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Load (or build) the index and wrap it in a folder.
fn open_folder(path: &Path, config: &Config, force: bool) -> anyhow::Result<MailFolder> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let index = builder::build_index(path, config, force, None)?;
    Ok(MailFolder::from_index(path, index, config)?)
}

fn expression_or_default<'a>(expression: &'a str, config: &'a Config) -> &'a str {
    if expression.trim().is_empty() {
        &config.search.default_expression
    } else {
        expression
    }
}

fn compiler(legacy: bool) -> Box<dyn SqlCompiler> {
    if legacy {
        Box::new(LegacyCompiler::new())
    } else {
        Box::new(RecursiveCompiler::new())
    }
}

/// Run a search and print the matching messages.
fn cmd_search(
    path: &Path,
    expression: &str,
    uids: &[String],
    legacy: bool,
    json: bool,
    config: &Config,
    force: bool,
) -> anyhow::Result<()> {
    let mut folder = open_folder(path, config, force)?;
    let expression = expression_or_default(expression, config);
    let subset = (!uids.is_empty()).then_some(uids);

    let route = router::route(&folder, expression, subset);
    let start = Instant::now();
    let results = FolderSearch::new()
        .with_compiler(compiler(legacy))
        .search(&mut folder, expression, subset)?;
    let elapsed = start.elapsed();

    let infos: Vec<&MessageInfo> = results.iter().filter_map(|uid| folder.info(uid)).collect();
    if json {
        print_search_results_json(expression, route, &infos, elapsed)?;
    } else {
        print_search_results_table(&infos);
    }
    Ok(())
}

fn cmd_count(path: &Path, expression: &str, config: &Config, force: bool) -> anyhow::Result<()> {
    let mut folder = open_folder(path, config, force)?;
    let expression = expression_or_default(expression, config);
    let count = FolderSearch::new().count(&mut folder, expression)?;
    println!("{count}");
    Ok(())
}

fn cmd_compile(expression: &str, legacy: bool) -> anyhow::Result<()> {
    let fragment = compiler(legacy).compile(expression)?;
    println!("{fragment}");
    Ok(())
}

fn cmd_config(config: &Config, write: bool) -> anyhow::Result<()> {
    let path = config::config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string());
    if write {
        config::save_config(config)?;
        println!("Wrote {path}");
    } else {
        println!("# {path}");
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

/// Index an mbox file and print statistics.
fn cmd_index(path: &Path, config: &Config, force: bool) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let file_size = std::fs::metadata(path)?.len();
    let pb = progress_bar(file_size, "Indexing")?;
    let start = Instant::now();

    let index = builder::build_index(
        path,
        config,
        force,
        Some(&|current, total| {
            pb.set_length(total);
            pb.set_position(current);
        }),
    )?;

    pb.finish_and_clear();

    let elapsed = start.elapsed();
    let idx_size = builder::index_file_size(path, config);

    print_index_stats(path, file_size, &index, elapsed, idx_size);
    Ok(())
}

/// Write the folder summary into the database table.
fn cmd_sync(path: &Path, config: &Config, force: bool) -> anyhow::Result<()> {
    let mut folder = open_folder(path, config, force)?;
    let rows = folder.sync_store()?;
    println!("  Wrote {rows} row(s) to table '{}'", folder.table_name());
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailsearch", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn format_date(time: i64) -> String {
    chrono::DateTime::from_timestamp(time, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Print search results as a human-readable table.
fn print_search_results_table(infos: &[&MessageInfo]) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {} result(s)", infos.len());
    println!();

    if infos.is_empty() {
        return;
    }

    println!(
        "  {:<6} {:<17} {:<25} {:<40} {:>8}",
        "UID", "Date", "From", "Subject", "Size"
    );
    println!("  {}", "-".repeat(100));

    for info in infos {
        let from_trunc: String = info.from.chars().take(24).collect();
        let subj_trunc: String = info.subject.chars().take(39).collect();
        println!(
            "  {:<6} {:<17} {:<25} {:<40} {:>8}",
            info.uid,
            format_date(info.date_sent),
            from_trunc,
            subj_trunc,
            format_size(info.size, BINARY)
        );
    }
    println!();
}

/// Print search results as JSON.
fn print_search_results_json(
    expression: &str,
    route: router::Route,
    infos: &[&MessageInfo],
    elapsed: std::time::Duration,
) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = infos
        .iter()
        .map(|info| {
            serde_json::json!({
                "uid": info.uid,
                "date": chrono::DateTime::from_timestamp(info.date_sent, 0).map(|dt| dt.to_rfc3339()),
                "from": info.from,
                "to": info.to,
                "subject": info.subject,
                "message_id": info.message_id,
                "size": info.size,
                "flags": info.flags.bits(),
                "labels": info.user_flags,
                "tags": info.user_tags,
            })
        })
        .collect();

    let output = serde_json::json!({
        "expression": expression,
        "route": format!("{route:?}").to_lowercase(),
        "elapsed_ms": elapsed.as_millis(),
        "result_count": infos.len(),
        "results": items,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print index statistics in a human-readable table.
fn print_index_stats(
    path: &Path,
    file_size: u64,
    index: &mailsearch::index::FolderIndex,
    elapsed: std::time::Duration,
    idx_size: u64,
) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "File", path.display());
    println!("  {:<20} {}", "File size", format_size(file_size, BINARY));
    println!("  {:<20} {}", "Messages", index.infos.len());

    let dates = index.infos.iter().map(|i| i.date_sent).filter(|&d| d > 0);
    if let (Some(min), Some(max)) = (dates.clone().min(), dates.max()) {
        println!(
            "  {:<20} {} to {}",
            "Date range",
            format_date(min),
            format_date(max)
        );
    }
    match &index.words {
        Some(words) => println!("  {:<20} {}", "Indexed words", words.word_count()),
        None => println!("  {:<20} {}", "Indexed words", "none"),
    }
    if idx_size > 0 {
        println!("  {:<20} {}", "Index size", format_size(idx_size, BINARY));
    }
    println!("  {:<20} {:.2?}", "Indexing time", elapsed);
    println!();
}

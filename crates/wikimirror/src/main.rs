use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikimirror_core::backup::{BackupReport, create_backup};
use wikimirror_core::client::Credentials;
use wikimirror_core::config::{MirrorConfig, load_config};
use wikimirror_core::flatten::{FlattenReport, flatten_backup};
use wikimirror_core::runtime::{
    BackupLayout, PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display,
    resolve_config_path, resolve_paths,
};

#[derive(Debug, Parser)]
#[command(
    name = "wikimirror",
    version,
    about = "Back up a hierarchical wiki to dated local directories"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Base directory for dated backups")]
    output_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print the run summary as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            output_dir: cli.output_dir.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run a full backup into today's directory (replacing it)")]
    Backup(BackupArgs),
    #[command(about = "Rebuild the flat exports of an existing backup directory")]
    Flatten(FlattenArgs),
}

#[derive(Debug, Args)]
struct BackupArgs {
    #[arg(long, value_name = "TOKEN", help = "CSRF-TOKEN cookie value (or WIKI_CSRF_TOKEN)")]
    csrf_token: Option<String>,
    #[arg(long, value_name = "SESSION", help = "yc_session cookie value (or WIKI_SESSION)")]
    session: Option<String>,
    #[arg(long, value_name = "NAME", help = "Path segment excluded from flat exports")]
    banned_segment: Option<String>,
    #[arg(long, help = "Write null full_title for pages missing from the tree instead of failing")]
    lenient_tree_lookup: bool,
}

#[derive(Debug, Args)]
struct FlattenArgs {
    backup_dir: PathBuf,
    #[arg(long, value_name = "NAME", help = "Path segment excluded from flat exports")]
    banned_segment: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Backup(args)) => run_backup(&runtime, args),
        Some(Commands::Flatten(args)) => run_flatten(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_backup(runtime: &RuntimeOptions, args: BackupArgs) -> Result<()> {
    let (mut config, paths) = load_runtime(runtime)?;
    if let Some(segment) = args.banned_segment {
        config.backup.banned_segment = Some(segment);
    }
    if args.lenient_tree_lookup {
        config.backup.strict_tree_lookup = Some(false);
    }
    let credentials = Credentials {
        csrf_token: required_secret(args.csrf_token, "WIKI_CSRF_TOKEN", "--csrf-token")?,
        session: required_secret(args.session, "WIKI_SESSION", "--session")?,
    };

    let layout = BackupLayout::for_today(&paths.output_dir);
    if runtime.diagnostics {
        println!(
            "[diagnostics]\n{}\nwiki_url={}\n{}\n",
            paths.diagnostics(),
            config.wiki_url(),
            layout.diagnostics()
        );
    }

    let report = create_backup(&config, credentials, &layout)?;
    info!(
        root = %normalize_for_display(&report.root),
        pages = report.pages,
        requests = report.request_count,
        "backup finished"
    );
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_backup_report(&report);
    }
    Ok(())
}

fn run_flatten(runtime: &RuntimeOptions, args: FlattenArgs) -> Result<()> {
    let (config, _) = load_runtime(runtime)?;
    if !args.backup_dir.is_dir() {
        bail!(
            "backup directory not found: {}",
            normalize_for_display(&args.backup_dir)
        );
    }
    let layout = BackupLayout::at(&args.backup_dir);
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n", layout.diagnostics());
    }
    let banned_segment = args
        .banned_segment
        .as_deref()
        .unwrap_or(config.banned_segment());

    let reports = flatten_backup(&layout, config.flat_suffix(), banned_segment)?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    println!("flatten");
    println!("root: {}", normalize_for_display(&layout.root));
    println!("banned_segment: {banned_segment}");
    print_flatten_reports(&reports);
    Ok(())
}

fn print_backup_report(report: &BackupReport) {
    println!("backup");
    println!("root: {}", normalize_for_display(&report.root));
    println!("pages: {}", report.pages);
    println!("markdown.written: {}", report.markdown.written);
    println!("markdown.skipped: {}", report.markdown.skipped.len());
    for url in &report.markdown.skipped {
        println!("  - {url}");
    }
    println!("metadata.written: {}", report.metadata.written);
    if !report.metadata.skipped.is_empty() {
        println!("metadata.skipped: {}", report.metadata.skipped.len());
        for url in &report.metadata.skipped {
            println!("  - {url}");
        }
    }
    if !report.metadata.missing_tree_nodes.is_empty() {
        println!(
            "metadata.missing_tree_nodes: {}",
            report.metadata.missing_tree_nodes.len()
        );
    }
    println!("attachments.found: {}", report.attachments_found);
    println!("attachments.downloaded: {}", report.attachments.downloaded);
    println!("attachments.failed: {}", report.attachments.failures.len());
    for failure in &report.attachments.failures {
        println!(
            "  - {} (from {}): {}",
            failure.url,
            normalize_for_display(&failure.source),
            failure.error
        );
    }
    print_flatten_reports(&report.flattened);
    println!("requests: {}", report.request_count);
}

fn print_flatten_reports(reports: &[FlattenReport]) {
    for report in reports {
        let name = report
            .destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "flat.{name}: copied={} excluded={}",
            report.copied, report.excluded
        );
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(MirrorConfig, ResolvedPaths)> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        output_dir: runtime.output_dir.clone(),
        config: runtime.config.clone(),
    };
    let (config_path, source) = resolve_config_path(&context, &overrides);
    let config = load_config(&config_path)?;
    info!(
        config = %normalize_for_display(&config_path),
        source = source.as_str(),
        "loaded configuration"
    );
    let paths = resolve_paths(&context, &overrides, &config);
    Ok((config, paths))
}

fn required_secret(flag: Option<String>, env_key: &str, flag_name: &str) -> Result<String> {
    let value = flag
        .or_else(|| env::var(env_key).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    match value {
        Some(value) => Ok(value),
        None => bail!("missing credential: pass {flag_name} or set {env_key}"),
    }
}

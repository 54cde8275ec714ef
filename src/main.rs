use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use wechat_material_sync::api::WeChatClient;
use wechat_material_sync::config::{ConfigOverrides, SyncConfig};
use wechat_material_sync::credentials::Credentials;
use wechat_material_sync::history::SyncHistory;
use wechat_material_sync::sync::Synchronizer;
use wechat_material_sync::token::get_access_token;
use wechat_material_sync::logger::{self, RunLog};
use wechat_material_sync::VerbosityLevel;

#[derive(Parser)]
#[command(name = "wechat-sync")]
#[command(about = "Sync local images to the WeChat material library", long_about = None)]
#[command(version)]
struct Cli {
    /// Logical paths to sync; a single argument may hold several
    /// whitespace-separated paths
    files: Vec<String>,

    /// Workspace directory for the token cache, ledger and log (default: ~/blog-sync)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Directory containing the flattened local files (default: current directory)
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Delay between upload requests in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Override the API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// Show what would be uploaded without contacting the API
    #[arg(long)]
    dry_run: bool,

    /// Exit with status 2 if any upload failed
    #[arg(long)]
    strict: bool,

    /// Show per-file digests and remote URLs
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print failures and the summary
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn logical_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .flat_map(|arg| arg.split_whitespace())
            .map(str::to_string)
            .collect()
    }

    fn verbosity(&self) -> VerbosityLevel {
        if self.verbose {
            VerbosityLevel::Verbose
        } else if self.quiet {
            VerbosityLevel::Quiet
        } else {
            VerbosityLevel::Normal
        }
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            workspace_dir: self.workspace.clone(),
            source_dir: self.source_dir.clone(),
            api_base: self.api_base.clone(),
            upload_delay_ms: self.delay_ms,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    logger::init_logger(verbosity);

    println!("{}", ">>> [WeChat Sync] Starting...".cyan().bold());

    let logical_paths = cli.logical_paths();
    if logical_paths.is_empty() {
        println!(">>> Nothing to sync.");
        return Ok(());
    }

    let config = SyncConfig::load(&cli.overrides())?;
    let client = WeChatClient::new(&config)?;

    if cli.dry_run {
        let history = SyncHistory::for_config(&config);
        let sync = Synchronizer::new(&config, &client, history).with_verbosity(verbosity);
        sync.plan(&logical_paths).print(verbosity);
        return Ok(());
    }

    // Nothing is written before the credentials are known to be present.
    let credentials = Credentials::from_env()?;

    config.ensure_workspace_dir()?;
    let run_log = RunLog::open(&config);
    run_log.append(&format!("Sync started: {} file(s)", logical_paths.len()));

    let token = match get_access_token(&config, &credentials, &client) {
        Ok(token) => token,
        Err(e) => {
            run_log.append(&format!("Aborted: {:#}", e));
            return Err(e);
        }
    };

    let history = SyncHistory::for_config(&config);
    let mut sync = Synchronizer::new(&config, &client, history).with_verbosity(verbosity);
    let report = sync.run(&token, &logical_paths)?;

    report.print(verbosity);
    run_log.append(&format!("Sync finished: {}", report.summary_line()));

    let code = report.exit_code(cli.strict);
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

//! Walletfile CLI - drive one wallet file from the shell
//!
//!   walletfile info                      → {"state", "address", "balance", ...}
//!   walletfile create                    → generate a wallet at the configured path
//!   walletfile save                      → open, save, close
//!   walletfile backup <path>             → write a snapshot next to the wallet
//!   walletfile backups                   → list rotated backups, newest first
//!   walletfile change-password --new-password <pw>
//!   walletfile keys                      → export account keys
//!   walletfile import-keys <file.json>   → create a wallet from exported keys
//!   walletfile watch                     → stream session signals until Ctrl+C
//!
//! Output is JSON: pretty on a TTY, compact otherwise.

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walletfile::logging::init_logging;
use walletfile::session::{SignalReceiver, ENV_MAX_BACKUPS, ENV_ROOT, ENV_WALLET};
use walletfile::{install_signal_handlers, run_session, AccountKeys, SessionSignal, WalletConfig, WalletSession};

const ENV_PASSWORD: &str = "WALLETFILE_PASSWORD";

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("walletfile {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let Some(command) = opts.command.clone() else {
        print_usage();
        return;
    };

    let result = tokio::runtime::Runtime::new()
        .context("failed to create runtime")
        .and_then(|rt| rt.block_on(run(&command, &opts)));

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({ "error": format!("{e:#}") }), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

async fn run(command: &str, opts: &ParsedArgs) -> anyhow::Result<Value> {
    match command {
        "info" | "open" => cmd_info(opts).await,
        "create" => cmd_create(opts).await,
        "save" => cmd_save(opts).await,
        "backup" => cmd_backup(opts).await,
        "backups" => cmd_backups(opts),
        "change-password" => cmd_change_password(opts).await,
        "keys" => cmd_keys(opts).await,
        "import-keys" => cmd_import_keys(opts).await,
        "watch" => cmd_watch(opts).await,
        other => Err(anyhow!("Unknown command: {other}")),
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    target: Option<String>,
    data_dir: Option<String>,
    wallet: Option<String>,
    password: Option<String>,
    new_password: Option<String>,
    max_backups: Option<usize>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        load_dotenv(Path::new(".env"));

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--data-dir" | "-d" => opts.data_dir = iter.next().cloned(),
                "--wallet" | "-w" => opts.wallet = iter.next().cloned(),
                "--password" | "-p" => opts.password = iter.next().cloned(),
                "--new-password" => opts.new_password = iter.next().cloned(),
                "--max-backups" => opts.max_backups = iter.next().and_then(|v| v.parse().ok()).filter(|n| *n > 0),
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => debug!(flag = %arg, "ignoring unknown flag"),
            }
        }

        let mut positional = positional.into_iter();
        opts.command = positional.next();
        opts.target = positional.next();

        // Environment fills what flags left unset
        if opts.data_dir.is_none() {
            opts.data_dir = env_value(ENV_ROOT);
        }
        if opts.wallet.is_none() {
            opts.wallet = env_value(ENV_WALLET);
        }
        if opts.password.is_none() {
            opts.password = env_value(ENV_PASSWORD);
        }
        if opts.max_backups.is_none() {
            opts.max_backups = env_value(ENV_MAX_BACKUPS).and_then(|v| v.parse().ok()).filter(|n| *n > 0);
        }

        opts
    }

    fn config(&self) -> WalletConfig {
        let mut config = WalletConfig::from_env();
        if let Some(dir) = &self.data_dir {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(wallet) = &self.wallet {
            config = config.with_wallet_file(wallet);
        }
        if let Some(max) = self.max_backups {
            config = config.with_max_backups(max);
        }
        config
    }

    fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `KEY=value` lines; variables already set win.
fn load_dotenv(path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else { return };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() && env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value);
            }
        }
    }
}

fn print_usage() {
    println!(
        r#"walletfile - wallet file lifecycle

USAGE:
    walletfile <command> [target] [options]

COMMANDS:
    info                    Open the wallet and print its state
    create                  Generate a new wallet at the configured path
    save                    Open, save and close the wallet
    backup <path>           Write a snapshot (".wallet" appended if missing)
    backups                 List backups of the wallet, newest first
    change-password         Re-encrypt with --new-password
    keys                    Print the account keys
    import-keys <file>      Create a wallet from a keys JSON file
    watch                   Open and stream signals until Ctrl+C

OPTIONS:
    --data-dir, -d <path>   Data directory (env: WALLETFILE_ROOT)
    --wallet, -w <path>     Wallet file (env: WALLETFILE_WALLET)
    --password, -p <pw>     Wallet password (env: WALLETFILE_PASSWORD)
    --new-password <pw>     New password for change-password
    --max-backups <n>       Backups kept per wallet (default: 10)

OUTPUT OPTIONS:
    --json                  Compact JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

EXAMPLES:
    walletfile info -d ~/.local/share/walletfile
    walletfile backup ~/snapshots/before-upgrade --password hunter2
    walletfile backups --json | jq '.[0].path'
"#
    );
}

// =============================================================================
// Commands
// =============================================================================

/// Open the configured wallet and wait until it is usable.
async fn open_session(opts: &ParsedArgs) -> anyhow::Result<(WalletSession, SignalReceiver)> {
    let (mut session, mut signals) = WalletSession::local(opts.config());
    session.open(opts.password()).await?;
    session.settle().await;
    ensure_opened(&session, &mut signals)?;
    Ok((session, signals))
}

fn ensure_opened(session: &WalletSession, signals: &mut SignalReceiver) -> anyhow::Result<()> {
    if session.is_open() {
        return Ok(());
    }
    while let Ok(signal) = signals.try_recv() {
        match signal {
            SessionSignal::OpenWithPassword { .. } => {
                bail!("wrong password for {}", session.wallet_file().display())
            }
            SessionSignal::InitCompleted { error: Some(error) } => bail!("failed to open wallet: {error}"),
            _ => {}
        }
    }
    bail!("wallet is {}", session.state())
}

fn summary(session: &WalletSession) -> Value {
    json!({
        "state": session.state(),
        "wallet_file": session.wallet_file(),
        "encrypted": session.is_encrypted(),
        "address": session.address(),
        "actual_balance": session.actual_balance(),
        "pending_balance": session.pending_balance(),
        "transactions": session.transaction_count(),
        "transfers": session.transfer_count(),
    })
}

async fn cmd_info(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (mut session, _signals) = open_session(opts).await?;
    let output = summary(&session);
    session.close().await?;
    Ok(output)
}

async fn cmd_create(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (session, _) = WalletSession::local(opts.config());
    let path = session.wallet_file();
    if path.exists() {
        bail!("wallet already exists at {}", path.display());
    }
    drop(session);

    let (mut session, _signals) = open_session(opts).await?;
    if let Some(new) = opts.new_password.as_deref().filter(|p| !p.is_empty()) {
        session.change_password("", new).await?;
        session.settle().await;
    }
    let output = summary(&session);
    session.close().await?;
    info!(wallet = %path.display(), "wallet created");
    Ok(output)
}

async fn cmd_save(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (mut session, _signals) = open_session(opts).await?;
    session.save(true, true).await?;
    session.settle().await;
    let output = json!({ "saved": session.wallet_file(), "state": session.state() });
    session.close().await?;
    Ok(output)
}

async fn cmd_backup(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let target = opts.target.as_deref().ok_or_else(|| anyhow!("backup requires a destination path"))?;
    let (mut session, mut signals) = open_session(opts).await?;
    let destination = session.backup(target).await?;
    session.settle().await;

    while let Ok(signal) = signals.try_recv() {
        if let SessionSignal::SaveCompleted { error: Some(error), snapshot: true } = signal {
            bail!("backup failed: {error}");
        }
    }
    session.close().await?;
    Ok(json!({ "backup": destination }))
}

fn cmd_backups(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (session, _) = WalletSession::local(opts.config());
    let set = session.backups()?;
    let entries: Vec<Value> = set
        .entries()
        .iter()
        .map(|entry| {
            let modified = chrono::DateTime::<chrono::Local>::from(entry.timestamp);
            json!({ "path": entry.backup_path, "modified": modified.to_rfc3339() })
        })
        .collect();
    Ok(Value::Array(entries))
}

async fn cmd_change_password(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let new = opts.new_password.as_deref().ok_or_else(|| anyhow!("change-password requires --new-password"))?;
    let (mut session, _signals) = open_session(opts).await?;
    session.change_password(opts.password(), new).await?;
    session.settle().await;
    let output = json!({ "encrypted": session.is_encrypted() });
    session.close().await?;
    Ok(output)
}

async fn cmd_keys(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (mut session, _signals) = open_session(opts).await?;
    let keys = session.account_keys().ok_or_else(|| anyhow!("wallet has no keys loaded"))?;
    let output = serde_json::to_value(&keys)?;
    session.close().await?;
    Ok(output)
}

async fn cmd_import_keys(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let source = opts.target.as_deref().ok_or_else(|| anyhow!("import-keys requires a keys file"))?;
    let raw = std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?;
    let keys: AccountKeys = serde_json::from_str(&raw).context("invalid keys file")?;

    let (mut session, mut signals) = WalletSession::local(opts.config());
    let path = session.wallet_file();
    if path.exists() {
        bail!("wallet already exists at {}", path.display());
    }
    session.create_with_keys(&keys).await?;
    session.settle().await;
    ensure_opened(&session, &mut signals)?;
    let output = summary(&session);
    session.close().await?;
    Ok(output)
}

async fn cmd_watch(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (mut session, mut signals) = open_session(opts).await?;
    let shutdown = install_signal_handlers();
    let pretty = opts.pretty;

    let printer = tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            if let Ok(value) = serde_json::to_value(&signal) {
                println!("{}", render(&value, pretty));
            }
        }
    });

    info!(wallet = %session.wallet_file().display(), "watching wallet; Ctrl+C to stop");
    run_session(&mut session, &shutdown).await?;
    let output = summary(&session);
    drop(session);
    let _ = printer.await;
    Ok(output)
}

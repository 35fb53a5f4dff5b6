// src/main.rs

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use portreg::db::Registry;
use portreg::db::models::Port;
use nix::sys::signal::{SigSet, Signal};
use portreg::lock::{CancelFlag, FileLock, LockFlags};
use std::io::Write;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "portreg")]
#[command(author, version, about = "Inspect and maintain the local port registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct DbArgs {
    /// Registry path (default: /opt/local/var/macports/registry/registry.db)
    #[arg(short, long, default_value = "/opt/local/var/macports/registry/registry.db")]
    db_path: String,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ModeArgs {
    /// Take a shared lock
    #[arg(long)]
    shared: bool,
    /// Take an exclusive lock
    #[arg(long)]
    exclusive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the registry schema in a new file
    Init {
        #[command(flatten)]
        db: DbArgs,
    },
    /// List installed ports
    Installed {
        /// Port name (optional, shows all if omitted)
        name: Option<String>,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Compare two version strings
    Vercmp { a: String, b: String },
    /// Print a registry metadata value
    Metadata {
        key: String,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Take an advisory lock on a file and hold it
    Lock {
        /// File to lock (created if missing)
        path: String,
        #[command(flatten)]
        mode: ModeArgs,
        /// Fail instead of waiting for a conflicting holder
        #[arg(long)]
        no_wait: bool,
        /// How long to hold the lock once taken
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
        /// Give up waiting once this many milliseconds have passed
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },
}

/// Set `flag` after `delay` from a helper thread.
///
/// The helper is started with SIGALRM blocked so the lock timer keeps
/// interrupting the main thread.
fn spawn_canceller(flag: CancelFlag, delay: Duration) -> Result<()> {
    let mut alarm = SigSet::empty();
    alarm.add(Signal::SIGALRM);
    alarm.thread_block()?;
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        flag.cancel();
    });
    alarm.thread_unblock()?;
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db }) => {
            info!("Initializing registry at: {}", db.db_path);
            let registry = Registry::open(&db.db_path)?;
            registry.init()?;
            println!("Registry initialized successfully at: {}", db.db_path);
            Ok(())
        }
        Some(Commands::Installed { name, db }) => {
            let registry = Registry::open(&db.db_path)?;
            registry.check_version()?;
            let ports = Port::installed(registry.conn(), name.as_deref())?;

            if ports.is_empty() {
                match name {
                    Some(name) => println!("Port {} is not installed.", name),
                    None => println!("No ports are installed."),
                }
            } else {
                println!("The following ports are currently installed:");
                for port in &ports {
                    println!(
                        "  {} @{}_{}{} (active)",
                        port.name, port.version, port.revision, port.variants
                    );
                }
            }
            Ok(())
        }
        Some(Commands::Vercmp { a, b }) => {
            println!("{}", portreg::version::compare(&a, &b));
            Ok(())
        }
        Some(Commands::Metadata { key, db }) => {
            let registry = Registry::open(&db.db_path)?;
            match registry.get_metadata(&key)? {
                Some(value) => println!("{}", value),
                None => return Err(anyhow::anyhow!("No metadata for key '{}'", key)),
            }
            Ok(())
        }
        Some(Commands::Lock {
            path,
            mode,
            no_wait,
            hold_ms,
            cancel_after_ms,
        }) => {
            let flags = LockFlags {
                shared: mode.shared,
                exclusive: mode.exclusive,
                unlock: false,
                no_block: no_wait,
            };
            let (mode, blocking) = flags.request()?;

            let mut cancel = CancelFlag::new();
            if let Some(ms) = cancel_after_ms {
                spawn_canceller(cancel.clone(), Duration::from_millis(ms))?;
            }

            let held = FileLock::open_with(&path, mode, blocking, &mut cancel)?;
            println!("locked");
            std::io::stdout().flush()?;

            std::thread::sleep(Duration::from_millis(hold_ms));
            drop(held);
            Ok(())
        }
        None => {
            println!("Port Registry v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'portreg --help' for usage information");
            Ok(())
        }
    }
}

// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value("/opt/local/var/macports/registry/registry.db")
        .help("Registry path")
}

fn build_cli() -> Command {
    Command::new("portreg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and maintain the local port registry")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Create the registry schema in a new file")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("installed")
                .about("List installed ports")
                .arg(Arg::new("name").help("Port name (optional)"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("vercmp")
                .about("Compare two version strings")
                .arg(Arg::new("a").required(true))
                .arg(Arg::new("b").required(true)),
        )
        .subcommand(
            Command::new("metadata")
                .about("Print a registry metadata value")
                .arg(Arg::new("key").required(true))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("lock")
                .about("Take an advisory lock on a file and hold it")
                .arg(Arg::new("path").required(true).help("File to lock (created if missing)"))
                .arg(Arg::new("shared").long("shared").action(ArgAction::SetTrue))
                .arg(Arg::new("exclusive").long("exclusive").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("no_wait")
                        .long("no-wait")
                        .action(ArgAction::SetTrue)
                        .help("Fail instead of waiting for a conflicting holder"),
                )
                .arg(
                    Arg::new("hold_ms")
                        .long("hold-ms")
                        .default_value("0")
                        .help("How long to hold the lock once taken"),
                )
                .arg(
                    Arg::new("cancel_after_ms")
                        .long("cancel-after-ms")
                        .help("Give up waiting once this many milliseconds have passed"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("portreg.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}

use clap::{Arg, ArgAction, Command};
use flatkv::{FlatStore, Result};
use log::debug;
use serde::Deserialize;
use std::env::current_dir;
use std::path::{Path, PathBuf};
use std::process::exit;
use stderrlog::{self, LogLevelNum, Timestamp};

const CONFIG_FILE: &str = "flatkv.json";
const DEFAULT_STORE_FILE: &str = "flatkv.db";

#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    file: Option<PathBuf>,
}

impl CliConfig {
    fn load(path: impl AsRef<Path>) -> Result<CliConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(CliConfig::default());
        }
        let value = std::fs::read_to_string(path)?;
        let config: CliConfig = serde_json::from_str(&value)?;
        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LogLevelNum::Warn,
        1 => LogLevelNum::Info,
        2 => LogLevelNum::Debug,
        _ => LogLevelNum::Trace,
    };
    if let Err(e) = stderrlog::new()
        .module(module_path!())
        .timestamp(Timestamp::Second)
        .verbosity(level)
        .init()
    {
        eprintln!("Failed to initialize logging: {e}");
    }
}

fn main() -> Result<()> {
    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .disable_help_subcommand(true)
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true)
                .help("Backing file of the store. Defaults to flatkv.db in the current directory"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Log more, repeat for debug and trace output"),
        )
        .subcommand(
            Command::new("set")
                .about("Set the value of a key, both types are string")
                .arg(Arg::new("KEY").help("A key").required(true))
                .arg(Arg::new("VALUE").help("A value").required(true)),
        )
        .subcommand(
            Command::new("get")
                .about("Get the value of a specified key")
                .arg(Arg::new("KEY").help("A key").required(true)),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove the key-value pair")
                .arg(
                    Arg::new("KEY")
                        .help("The key of the key-value pair to be removed")
                        .required(true),
                ),
        )
        .subcommand(Command::new("list").about("Print every key-value pair in key order"))
        .get_matches();

    init_logging(matches.get_count("verbose"));

    let cwd = current_dir()?;
    let path = match matches.get_one::<PathBuf>("file") {
        Some(file) => file.to_owned(),
        None => CliConfig::load(cwd.join(CONFIG_FILE))?
            .file
            .unwrap_or_else(|| cwd.join(DEFAULT_STORE_FILE)),
    };
    debug!("Using store file {}", path.display());
    let mut store = FlatStore::open(path)?;

    match matches.subcommand() {
        Some(("set", sub_matches)) => {
            store.set(
                sub_matches.get_one::<String>("KEY").expect("required").to_string(),
                sub_matches.get_one::<String>("VALUE").expect("required").to_string(),
            );
            store.save()?;
        }
        Some(("get", sub_matches)) => {
            let key = sub_matches.get_one::<String>("KEY").expect("required");
            println!("{}", store.get(key));
        }
        Some(("rm", sub_matches)) => {
            let key = sub_matches.get_one::<String>("KEY").expect("required");
            match store.remove(key) {
                Some(_) => store.save()?,
                None => {
                    println!("Key not found");
                    exit(1);
                }
            }
        }
        Some(("list", _)) => {
            for (key, value) in &store {
                println!("{key}:{value}");
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}

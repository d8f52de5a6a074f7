use std::path::PathBuf;
use std::fs::OpenOptions;
use clap::{Parser, Subcommand};

mod cmd;
mod device;
mod error;
mod logger;
mod pblk;

use device::{Device, ImageDevice};
use logger::Logger;

#[derive(Debug, Parser)]
#[clap(version, about = "Perform verification of pblk meta data")]
struct Args {
    /// Set verbosity of the output (can be used multiple times)
    #[clap(short, long, parse(from_occurrences))]
    verbose: u32,

    /// Log file
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Report the progress of every scan phase
    #[clap(short, long)]
    status: bool,

    #[clap(subcommand)]
    command: CommandArgs,
}

#[derive(Debug, Subcommand)]
enum CommandArgs {
    /// Dump the meta data of every line in a die range
    MetaDump {
        /// Device manifest
        #[clap(parse(from_os_str), value_name = "MANIFEST")]
        manifest: PathBuf,

        /// First die of the range (flattened index)
        #[clap(long, value_name = "DIE")]
        begin: Option<usize>,

        /// Last die of the range (flattened index)
        #[clap(long, value_name = "DIE")]
        end: Option<usize>,

        /// One line of output per line
        #[clap(short, long)]
        brief: bool,

        /// Output JSON
        #[clap(long)]
        json: bool,
    },

    /// List the pblk instances found on the device
    Discover {
        /// Device manifest
        #[clap(parse(from_os_str), value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Output JSON
        #[clap(long)]
        json: bool,
    },

    /// Discover instances, scan them and verify every line
    Check {
        /// Device manifest
        #[clap(parse(from_os_str), value_name = "MANIFEST")]
        manifest: PathBuf,

        /// One line of output per line
        #[clap(short, long)]
        brief: bool,

        /// Output JSON
        #[clap(long)]
        json: bool,
    },
}

fn main()
{
    let args = Args::parse();

    let mut cfg = Config::default();
    cfg.verbosity = args.verbose;
    cfg.log_file_path = args.log_file;
    cfg.status = args.status;

    match args.command {
        CommandArgs::MetaDump { manifest, begin, end, brief, json } => {
            cfg.command = Command::MetaDump;
            cfg.manifest_path = manifest;
            cfg.begin = begin;
            cfg.end = end;
            cfg.brief = brief;
            cfg.json = json;
        }
        CommandArgs::Discover { manifest, json } => {
            cfg.command = Command::Discover;
            cfg.manifest_path = manifest;
            cfg.json = json;
        }
        CommandArgs::Check { manifest, brief, json } => {
            cfg.command = Command::Check;
            cfg.manifest_path = manifest;
            cfg.brief = brief;
            cfg.json = json;
        }
    }

    let mut log_file = None;

    // Create the log file in write mode.

    if let Some(path) = &cfg.log_file_path {
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path);

        log_file = match f {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: {}: {}", &path.display(), &e);
                cfg.log_file_path = None;
                None
            }
        };
    }

    // Open the device read-only.

    let device = match ImageDevice::open(&cfg.manifest_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error: {}", &e);
            std::process::exit(1);
        }
    };

    let mut context = Context {
        logger: Logger::new(log_file, &cfg),
        device,
    };

    context.logger.logln(1, &format!("image: {}", context.device.image_path().display()));

    let stdout = std::io::stdout();
    let code = match cmd::run(&mut context, &cfg, &mut stdout.lock()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", &e);
            1
        }
    };

    std::process::exit(code);
}

/// Sub-commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    MetaDump,
    Discover,
    Check,
}

/// Contains configuration options.
#[derive(Debug)]
pub struct Config {
    pub command: Command,
    pub manifest_path: PathBuf,
    pub log_file_path: Option<PathBuf>,
    /// Die range of `meta-dump`; the whole device by default.
    pub begin: Option<usize>,
    pub end: Option<usize>,
    pub brief: bool,
    pub json: bool,
    pub status: bool,
    pub verbosity: u32,
}

impl Default for Config {
    fn default() -> Self
    {
        Self {
            command: Command::MetaDump,
            manifest_path: PathBuf::default(),
            log_file_path: None,
            begin: None,
            end: None,
            brief: false,
            json: false,
            status: false,
            verbosity: 0,
        }
    }
}

/// Contains shared mutable state.
#[derive(Debug)]
pub struct Context<D: Device> {
    pub device: D,
    pub logger: Logger,
}

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context as _, bail};
use clap::Parser;
use log::{LevelFilter, info};

use rewritefs::caller::Caller;
use rewritefs::config;
use rewritefs::driver::{self, MountOptions};
use rewritefs::rewrite::Engine;
use rewritefs::volume::Volume;

#[derive(Parser)]
#[command(
    name = "rewritefs",
    version,
    about = "Pass-through filesystem that rewrites paths with caller-aware regex rules"
)]
struct Cli {
    /// Source directory presented through the rewritten view
    source: PathBuf,

    /// Where to mount the view
    mountpoint: Option<PathBuf>,

    /// Mount options: config=PATH, verbose=LEVEL (0..4), autocreate, or
    /// any runtime option, comma separated
    #[arg(short = 'o', value_name = "OPT[,OPT...]", action = clap::ArgAction::Append)]
    options: Vec<String>,

    /// Stay in the foreground
    #[arg(short = 'f')]
    foreground: bool,

    /// Runtime debug mode (implies full verbosity)
    #[arg(short = 'd')]
    debug: bool,

    /// Parse and dump the configuration, then exit
    #[arg(long)]
    check: bool,

    /// Print the host-relative translation of a guest path, then exit
    #[arg(long, value_name = "GUEST_PATH")]
    rewrite: Option<PathBuf>,
}

/// The `-o` options this crate interprets; everything else is passed
/// through to the runtime.
#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    verbose: u8,
    autocreate: bool,
    passthrough: Vec<String>,
}

fn split_options(raw: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();
    for group in raw {
        for opt in group.split(',') {
            if let Some(path) = opt.strip_prefix("config=") {
                options.config = Some(PathBuf::from(path));
            } else if let Some(level) = opt.strip_prefix("verbose=") {
                options.verbose = level
                    .parse()
                    .with_context(|| format!("invalid verbose level {level:?}"))?;
            } else if opt == "autocreate" {
                options.autocreate = true;
            } else if !opt.is_empty() {
                options.passthrough.push(opt.to_string());
            }
        }
    }
    Ok(options)
}

const fn level_filter(verbose: u8, debug: bool) -> LevelFilter {
    if debug {
        return LevelFilter::Trace;
    }
    match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| writeln!(buf, "[rewritefs] {}: {}", record.level(), record.args()))
        .init();
}

/// Resolve the engine: an explicit `-o config=` must load; otherwise the
/// user-level default is used when present, and an absent config means
/// pure passthrough.
fn load_engine(explicit: Option<&Path>) -> anyhow::Result<Engine> {
    if let Some(path) = explicit {
        return config::load(path);
    }
    if let Some(default) = dirs::config_dir().map(|dir| dir.join("rewritefs/config"))
        && default.is_file()
    {
        return config::load(&default);
    }
    Ok(Engine::default())
}

fn dump_config(engine: &Engine) {
    for context in engine.contexts() {
        match &context.caller {
            Some(pattern) => info!("ctx \"{}\":", pattern.raw()),
            None => info!("ctx default:"),
        }
        for rule in &context.rules {
            let target = rule
                .template
                .as_ref()
                .map_or("(don't rewrite)", |template| template.raw());
            info!("  \"{}\" -> \"{}\"", rule.pattern.raw(), target);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let options = split_options(&cli.options)?;
    init_logging(level_filter(options.verbose, cli.debug));

    let engine = load_engine(options.config.as_deref())?;
    dump_config(&engine);

    if cli.check {
        return Ok(());
    }

    if let Some(guest) = &cli.rewrite {
        let mut caller = Caller::new(std::process::id());
        println!("{}", engine.rewrite(guest, &mut caller).display());
        return Ok(());
    }

    let volume = Volume::open_source(&cli.source, engine, options.autocreate)?;
    let Some(mountpoint) = &cli.mountpoint else {
        bail!("missing mount point argument");
    };
    let mut passthrough = options.passthrough;
    // The kernel must check permissions itself against the stat data the
    // volume returns.
    passthrough.push("default_permissions".to_string());
    driver::serve(
        &volume,
        mountpoint,
        &MountOptions {
            foreground: cli.foreground,
            debug: cli.debug,
            passthrough,
        },
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[rewritefs] error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

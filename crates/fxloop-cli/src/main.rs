mod console;
mod run;

use clap::{Parser, Subcommand};
use fxloop_config::ConfigFile;
use fxloop_engine::dsp::Band;
use fxloop_engine::{default_presets, EngineConfig, Profile};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fxloop", version, about = "Live capture, effect, playback loop")]
struct Cli {
    /// More log output (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices
    Devices,
    /// List effects, bands and the default preset slots
    Effects,
    /// Write a config file with every setting of a profile
    Init {
        path: PathBuf,
        #[arg(long, default_value_t = Profile::Robust)]
        profile: Profile,
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the loop until Ctrl+C, `q` on stdin, or --seconds elapse
    Run(run::RunArgs),
}

fn init_logging(verbose: u8, quiet: bool) {
    let fallback = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with_target(false)
        .init();
}

fn print_effects() {
    println!("effects:");
    println!("  none");
    println!("  band:<name>");
    println!("  echo:<delay frames>[:<mix>]");
    println!("  tremolo:<hz>");
    println!("  distort[:threshold,a1,a2,a3,gain]");
    println!("bands:");
    for band in Band::ALL {
        println!("  {band}");
    }
    println!("preset slots:");
    for (slot, kind) in default_presets().iter().enumerate() {
        println!("  {slot:>2}  {kind}");
    }
}

fn init_config(path: &PathBuf, profile: Profile, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    let cfg = EngineConfig::for_profile(profile);
    ConfigFile::from_engine(&cfg, profile).save(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.cmd {
        Command::Devices => fxloop_engine::devices::print_devices().map_err(anyhow::Error::from),
        Command::Effects => {
            print_effects();
            Ok(())
        }
        Command::Init { path, profile, force } => init_config(&path, profile, force),
        Command::Run(args) => return run::run(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

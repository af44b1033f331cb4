//! imgsquash CLI - squash the layers of a container image tar archive

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::debug;

use imgsquash::{
    assemble, history, squash, tarball, CancelToken, ImageArchive, ImageTag, Staging, StartPolicy,
};

#[derive(Parser)]
#[command(name = "imgsquash")]
#[command(about = "squash the layers of a container image tar archive")]
#[command(version, disable_version_flag = true)]
struct Cli {
    /// read image tar from a file instead of stdin
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// write image tar to a file instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// repository name and tag for the squashed image (repo:tag)
    #[arg(short = 't', long = "tag")]
    tag: Option<String>,

    /// squash start layer: a unique id prefix, or "root"
    #[arg(long)]
    from: Option<String>,

    /// start at the last squash/FROM layer instead of the first
    #[arg(long)]
    last: bool,

    /// keep the staging directory on exit
    #[arg(long)]
    keep_temp: bool,

    /// enable verbose progress logging on stderr
    #[arg(long)]
    verbose: bool,

    /// print version information and quit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> imgsquash::Result<()> {
    // reject a malformed tag before doing any work
    let tag: Option<ImageTag> = cli.tag.as_deref().map(str::parse).transpose()?;

    let cancel = CancelToken::install()?;
    let staging = Staging::new()?;

    match &cli.input {
        Some(path) => {
            debug!("loading export from {}", path.display());
            let file = File::open(path).map_err(|source| imgsquash::Error::Io {
                path: path.clone(),
                source,
            })?;
            tarball::unpack(file, staging.path(), cancel)?;
        }
        None => {
            debug!("loading export from stdin");
            tarball::unpack(io::stdin().lock(), staging.path(), cancel)?;
        }
    }

    let mut archive = ImageArchive::load(staging.path())?;
    archive.log_history();

    let policy = match (&cli.from, cli.last) {
        (Some(selector), _) => StartPolicy::Explicit(selector.clone()),
        (None, true) => StartPolicy::Last,
        (None, false) => StartPolicy::First,
    };
    let start = history::select_start(&archive, &policy)?;

    // newer-format squashes go into a fresh marker layer below the start;
    // otherwise (and for a start with nothing below it) the start layer is
    // squashed in place
    let newer_format = staging.path().join(imgsquash::MANIFEST_FILE).exists();
    let target = if newer_format && archive.child_of(&start).is_some() {
        archive.insert_after(&start)?
    } else {
        start
    };

    squash::squash(&mut archive, &target, cancel)?;
    archive.log_history();

    match &cli.output {
        Some(path) => {
            debug!("tarring new image to {}", path.display());
            let file = File::create(path).map_err(|source| imgsquash::Error::Io {
                path: path.clone(),
                source,
            })?;
            assemble::write_image(&mut archive, tag.as_ref(), file, cancel)?;
        }
        None => {
            debug!("tarring new image to stdout");
            let _ = assemble::write_image(&mut archive, tag.as_ref(), io::stdout().lock(), cancel)?;
        }
    }

    if cli.keep_temp {
        let kept = staging.keep();
        eprintln!("staging directory retained at {}", kept.display());
    }

    Ok(())
}

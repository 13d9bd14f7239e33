use std::path::PathBuf;

use ardat_format::ContentEncoding;
use structopt::clap::AppSettings::*;
use structopt::StructOpt;

mod commands;
mod error;

use error::{Error, Result};

#[derive(Debug)]
struct ParseEncodingError(String);

impl std::fmt::Display for ParseEncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown content encoding: {}", self.0)
    }
}

fn parse_encoding(src: &str) -> std::result::Result<ContentEncoding, ParseEncodingError> {
    ContentEncoding::parse(src).map_err(|_| ParseEncodingError(src.to_string()))
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "c", visible_alias = "create", about = "Create a new archive")]
    Create {
        #[structopt(
            name = "archive",
            parse(from_os_str),
            help = "Path to the .ardat archive to create"
        )]
        archive: PathBuf,

        #[structopt(
            name = "source",
            parse(from_os_str),
            help = "File or directory to archive"
        )]
        source: PathBuf,

        #[structopt(
            short = "e",
            long = "encoding",
            parse(try_from_str = parse_encoding),
            number_of_values = 1,
            help = "Encoding to store file content with, repeat to layer [possible values: hex]"
        )]
        encodings: Vec<ContentEncoding>,
    },

    #[structopt(
        name = "x",
        visible_alias = "extract",
        about = "Extract files from an archive"
    )]
    Extract {
        #[structopt(
            name = "archive",
            parse(from_os_str),
            help = "Path to the .ardat archive"
        )]
        archive: PathBuf,

        #[structopt(
            short,
            long,
            parse(from_os_str),
            help = "Directory to extract into [default: current directory]"
        )]
        output: Option<PathBuf>,
    },

    #[structopt(name = "l", visible_alias = "list", about = "List entities of an archive")]
    List {
        #[structopt(
            name = "archive",
            parse(from_os_str),
            help = "Path to the .ardat archive"
        )]
        archive: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ardat",
    about = "Create, list and extract ardat archives.",
    settings = &[SubcommandRequiredElseHelp, DisableHelpSubcommand, VersionlessSubcommands],
    usage = "ardat (c|l|x) [FLAGS|OPTIONS] <archive> [source]"
)]
struct CliOpts {
    #[structopt(short, long, help = "Show verbose output", global = true)]
    verbose: bool,

    #[structopt(
        short,
        long,
        help = "Number of worker threads for writing [default: serial]",
        global = true
    )]
    jobs: Option<usize>,

    #[structopt(subcommand)]
    cmd: Commands,
}

fn pool(jobs: Option<usize>) -> Result<Option<rayon::ThreadPool>> {
    match jobs {
        None | Some(0) | Some(1) => Ok(None),
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map(Some)
            .map_err(|source| Error::ThreadPool { source }),
    }
}

fn run(opts: CliOpts) -> Result<()> {
    let pool = pool(opts.jobs)?;

    match opts.cmd {
        Commands::Create {
            archive,
            source,
            encodings,
        } => commands::create(archive, source, &encodings, pool.as_ref()),
        Commands::Extract { archive, output } => commands::extract(archive, output, pool.as_ref()),
        Commands::List { archive } => commands::list(archive, opts.verbose),
    }
}

fn main() -> miette::Result<()> {
    let opts = CliOpts::from_iter(wild::args_os());

    let level = if opts.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    run(opts)?;
    Ok(())
}

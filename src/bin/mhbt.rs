use std::io;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use mhbt::cmd::{self, IndexParams, Selection};
use mhbt::encodings::HashFunctions;
use mhbt::errors::SbtErrorCode;
use mhbt::index::search::SearchMode;
use mhbt::Result;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from signature files, or extend one with --append
    Index {
        /// Index descriptor to write
        sbt: PathBuf,

        /// Signature files to index
        #[arg(required = true)]
        sigs: Vec<PathBuf>,

        #[command(flatten)]
        select: SelectArgs,

        /// Downsample sketches to this scaled value
        #[arg(long)]
        scaled: Option<u64>,

        /// Tree degree
        #[arg(short = 'd', long = "degree", default_value_t = 2)]
        d: u32,

        /// Size of each Bloom filter table
        #[arg(long, default_value_t = 100_000)]
        tablesize: u64,

        /// Number of Bloom filter tables
        #[arg(long, default_value_t = 4)]
        n_tables: u64,

        /// Add to an existing index
        #[arg(long)]
        append: bool,
    },

    /// Find datasets in an index similar to a query
    Search {
        query: PathBuf,

        sbt: PathBuf,

        #[command(flatten)]
        select: SelectArgs,

        #[arg(short, long, default_value_t = 0.08)]
        threshold: f64,

        /// Score by containment of the query instead of similarity
        #[arg(long)]
        containment: bool,

        /// Sort results by score
        #[arg(long)]
        ranked: bool,
    },

    /// Score a query against every node of an index
    Print {
        sbt: PathBuf,

        query: PathBuf,

        #[command(flatten)]
        select: SelectArgs,
    },
}

#[derive(Args)]
struct SelectArgs {
    /// k-mer size to select
    #[arg(short, long)]
    ksize: Option<usize>,

    /// Molecule type to select (dna, protein, dayhoff, hp)
    #[arg(long)]
    moltype: Option<String>,
}

impl SelectArgs {
    fn selection(&self, scaled: Option<u64>) -> Result<Selection> {
        let moltype = match &self.moltype {
            Some(m) => Some(HashFunctions::try_from(m.as_str())?),
            None => None,
        };
        Ok(Selection {
            ksize: self.ksize,
            moltype,
            scaled,
        })
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Index {
            sbt,
            sigs,
            select,
            scaled,
            d,
            tablesize,
            n_tables,
            append,
        } => {
            let params = IndexParams {
                d,
                tablesize,
                n_tables,
                append,
            };
            let n = cmd::index(&sbt, &sigs, &select.selection(scaled)?, &params)?;
            println!("{} datasets in {}", n, sbt.display());
        }
        Commands::Search {
            query,
            sbt,
            select,
            threshold,
            containment,
            ranked,
        } => {
            let mode = if containment {
                SearchMode::Containment
            } else {
                SearchMode::Similarity
            };
            let results = cmd::search(
                &query,
                &sbt,
                &select.selection(None)?,
                threshold,
                mode,
                ranked,
            )?;

            let stdout = io::stdout();
            cmd::write_results(&results, &mut stdout.lock())?;
        }
        Commands::Print { sbt, query, select } => {
            cmd::print(&sbt, &query, &select.selection(None)?)?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if cli.quiet {
        log::set_max_level(LevelFilter::Warn);
    }

    if let Err(e) = run(cli) {
        eprintln!("error: {}: {}", e.kind(), e);
        std::process::exit(SbtErrorCode::from_error(&e).exit_code());
    }
}

use clap::*;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use uuid::Uuid;

use akari_resources::MetadataStore;

mod config;
mod edit;
mod records;

#[derive(Parser, Debug)]
#[clap(name = "Akari", version, about = "Maintenance CLI for Akari resource metadata")]
struct Cli {
    /// Directory holding the metadata records
    #[clap(short, long)]
    metadata_dir: Option<PathBuf>,
    /// Resources config file to take the metadata directory from
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every registered resource
    List,
    /// Register a resource file
    Register {
        path: PathBuf,
        /// Uuid to register the resource under, a new one is generated if omitted
        #[clap(long)]
        uuid: Option<Uuid>,
    },
    /// Point a record at a new path
    Relocate { uuid: Uuid, new_path: PathBuf },
    /// Delete a record
    Remove { uuid: Uuid },
    /// Resolve a uuid to its path or a path to its uuid
    Lookup { key: String },
    /// Report records whose resource file is missing
    Verify,
}

fn main() -> anyhow::Result<()> {
    if SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .is_err()
    {
        println!("Failed to init logger");
    }

    let cli = Cli::parse();
    let metadata_dir = config::metadata_dir(cli.metadata_dir, cli.config.as_deref())?;
    log::debug!("Using metadata in {:?}", metadata_dir);

    let mut store = MetadataStore::load(&metadata_dir)?;
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::List => records::list(&store, &mut stdout)?,
        Command::Register { path, uuid } => {
            let uuid = edit::register(&mut store, &path, uuid)?;
            println!("{}", uuid);
        }
        Command::Relocate { uuid, new_path } => edit::relocate(&mut store, &uuid, &new_path)?,
        Command::Remove { uuid } => edit::remove(&mut store, &uuid)?,
        Command::Lookup { key } => records::lookup(&store, &key, &mut stdout)?,
        Command::Verify => {
            let missing = records::verify(&store, &mut stdout)?;
            if missing > 0 {
                log::error!("{} resource file(s) are missing", missing);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand};
use osmstar::{
    databases::{
        self,
        sequential_scan::{sequential_nn_query, sequential_range_query},
    },
    r_tree::on_disk::{self, OnDiskRStarTree},
    Error,
    IndexConfig,
    LocationQueryResult,
    Result,
};
use pretty_duration::pretty_duration;
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    time::Instant,
};

#[derive(Debug, Parser)]
#[command(name = "osmstar-cli", about = "Spatial queries over named OSM nodes")]
struct Cli {
    /// TOML file with the index configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recreate the index and data files from an OSM XML file
    Load { osm_file: PathBuf },
    /// The k nodes closest to a location
    Knn {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(short, default_value_t = 1)]
        k: usize,
        /// Scan the data file instead of using the index
        #[arg(long)]
        sequential: bool,
    },
    /// All nodes within a radius of a location
    Range {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        radius: f64,
        /// Scan the data file instead of using the index
        #[arg(long)]
        sequential: bool,
    },
    /// Print statistics about the index
    Stats,
    /// Menu driven queries on stdin
    Interactive,
}

pub fn main() -> snafu::Report<Error> {
    env_logger::init();
    let cli = Cli::parse();
    snafu::Report::capture(|| run(cli))
}

fn run(cli: Cli) -> Result<()> {
    let config = IndexConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Command::Load { osm_file } => {
            let mut tree = on_disk::create(&config)?;
            let count = databases::load_osm_file(&osm_file, &mut tree)?;
            println!("Indexed {count} named nodes (tree height {})", tree.height());
        }
        Command::Knn {
            lat,
            lon,
            k,
            sequential,
        } => {
            let tree = on_disk::open(&config)?;
            knn(&tree, &[lat, lon], k, sequential)?;
        }
        Command::Range {
            lat,
            lon,
            radius,
            sequential,
        } => {
            let tree = on_disk::open(&config)?;
            range(&tree, &[lat, lon], radius, sequential)?;
        }
        Command::Stats => {
            let tree = on_disk::open(&config)?;
            tree.print_stats();
            println!(
                "{} records, {} nodes, height {}",
                tree.len(),
                osmstar::NodeStore::num_nodes(tree.node_store()),
                tree.height()
            );
        }
        Command::Interactive => {
            let tree = on_disk::open(&config)?;
            interactive(&tree)?;
        }
    }
    Ok(())
}

fn knn(tree: &OnDiskRStarTree, point: &[f64], k: usize, sequential: bool) -> Result<()> {
    let start = Instant::now();
    let results = if sequential {
        sequential_nn_query(tree.record_store(), point, k)?
    } else {
        tree.execute_nn_query(point, k)?
    };
    print_results(&results, start);
    Ok(())
}

fn range(tree: &OnDiskRStarTree, point: &[f64], radius: f64, sequential: bool) -> Result<()> {
    let start = Instant::now();
    let results = if sequential {
        sequential_range_query(tree.record_store(), point, radius)?
    } else {
        tree.execute_range_query(point, radius)?
    };
    print_results(&results, start);
    Ok(())
}

fn print_results(results: &[LocationQueryResult], start: Instant) {
    let elapsed = start.elapsed();
    for result in results {
        println!("{result}");
    }
    println!(
        "Found {} results in {}",
        results.len(),
        pretty_duration(&elapsed, None)
    );
}

fn interactive(tree: &OnDiskRStarTree) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        println!("1. k-NN query");
        println!("2. Range query");
        println!("0. Exit");
        let Some(choice) = prompt(&mut lines, "Choice")? else {
            return Ok(());
        };
        let outcome = match choice.as_str() {
            "0" => return Ok(()),
            "1" => read_point(&mut lines).and_then(|point| {
                let k = read_value(&mut lines, "k")?;
                knn(tree, &point, k, false)
            }),
            "2" => read_point(&mut lines).and_then(|point| {
                let radius = read_value(&mut lines, "Radius")?;
                range(tree, &point, radius, false)
            }),
            other => {
                println!("Unknown choice '{other}'");
                Ok(())
            }
        };
        // a bad query should not end the session
        if let Err(e) = outcome {
            if matches!(e, Error::Io { .. }) {
                return Err(e);
            }
            println!("Query failed: {e}");
        }
    }
}

type Lines<'a> = io::Lines<io::StdinLock<'a>>;

fn prompt(lines: &mut Lines<'_>, label: &str) -> Result<Option<String>> {
    print!("{label}: ");
    io::stdout().flush()?;
    match lines.next() {
        Some(line) => Ok(Some(line?.trim().to_string())),
        None => Ok(None),
    }
}

fn read_value<T>(lines: &mut Lines<'_>, label: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    loop {
        let Some(input) = prompt(lines, label)? else {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        };
        match input.parse() {
            Ok(value) => return Ok(value),
            Err(_) => println!("'{input}' is not a valid {label}"),
        }
    }
}

fn read_point(lines: &mut Lines<'_>) -> Result<Vec<f64>> {
    let lat = read_value(lines, "Latitude")?;
    let lon = read_value(lines, "Longitude")?;
    Ok(vec![lat, lon])
}

//main.rs
use clap::Parser;
use env_logger::Env;
use log::info;
use masked_kmeans::{format_assignments, MaskedDataSet, TieBreak};

#[derive(Parser)]
#[clap(version = "0.2.0", author = "Stefan L. <stefan.lang@med.lu.se>")]
struct Opts {
    /// Tab separated input with a header line; empty/NA cells are missing
    #[clap(short, long)]
    file: String,

    /// Number of clusters
    #[clap(short, long, allow_hyphen_values = true)]
    k: i64,

    /// One cluster id per input row is written here
    #[clap(short, long)]
    outfile: String,

    /// Seed for the random centroid placement
    #[clap(short, long)]
    seed: Option<u64>,

    /// Give up after this many assign/update rounds
    #[clap(short, long)]
    max_iter: Option<usize>,

    /// Never let an undefined distance win over a defined one
    #[clap(long)]
    strict: bool,

    /// Optional TSV file for the final centroids
    #[clap(short, long)]
    centroids: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let opts = Opts::parse();

    let ds = MaskedDataSet::from_tsv(&opts.file)?;
    info!(
        "Loaded {} rows × {} columns ({:.1}% observed)",
        ds.data.nrows(),
        ds.data.ncols(),
        100.0 * ds.observed_fraction()
    );

    let mut km = ds.kmeans(opts.k)?;
    if opts.strict {
        km = km.with_tie_break(TieBreak::Strict);
    }
    if let Some(max_iter) = opts.max_iter {
        km = km.with_max_iter(max_iter);
    }

    km.initialise(opts.seed);
    let run = km.cluster()?;
    info!(
        "Assigned {} points into {} clusters after {} iterations (converged: {})",
        km.n_points(),
        km.n_clusters(),
        run.iterations,
        run.converged
    );

    std::fs::write(&opts.outfile, format_assignments(km.assignments()))?;
    if let Some(path) = &opts.centroids {
        ds.write_centroids(path, &km)?;
    }

    Ok(())
}

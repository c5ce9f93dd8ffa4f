// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use ghost_borders::draw_map::SvgMapRenderer;
use ghost_borders::event_source::{EventSource, MemoryEventSource, PgEventSource};
use ghost_borders::locmap::LocationMap;
use ghost_borders::partition::PartitionMetric;
use ghost_borders::postgres_tools::{database_url_for_env, make_client};
use ghost_borders::regions::Region;
use ghost_borders::scale::ScaleMode;
use ghost_borders::scales::{CommunitySettings, Scales};
use ghost_borders::voronoi::Voronoi;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory every artifact is read from and written to
    #[arg(long, default_value = ".")]
    outdir: PathBuf,
    /// Number of scales
    #[arg(long, default_value_t = 100)]
    intervals: u32,
    /// How a scale becomes a distance: percentiles or log
    #[arg(long, default_value = "percentiles")]
    scale: ScaleMode,
    /// Edge distance sample, needed by the percentiles scale
    #[arg(long)]
    infile: Option<PathBuf>,
    /// Event table to build graphs from
    #[arg(long, default_value = "media")]
    table: String,
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    db: Option<String>,
    /// `user,location` CSV export, used instead of the database
    #[arg(long, requires = "locations")]
    events: Option<PathBuf>,
    /// `id,lat,lng` CSV export, used instead of the database
    #[arg(long, requires = "events")]
    locations: Option<PathBuf>,
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the edge distance sample
    Dists {
        #[arg(long)]
        out: PathBuf,
        /// Leave zero-length edges out of the sample
        #[arg(long)]
        drop_zero_distances: bool,
    },
    /// Build the full graph and its filtered versions
    Graphs,
    /// Configuration-model normalization of every graph, in place
    Normalize,
    /// Community detection at every scale
    Communities {
        #[arg(long, default_value_t = 100)]
        runs: u32,
        #[arg(long)]
        best: bool,
        /// Stop Louvain after its first level
        #[arg(long)]
        two: bool,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// One border file per scale
    Borders {
        /// Use the best partition instead of every run
        #[arg(long)]
        best: bool,
        #[arg(long)]
        smooth: bool,
    },
    /// Distance between partitions of neighbouring scales
    RandIndex {
        #[arg(long, default_value_t = 1)]
        window: usize,
    },
    /// A partition metric averaged over runs: ncomms, entropy or giant
    Metric {
        #[arg(long)]
        metric: PartitionMetric,
        #[arg(long)]
        smooth: bool,
    },
    /// The atlas straight from every scale's best partition
    MultiBorders {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        smooth: bool,
    },
    /// Crop every border file to a GeoJSON region, in place
    Crop {
        #[arg(long)]
        region_file: PathBuf,
    },
    /// Merge every border file into one atlas (.csv or .geojson)
    Combine {
        #[arg(long)]
        out: PathBuf,
    },
    /// Draw every border file
    Maps {
        #[arg(long)]
        region: Region,
    },
}

fn open_source(args: &Args) -> Result<Box<dyn EventSource>> {
    match (&args.events, &args.locations) {
        (Some(events), Some(locations)) => {
            info!("reading events from {:?}", events);
            Ok(Box::new(MemoryEventSource::from_csv(
                &args.table,
                events,
                locations,
            )?))
        }
        (None, None) => {
            let url = match &args.db {
                Some(url) => url.clone(),
                None => database_url_for_env()?,
            };
            Ok(Box::new(PgEventSource::new(make_client(&url)?)))
        }
        _ => bail!("--events and --locations go together"),
    }
}

fn load_voronoi(args: &Args) -> Result<Voronoi> {
    let mut source = open_source(args)?;
    let locmap = LocationMap::load(source.as_mut())?;
    Voronoi::new(&locmap)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let mut scales = Scales::new(&args.outdir, args.intervals)?;
    let infile = args.infile.as_deref();

    match &args.command {
        Commands::Dists {
            out,
            drop_zero_distances,
        } => {
            let mut source = open_source(&args)?;
            let locmap = LocationMap::load(source.as_mut())?;
            let stats = scales.generate_distances(
                source.as_mut(),
                &locmap,
                &args.table,
                out,
                !drop_zero_distances,
            )?;
            info!(
                "{} users, {} links, {} zero distances",
                stats.users, stats.candidate_edges, stats.zero_distances
            );
        }
        Commands::Graphs => {
            let mut source = open_source(&args)?;
            let locmap = LocationMap::load(source.as_mut())?;
            scales.generate_graphs(source.as_mut(), &locmap, infile, args.scale, &args.table)?;
        }
        Commands::Normalize => scales.normalize()?,
        Commands::Communities {
            runs,
            best,
            two,
            seed,
        } => {
            scales.generate_communities(&CommunitySettings {
                two_level: *two,
                runs: *runs,
                best: *best,
                seed: *seed,
            })?;
        }
        Commands::Borders { best, smooth } => {
            let vor = load_voronoi(&args)?;
            scales.generate_borders(&vor, *best, *smooth)?;
        }
        Commands::RandIndex { window } => {
            let vor = load_voronoi(&args)?;
            scales.rand_index_seq(&vor, *window)?;
        }
        Commands::Metric { metric, smooth } => {
            let vor = load_voronoi(&args)?;
            scales.metric(*metric, &vor, *smooth, args.scale, infile)?;
        }
        Commands::MultiBorders { out, smooth } => {
            let vor = load_voronoi(&args)?;
            scales.generate_multi_borders(&vor, out, *smooth)?;
        }
        Commands::Crop { region_file } => scales.crop_borders(region_file)?,
        Commands::Combine { out } => scales.combine_borders(out)?,
        Commands::Maps { region } => {
            scales.generate_maps(&SvgMapRenderer::default(), *region)?;
        }
    }

    Ok(())
}

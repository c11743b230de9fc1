/*!
 * Quasar CLI - placement plans and a local demo
 */

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use quasar::{
    config::{LogLevel, SessionConfig},
    error::{QuasarError, EXIT_FATAL, EXIT_SUCCESS},
    logging, BuildOptions, DType, GridTopology, Session,
};
use quasar_core_topology::{ArrayLayout, CartesianGrid};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "quasar")]
#[command(version, about = "Distributed objects and chunked arrays on a Cartesian process grid", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to log file (default: stdout)
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which grid point owns which block, without starting any worker
    Plan(LayoutArgs),

    /// Start a local pool, build a pinned array and reduce it
    Demo {
        #[command(flatten)]
        layout: LayoutArgs,

        /// Number of local workers (default: from config)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Fill value
        #[arg(long, default_value_t = 1.0)]
        fill: f64,

        /// Element type
        #[arg(long, value_enum, default_value = "float64")]
        dtype: DTypeArg,
    },
}

#[derive(ClapArgs)]
struct LayoutArgs {
    /// Grid extents, e.g. 2,2
    #[arg(long, value_delimiter = ',', required = true)]
    dims: Vec<usize>,

    /// Array shape, e.g. 4,4
    #[arg(long, value_delimiter = ',', required = true)]
    shape: Vec<usize>,

    /// Block shape (default: shape divided by the grid extents)
    #[arg(long, value_delimiter = ',')]
    chunks: Option<Vec<usize>>,

    /// Array axis of every grid axis; negative for extent-1 grid axes
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    dims_axes: Option<Vec<isize>>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DTypeArg {
    Int64,
    Float64,
}

impl From<DTypeArg> for DType {
    fn from(arg: DTypeArg) -> Self {
        match arg {
            DTypeArg::Int64 => DType::Int64,
            DTypeArg::Float64 => DType::Float64,
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<QuasarError>()
                .map(QuasarError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => SessionConfig::from_file(path)
            .map_err(|e| QuasarError::Config(e.to_string()))
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Plan(layout) => plan(&layout),
        Commands::Demo {
            layout,
            workers,
            fill,
            dtype,
        } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            demo(config, &layout, fill, dtype.into()).await
        }
    }
}

fn plan(args: &LayoutArgs) -> anyhow::Result<()> {
    let grid = CartesianGrid::row_major(args.dims.clone(), vec![false; args.dims.len()])
        .map_err(QuasarError::from)?;
    let layout = ArrayLayout::for_builder(
        grid.dims(),
        &args.shape,
        args.chunks.as_deref(),
        args.dims_axes.as_deref(),
    )
    .map_err(QuasarError::from)?;

    println!("shape  {:?}", layout.shape());
    println!("chunks {:?}", layout.chunks());

    let mut table = header(&["Rank", "Coordinate", "Block", "Offset", "Block shape"]);
    for (rank, coords) in grid.coords().iter().enumerate() {
        let key = layout.block_key(coords);
        table.add_row(vec![
            Cell::new(rank),
            Cell::new(format!("{:?}", coords)),
            Cell::new(format!("{:?}", key)),
            Cell::new(describe(layout.block_offset(&key))),
            Cell::new(describe(layout.block_shape(&key))),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn demo(config: SessionConfig, args: &LayoutArgs, fill: f64, dtype: DType) -> anyhow::Result<()> {
    let session = Session::local(config).await?;
    let result = demo_on(&session, args, fill, dtype).await;
    session.shutdown().await;
    result
}

async fn demo_on(session: &Session, args: &LayoutArgs, fill: f64, dtype: DType) -> anyhow::Result<()> {
    let grid = session.create_cart(&args.dims, None).await?;

    let mut options = BuildOptions::new().dtype(dtype);
    if let Some(chunks) = &args.chunks {
        options = options.chunks(chunks);
    }
    if let Some(dims_axes) = &args.dims_axes {
        options = options.dims_axes(dims_axes);
    }
    let array = grid.full(&args.shape, fill, &options).await?;
    info!(shape = ?array.shape(), "Array placed");

    println!("{}", placement_table(&grid, &array));
    println!("sum = {}", array.sum().await?);
    Ok(())
}

fn describe(extent: Option<Vec<usize>>) -> String {
    extent
        .map(|v| format!("{:?}", v))
        .unwrap_or_else(|| "-".to_string())
}

fn placement_table(grid: &GridTopology, array: &quasar::ChunkedArray) -> Table {
    let mut table = header(&["Worker", "Coordinate", "Block", "Block shape"]);
    for (key, block) in array.blocks() {
        let coords = grid
            .index(&quasar::GridKey::Worker(block.worker.clone()))
            .map(|index| format!("{:?}", grid.coords()[index]))
            .unwrap_or_else(|_| "-".to_string());
        table.add_row(vec![
            Cell::new(&block.worker),
            Cell::new(coords),
            Cell::new(format!("{:?}", key)),
            Cell::new(describe(array.block_shape(key))),
        ]);
    }
    table
}

fn header(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storefront_images::config::{self, ServiceConfig};
use storefront_images::imaging::ShapeSynthesizer;
use storefront_images::provider::{JsonFileProducts, ProductSource, StaticProducts, StoreImageProvider};
use storefront_images::setup::SetupController;
use storefront_images::storage::WorkingDir;
use storefront_images::{logging, output};

#[derive(Parser)]
#[command(name = "storefront-images")]
#[command(about = "Generated product-image cache and storage for a storefront")]
#[command(long_about = "\
Generated product-image cache and storage for a storefront

Generates one synthetic image per product in the background, stores them in
a working directory (one file per image id), serves them through an optional
in-memory cache, and re-syncs with a changed catalogue without losing images
that are still in use.

Product lists are JSON arrays of objects with an \"id\" field:

  [{ \"id\": 1, \"name\": \"Dog food\" }, { \"id\": 2 }]

Pre-shipped web images (logo, icons) are read from <assets_dir>/<label>.png
and survive every reconfiguration.

Run 'storefront-images gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    /// Log debug detail (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest assets, generate product images and build the image stack
    Run(RunArgs),
    /// Delete every image in the working directory
    Clean,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON product list to generate images for
    #[arg(long)]
    products: PathBuf,

    /// Generate at most this many images (default: one per product)
    #[arg(long)]
    count: Option<usize>,

    /// After generating, reconfigure against this product list
    #[arg(long)]
    reconfigure_with: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            logging::init_logging(cli.verbose)?;
            let config = config::load_config(&cli.config)?;
            run(&config, &args)?;
        }
        Command::Clean => {
            logging::init_logging(cli.verbose)?;
            let config = config::load_config(&cli.config)?;
            let mut controller = SetupController::from_config(
                &config,
                Arc::new(StaticProducts::unavailable()),
                Arc::new(StoreImageProvider::new()),
                Arc::new(ShapeSynthesizer::new()),
            )?;
            controller.delete_all_created_data()?;
            println!("Deleted {}", controller.working_dir().display());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn run(config: &ServiceConfig, args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    // The catalogue is read once up front and swapped wholesale on
    // reconfiguration, the way the storefront's product service would
    // answer differently between two calls.
    let products = Arc::new(StaticProducts::unavailable());
    products.replace(JsonFileProducts::new(&args.products).product_ids());

    let provider = Arc::new(StoreImageProvider::new());
    let mut controller = SetupController::from_config(
        config,
        Arc::clone(&products) as Arc<dyn ProductSource>,
        provider,
        Arc::new(ShapeSynthesizer::new()),
    )?;

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_generation_event(&event) {
                println!("{}", line);
            }
        }
    });
    controller.set_event_sender(Some(tx));

    if let Some(assets_dir) = &config.assets_dir {
        let assets_dir = Path::new(assets_dir);
        let ingested = controller.detect_pre_existing_images(assets_dir)?;
        output::print_ingest_output(ingested, assets_dir);
    }

    controller.generate_images_from_source(args.count)?;
    controller.finalize_setup()?;
    controller.wait_for_generation(None);

    let report = match &args.reconfigure_with {
        Some(path) => {
            products.replace(JsonFileProducts::new(path).product_ids());
            let report = controller.reconfiguration()?;
            controller.wait_for_generation(None);
            Some(report)
        }
        None => None,
    };

    // The printer exits once the last sender (ours and the worker's) is gone.
    controller.set_event_sender(None);
    printer.join().ok();

    if let Some(report) = report {
        output::print_reconfiguration_report(report.as_ref());
    }
    let stored = WorkingDir::at(controller.working_dir()).list_ids()?.len();
    output::print_index_summary(&controller.index(), stored, controller.working_dir());
    Ok(())
}

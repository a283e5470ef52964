use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use heapwalk_core::Limit;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod config;
mod demo;

use demo::DemoSettings;

#[derive(Parser)]
#[command(name = "heapwalk", version, about = "Enumerate live instances on a managed heap")]
struct Cli {
    /// Config file (defaults to the nearest heapwalk.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate a heap, then enumerate `App` and compare with what was created
    Demo {
        #[arg(long)]
        instances: Option<usize>,
        #[arg(long)]
        derived: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// Collect garbage on another thread while enumerating
        #[arg(long)]
        gc_thread: bool,
    },
    /// Count live instances of every demo class
    Census,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;
    let heap_config = config.heap.heap_config();
    let mut settings = DemoSettings::from_config(&config.demo);

    match cli.command {
        Commands::Demo {
            instances,
            derived,
            limit,
            gc_thread,
        } => {
            if let Some(instances) = instances {
                settings.instances = instances;
            }
            if let Some(derived) = derived {
                settings.derived = derived;
            }
            if let Some(limit) = limit {
                settings.limit = Limit::at_most(limit);
            }
            settings.gc_thread = gc_thread;

            let report = demo::run_demo(heap_config, &settings)?;
            println!("Limit:   {}", report.limit);
            println!("Created: {:?}", report.created);
            println!("Found:   {:?}", report.found);
            println!("Equal:   {}", report.found == report.created);
            println!("GC runs: {}", report.collections);
            if !report.is_consistent() {
                bail!(
                    "enumeration returned {} instances that do not match the population",
                    report.found.len()
                );
            }
        }
        Commands::Census => {
            for row in demo::run_census(heap_config, &settings)? {
                println!("{:<12} {:<12} {}", row.class, row.loader, row.live);
            }
        }
    }

    Ok(())
}

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::IVec3;
use strata_common::{LocalPosition, PartitionId, StrataId};
use strata_kernel::{StrataConfig, StrataRegistry, StratumDef, WorldDefinition};
use strata_stream::{PartitionLoadError, PartitionLoader, SeamlessWorld, StrataEvent};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata-cli", about = "CLI tool for seamless strata worlds")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info
    Info,
    /// Print the global offset and bounds assigned to every stratum
    Offsets {
        /// World definition (YAML or JSON). Uses a built-in three-floor world if omitted
        #[arg(short, long)]
        world: Option<PathBuf>,
        /// Session config (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Walk an occupant through every stratum in id order with a simulated loader
    Walk {
        #[arg(short, long)]
        world: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Simulated load time per partition, in milliseconds
        #[arg(long, default_value = "20")]
        load_ms: u64,
        /// Partitions whose first load fails
        #[arg(long)]
        fail: Vec<String>,
        /// Ticks spent inside each stratum before moving on
        #[arg(long, default_value = "90")]
        dwell: u32,
    },
}

/// Stand-in for a scene system: sleeps to mimic IO and can fail a partition once.
struct SimulatedLoader {
    delay: Duration,
    fail_once: std::sync::Mutex<HashSet<String>>,
}

impl PartitionLoader for SimulatedLoader {
    fn load(&self, partition: &PartitionId) -> Result<(), PartitionLoadError> {
        std::thread::sleep(self.delay);
        let failed = self
            .fail_once
            .lock()
            .map(|mut set| set.remove(partition.as_str()))
            .unwrap_or(false);
        if failed {
            return Err(PartitionLoadError::new("simulated read error"));
        }
        tracing::debug!(%partition, "partition loaded");
        Ok(())
    }

    fn unload(&self, partition: &PartitionId) {
        tracing::debug!(%partition, "partition unloaded");
    }
}

fn builtin_world() -> WorldDefinition {
    let floor = |name: &str, height: i32| StratumDef {
        name: name.to_string(),
        partitions: vec![PartitionId::new(format!("{name}_scene"))],
        extents: IVec3::new(256, height, 256),
        origin: IVec3::ZERO,
    };
    WorldDefinition {
        strata: vec![floor("upper", 128), floor("middle", 96), floor("lower", 160)],
    }
}

fn load_inputs(
    world: Option<&Path>,
    config: Option<&Path>,
) -> anyhow::Result<(WorldDefinition, StrataConfig)> {
    let definition = match world {
        Some(path) => WorldDefinition::load(path)
            .with_context(|| format!("reading world definition {}", path.display()))?,
        None => builtin_world(),
    };
    let config = match config {
        Some(path) => StrataConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => StrataConfig::default(),
    };
    Ok((definition, config))
}

fn print_offsets(definition: &WorldDefinition, config: &StrataConfig) -> anyhow::Result<()> {
    let registry = StrataRegistry::new(definition, config.vertical_spacing)?;
    println!(
        "{} strata, vertical spacing {}",
        registry.len(),
        registry.vertical_spacing()
    );
    for id in registry.ids() {
        let stratum = registry.get_definition(id)?;
        let offset = registry.get_offset(id)?;
        let bounds = registry.global_bounds(id)?;
        println!(
            "  {id} {:<16} offset={offset} bounds=[{} .. {}) partitions={}",
            stratum.name,
            bounds.min,
            bounds.max,
            stratum.partitions.len()
        );
    }
    Ok(())
}

fn walk(
    definition: &WorldDefinition,
    config: StrataConfig,
    loader: SimulatedLoader,
    dwell: u32,
) -> anyhow::Result<()> {
    let mut world = SeamlessWorld::new(definition, config, Arc::new(loader))?;
    world.add_observer(|event: &StrataEvent| match event {
        StrataEvent::Changed { from, to } => println!("  changed {from:?} -> {to}"),
        StrataEvent::Loaded(id) => println!("  loaded {id}"),
        StrataEvent::Unloaded(id) => println!("  unloaded {id}"),
        StrataEvent::LoadFailed {
            stratum,
            partition,
            reason,
        } => println!("  load failed {stratum} ({partition}): {reason}"),
    });

    let dt = Duration::from_millis(16);
    let started = Instant::now();
    let ids: Vec<StrataId> = world.registry().ids().collect();
    for id in ids {
        let extents = world.registry().get_definition(id)?.extents.as_vec3();
        let local = LocalPosition::new(extents.x * 0.5, extents.y * 0.5, extents.z * 0.5);
        let pos = world.resolve_global(local, id)?;
        println!("occupant -> {id} at {pos}");
        for _ in 0..dwell {
            world.tick(pos, dt);
            std::thread::sleep(dt);
        }
        if world.current_stratum() != Some(id) {
            println!("  still waiting on {id} (state {:?})", world.state(id));
        }
        println!(
            "  resident: {:?}, partitions: {}",
            world.loaded_ids(),
            world.streamer().resident_partition_count()
        );
    }

    let stats = world.stats().clone();
    println!(
        "walk finished in {:?}: {} ticks, {} load requests, {} unload requests",
        started.elapsed(),
        world.tick_count(),
        stats.total_load_requests,
        stats.total_unload_requests
    );
    world.shutdown(Duration::from_secs(5));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("strata-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", strata_stream::crate_info());
            println!("defaults: {:?}", StrataConfig::default());
        }
        Commands::Offsets { world, config } => {
            let (definition, config) = load_inputs(world.as_deref(), config.as_deref())?;
            print_offsets(&definition, &config)?;
        }
        Commands::Walk {
            world,
            config,
            load_ms,
            fail,
            dwell,
        } => {
            let (definition, config) = load_inputs(world.as_deref(), config.as_deref())?;
            let loader = SimulatedLoader {
                delay: Duration::from_millis(load_ms),
                fail_once: std::sync::Mutex::new(fail.into_iter().collect()),
            };
            walk(&definition, config, loader, dwell)?;
        }
    }

    Ok(())
}

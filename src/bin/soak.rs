//! janet-perception-soak binary
//!
//! Drives the perception core under concurrent load: worker threads move
//! entities through the quadtree while the interpolator runs on its schedule
//! and a query thread reads the index. Prints tree and interpolator stats as
//! JSON when done.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                          | Default   | Description                         |
//! |------------------------------|-----------|-------------------------------------|
//! | `PERCEPTION_CONFIG`          | *(none)*  | Optional TOML file                  |
//! | `PERCEPTION__*`              |           | Overrides, see `config.rs`          |
//! | `SOAK_ENTITIES`              | `500`     | Entities spawned                    |
//! | `SOAK_THREADS`               | `4`       | Mover threads                       |
//! | `SOAK_ITERATIONS`            | `200`     | Moves per entity                    |
//! | `SOAK_PERCEIVER_RADIUS`      | `20000`   | Mobile perceiver radius             |
//! | `SOAK_SPREAD`                | `200000`  | Radius of the area entities roam    |

use anyhow::Result;
use clap::Parser;
use glam::Vec3;
use janet_perception::{
    BasicInterpolator, Geometry, InterpolatorStats, Oid, Perceiver, PerceiverCallback,
    PerceiverNewsAndFrees, PerceptionConfig, Point, QuadTree, QuadTreeElement, TreeStats,
    WorldNode, WorldNodeOptions,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "janet-perception-soak",
    about = "Janet Perception soak test",
    version
)]
struct Args {
    /// Optional TOML configuration file
    #[arg(long, env = "PERCEPTION_CONFIG")]
    config: Option<PathBuf>,

    /// Entities spawned into the tree
    #[arg(long, env = "SOAK_ENTITIES", default_value_t = 500)]
    entities: u64,

    /// Mover threads
    #[arg(long, env = "SOAK_THREADS", default_value_t = 4)]
    threads: usize,

    /// Moves per entity
    #[arg(long, env = "SOAK_ITERATIONS", default_value_t = 200)]
    iterations: u32,

    /// Mobile perceiver radius
    #[arg(long, env = "SOAK_PERCEIVER_RADIUS", default_value_t = 20_000.0)]
    perceiver_radius: f32,

    /// Radius of the area entities roam
    #[arg(long, env = "SOAK_SPREAD", default_value_t = 200_000.0)]
    spread: f32,
}

// ---------------------------------------------------------------------------
// Callback sink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CountingCallback {
    news: AtomicU64,
    frees: AtomicU64,
}

impl PerceiverCallback for CountingCallback {
    fn process_news_and_frees(
        &self,
        news_and_frees: &PerceiverNewsAndFrees,
        _perceiver_oid: Option<Oid>,
    ) -> Option<usize> {
        self.news
            .fetch_add(news_and_frees.news_count() as u64, Ordering::Relaxed);
        self.frees
            .fetch_add(news_and_frees.free_count() as u64, Ordering::Relaxed);
        None
    }
}

#[derive(Serialize)]
struct SoakReport {
    tree: TreeStats,
    interpolator: InterpolatorStats,
    news: u64,
    frees: u64,
    queries: u64,
}

/// Deterministic orbit: where entity `seed` is on step `step`, and how fast
/// it is going there.
fn orbit(seed: u64, step: u32, spread: f32) -> (Point, Vec3) {
    let ring = spread * (0.2 + (seed % 7) as f32 / 8.0);
    let angle = seed as f32 * 0.37 + step as f32 * 0.05;
    let loc = Point::new(ring * angle.cos(), 0.0, ring * angle.sin());
    let speed = ring * 0.05;
    let dir = Vec3::new(-angle.sin() * speed, 0.0, angle.cos() * speed);
    (loc, dir)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("janet_perception=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = PerceptionConfig::load(args.config.as_deref())?;

    tracing::info!(
        "Starting soak (entities={}, threads={}, iterations={}, radius={})",
        args.entities,
        args.threads,
        args.iterations,
        args.perceiver_radius,
    );

    let tree = QuadTree::new(config.tree.clone());
    let interpolator = Arc::new(BasicInterpolator::new(config.interpolator.clone()));
    let counter = Arc::new(CountingCallback::default());

    let options = WorldNodeOptions {
        perceiver_radius: Some(args.perceiver_radius),
        update_threshold: config.perceiver.update_threshold,
        ..Default::default()
    };
    let mut nodes = Vec::with_capacity(args.entities as usize);
    for seed in 0..args.entities {
        let (loc, _) = orbit(seed, 0, args.spread);
        let node = WorldNode::new(Oid(seed), loc, options.clone());
        if let Some(perceiver) = node.perceiver() {
            perceiver.register_callback(counter.clone());
        }
        node.spawn(&tree)?;
        interpolator.register(node.clone());
        nodes.push(node);
    }

    let interpolation_task = interpolator.clone().spawn();

    // Reader hammering the tree lock while movers run.
    let stop = Arc::new(AtomicBool::new(false));
    let queries = Arc::new(AtomicU64::new(0));
    let reader = {
        let tree = tree.clone();
        let stop = stop.clone();
        let queries = queries.clone();
        let spread = args.spread;
        tokio::task::spawn_blocking(move || {
            let mut step = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let (center, _) = orbit(u64::from(step), step, spread);
                let area = Geometry::around(&center, spread / 10.0);
                let _ = tree.lock().elements_in(&area);
                queries.fetch_add(1, Ordering::Relaxed);
                step = step.wrapping_add(1);
            }
        })
    };

    let threads = args.threads.max(1);
    let mut movers = Vec::with_capacity(threads);
    for worker in 0..threads {
        let nodes = nodes.clone();
        let iterations = args.iterations;
        let spread = args.spread;
        movers.push(tokio::task::spawn_blocking(move || {
            for step in 1..=iterations {
                for node in nodes.iter().skip(worker).step_by(threads) {
                    let (loc, dir) = orbit(node.oid().0, step, spread);
                    node.set_loc_and_direction(loc, dir);
                }
            }
        }));
    }
    for mover in movers {
        mover.await?;
    }

    stop.store(true, Ordering::Relaxed);
    reader.await?;
    interpolation_task.abort();

    let report = SoakReport {
        tree: tree.lock().stats(),
        interpolator: interpolator.stats(),
        news: counter.news.load(Ordering::Relaxed),
        frees: counter.frees.load(Ordering::Relaxed),
        queries: queries.load(Ordering::Relaxed),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    for node in &nodes {
        interpolator.unregister(node.oid());
        node.despawn()?;
    }
    tracing::info!("Soak finished, {} entities despawned", nodes.len());
    Ok(())
}

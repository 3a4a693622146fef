//! World generator binary: pre-generates a square of terrain chunks and saves them.
//!
//! Usage: cargo run --release --bin generate_world -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>       World config JSON (flags below override it)
//!   --name <NAME>         World name (default: "World")
//!   --root <DIR>          Save root (default: "saves")
//!   --radius <CHUNKS>     Chunks in each direction around the origin (default: 8)
//!   --seed <SEED>         Noise seed (default: 12345)
//!   --scale <SCALE>       Noise frequency (default: 0.03)
//!   --height <H>          Height multiplier (default: 10)
//!   --world-height <H>    Voxels per column (default: 16)
//!   --chunk-size <N>      Voxels per chunk edge (default: 16)
//!   --jobs <N>            Parallel chunk builds (default: 4)
//!
//! Output structure:
//!   <root>/<name>/
//!     world_meta.json
//!     chunks/
//!       chunk_0_0.json
//!       ...

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use chunkworld::core::{Error, Result};
use chunkworld::session::WorldConfig;
use chunkworld::streaming::{ChunkRecord, Completion, WorldMeta, WorldStore};
use chunkworld::terrain::TerrainGenerator;
use chunkworld::voxel::block::AIR;
use chunkworld::voxel::chunk::ChunkCoord;

fn main() {
    chunkworld::core::logging::init();

    if let Err(e) = run() {
        log::error!("World generation failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => WorldConfig::from_json_file(path)?,
        None => WorldConfig::default(),
    };
    if let Some(name) = parse_str_arg(&args, "--name") {
        config.world_name = name;
    }
    if let Some(root) = parse_str_arg(&args, "--root") {
        config.save_root = PathBuf::from(root);
    }
    let params = &mut config.generation;
    if let Some(seed) = parse_arg(&args, "--seed") {
        params.seed = seed;
    }
    if let Some(scale) = parse_arg(&args, "--scale") {
        params.terrain_scale = scale;
    }
    if let Some(height) = parse_arg(&args, "--height") {
        params.height_multiplier = height;
    }
    if let Some(world_height) = parse_arg(&args, "--world-height") {
        params.world_height = world_height;
    }
    if let Some(chunk_size) = parse_arg(&args, "--chunk-size") {
        params.chunk_size = chunk_size;
    }
    config.validate()?;

    let radius = parse_arg::<i32>(&args, "--radius").unwrap_or(8).max(0);
    let jobs = parse_arg::<usize>(&args, "--jobs").unwrap_or(4).max(1);

    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()
        .map_err(|e| Error::InvalidConfig(format!("thread pool: {}", e)))?;

    let params = config.generation.clone();
    let side = radius * 2 + 1;

    println!("=== Chunkworld Generator ===");
    println!("World:  {}", config.world_name);
    println!("Seed:   {}", params.seed);
    println!("Scale:  {}, Height: {}", params.terrain_scale, params.height_multiplier);
    println!("Chunks: {} x {} ({}x{}x{} voxels each)", side, side, params.chunk_size, params.chunk_size, params.world_height);
    println!("Jobs:   {} parallel", jobs);
    println!("Output: {}", config.save_root.join(&config.world_name).display());
    println!();

    let coords: Vec<ChunkCoord> = (-radius..=radius)
        .flat_map(|dx| (-radius..=radius).map(move |dy| ChunkCoord::new(dx, dy)))
        .collect();
    let total = coords.len();

    // Shared by every worker; the noise source is built once per seed
    let generator = TerrainGenerator::new();
    let start = Instant::now();
    let generated = AtomicUsize::new(0);

    let records: Vec<ChunkRecord> = coords
        .par_iter()
        .map(|&coord| {
            let blocks = generator.generate_blocks(coord.x, coord.y, &params);
            let done = generated.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 100 == 0 || done == total {
                let elapsed = start.elapsed().as_secs_f64();
                log::info!("[{}/{}] {:.0} chunks/sec", done, total, done as f64 / elapsed.max(1e-6));
            }
            ChunkRecord {
                x: coord.x,
                y: coord.y,
                blocks,
            }
        })
        .collect();

    let solid: usize = records
        .iter()
        .map(|r| r.blocks.iter().filter(|&&b| b != AIR).count())
        .sum();
    let gen_time = start.elapsed();
    println!(
        "Generated {} chunks in {:.2}s ({} solid blocks)",
        records.len(),
        gen_time.as_secs_f64(),
        solid
    );

    let mut meta = WorldMeta::new(config.world_name.clone(), params.seed);
    meta.chunks = coords;
    meta.touch();

    let mut store = WorldStore::new(config.save_root.clone())?;
    store.save_world_async(&config.world_name, meta, records);
    let completions = store.wait_all(Duration::from_secs(300))?;

    let saved = completions
        .iter()
        .any(|c| matches!(c, Completion::Saved { success: true, .. }));
    if !saved {
        return Err(Error::PersistenceIo(format!("saving world '{}' failed", config.world_name)));
    }

    println!();
    println!("=== Generation Complete ===");
    println!("Total: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

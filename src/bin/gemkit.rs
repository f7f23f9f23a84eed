// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use gemkit::core::blit::{self, Surface};
use gemkit::core::error::Result;
use gemkit::core::{BufferObject, Config, Context, DeviceInfo};

/// GEM batch submission scenarios on the simulated driver
#[derive(Parser)]
#[command(name = "gemkit")]
#[command(about = "Build and submit GPU command streams", long_about = None)]
struct Args {
    /// PCI device id to simulate (e.g. 0x1912)
    #[arg(long, value_parser = parse_devid)]
    devid: Option<u16>,

    /// Hardware generation to simulate when no device id is given
    #[arg(short = 'g', long, default_value = "9")]
    gen: u8,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Save a submission trace to this file
    #[arg(short = 't', long)]
    trace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the simulated device's capabilities
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy one surface to another and verify the result
    Copy {
        #[arg(long, default_value = "512")]
        width: u32,
        #[arg(long, default_value = "512")]
        height: u32,
    },

    /// Fill a surface with a solid colour and verify the result
    Fill {
        #[arg(long, default_value = "512")]
        width: u32,
        #[arg(long, default_value = "512")]
        height: u32,
        #[arg(long, default_value = "0xdeadbeef", value_parser = parse_u32)]
        color: u32,
    },

    /// Chain copies across many objects, then verify every object
    LinearBlits {
        /// Number of objects
        #[arg(short = 'n', long, default_value = "64")]
        count: usize,
        /// Passes over the object ring
        #[arg(short = 'i', long, default_value = "4")]
        iterations: usize,
    },
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_devid(s: &str) -> std::result::Result<u16, String> {
    let value = parse_u32(s)?;
    u16::try_from(value).map_err(|_| format!("device id {:#x} out of range", value))
}

const LINEAR_WIDTH: u32 = 256;
const LINEAR_HEIGHT: u32 = 256;

fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("Verification failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    let info = match args.devid {
        Some(devid) => DeviceInfo::from_devid(devid)?,
        None => DeviceInfo::for_gen(args.gen),
    };

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if args.trace.is_some() {
        config.trace = true;
    }

    info!("gemkit v{}", env!("CARGO_PKG_VERSION"));
    let ctx = Context::simulated(info, config)?;

    let passed = match &args.command {
        Command::Info { json } => {
            print_info(&ctx, *json);
            true
        }
        Command::Copy { width, height } => run_copy(&ctx, *width, *height)?,
        Command::Fill {
            width,
            height,
            color,
        } => run_fill(&ctx, *width, *height, *color)?,
        Command::LinearBlits { count, iterations } => {
            run_linear_blits(&ctx, *count, *iterations)?
        }
    };

    ctx.bridge().drain()?;

    if let Some(path) = &args.trace {
        if let Some(trace) = ctx.bridge().trace() {
            trace.save_to_file(path)?;
            info!(
                "Saved {} submissions ({} retried) to {}",
                trace.len(),
                trace.retried(),
                path.display()
            );
        }
    }

    Ok(passed)
}

fn print_info(ctx: &Context, json: bool) {
    let info = ctx.info();
    if json {
        let value = serde_json::json!({
            "device": info,
            "blt_ring": info.has_blt_ring(),
            "bsd_ring": info.has_bsd_ring(),
            "vebox_ring": info.has_vebox_ring(),
            "fast_copy": info.has_fast_copy(),
            "address_words": info.address_words(),
            "max_tiling_stride": info.max_tiling_stride(),
            "fence_slots": info.fence_slots(),
            "config": ctx.config(),
        });
        println!("{}", value);
        return;
    }

    println!("{} (devid {:#06x}), gen{}", info.family, info.devid, info.gen);
    println!("  blt ring:          {}", info.has_blt_ring());
    println!("  bsd ring:          {}", info.has_bsd_ring());
    println!("  vebox ring:        {}", info.has_vebox_ring());
    println!("  fast copy:         {}", info.has_fast_copy());
    println!("  address words:     {}", info.address_words());
    println!("  max tiling stride: {}", info.max_tiling_stride());
    println!("  fence slots:       {}", info.fence_slots());
}

fn surface_object(ctx: &Context, name: &str, width: u32, height: u32) -> Result<BufferObject> {
    ctx.bufmgr()
        .allocate(name, width as u64 * height as u64 * 4, 4096)
}

fn verify(bo: &BufferObject, expected: impl Fn(usize) -> u32) -> Result<bool> {
    let words = bo.read_words()?;
    match words.iter().enumerate().find(|&(i, &w)| w != expected(i)) {
        Some((i, &w)) => {
            warn!(
                "{}: word {} is {:#010x}, expected {:#010x}",
                bo.name(),
                i,
                w,
                expected(i)
            );
            Ok(false)
        }
        None => Ok(true),
    }
}

fn run_copy(ctx: &Context, width: u32, height: u32) -> Result<bool> {
    let src = surface_object(ctx, "src", width, height)?;
    let dst = surface_object(ctx, "dst", width, height)?;
    src.fill_words(0xAAAA_AAAA)?;
    dst.fill_words(0xBBBB_BBBB)?;

    let pitch = width * 4;
    let mut batch = ctx.batch()?;
    let done = blit::blt_copy(
        &mut batch,
        Surface::new(&src, 0, 0, pitch),
        Surface::new(&dst, 0, 0, pitch),
        width,
        height,
        32,
    )?;
    ctx.bridge().wait(&done)?;

    let passed = verify(&dst, |_| 0xAAAA_AAAA)?;
    info!("copy {}x{}: {}", width, height, if passed { "ok" } else { "FAILED" });
    Ok(passed)
}

fn run_fill(ctx: &Context, width: u32, height: u32, color: u32) -> Result<bool> {
    let dst = surface_object(ctx, "dst", width, height)?;

    let mut batch = ctx.batch()?;
    let done = blit::fill(
        &mut batch,
        Surface::new(&dst, 0, 0, width * 4),
        width,
        height,
        32,
        color,
    )?;
    ctx.bridge().wait(&done)?;

    let passed = verify(&dst, |_| color)?;
    info!("fill {}x{} with {:#010x}: {}", width, height, color, if passed { "ok" } else { "FAILED" });
    Ok(passed)
}

fn run_linear_blits(ctx: &Context, count: usize, iterations: usize) -> Result<bool> {
    let words = (LINEAR_WIDTH * LINEAR_HEIGHT) as usize;
    let pitch = LINEAR_WIDTH * 4;

    let mut objects = Vec::with_capacity(count);
    let mut start = Vec::with_capacity(count);
    for i in 0..count {
        let bo = surface_object(ctx, &format!("linear-{}", i), LINEAR_WIDTH, LINEAR_HEIGHT)?;
        let base = (i * words) as u32;
        let pattern: Vec<u32> = (0..words as u32).map(|w| base.wrapping_add(w)).collect();
        bo.write_words(&pattern)?;
        objects.push(bo);
        start.push(base);
    }

    let mut batch = ctx.batch()?;
    for pass in 0..iterations {
        for i in 0..count {
            // Alternate ring direction so every object is both source and target
            let (src, dst) = if pass % 2 == 0 {
                ((i + 1) % count, i)
            } else {
                (i, (i + 1) % count)
            };
            blit::emit_blt_copy(
                &mut batch,
                Surface::new(&objects[src], 0, 0, pitch),
                Surface::new(&objects[dst], 0, 0, pitch),
                LINEAR_WIDTH,
                LINEAR_HEIGHT,
                32,
            )?;
            start[dst] = start[src];
        }
    }
    if let Some(done) = batch.flush()? {
        ctx.bridge().wait(&done)?;
    }
    ctx.bridge().drain()?;

    let mut passed = true;
    for (bo, &base) in objects.iter().zip(&start) {
        passed &= verify(bo, |w| base.wrapping_add(w as u32))?;
    }

    info!(
        "linear-blits: {} objects, {} passes, {} submissions: {}",
        count,
        iterations,
        batch.submissions(),
        if passed { "ok" } else { "FAILED" }
    );
    Ok(passed)
}

//! Headless driver for the Atari 2600 core: mounts a cartridge image, steps
//! frames, and optionally dumps a save state. No video/audio output - that's
//! a frontend's job, and out of scope here.

use std::env;
use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use emu_atari2600::Atari2600System;
use emu_core::System;

#[derive(Parser)]
struct Args {
    /// Path to a cartridge image (.a26 or .bin)
    rom: String,
    /// Dump save-state to this file as JSON
    #[arg(long, default_value = "state.json")]
    save: String,
    /// Number of frames to run
    #[arg(long, default_value_t = 5)]
    frames: u32,
    /// Print per-frame debug_info() after each frame
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Suppress all per-frame output (still writes --save)
    #[arg(long, default_value_t = false)]
    quiet: bool,
    /// Preserve env-var gated core logs (e.g. EMU_LOG_CARTRIDGE)
    #[arg(long, default_value_t = false)]
    keep_logs: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.keep_logs {
        emu_core::logging::LogConfig::global().init_from_env();
    } else {
        env::remove_var("EMU_LOG_CARTRIDGE");
        env::remove_var("EMU_LOG_CPU");
        env::remove_var("EMU_LOG_PPU");
    }

    let rom = fs::read(&args.rom).with_context(|| format!("reading ROM at {}", args.rom))?;

    let mut system = Atari2600System::new();
    system
        .mount("Cartridge", &rom)
        .map_err(|e| anyhow::anyhow!("mounting cartridge: {e}"))?;

    for frame_no in 0..args.frames {
        system
            .step_frame()
            .map_err(|e| anyhow::anyhow!("stepping frame {frame_no}: {e}"))?;

        if !args.quiet {
            if args.debug {
                if let Some(info) = system.debug_info() {
                    println!(
                        "frame {frame_no}: bank={} scanline={} rom_size={}",
                        info.current_bank, info.scanline, info.rom_size
                    );
                }
            } else {
                println!("frame {frame_no} complete");
            }
        }
    }

    let state = system.save_state();
    let json = serde_json::to_string_pretty(&state)?;
    fs::write(&args.save, json).with_context(|| format!("writing save state to {}", args.save))?;

    Ok(())
}

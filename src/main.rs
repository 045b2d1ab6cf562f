use anyhow::Result;
use std::time::Instant;
use std::fs::File;
use std::io::{BufWriter, Write};
use log::{info, error, debug, trace};

use physarum_common::{SimulationConfig, Snapshot};
use physarum_engine::Simulation;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Physarum Engine...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = SimulationConfig::load(&config_path)?;
    info!("Loaded configuration from {}.", config_path);

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(config)?;
    debug!("Simulation Parameters: {:#?}", sim.params());

    let total_steps = sim.params().num_steps;
    let record_interval_steps = sim.params().record_interval_steps;
    info!("Recording snapshot every {} steps.", record_interval_steps);

    info!("Starting simulation loop for {} steps...", total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot (tick 0) ---
    sim.record_snapshot();

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Error during simulation step {}: {}", step + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        let should_print_status = current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step == total_steps - 1;

        if is_record_step || is_last_step {
            sim.record_snapshot();
        }

        if should_print_status || is_last_step {
            let stats = sim.stats();
            info!(
                "Step [{}/{}] | Moves: {} | Blocked: {} | Trail: {:.2} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                stats.moves,
                stats.blocked_moves,
                sim.field().trail_total(),
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_stats {
        let format = output.format.as_deref().unwrap_or("json");
        if let Err(e) = save_snapshots(sim.get_recorded_snapshots(), &output.base_filename, format) {
            error!("Error saving snapshots: {}", e);
        }
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    // Save final positions if requested (separate from full snapshots)
    if output.save_positions {
        let filename = format!("{}_final_positions.csv", output.base_filename);
        let mut writer = csv::Writer::from_path(&filename)?;
        writer.write_record(["x", "y"])?;
        for (x, y) in sim.agent_positions() {
            writer.write_record(&[format!("{:.4}", x), format!("{:.4}", y)])?;
        }
        writer.flush()?;
        info!("Final positions saved to {}", filename);
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Writes all snapshots to `<base>_snapshots.<ext>` in the requested format.
fn save_snapshots(snapshots: &[Snapshot], base_filename: &str, format: &str) -> Result<()> {
    match format {
        "bincode" => {
            let filename = format!("{}_snapshots.bin", base_filename);
            let file = BufWriter::new(File::create(&filename)?);
            bincode::serialize_into(file, snapshots)?;
            info!("All snapshots saved to {} (binary format)", filename);
        }
        "messagepack" => {
            let filename = format!("{}_snapshots.msgpack", base_filename);
            let mut file = BufWriter::new(File::create(&filename)?);
            rmp_serde::encode::write(&mut file, snapshots)?;
            file.flush()?;
            info!("All snapshots saved to {} (MessagePack format)", filename);
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", base_filename);
            let json_string = serde_json::to_string(snapshots)?;
            let mut file = File::create(&filename)?;
            file.write_all(json_string.as_bytes())?;
            info!("All snapshots saved to {} ({}MB)", filename, json_string.len() / 1_048_576);
        }
    }
    Ok(())
}

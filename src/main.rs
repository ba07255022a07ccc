use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};

use obstacle_avoid_rs::feed::FeedHandler;
use obstacle_avoid_rs::geometry::{Distance, Location};
use obstacle_avoid_rs::sim::SimVehicle;
use obstacle_avoid_rs::{AvoidanceConfig, AvoidanceController, AvoidanceSystem, Vehicle};

#[derive(Parser, Debug)]
#[command(name = "avoid_sim")]
#[command(about = "Fly a simulated fixed-wing mission past obstacles with avoidance enabled", long_about = None)]
struct Args {
    /// Simulated duration in seconds
    #[arg(value_name = "SECONDS", default_value = "60")]
    duration: u64,

    /// JSON config file (defaults for any missing field)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Obstacle scenario (tower, balloon, both)
    #[arg(long, default_value = "both")]
    scenario: String,

    /// Simulation speed relative to wall clock
    #[arg(long, default_value = "10")]
    speedup: u32,

    /// Write the final status record here
    #[arg(long)]
    status_out: Option<PathBuf>,
}

const MISSION_ORIGIN: (f64, f64) = (38.1446, -76.4280);

/// Ground-station init frame for the chosen scenario, in degrees and feet
fn scenario_frame(scenario: &str, origin: &Location) -> Result<String> {
    let tower = origin.offset_by(&Distance::new(10.0, 600.0, 0.0));
    let balloon = origin.offset_by(&Distance::new(-40.0, 1400.0, 0.0));
    let tower_field = format!("{:.7} {:.7} 400 60", tower.lat_deg(), tower.lon_deg());
    let balloon_field = format!("{:.7} {:.7} 330 40", balloon.lat_deg(), balloon.lon_deg());

    let frame = match scenario {
        "tower" => format!("i 1 0 {}", tower_field),
        "balloon" => format!("i 0 1 {}", balloon_field),
        "both" => format!("i 1 1 {} {}", tower_field, balloon_field),
        other => anyhow::bail!("unknown scenario '{}'", other),
    };
    Ok(frame)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AvoidanceConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AvoidanceConfig::default(),
    };
    config.validate()?;

    let origin = Location::from_degrees(MISSION_ORIGIN.0, MISSION_ORIGIN.1, 100.0);
    let mission = vec![
        origin.offset_by(&Distance::new(60.0, 2000.0, 0.0)),
        origin.offset_by(&Distance::new(800.0, 2600.0, 0.0)),
        origin.offset_by(&Distance::new(800.0, 0.0, 0.0)),
    ];
    let vehicle = Arc::new(SimVehicle::builder().location(origin).waypoints(mission).build());
    let system = Arc::new(AvoidanceSystem::new());

    log::info!("avoid_sim starting: {} s simulated, scenario {}", args.duration, args.scenario);

    let mut feed = FeedHandler::new(system.clone(), vehicle.clone(), config.clone());
    feed.handle_frame(&scenario_frame(&args.scenario, &origin)?)
        .await
        .context("applying scenario obstacles")?;

    let mut controller = AvoidanceController::new(system.clone(), vehicle.clone(), config.clone());
    let mut status_rx = controller.subscribe();
    let controller_handle = tokio::spawn(async move { controller.run().await });

    // Physics runs `speedup` times faster than the controller sees wall time
    let period = config.cycle_period();
    let sim_dt = period.as_secs_f64() * args.speedup.max(1) as f64;
    let steps = (args.duration as f64 / sim_dt).ceil() as u64;

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    for step in 0..steps {
        ticker.tick().await;
        vehicle.step(sim_dt);

        if step % 50 == 0 {
            if let Some(status) = status_rx.borrow_and_update().as_ref() {
                log::info!(
                    "t={:>5.1}s {:<9} wp {} alt {:.0} m hdg {:.0}° mode {}",
                    step as f64 * sim_dt,
                    status.state.name(),
                    status.next_waypoint,
                    status.alt,
                    status.heading,
                    status.mode
                );
            }
        }
    }

    system.close();
    tokio::time::timeout(Duration::from_secs(5), controller_handle)
        .await
        .context("controller did not stop")??;

    let final_loc = vehicle.location();
    log::info!(
        "Finished at {:.6}, {:.6} ({:.0} m from start)",
        final_loc.lat_deg(),
        final_loc.lon_deg(),
        origin.distance_to(&final_loc, 0.0).magnitude_xy()
    );

    if let Some(path) = &args.status_out {
        if let Some(status) = status_rx.borrow().clone() {
            status.save(path)?;
            log::info!("Final status written to {}", path.display());
        }
    }

    Ok(())
}

//! Periodic classify-act loop.
//!
//! The controller owns the only writer of the hysteresis counters. Every
//! cycle works from one vehicle snapshot and one copy of the obstacle lists,
//! so feed updates that land mid-cycle are picked up on the next tick.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::action::{decide, ActionContext, Command};
use crate::config::AvoidanceConfig;
use crate::error::Result;
use crate::state::{determine_state, AvoidanceState};
use crate::status::AvoidanceStatus;
use crate::system::AvoidanceSystem;
use crate::vehicle::{AvoidanceSnapshot, FlightMode, Vehicle};

pub struct AvoidanceController<V: Vehicle + ?Sized> {
    system: Arc<AvoidanceSystem>,
    vehicle: Arc<V>,
    config: AvoidanceConfig,
    status_tx: watch::Sender<Option<AvoidanceStatus>>,
    last_state: Option<AvoidanceState>,
}

impl<V: Vehicle + ?Sized> AvoidanceController<V> {
    pub fn new(system: Arc<AvoidanceSystem>, vehicle: Arc<V>, config: AvoidanceConfig) -> Self {
        let (status_tx, _) = watch::channel(None);
        Self {
            system,
            vehicle,
            config,
            status_tx,
            last_state: None,
        }
    }

    /// Latest status, updated once per cycle
    pub fn subscribe(&self) -> watch::Receiver<Option<AvoidanceStatus>> {
        self.status_tx.subscribe()
    }

    pub fn system(&self) -> &Arc<AvoidanceSystem> {
        &self.system
    }

    pub fn last_state(&self) -> Option<AvoidanceState> {
        self.last_state
    }

    /// Run one classify-act cycle and return the state it acted on.
    pub fn run_cycle(&mut self) -> Result<AvoidanceState> {
        let snapshot = AvoidanceSnapshot::capture(self.vehicle.as_ref());
        let obstacles = self.system.obstacles();
        let mut memory = self.system.memory();

        let classification = determine_state(
            &snapshot,
            &obstacles,
            &self.system.view(),
            &self.config,
        );
        let state = classification.state;

        if state == AvoidanceState::Standby {
            memory.standby_count = if snapshot.location.alt >= self.config.starting_altitude {
                memory.standby_count + 1
            } else {
                0
            };
        }
        if classification.selected.is_some() {
            memory.selected_obstacle = classification.selected;
        }
        self.system.store_memory(memory);
        self.note_transition(state, &snapshot);

        let ctx = ActionContext {
            selected: memory.selected_obstacle.and_then(|id| obstacles.get(id)),
            monitor_count: memory.monitor_count,
            config: &self.config,
        };
        let command = decide(state, &snapshot, &ctx)?;

        if let Some(command) = &command {
            self.dispatch(command, &snapshot)?;
            memory.monitor_count = command.next_monitor_count(memory.monitor_count);
            self.system.store_memory(memory);
        }

        self.status_tx.send_replace(Some(AvoidanceStatus::from_snapshot(
            &snapshot,
            state,
            memory.monitor_count,
        )));

        Ok(state)
    }

    fn note_transition(&mut self, state: AvoidanceState, snapshot: &AvoidanceSnapshot) {
        if self.last_state != Some(state) {
            log::info!(
                "Avoidance state {} -> {} (alt {:.1} m, mode {})",
                self.last_state.map(|s| s.name()).unwrap_or("NONE"),
                state,
                snapshot.location.alt,
                snapshot.mode
            );
            self.last_state = Some(state);
        }
        log::debug!(
            "Cycle: state={} wp={} heading={:.1}°",
            state,
            snapshot.next_waypoint_index,
            snapshot.heading.to_degrees()
        );
    }

    /// Send `command`, skipping mode changes the vehicle is already in
    fn dispatch(&self, command: &Command, snapshot: &AvoidanceSnapshot) -> Result<()> {
        match command {
            Command::ResumeAuto => self.ensure_mode(snapshot, FlightMode::Auto),
            Command::Loiter => self.ensure_mode(snapshot, FlightMode::Loiter),
            Command::Turn {
                angle,
                target,
                origin,
            } => {
                self.ensure_mode(snapshot, FlightMode::Guided)?;
                log::info!(
                    "Turning {:.1}° ({:?}) toward {:.6}, {:.6}",
                    angle.to_degrees(),
                    origin,
                    target.lat_deg(),
                    target.lon_deg()
                );
                self.vehicle.navigate_to(*target)
            }
        }
    }

    fn ensure_mode(&self, snapshot: &AvoidanceSnapshot, mode: FlightMode) -> Result<()> {
        if snapshot.mode == mode {
            return Ok(());
        }
        log::info!("Switching mode {} -> {}", snapshot.mode, mode);
        self.vehicle.set_mode(mode)
    }

    /// Wait for the first start (or close), then cycle at the configured
    /// period until the system is closed. Failed or panicking cycles are
    /// logged and skipped.
    pub async fn run(&mut self) {
        self.system.wait_until_started().await;
        log::info!(
            "Avoidance controller running every {} ms",
            self.config.cycle_period_ms
        );

        let mut ticker = tokio::time::interval(self.config.cycle_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())) {
                Ok(Ok(AvoidanceState::Closed)) => break,
                Ok(Ok(_)) => {}
                Ok(Err(err)) => log::error!("Avoidance cycle failed: {}", err),
                Err(payload) => {
                    log::error!("Avoidance cycle panicked: {}", panic_message(payload.as_ref()))
                }
            }
        }

        log::info!("Avoidance controller stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Distance, Location};
    use crate::obstacle::{MovingObstacle, StaticObstacle};
    use crate::sim::{SimCommand, SimVehicle};
    use std::time::Duration;

    fn origin() -> Location {
        Location::from_degrees(38.1446, -76.4280, 100.0)
    }

    fn fast_config() -> AvoidanceConfig {
        AvoidanceConfig {
            cycle_period_ms: 5,
            ..AvoidanceConfig::default()
        }
    }

    fn setup(vehicle: SimVehicle) -> (Arc<AvoidanceSystem>, Arc<SimVehicle>, AvoidanceController<SimVehicle>) {
        let system = Arc::new(AvoidanceSystem::new());
        let vehicle = Arc::new(vehicle);
        let controller = AvoidanceController::new(system.clone(), vehicle.clone(), fast_config());
        (system, vehicle, controller)
    }

    fn cruising() -> SimVehicle {
        SimVehicle::builder()
            .location(origin())
            .waypoints(vec![origin().offset_by(&Distance::new(50.0, 800.0, 0.0))])
            .build()
    }

    #[test]
    fn test_inactive_cycle_sends_nothing_in_auto() {
        let (_system, vehicle, mut controller) = setup(cruising());
        assert_eq!(controller.run_cycle().unwrap(), AvoidanceState::Inactive);
        assert!(vehicle.commands().is_empty());
    }

    #[test]
    fn test_standby_counts_up_then_monitors() {
        let (system, _vehicle, mut controller) = setup(cruising());
        system.start();

        for expected in 1..=3 {
            assert_eq!(controller.run_cycle().unwrap(), AvoidanceState::Standby);
            assert_eq!(system.standby_count(), expected);
        }
        assert_eq!(controller.run_cycle().unwrap(), AvoidanceState::Monitor);
    }

    #[test]
    fn test_standby_resets_below_starting_altitude() {
        let (system, vehicle, mut controller) = setup(cruising());
        system.start();
        controller.run_cycle().unwrap();
        controller.run_cycle().unwrap();
        assert_eq!(system.standby_count(), 2);

        vehicle.set_location(origin().with_alt(40.0));
        controller.run_cycle().unwrap();
        assert_eq!(system.standby_count(), 0);
    }

    #[test]
    fn test_avoid_cycle_commands_guided_turn() {
        let (system, vehicle, mut controller) = setup(cruising());
        let obs = StaticObstacle::new(
            origin().offset_by(&Distance::new(10.0, 300.0, 0.0)).with_alt(50.0),
            20.0,
            100.0,
        );
        system.replace_obstacles(vec![obs], vec![]).unwrap();
        system.start();
        for _ in 0..3 {
            controller.run_cycle().unwrap();
        }

        assert_eq!(controller.run_cycle().unwrap(), AvoidanceState::Avoid);
        let commands = vehicle.commands();
        assert_eq!(commands[0], SimCommand::SetMode(FlightMode::Guided));
        assert!(matches!(commands[1], SimCommand::NavigateTo(_)));
        assert!(system.selected_obstacle().is_some());
        assert_eq!(system.monitor_count(), 0);
    }

    #[test]
    fn test_avoid_out_of_domain_keeps_guided_target() {
        let start = origin().with_alt(60.0);
        let vehicle = SimVehicle::builder()
            .location(start)
            .mode(FlightMode::Guided)
            .waypoints(vec![start.offset_by(&Distance::new(0.0, 800.0, 0.0))])
            .build();
        let (system, vehicle, mut controller) = setup(vehicle);
        // Dead ahead at 100 m, too close for a tangent off the avoid circle
        let tower = StaticObstacle::new(
            start.offset_by(&Distance::new(0.0, 100.0, 0.0)).with_alt(20.0),
            20.0,
            40.0,
        );
        system.replace_obstacles(vec![tower], vec![]).unwrap();
        system.store_memory(crate::system::Hysteresis {
            standby_count: 3,
            ..Default::default()
        });
        system.start();

        let result = controller.run_cycle();
        assert!(matches!(result, Err(crate::error::AvoidanceError::OutOfDomain(_))));
        assert_eq!(controller.last_state(), Some(AvoidanceState::Avoid));
        assert!(vehicle.commands().is_empty());
        assert_eq!(vehicle.mode(), FlightMode::Guided);
    }

    #[test]
    fn test_mode_change_is_idempotent() {
        let vehicle = SimVehicle::builder()
            .location(origin())
            .mode(FlightMode::Guided)
            .waypoints(vec![origin().offset_by(&Distance::new(0.0, 800.0, 0.0))])
            .build();
        let (_system, vehicle, mut controller) = setup(vehicle);

        // Inactive in GUIDED resumes auto once
        controller.run_cycle().unwrap();
        controller.run_cycle().unwrap();
        assert_eq!(vehicle.commands(), vec![SimCommand::SetMode(FlightMode::Auto)]);
    }

    #[test]
    fn test_dispatch_failure_is_reported() {
        let vehicle = SimVehicle::builder()
            .location(origin())
            .mode(FlightMode::Loiter)
            .waypoints(vec![origin().offset_by(&Distance::new(0.0, 800.0, 0.0))])
            .build();
        let (_system, vehicle, mut controller) = setup(vehicle);
        vehicle.set_reject_commands(true);
        assert!(controller.run_cycle().is_err());
    }

    #[test]
    fn test_status_published_each_cycle() {
        let (system, _vehicle, mut controller) = setup(cruising());
        let rx = controller.subscribe();
        assert!(rx.borrow().is_none());

        system.start();
        controller.run_cycle().unwrap();
        let status = rx.borrow().clone().unwrap();
        assert_eq!(status.state, AvoidanceState::Standby);
        assert_eq!(status.next_waypoint, 1);
    }

    #[test]
    fn test_stale_selection_is_dropped_after_replacement() {
        let vehicle = SimVehicle::builder()
            .location(origin())
            .mode(FlightMode::Guided)
            .waypoints(vec![origin().offset_by(&Distance::new(300.0, 800.0, 0.0))])
            .build();
        let (system, vehicle, mut controller) = setup(vehicle);
        let balloon = MovingObstacle::new(origin().offset_by(&Distance::new(-50.0, 50.0, 0.0)), 10.0)
            .with_buffer(0.0);
        system.replace_obstacles(vec![], vec![balloon.clone()]).unwrap();
        let id = system.obstacles().iter().next().unwrap().0;
        system.store_memory(crate::system::Hysteresis {
            standby_count: 3,
            monitor_count: 0,
            selected_obstacle: Some(id),
        });
        system.start();

        // Remembered obstacle sits inside the left turning circle
        assert_eq!(controller.run_cycle().unwrap(), AvoidanceState::Monitor);
        assert!(matches!(vehicle.commands().last(), Some(SimCommand::NavigateTo(_))));
        assert_eq!(system.monitor_count(), 1);

        system.replace_obstacles(vec![], vec![balloon]).unwrap();
        vehicle.clear_commands();
        assert_eq!(controller.run_cycle().unwrap(), AvoidanceState::Monitor);
        assert_eq!(vehicle.commands(), vec![SimCommand::SetMode(FlightMode::Auto)]);
        assert_eq!(system.monitor_count(), 0);
    }

    #[tokio::test]
    async fn test_run_waits_for_start_and_exits_on_close() {
        let (system, _vehicle, mut controller) = setup(cruising());
        let rx = controller.subscribe();
        let handle = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.borrow().is_none(), "controller cycled before start");

        system.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.borrow().is_some());

        system.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("controller should exit after close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_survives_failing_cycles() {
        let vehicle = SimVehicle::builder()
            .location(origin())
            .mode(FlightMode::Guided)
            .waypoints(vec![origin().offset_by(&Distance::new(0.0, 800.0, 0.0))])
            .build();
        let (system, vehicle, mut controller) = setup(vehicle);
        vehicle.set_reject_commands(true);
        system.start();
        let handle = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!handle.is_finished());

        system.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("controller should exit after close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_before_start_exits_immediately() {
        let (system, _vehicle, mut controller) = setup(cruising());
        system.close();
        tokio::time::timeout(Duration::from_secs(1), controller.run())
            .await
            .expect("closed controller should not block");
        assert_eq!(controller.last_state(), Some(AvoidanceState::Closed));
    }
}

//! Kinematic fixed-wing simulator.
//!
//! `SimVehicle` implements [`Vehicle`] with a point-mass model: constant
//! airspeed, coordinated turns limited by a fixed bank angle, and a bounded
//! climb rate. It is enough to exercise the avoidance loop end to end without
//! an autopilot.

use std::f64::consts::PI;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{AvoidanceError, Result};
use crate::geometry::{turning_radius, wrap_pi, Distance, Location, ACCEL_GRAV};
use crate::vehicle::{AvoidanceSnapshot, FlightMode, Vehicle};

const DEFAULT_AIRSPEED: f64 = 20.0; // m/s
const DEFAULT_TURN_RADIUS: f64 = 100.0; // m at the default airspeed
const DEFAULT_WAYPOINT_RADIUS: f64 = 30.0;
const MAX_CLIMB_RATE: f64 = 3.0; // m/s

/// Command received from the avoidance system
#[derive(Clone, Debug, PartialEq)]
pub enum SimCommand {
    SetMode(FlightMode),
    NavigateTo(Location),
}

#[derive(Debug)]
struct SimState {
    location: Location,
    heading: f64,
    airspeed: f64,
    pitch: f64,
    bank_angle: f64,
    mode: FlightMode,
    waypoints: Vec<Location>,
    next_index: usize,
    waypoint_radius: f64,
    home: Option<Location>,
    guided_target: Option<Location>,
    loiter_center: Option<Location>,
    commands: Vec<SimCommand>,
    reject_commands: bool,
}

impl SimState {
    fn turning_radius(&self) -> f64 {
        turning_radius(self.airspeed, self.bank_angle)
    }

    fn current_waypoint(&self) -> Option<Location> {
        self.waypoints.get(self.next_index).copied()
    }

    fn waypoint_index(&self) -> u16 {
        // Mission item 0 is home
        (self.next_index + 1).min(u16::MAX as usize) as u16
    }

    fn snapshot(&self) -> AvoidanceSnapshot {
        AvoidanceSnapshot {
            location: self.location,
            heading: self.heading,
            airspeed: self.airspeed,
            pitch: self.pitch,
            mode: self.mode.clone(),
            turning_radius: self.turning_radius(),
            next_waypoint: self.current_waypoint(),
            next_waypoint_index: self.waypoint_index(),
            waypoint_radius: self.waypoint_radius,
            command_count: self.waypoints.len() + 1,
        }
    }

    /// Heading and altitude the autopilot is steering for in the current mode
    fn steering_target(&mut self) -> Option<(f64, f64)> {
        match self.mode {
            FlightMode::Auto => {
                while let Some(wp) = self.current_waypoint() {
                    if self.location.distance_to(&wp, 0.0).magnitude_xy() > self.waypoint_radius {
                        break;
                    }
                    log::debug!("Sim reached waypoint {}", self.next_index + 1);
                    self.next_index += 1;
                }
                let wp = self.current_waypoint()?;
                Some((self.location.distance_to(&wp, 0.0).bearing(), wp.alt))
            }
            FlightMode::Guided => {
                let target = self.guided_target?;
                Some((self.location.distance_to(&target, 0.0).bearing(), target.alt))
            }
            FlightMode::Loiter => {
                let center = *self.loiter_center.get_or_insert(self.location);
                let to_center = self.location.distance_to(&center, 0.0);
                // Clockwise orbit: keep the center off the right wing
                let bearing = if to_center.magnitude_xy() < 1.0 {
                    self.heading + PI / 2.0
                } else {
                    to_center.bearing() - PI / 2.0
                };
                Some((bearing, center.alt))
            }
            FlightMode::Other(_) => None,
        }
    }

    fn step(&mut self, dt: f64) {
        if !(dt > 0.0 && dt.is_finite()) {
            log::warn!("Sim step ignored: dt = {}", dt);
            return;
        }

        let (desired_heading, desired_alt) = self
            .steering_target()
            .unwrap_or((self.heading, self.location.alt));

        // Parked: no airflow, no turn
        let radius = self.turning_radius();
        let max_turn = if self.airspeed > 0.0 && radius.is_finite() && radius > 0.0 {
            self.airspeed / radius * dt
        } else {
            0.0
        };
        let turn = wrap_pi(desired_heading - self.heading).clamp(-max_turn, max_turn);
        self.heading = (self.heading + turn).rem_euclid(2.0 * PI);

        let max_climb = MAX_CLIMB_RATE * dt;
        let climb = (desired_alt - self.location.alt).clamp(-max_climb, max_climb);
        let travel = self.airspeed.max(0.0) * dt;
        self.pitch = if travel > 0.0 { (climb / travel).clamp(-1.0, 1.0).asin() } else { 0.0 };

        let mut offset = Distance::from_magnitude(travel, self.heading);
        offset.z = climb;
        self.location = self.location.offset_by(&offset);
    }
}

/// Simulated aircraft shared between the controller and a stepping task
#[derive(Debug)]
pub struct SimVehicle {
    state: Mutex<SimState>,
}

impl SimVehicle {
    pub fn builder() -> SimVehicleBuilder {
        SimVehicleBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the simulation by `dt` seconds
    pub fn step(&self, dt: f64) {
        self.lock().step(dt);
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<SimCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn guided_target(&self) -> Option<Location> {
        self.lock().guided_target
    }

    /// Make every subsequent command fail, as a dropped link would
    pub fn set_reject_commands(&self, reject: bool) {
        self.lock().reject_commands = reject;
    }

    pub fn set_location(&self, location: Location) {
        self.lock().location = location;
    }

    pub fn set_home(&self, home: Location) {
        self.lock().home = Some(home);
    }
}

impl Vehicle for SimVehicle {
    fn location(&self) -> Location {
        self.lock().location
    }

    fn heading(&self) -> f64 {
        self.lock().heading
    }

    fn airspeed(&self) -> f64 {
        self.lock().airspeed
    }

    fn pitch(&self) -> f64 {
        self.lock().pitch
    }

    fn mode(&self) -> FlightMode {
        self.lock().mode.clone()
    }

    fn turning_radius(&self) -> f64 {
        self.lock().turning_radius()
    }

    fn next_waypoint(&self) -> Option<Location> {
        self.lock().current_waypoint()
    }

    fn next_waypoint_index(&self) -> u16 {
        self.lock().waypoint_index()
    }

    fn waypoint_acceptance_radius(&self) -> f64 {
        self.lock().waypoint_radius
    }

    fn command_count(&self) -> usize {
        self.lock().waypoints.len() + 1
    }

    fn home_location(&self) -> Option<Location> {
        self.lock().home
    }

    fn snapshot(&self) -> AvoidanceSnapshot {
        self.lock().snapshot()
    }

    fn set_mode(&self, mode: FlightMode) -> Result<()> {
        let mut state = self.lock();
        if state.reject_commands {
            return Err(AvoidanceError::Vehicle(format!("mode change to {} rejected", mode)));
        }
        log::debug!("Sim mode {} -> {}", state.mode, mode);
        state.loiter_center = if mode == FlightMode::Loiter {
            Some(state.location)
        } else {
            None
        };
        state.commands.push(SimCommand::SetMode(mode.clone()));
        state.mode = mode;
        Ok(())
    }

    fn navigate_to(&self, target: Location) -> Result<()> {
        let mut state = self.lock();
        if state.reject_commands {
            return Err(AvoidanceError::Vehicle("navigation target rejected".to_string()));
        }
        state.guided_target = Some(target);
        state.commands.push(SimCommand::NavigateTo(target));
        Ok(())
    }
}

/// Builder for [`SimVehicle`]. Defaults: 100 m above the default origin,
/// heading north, AUTO, 20 m/s with a 100 m turn radius, home at ground level.
pub struct SimVehicleBuilder {
    location: Location,
    heading: f64,
    airspeed: f64,
    bank_angle: f64,
    mode: FlightMode,
    waypoints: Vec<Location>,
    waypoint_radius: f64,
    home: bool,
}

impl Default for SimVehicleBuilder {
    fn default() -> Self {
        Self {
            location: Location::from_degrees(38.1446, -76.4280, 100.0),
            heading: 0.0,
            airspeed: DEFAULT_AIRSPEED,
            bank_angle: (DEFAULT_AIRSPEED * DEFAULT_AIRSPEED / (ACCEL_GRAV * DEFAULT_TURN_RADIUS)).atan(),
            mode: FlightMode::Auto,
            waypoints: Vec::new(),
            waypoint_radius: DEFAULT_WAYPOINT_RADIUS,
            home: true,
        }
    }
}

impl SimVehicleBuilder {
    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn altitude(mut self, alt: f64) -> Self {
        self.location = self.location.with_alt(alt);
        self
    }

    /// Radians clockwise from north
    pub fn heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    /// Keeps the bank angle, so the turn radius scales with v²
    pub fn airspeed(mut self, airspeed: f64) -> Self {
        self.airspeed = airspeed;
        self
    }

    pub fn bank_angle(mut self, bank_angle: f64) -> Self {
        self.bank_angle = bank_angle;
        self
    }

    pub fn mode(mut self, mode: FlightMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn waypoints(mut self, waypoints: Vec<Location>) -> Self {
        self.waypoints = waypoints;
        self
    }

    pub fn waypoint_radius(mut self, radius: f64) -> Self {
        self.waypoint_radius = radius;
        self
    }

    /// No home fix yet
    pub fn without_home(mut self) -> Self {
        self.home = false;
        self
    }

    pub fn build(self) -> SimVehicle {
        let loiter_center = (self.mode == FlightMode::Loiter).then_some(self.location);
        let home = self.home.then(|| self.location.with_alt(0.0));
        SimVehicle {
            state: Mutex::new(SimState {
                location: self.location,
                heading: self.heading,
                airspeed: self.airspeed,
                pitch: 0.0,
                bank_angle: self.bank_angle,
                mode: self.mode,
                waypoints: self.waypoints,
                next_index: 0,
                waypoint_radius: self.waypoint_radius,
                home,
                guided_target: None,
                loiter_center,
                commands: Vec::new(),
                reject_commands: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn origin() -> Location {
        Location::from_degrees(38.1446, -76.4280, 100.0)
    }

    #[test]
    fn test_default_turn_radius() {
        let vehicle = SimVehicle::builder().build();
        assert_relative_eq!(vehicle.turning_radius(), 100.0, epsilon = 1e-9);
        assert_eq!(vehicle.home_location().map(|h| h.alt), Some(0.0));
    }

    #[test]
    fn test_straight_flight_without_waypoints() {
        let vehicle = SimVehicle::builder().location(origin()).build();
        for _ in 0..10 {
            vehicle.step(0.1);
        }
        let d = origin().distance_to(&vehicle.location(), 0.0);
        assert_relative_eq!(d.y, 20.0, epsilon = 0.01);
        assert_relative_eq!(d.x, 0.0, epsilon = 0.01);
    }

    #[test]
    fn test_auto_sequences_waypoints() {
        let wp1 = origin().offset_by(&Distance::new(0.0, 200.0, 0.0));
        let wp2 = origin().offset_by(&Distance::new(0.0, 600.0, 0.0));
        let vehicle = SimVehicle::builder()
            .location(origin())
            .waypoints(vec![wp1, wp2])
            .build();

        assert_eq!(vehicle.next_waypoint_index(), 1);
        assert_eq!(vehicle.command_count(), 3);
        for _ in 0..100 {
            vehicle.step(0.1);
        }
        // 200 m flown, inside the 30 m acceptance radius of wp1
        assert_eq!(vehicle.next_waypoint(), Some(wp2));
        assert_eq!(vehicle.next_waypoint_index(), 2);
    }

    #[test]
    fn test_turn_rate_limited() {
        let target = origin().offset_by(&Distance::new(0.0, -1000.0, 0.0));
        let vehicle = SimVehicle::builder().location(origin()).mode(FlightMode::Guided).build();
        vehicle.navigate_to(target).unwrap();

        vehicle.step(1.0);
        // ω = v / r = 0.2 rad/s
        assert_relative_eq!(wrap_pi(vehicle.heading()).abs(), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_guided_reaches_heading() {
        let target = origin().offset_by(&Distance::new(1000.0, 0.0, 0.0));
        let vehicle = SimVehicle::builder().location(origin()).mode(FlightMode::Guided).build();
        vehicle.navigate_to(target).unwrap();
        for _ in 0..200 {
            vehicle.step(0.1);
        }
        let bearing = vehicle.location().distance_to(&target, 0.0).bearing();
        assert!(wrap_pi(vehicle.heading() - bearing).abs() < 0.05);
    }

    #[test]
    fn test_loiter_stays_near_center() {
        let vehicle = SimVehicle::builder().location(origin()).build();
        vehicle.set_mode(FlightMode::Loiter).unwrap();
        for _ in 0..600 {
            vehicle.step(0.1);
            let d = origin().distance_to(&vehicle.location(), 0.0).magnitude_xy();
            assert!(d < 250.0, "drifted {} m from loiter center", d);
        }
    }

    #[test]
    fn test_commands_recorded_and_rejected() {
        let vehicle = SimVehicle::builder().build();
        vehicle.set_mode(FlightMode::Guided).unwrap();
        vehicle.navigate_to(origin()).unwrap();
        assert_eq!(
            vehicle.commands(),
            vec![SimCommand::SetMode(FlightMode::Guided), SimCommand::NavigateTo(origin())]
        );

        vehicle.set_reject_commands(true);
        assert!(matches!(vehicle.set_mode(FlightMode::Auto), Err(AvoidanceError::Vehicle(_))));
        assert_eq!(vehicle.mode(), FlightMode::Guided);
    }

    #[test]
    fn test_parked_aircraft_stays_put() {
        let target = origin().offset_by(&Distance::new(500.0, 0.0, 0.0));
        let vehicle = SimVehicle::builder()
            .location(origin())
            .airspeed(0.0)
            .mode(FlightMode::Guided)
            .build();
        vehicle.navigate_to(target).unwrap();

        vehicle.step(0.1);
        assert_eq!(vehicle.heading(), 0.0);
        assert_eq!(vehicle.location(), origin());
        assert_eq!(vehicle.pitch(), 0.0);
    }

    #[test]
    fn test_non_positive_dt_is_ignored() {
        let vehicle = SimVehicle::builder().location(origin()).build();
        vehicle.step(-0.5);
        vehicle.step(0.0);
        vehicle.step(f64::NAN);
        assert_eq!(vehicle.location(), origin());
    }

    #[test]
    fn test_snapshot_reads_one_tick() {
        let wp = origin().offset_by(&Distance::new(300.0, 600.0, 20.0));
        let vehicle = SimVehicle::builder().location(origin()).waypoints(vec![wp]).build();
        vehicle.step(1.0);

        let snapshot = vehicle.snapshot();
        assert_eq!(snapshot.location, vehicle.location());
        assert_eq!(snapshot.heading, vehicle.heading());
        assert_eq!(snapshot.pitch, vehicle.pitch());
        assert_eq!(snapshot.mode, FlightMode::Auto);
        assert_eq!(snapshot.next_waypoint, Some(wp));
        assert_eq!(snapshot.next_waypoint_index, 1);
        assert_eq!(snapshot.command_count, 2);
        assert_relative_eq!(snapshot.turning_radius, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_climbs_toward_waypoint_altitude() {
        let wp = origin().offset_by(&Distance::new(0.0, 2000.0, 50.0));
        let vehicle = SimVehicle::builder().location(origin()).waypoints(vec![wp]).build();
        vehicle.step(1.0);
        assert_relative_eq!(vehicle.location().alt, 103.0, epsilon = 1e-9);
        assert!(vehicle.pitch() > 0.0);
    }
}

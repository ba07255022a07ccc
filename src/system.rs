//! Shared avoidance state: lifecycle flags, obstacle lists and the
//! controller's hysteresis memory.
//!
//! One `AvoidanceSystem` exists per vehicle session and is shared (behind an
//! `Arc`) between the controller task and the feed that writes obstacles.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;

use crate::error::{AvoidanceError, Result};
use crate::geometry::Location;
use crate::obstacle::{MovingObstacle, Obstacle, ObstacleKind, StaticObstacle};
use crate::state::SystemView;

// ===== Obstacle lists =====

/// Stable reference to an obstacle within one generation of the lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObstacleId {
    pub kind: ObstacleKind,
    pub index: usize,
    pub generation: u64,
}

/// Static and moving obstacle lists as seen by one cycle.
///
/// `generation` increases with every wholesale replacement, so ids taken
/// from an older set of lists stop resolving.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObstacleField {
    pub static_obstacles: Vec<Obstacle>,
    pub moving_obstacles: Vec<Obstacle>,
    pub generation: u64,
}

impl ObstacleField {
    pub fn new(
        static_obstacles: Vec<StaticObstacle>,
        moving_obstacles: Vec<MovingObstacle>,
        generation: u64,
    ) -> Self {
        Self {
            static_obstacles: static_obstacles.into_iter().map(Obstacle::from).collect(),
            moving_obstacles: moving_obstacles.into_iter().map(Obstacle::from).collect(),
            generation,
        }
    }

    fn list(&self, kind: ObstacleKind) -> &[Obstacle] {
        match kind {
            ObstacleKind::Static => &self.static_obstacles,
            ObstacleKind::Moving => &self.moving_obstacles,
        }
    }

    /// Obstacles of one kind, in list order
    pub fn iter_kind(&self, kind: ObstacleKind) -> impl Iterator<Item = (ObstacleId, &Obstacle)> {
        let generation = self.generation;
        self.list(kind).iter().enumerate().map(move |(index, obs)| {
            (
                ObstacleId {
                    kind,
                    index,
                    generation,
                },
                obs,
            )
        })
    }

    /// Static obstacles then moving obstacles, in list order
    pub fn iter(&self) -> impl Iterator<Item = (ObstacleId, &Obstacle)> {
        self.iter_kind(ObstacleKind::Static)
            .chain(self.iter_kind(ObstacleKind::Moving))
    }

    pub fn get(&self, id: ObstacleId) -> Option<&Obstacle> {
        if id.generation != self.generation {
            return None;
        }
        self.list(id.kind).get(id.index)
    }

    pub fn len(&self) -> usize {
        self.static_obstacles.len() + self.moving_obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ===== Controller memory =====

/// Counters and selection carried between cycles. Written only by the
/// controller task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hysteresis {
    pub standby_count: u32,
    pub monitor_count: u32,
    pub selected_obstacle: Option<ObstacleId>,
}

// ===== System =====

pub struct AvoidanceSystem {
    active: AtomicBool,
    closed: AtomicBool,
    wake: Notify,
    obstacles: RwLock<ObstacleField>,
    memory: Mutex<Hysteresis>,
}

impl AvoidanceSystem {
    /// Create an inactive system with empty obstacle lists
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            obstacles: RwLock::new(ObstacleField::default()),
            memory: Mutex::new(Hysteresis::default()),
        }
    }

    /// Activate avoidance. Obstacle lists should already be populated.
    pub fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            log::info!("Obstacle avoidance started");
        }
        self.wake.notify_waiters();
    }

    /// Pause avoidance; obstacles and counters are kept.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::info!("Obstacle avoidance stopped");
        }
    }

    /// Close avoidance for good. The controller exits on its next cycle.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::info!("Obstacle avoidance closed");
        }
        self.wake.notify_waiters();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolve once the system has been started or closed
    pub async fn wait_until_started(&self) {
        loop {
            let notified = self.wake.notified();
            if self.is_active() || self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Replace both obstacle lists in one step. Returns the new generation.
    pub fn replace_obstacles(
        &self,
        static_obstacles: Vec<StaticObstacle>,
        moving_obstacles: Vec<MovingObstacle>,
    ) -> Result<u64> {
        let mut field = self
            .obstacles
            .write()
            .map_err(|_| AvoidanceError::Internal("Failed to acquire obstacle lock".to_string()))?;

        let generation = field.generation + 1;
        *field = ObstacleField::new(static_obstacles, moving_obstacles, generation);
        log::info!(
            "Obstacle lists replaced: {} static, {} moving (generation {})",
            field.static_obstacles.len(),
            field.moving_obstacles.len(),
            generation
        );
        Ok(generation)
    }

    /// Move one moving obstacle
    pub fn update_moving_location(&self, index: usize, location: Location) -> Result<()> {
        self.update_moving_locations(&[(index, location)])
    }

    /// Move several moving obstacles under a single lock
    pub fn update_moving_locations(&self, updates: &[(usize, Location)]) -> Result<()> {
        let mut field = self
            .obstacles
            .write()
            .map_err(|_| AvoidanceError::Internal("Failed to acquire obstacle lock".to_string()))?;

        let len = field.moving_obstacles.len();
        if let Some(&(index, _)) = updates.iter().find(|(index, _)| *index >= len) {
            return Err(AvoidanceError::ObstacleIndex { index, len });
        }

        for &(index, location) in updates {
            if let Obstacle::Moving(obs) = &mut field.moving_obstacles[index] {
                obs.set_location(location);
            }
        }
        Ok(())
    }

    /// Copy of the current obstacle lists for one cycle
    pub fn obstacles(&self) -> ObstacleField {
        self.obstacles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn memory_guard(&self) -> MutexGuard<'_, Hysteresis> {
        // Hysteresis is plain data; a panicked cycle cannot leave it torn
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn memory(&self) -> Hysteresis {
        *self.memory_guard()
    }

    pub(crate) fn store_memory(&self, memory: Hysteresis) {
        *self.memory_guard() = memory;
    }

    pub fn standby_count(&self) -> u32 {
        self.memory_guard().standby_count
    }

    pub fn monitor_count(&self) -> u32 {
        self.memory_guard().monitor_count
    }

    pub fn selected_obstacle(&self) -> Option<ObstacleId> {
        self.memory_guard().selected_obstacle
    }

    /// Flags for the classifier
    pub fn view(&self) -> SystemView {
        SystemView {
            active: self.is_active(),
            closed: self.is_closed(),
            standby_count: self.standby_count(),
        }
    }
}

impl Default for AvoidanceSystem {
    fn default() -> Self {
        Self::new()
    }
}

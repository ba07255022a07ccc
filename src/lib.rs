pub mod action;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod geometry;
pub mod obstacle;
pub mod sim;
pub mod state;
pub mod status;
pub mod system;
pub mod vehicle;

pub use action::{decide, Command, TurnOrigin};
pub use config::AvoidanceConfig;
pub use controller::AvoidanceController;
pub use error::{AvoidanceError, Result};
pub use feed::{FeedHandler, FeedMessage};
pub use geometry::{Distance, Location};
pub use obstacle::{Envelope, MovingObstacle, Obstacle, ObstacleKind, StaticObstacle};
pub use state::{determine_state, AvoidanceState, Classification};
pub use status::AvoidanceStatus;
pub use system::{AvoidanceSystem, ObstacleField, ObstacleId};
pub use vehicle::{AvoidanceSnapshot, FlightMode, Vehicle};

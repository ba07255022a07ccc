//! Ground-station obstacle feed.
//!
//! Messages are single text frames: a one-character type followed by
//! whitespace-separated fields. Positions arrive in degrees and sizes in
//! feet; everything is converted to radians and meters here. Framing and
//! the socket itself belong to the transport.

use std::str::SplitWhitespace;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AvoidanceConfig;
use crate::error::{AvoidanceError, Result};
use crate::geometry::{Distance, Location};
use crate::obstacle::{MovingObstacle, StaticObstacle};
use crate::system::AvoidanceSystem;
use crate::vehicle::{wait_for_home, FlightMode, Vehicle};

const METERS_PER_FOOT: f64 = 0.3048;

/// Descent commanded on flight termination (m)
pub const TERMINATION_DROP: f64 = 500.0;

/// Static obstacle as reported: a cylinder standing on the ground
#[derive(Clone, Debug, PartialEq)]
pub struct StaticReport {
    pub lat: f64,
    pub lon: f64,
    pub height: f64,
    pub radius: f64,
}

/// Moving obstacle as reported, altitude above mean sea level
#[derive(Clone, Debug, PartialEq)]
pub struct MovingReport {
    pub lat: f64,
    pub lon: f64,
    pub alt_msl: f64,
    pub radius: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MovingPosition {
    pub lat: f64,
    pub lon: f64,
    pub alt_msl: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    /// `i`: replace both obstacle lists and start avoidance
    Init {
        statics: Vec<StaticReport>,
        movings: Vec<MovingReport>,
    },
    /// `m`: new positions for the moving obstacles, in list order
    MovingUpdate(Vec<MovingPosition>),
    /// `p`
    Ping,
    /// `k`: flight termination
    Kill,
    /// `o`: close avoidance, keep flying the mission
    StopAvoidance,
    /// `c`: close avoidance and the feed
    Close,
}

struct Fields<'a> {
    inner: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split_whitespace(),
        }
    }

    fn next_str(&mut self, what: &str) -> Result<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| AvoidanceError::MalformedMessage(format!("missing {}", what)))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let raw = self.next_str(what)?;
        raw.parse()
            .map_err(|_| AvoidanceError::MalformedMessage(format!("bad {} '{}'", what, raw)))
    }

    fn number(&mut self, what: &str) -> Result<f64> {
        let raw = self.next_str(what)?;
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(AvoidanceError::MalformedMessage(format!("bad {} '{}'", what, raw))),
        }
    }

    fn degrees(&mut self, what: &str) -> Result<f64> {
        Ok(self.number(what)?.to_radians())
    }

    fn feet(&mut self, what: &str) -> Result<f64> {
        Ok(self.number(what)? * METERS_PER_FOOT)
    }

    fn is_empty(&self) -> bool {
        self.inner.clone().next().is_none()
    }

    fn finish(mut self) -> Result<()> {
        match self.inner.next() {
            None => Ok(()),
            Some(extra) => Err(AvoidanceError::MalformedMessage(format!(
                "unexpected trailing field '{}'",
                extra
            ))),
        }
    }
}

impl FeedMessage {
    pub fn parse(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| AvoidanceError::MalformedMessage("empty frame".to_string()))?;
        let mut fields = Fields::new(chars.as_str());

        let message = match kind {
            'i' => {
                let n_static = fields.count("static count")?;
                let n_moving = fields.count("moving count")?;

                let mut statics = Vec::new();
                for _ in 0..n_static {
                    statics.push(StaticReport {
                        lat: fields.degrees("static latitude")?,
                        lon: fields.degrees("static longitude")?,
                        height: fields.feet("static height")?,
                        radius: fields.feet("static radius")?,
                    });
                }

                let mut movings = Vec::new();
                for _ in 0..n_moving {
                    movings.push(MovingReport {
                        lat: fields.degrees("moving latitude")?,
                        lon: fields.degrees("moving longitude")?,
                        alt_msl: fields.feet("moving altitude")?,
                        radius: fields.feet("moving radius")?,
                    });
                }

                FeedMessage::Init { statics, movings }
            }
            'm' => {
                let mut positions = Vec::new();
                while !fields.is_empty() {
                    positions.push(MovingPosition {
                        lat: fields.degrees("moving latitude")?,
                        lon: fields.degrees("moving longitude")?,
                        alt_msl: fields.feet("moving altitude")?,
                    });
                }
                FeedMessage::MovingUpdate(positions)
            }
            'p' => FeedMessage::Ping,
            'k' => FeedMessage::Kill,
            'o' => FeedMessage::StopAvoidance,
            'c' => FeedMessage::Close,
            other => {
                return Err(AvoidanceError::MalformedMessage(format!(
                    "unknown message type '{}'",
                    other
                )))
            }
        };

        fields.finish()?;
        Ok(message)
    }
}

/// Applies feed messages to the avoidance system and the vehicle
pub struct FeedHandler<V: Vehicle + ?Sized> {
    system: Arc<AvoidanceSystem>,
    vehicle: Arc<V>,
    config: AvoidanceConfig,
    home_alt: Option<f64>,
    pinged: bool,
    closed: bool,
}

impl<V: Vehicle + ?Sized> FeedHandler<V> {
    pub fn new(system: Arc<AvoidanceSystem>, vehicle: Arc<V>, config: AvoidanceConfig) -> Self {
        Self {
            system,
            vehicle,
            config,
            home_alt: None,
            pinged: false,
            closed: false,
        }
    }

    pub fn pinged(&self) -> bool {
        self.pinged
    }

    /// Set once a `c` message has been handled; the transport should hang up
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Parse and apply one frame
    pub async fn handle_frame(&mut self, frame: &str) -> Result<()> {
        let message = FeedMessage::parse(frame)?;
        self.apply(message).await
    }

    pub async fn apply(&mut self, message: FeedMessage) -> Result<()> {
        match message {
            FeedMessage::Init { statics, movings } => {
                let home_alt = self.home_alt().await?;

                let statics = statics
                    .into_iter()
                    .map(|s| {
                        StaticObstacle::grounded(s.lat, s.lon, s.radius, s.height)
                            .with_buffer(self.config.static_buffer)
                    })
                    .collect();
                let movings = movings
                    .into_iter()
                    .map(|m| {
                        let loc = Location::new(m.lat, m.lon, m.alt_msl - home_alt);
                        MovingObstacle::new(loc, m.radius).with_buffer(self.config.moving_buffer)
                    })
                    .collect();

                self.system.replace_obstacles(statics, movings)?;
                self.system.start();
            }
            FeedMessage::MovingUpdate(positions) => {
                let home_alt = self.home_alt().await?;
                let updates: Vec<_> = positions
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| (i, Location::new(p.lat, p.lon, p.alt_msl - home_alt)))
                    .collect();
                self.system.update_moving_locations(&updates)?;
            }
            FeedMessage::Ping => {
                log::debug!("Ground station ping");
                self.pinged = true;
            }
            FeedMessage::Kill => {
                log::warn!("Flight termination requested");
                self.system.close();
                let target = self
                    .vehicle
                    .location()
                    .offset_by(&Distance::new(0.0, 0.0, -TERMINATION_DROP));
                if self.vehicle.mode() != FlightMode::Guided {
                    self.vehicle.set_mode(FlightMode::Guided)?;
                }
                self.vehicle.navigate_to(target)?;
            }
            FeedMessage::StopAvoidance => {
                self.system.close();
            }
            FeedMessage::Close => {
                self.system.close();
                self.closed = true;
            }
        }
        Ok(())
    }

    /// Home altitude above MSL, waited for once and then cached
    async fn home_alt(&mut self) -> Result<f64> {
        if let Some(alt) = self.home_alt {
            return Ok(alt);
        }
        let home = wait_for_home(
            self.vehicle.as_ref(),
            self.config.home_wait_attempts,
            Duration::from_millis(self.config.home_wait_base_ms),
        )
        .await?;
        self.home_alt = Some(home.alt);
        Ok(home.alt)
    }
}

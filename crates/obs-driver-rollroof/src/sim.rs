//! Simulated roll-off roof controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::link::{commands, ActuatorLink, LinkError};
use crate::rollroof::MotionDirection;
use crate::status::RoofPosition;

/// Simulated roof controller with realistic behavior.
///
/// Speaks the same two-character status protocol as the hardware:
/// - Opening and closing take a configurable number of status polls,
///   during which the roof reports between limits.
/// - Telescope park sensors for both axes can be toggled.
/// - An abort freezes the roof wherever it is.
/// - A "wedged" roof keeps running without ever reaching its limit,
///   which is how the safety cutout gets exercised.
/// - Disconnecting makes every exchange fail like a dead serial link.
///
/// Clones share the same roof, so a test can keep one handle for
/// inspection while the controller owns another.
///
/// # Example
///
/// ```rust,ignore
/// let sim = SimulatedRoof::new();
/// let mut roof = RollRoof::with_link(Box::new(sim.clone()), clock, config)?;
/// roof.unpark().await;
/// ```
#[derive(Clone)]
pub struct SimulatedRoof {
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    position: RoofPosition,
    travel: Option<Travel>,
    travel_polls: u32,
    dec_parked: bool,
    ra_parked: bool,
    wedged: bool,
    commands: Vec<String>,
}

struct Travel {
    direction: MotionDirection,
    polls_left: u32,
}

impl SimulatedRoof {
    /// A connected roof, fully closed, telescope parked on both axes.
    ///
    /// Motion completes after three status polls.
    pub fn new() -> Self {
        Self::with_travel_polls(3)
    }

    /// Like [`new`](Self::new) with a custom travel time in status polls.
    pub fn with_travel_polls(travel_polls: u32) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(SimState {
                position: RoofPosition::Closed,
                travel: None,
                travel_polls,
                dec_parked: true,
                ra_parked: true,
                wedged: false,
                commands: Vec::new(),
            })),
        }
    }

    /// Place the roof at `position` with no travel in progress.
    pub async fn set_position(&self, position: RoofPosition) {
        let mut state = self.state.lock().await;
        state.position = position;
        state.travel = None;
    }

    /// Set the per-axis telescope park sensors.
    pub async fn set_telescope_parked(&self, dec: bool, ra: bool) {
        let mut state = self.state.lock().await;
        state.dec_parked = dec;
        state.ra_parked = ra;
    }

    /// A wedged roof keeps "moving" but never reaches a limit switch.
    pub async fn set_wedged(&self, wedged: bool) {
        self.state.lock().await.wedged = wedged;
    }

    /// Drop or restore the link.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every command received so far, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.state.lock().await.commands.clone()
    }

    /// Current roof position inside the simulation.
    pub async fn position(&self) -> RoofPosition {
        self.state.lock().await.position
    }
}

impl Default for SimulatedRoof {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn begin_travel(&mut self, direction: MotionDirection) {
        self.position = RoofPosition::Unknown;
        self.travel = Some(Travel {
            direction,
            polls_left: self.travel_polls,
        });
    }

    /// Advance travel by one poll and render the status reply.
    fn poll(&mut self) -> String {
        if let Some(travel) = self.travel.as_mut() {
            if !self.wedged {
                travel.polls_left = travel.polls_left.saturating_sub(1);
                if travel.polls_left == 0 {
                    self.position = travel.direction.target();
                    self.travel = None;
                }
            }
        }

        let position = match self.position {
            RoofPosition::Open => '1',
            RoofPosition::Closed => '2',
            RoofPosition::Unknown => '3',
        };
        let park = match (self.dec_parked, self.ra_parked) {
            (true, true) => '0',
            (false, false) => '1',
            (false, true) => '2',
            (true, false) => '3',
        };
        format!("{position}{park}")
    }
}

#[async_trait]
impl ActuatorLink for SimulatedRoof {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &str) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut state = self.state.lock().await;
        state.commands.push(command.to_string());
        match command {
            commands::OPEN => state.begin_travel(MotionDirection::Opening),
            commands::CLOSE => state.begin_travel(MotionDirection::Closing),
            commands::ABORT => state.travel = None,
            // The hardware ignores anything it does not recognize.
            other => trace!(command = other, "ignoring unknown command"),
        }
        Ok(())
    }

    async fn query_status(&self) -> Result<String, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        Ok(self.state.lock().await.poll())
    }
}

//! Roll-off roof motion controller.
//!
//! The controller decides when the roof may move, issues the motion
//! commands, and polls the controller for limit-switch confirmation while
//! a hard run-time budget counts down. Two interlocks gate every request:
//! the telescope must report both axes parked, and a closing request is
//! refused while the mount lock is set. A run that outlives its budget is
//! aborted rather than left powered.
//!
//! The machine is driven from one control task: every operation takes
//! `&mut self`, so overlapping calls cannot be expressed. Motion progress
//! comes only from [`tick`](RollRoof::tick), which the embedder (or
//! [`wait_settled`](RollRoof::wait_settled)) calls at the configured poll
//! interval while the roof is moving.
//!
//! # Usage
//!
//! ```rust,ignore
//! use obs_driver_rollroof::{RollRoof, RollRoofConfig, TickOutcome};
//!
//! let config = RollRoofConfig::from_toml_str(r#"
//!     port = "/dev/ttyUSB0"
//!     max_run_duration = "19s"
//! "#)?;
//!
//! let mut roof = RollRoof::connect(config).await?;
//! roof.unpark().await;
//! match roof.wait_settled().await {
//!     TickOutcome::Completed(position) => println!("roof {}", position.as_str()),
//!     outcome => eprintln!("roof did not open: {outcome:?}"),
//! }
//! ```

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use obs_core::clock::{Clock, SystemClock};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::link::{commands, ActuatorLink, LinkError, SerialRoofLink};
use crate::status::{ControllerStatus, RoofPosition, TelescopeParkDetail};
use crate::timer::SafetyTimer;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the roll-off roof driver.
#[derive(Debug, Clone, Deserialize)]
pub struct RollRoofConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0").
    pub port: String,
    /// Baud rate of the controller link.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Hard ceiling on a single motion run before the safety abort fires.
    #[serde(default = "default_max_run_duration", with = "humantime_serde")]
    pub max_run_duration: Duration,
    /// Cadence at which motion is polled for progress.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Per-exchange reply timeout on the serial link.
    #[serde(default = "default_link_timeout", with = "humantime_serde")]
    pub link_timeout: Duration,
}

fn default_baud_rate() -> u32 {
    57600
}

fn default_max_run_duration() -> Duration {
    Duration::from_secs(19)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_link_timeout() -> Duration {
    Duration::from_secs(2)
}

impl RollRoofConfig {
    /// A config for `port` with every other field at its default.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            max_run_duration: default_max_run_duration(),
            poll_interval: default_poll_interval(),
            link_timeout: default_link_timeout(),
        }
    }

    /// Parse and validate a TOML config fragment.
    ///
    /// # Errors
    ///
    /// Fails on unparsable TOML or a config that does not pass
    /// [`validate`](Self::validate).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid roll-off roof config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configured durations against each other.
    ///
    /// # Errors
    ///
    /// Fails if any duration is zero or the poll interval does not fit
    /// inside the run budget.
    pub fn validate(&self) -> Result<()> {
        if self.max_run_duration.is_zero() {
            return Err(anyhow!("max_run_duration must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be positive"));
        }
        if self.poll_interval >= self.max_run_duration {
            return Err(anyhow!(
                "poll_interval ({:?}) must be shorter than max_run_duration ({:?})",
                self.poll_interval,
                self.max_run_duration
            ));
        }
        if self.link_timeout.is_zero() {
            return Err(anyhow!("link_timeout must be positive"));
        }
        Ok(())
    }
}

// =============================================================================
// Motion state machine types
// =============================================================================

/// Direction of a roof motion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionDirection {
    /// Rolling the roof toward the full-open limit.
    Opening,
    /// Rolling the roof toward the full-closed limit.
    Closing,
}

impl MotionDirection {
    /// Command word the controller expects for this direction.
    pub fn command(&self) -> &'static str {
        match self {
            MotionDirection::Opening => commands::OPEN,
            MotionDirection::Closing => commands::CLOSE,
        }
    }

    /// Roof position that confirms this run is complete.
    pub fn target(&self) -> RoofPosition {
        match self {
            MotionDirection::Opening => RoofPosition::Open,
            MotionDirection::Closing => RoofPosition::Closed,
        }
    }

    /// Display text while a run in this direction is under way.
    pub fn moving_text(&self) -> &'static str {
        match self {
            MotionDirection::Opening => "MOVE: OPENING...",
            MotionDirection::Closing => "MOVE: CLOSING...",
        }
    }

    /// Lowercase name for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionDirection::Opening => "opening",
            MotionDirection::Closing => "closing",
        }
    }
}

/// Why a motion request was refused, or why the machine is latched in
/// [`MotionState::Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    /// The actuator link is down, or a send/query on it failed.
    LinkUnavailable,
    /// The telescope does not report both axes parked.
    NotParked,
    /// The mount lock forbids closing the roof.
    MountLocked,
    /// The roof is already at the requested limit.
    AlreadyInPosition,
    /// A run in the other direction is still in progress.
    MotionInProgress,
    /// The run outlived its safety budget and was aborted.
    TimerExpired,
    /// The run was aborted on request.
    Aborted,
}

impl AlertReason {
    /// Human-readable description for display and logs.
    pub fn describe(&self) -> &'static str {
        match self {
            AlertReason::LinkUnavailable => "actuator link unavailable",
            AlertReason::NotParked => "telescope is not parked",
            AlertReason::MountLocked => "mount lock forbids closing the roof",
            AlertReason::AlreadyInPosition => "roof is already in the requested position",
            AlertReason::MotionInProgress => "roof motion already in progress",
            AlertReason::TimerExpired => "exceeded maximum run duration",
            AlertReason::Aborted => "motion aborted",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// The motion machine.
///
/// `Idle` is the initial state and the only state after a confirmed stop.
/// `Moving` only ever ends through an explicit confirmation: a limit
/// switch, an abort, or the safety cutout. `Alert` latches the reason for
/// an unplanned stop until the next accepted request clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// No motion in progress.
    Idle,
    /// A run is under way; the timer carries its start and budget.
    Moving {
        /// Direction of the run.
        direction: MotionDirection,
        /// Run-time budget accounting.
        timer: SafetyTimer,
    },
    /// An abort sequence is being issued.
    Aborting,
    /// A run ended abnormally; the reason is kept for display.
    Alert {
        /// Why the machine stopped.
        reason: AlertReason,
    },
}

/// Outcome of a motion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// Motion accepted and under way; poll [`RollRoof::tick`] for
    /// progress.
    Busy,
    /// Request refused; the machine is unchanged.
    Alert(AlertReason),
}

/// Outcome of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is moving; nothing to do.
    Idle,
    /// The machine is latched in an alert; nothing is moving.
    Alert(AlertReason),
    /// Still between limits; the payload is the display text for the run.
    StillMoving(&'static str),
    /// The link dropped mid-run; the motor is assumed still running and
    /// the safety budget keeps counting.
    LinkUnavailable,
    /// The run reached its limit switch.
    Completed(RoofPosition),
    /// The run was stopped; the reason says whether it was the cutout.
    Aborted(AlertReason),
}

// =============================================================================
// RollRoof controller
// =============================================================================

/// Motion controller for an observatory roll-off roof.
///
/// Owns the actuator link and the motion state machine. Construct with
/// [`connect`](Self::connect) for a serial controller, or
/// [`with_link`](Self::with_link) to supply any [`ActuatorLink`] (a
/// simulator, a test double, an embedder-managed transport).
pub struct RollRoof {
    link: Box<dyn ActuatorLink>,
    clock: Box<dyn Clock>,
    config: RollRoofConfig,
    state: MotionState,
    position: RoofPosition,
    park: Option<TelescopeParkDetail>,
    roof_parked: bool,
    mount_locked: bool,
}

impl RollRoof {
    /// Open the configured serial port and verify a roof controller is
    /// answering on it.
    ///
    /// The identity probe queries one status and requires a decodable
    /// reply; it also seeds the position and park display state.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid, the port cannot be opened, or the
    /// peer does not answer the probe with a well-formed status.
    #[instrument(skip(config), fields(port = %config.port), err)]
    pub async fn connect(config: RollRoofConfig) -> Result<Self> {
        config.validate()?;
        let link = SerialRoofLink::open(&config.port, config.baud_rate, config.link_timeout)
            .await
            .context("failed to open roof controller link")?;

        let mut roof = Self::assemble(Box::new(link), Box::new(SystemClock), config);
        roof.probe().await?;
        info!(
            position = roof.position.as_str(),
            "roof controller connected"
        );
        Ok(roof)
    }

    /// Build a controller over an existing link and clock.
    ///
    /// No identity probe is performed; the display state starts unknown
    /// until the first successful query.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid.
    pub fn with_link(
        link: Box<dyn ActuatorLink>,
        clock: Box<dyn Clock>,
        config: RollRoofConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(link, clock, config))
    }

    fn assemble(link: Box<dyn ActuatorLink>, clock: Box<dyn Clock>, config: RollRoofConfig) -> Self {
        Self {
            link,
            clock,
            config,
            state: MotionState::Idle,
            position: RoofPosition::Unknown,
            park: None,
            roof_parked: false,
            mount_locked: false,
        }
    }

    async fn probe(&mut self) -> Result<()> {
        let raw = self
            .link
            .query_status()
            .await
            .context("roof controller did not answer the status probe")?;
        let status = ControllerStatus::decode(&raw)
            .map_err(|e| anyhow!("status probe got unrecognizable reply {raw:?}: {e}"))?;
        self.record_status(status);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Ask for a roof motion run.
    ///
    /// Preconditions are checked in a fixed order: link up, telescope
    /// parked, not already at the requested limit, mount lock (closing
    /// only). The first violation refuses the request with its reason and
    /// leaves the machine unchanged. On acceptance the motion command is
    /// sent, the safety timer starts, and the machine enters `Moving`.
    ///
    /// At most one command is written per call. A request repeating the
    /// direction of a run already under way reports `Busy` without
    /// resending; a reversal is refused until the run is stopped.
    #[instrument(skip(self))]
    pub async fn request_motion(&mut self, direction: MotionDirection) -> MotionOutcome {
        match self.state {
            MotionState::Moving {
                direction: current, ..
            } => {
                return if current == direction {
                    debug!("run already in progress");
                    MotionOutcome::Busy
                } else {
                    warn!(
                        current = current.as_str(),
                        "refusing reversal while the roof is moving"
                    );
                    MotionOutcome::Alert(AlertReason::MotionInProgress)
                };
            }
            MotionState::Aborting => {
                return MotionOutcome::Alert(AlertReason::MotionInProgress);
            }
            MotionState::Idle | MotionState::Alert { .. } => {}
        }

        if !self.link.is_connected() {
            warn!("request refused: link unavailable");
            return MotionOutcome::Alert(AlertReason::LinkUnavailable);
        }

        let status = match self.query_roof_status().await {
            Ok(status) => status,
            Err(err) => {
                warn!(%err, "request refused: status query failed");
                return MotionOutcome::Alert(AlertReason::LinkUnavailable);
            }
        };

        if !status.park.is_parked() {
            warn!(
                park = status.park.as_str(),
                "request refused: the telescope is not parked, the roof cannot be moved"
            );
            return MotionOutcome::Alert(AlertReason::NotParked);
        }

        if status.position == direction.target() {
            warn!(
                position = status.position.as_str(),
                "request refused: roof is already in position"
            );
            return MotionOutcome::Alert(AlertReason::AlreadyInPosition);
        }

        if direction == MotionDirection::Closing && self.mount_locked {
            warn!("request refused: cannot close the roof while the mount is locked");
            return MotionOutcome::Alert(AlertReason::MountLocked);
        }

        info!(command = direction.command(), "starting roof motion");
        if let Err(err) = self.link.send(direction.command()).await {
            warn!(%err, command = direction.command(), "motion command send failed");
            return MotionOutcome::Alert(AlertReason::LinkUnavailable);
        }

        let timer = SafetyTimer::start(self.config.max_run_duration, self.clock.now());
        self.state = MotionState::Moving { direction, timer };
        MotionOutcome::Busy
    }

    /// Poll a run for progress.
    ///
    /// While `Moving`, one status query decides the outcome: the target
    /// limit ends the run (`Completed`), an overdue budget triggers the
    /// abort sequence (`Aborted`), anything else is `StillMoving`. A
    /// limit reached on the same tick the budget runs out still counts as
    /// completion. Outside `Moving` this is a no-op reporting the current
    /// state.
    ///
    /// A tick never sends a motion command, only the status query and, on
    /// cutout, one abort.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> TickOutcome {
        let (direction, timer) = match self.state {
            MotionState::Idle => return TickOutcome::Idle,
            MotionState::Alert { reason } => return TickOutcome::Alert(reason),
            MotionState::Aborting => return TickOutcome::Alert(AlertReason::Aborted),
            MotionState::Moving { direction, timer } => (direction, timer),
        };

        let polled = if self.link.is_connected() {
            match self.query_roof_status().await {
                Ok(status) => Some(status),
                Err(err) => {
                    warn!(%err, "status query failed during motion");
                    None
                }
            }
        } else {
            warn!("link unavailable during motion");
            None
        };

        let now = self.clock.now();

        if let Some(status) = polled {
            if status.position == direction.target() {
                self.state = MotionState::Idle;
                self.roof_parked = direction == MotionDirection::Closing;
                info!(position = status.position.as_str(), "roof motion complete");
                return TickOutcome::Completed(status.position);
            }
        }

        if timer.expired(now) {
            warn!(
                elapsed_secs = timer.elapsed(now).as_secs_f64(),
                "exceeded maximum run duration, aborting"
            );
            self.abort_with(AlertReason::TimerExpired).await;
            return TickOutcome::Aborted(AlertReason::TimerExpired);
        }

        match polled {
            Some(_) => {
                debug!(
                    direction = direction.as_str(),
                    remaining_secs = timer.remaining_secs(now),
                    "roof still moving"
                );
                TickOutcome::StillMoving(direction.moving_text())
            }
            None => TickOutcome::LinkUnavailable,
        }
    }

    /// Stop the roof immediately.
    ///
    /// Safe in any state and idempotent: the machine always ends latched
    /// in `Alert(Aborted)`. The abort command is sent even if the link
    /// looks down; an unconfirmed send is logged at error level because
    /// the motor may still be running, but the abort still reports
    /// success upstream.
    #[instrument(skip(self))]
    pub async fn abort(&mut self) {
        self.abort_with(AlertReason::Aborted).await;
    }

    async fn abort_with(&mut self, reason: AlertReason) {
        self.state = MotionState::Aborting;
        info!(%reason, "stopping roof motion");

        if let Err(err) = self.link.send(commands::ABORT).await {
            error!(%err, "ABORT send unconfirmed, the motor may still be running");
        }

        if self.link.is_connected() {
            if let Err(err) = self.query_roof_status().await {
                debug!(%err, "status refresh after abort failed");
            }
        }

        self.state = MotionState::Alert { reason };
    }

    /// Close the roof; completion records it parked.
    pub async fn park(&mut self) -> MotionOutcome {
        self.request_motion(MotionDirection::Closing).await
    }

    /// Open the roof; completion records it unparked.
    pub async fn unpark(&mut self) -> MotionOutcome {
        self.request_motion(MotionDirection::Opening).await
    }

    /// Drive [`tick`](Self::tick) at the configured poll interval until
    /// the run settles, returning the terminal outcome.
    ///
    /// Link dropouts keep polling: the safety budget still bounds the
    /// run, so this always terminates within one poll interval of the
    /// budget.
    #[instrument(skip(self))]
    pub async fn wait_settled(&mut self) -> TickOutcome {
        loop {
            match self.tick().await {
                TickOutcome::StillMoving(_) | TickOutcome::LinkUnavailable => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                outcome => return outcome,
            }
        }
    }

    /// Query the controller once and update the display state.
    ///
    /// An undecodable reply is logged and reported as the unverified
    /// status without touching the last-seen display fields.
    ///
    /// # Errors
    ///
    /// Fails if the link exchange fails.
    #[instrument(skip(self))]
    pub async fn refresh_status(&mut self) -> Result<ControllerStatus, LinkError> {
        self.query_roof_status().await
    }

    async fn query_roof_status(&mut self) -> Result<ControllerStatus, LinkError> {
        let raw = self.link.query_status().await?;
        match ControllerStatus::decode(&raw) {
            Ok(status) => {
                self.record_status(status);
                Ok(status)
            }
            Err(err) => {
                warn!(%err, raw = %raw, "unreadable status reply");
                Ok(ControllerStatus::unverified())
            }
        }
    }

    fn record_status(&mut self, status: ControllerStatus) {
        self.position = status.position;
        self.park = Some(status.park);
    }

    // -------------------------------------------------------------------------
    // State accessors
    // -------------------------------------------------------------------------

    /// Texts for the roof-state and park-state display fields.
    ///
    /// The roof text follows the machine: the moving banner while a run
    /// is under way, `"ABORTED"` while latched in an alert, otherwise the
    /// last confirmed position. The park text is the last decoded park
    /// detail, `"UNKNOWN"` before the first successful query.
    pub fn current_status_text(&self) -> (&'static str, &'static str) {
        let roof = match self.state {
            MotionState::Moving { direction, .. } => direction.moving_text(),
            MotionState::Aborting | MotionState::Alert { .. } => "ABORTED",
            MotionState::Idle => self.position.as_str(),
        };
        let park = match self.park {
            Some(park) => park.as_str(),
            None => "UNKNOWN",
        };
        (roof, park)
    }

    /// Current machine state.
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Whether a run is under way.
    pub fn is_moving(&self) -> bool {
        matches!(self.state, MotionState::Moving { .. })
    }

    /// Last confirmed roof position.
    pub fn position(&self) -> RoofPosition {
        self.position
    }

    /// Last decoded telescope park detail, if any query has succeeded.
    pub fn park_detail(&self) -> Option<TelescopeParkDetail> {
        self.park
    }

    /// Whether the roof itself is recorded parked (fully closed).
    pub fn is_parked(&self) -> bool {
        self.roof_parked
    }

    /// Whether the mount lock currently forbids closing.
    pub fn mount_locked(&self) -> bool {
        self.mount_locked
    }

    /// Set the mount-lock flag supplied by the embedding framework's
    /// parking policy.
    pub fn set_mount_locked(&mut self, locked: bool) {
        if self.mount_locked != locked {
            debug!(locked, "mount lock changed");
        }
        self.mount_locked = locked;
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &RollRoofConfig {
        &self.config
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Roll-off roof driver for rust-obs.
//!
//! This crate drives an observatory roll-off roof over a serial line to
//! its motor controller, including:
//! - The motion state machine with telescope-park and mount-lock
//!   interlocks and a hard run-time safety cutout
//! - The two-character status protocol (roof position + per-axis
//!   telescope park state)
//! - A simulated controller for development without hardware
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! obs-driver-rollroof = { path = "../obs-driver-rollroof" }
//! ```
//!
//! Connect and run a motion to completion:
//!
//! ```rust,ignore
//! use obs_driver_rollroof::{RollRoof, RollRoofConfig, TickOutcome};
//!
//! let mut roof = RollRoof::connect(RollRoofConfig::new("/dev/ttyUSB0")).await?;
//! roof.unpark().await;
//! if let TickOutcome::Completed(position) = roof.wait_settled().await {
//!     println!("roof {}", position.as_str());
//! }
//! ```

pub mod link;
pub mod rollroof;
pub mod sim;
pub mod status;
pub mod timer;

pub use link::{commands, ActuatorLink, LinkError, SerialRoofLink};
pub use rollroof::{
    AlertReason, MotionDirection, MotionOutcome, MotionState, RollRoof, RollRoofConfig,
    TickOutcome,
};
pub use sim::SimulatedRoof;
pub use status::{ControllerStatus, DecodeError, RoofPosition, TelescopeParkDetail};
pub use timer::SafetyTimer;

//! Status decoding for the roll-off roof controller.
//!
//! The controller answers a `QUERY` with a two-character status reply.
//! The first character reports the roof limit switches, the second the
//! telescope park sensors:
//!
//! | Char 1 | Roof                 | Char 2 | Telescope park          |
//! |--------|----------------------|--------|-------------------------|
//! | `1`    | full-open limit      | `0`    | both axes parked        |
//! | `2`    | full-closed limit    | `1`    | neither axis parked     |
//! | `3`    | between limits       | `2`    | RA parked, DEC not      |
//! |        |                      | `3`    | DEC parked, RA not      |
//!
//! Anything else is a decode error. Characters past the second are
//! ignored; some firmware revisions pad the reply.

use thiserror::Error;

/// Roof position as confirmed by the controller's limit switches.
///
/// Only a decoded status reply may produce `Open` or `Closed`; intent
/// alone never does. A roof between limits reports `Unknown`, which is
/// also the safe interpretation of anything unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoofPosition {
    /// Neither limit switch is engaged.
    Unknown,
    /// The full-open limit switch is engaged.
    Open,
    /// The full-closed limit switch is engaged.
    Closed,
}

impl RoofPosition {
    /// Display text for the roof state field.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoofPosition::Unknown => "UNKNOWN",
            RoofPosition::Open => "OPEN",
            RoofPosition::Closed => "CLOSE",
        }
    }
}

/// Telescope park state as reported by the controller.
///
/// Both mount axes must be stowed before the roof may move; the
/// controller reports them independently so the operator can see which
/// axis is in the way. In `NotParked`, `true` means that axis reports
/// stowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelescopeParkDetail {
    /// Both axes stowed; roof motion is permitted.
    Parked,
    /// At least one axis unstowed.
    NotParked {
        /// Declination axis reports stowed.
        dec: bool,
        /// Right-ascension axis reports stowed.
        ra: bool,
    },
}

impl TelescopeParkDetail {
    /// Whether the roof-motion precondition is satisfied.
    pub fn is_parked(&self) -> bool {
        matches!(self, TelescopeParkDetail::Parked)
    }

    /// Display text for the park state field, naming the unstowed axes.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelescopeParkDetail::Parked => "PARKED",
            TelescopeParkDetail::NotParked { dec: false, ra: false } => "NO PARKED (DEC, RA)",
            TelescopeParkDetail::NotParked { dec: false, ra: true } => "NO PARKED (DEC)",
            TelescopeParkDetail::NotParked { dec: true, ra: false } => "NO PARKED (RA)",
            // Not producible by decode; both axes stowed but the
            // controller did not latch the park state.
            TelescopeParkDetail::NotParked { dec: true, ra: true } => "NO PARKED",
        }
    }
}

/// Why a status reply could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The reply had fewer than the two required characters.
    #[error("status reply truncated: got {len} characters, need 2")]
    Truncated {
        /// Number of characters actually received.
        len: usize,
    },
    /// The roof character was not `1`, `2`, or `3`.
    #[error("unrecognized roof position character {found:?} in status reply")]
    InvalidPosition {
        /// The offending character.
        found: char,
    },
    /// The park character was not `0`..`3`.
    #[error("unrecognized park detail character {found:?} in status reply")]
    InvalidParkDetail {
        /// The offending character.
        found: char,
    },
}

/// One decoded status reply.
///
/// Produced fresh per query and consumed within the same evaluation;
/// callers keep their own last-seen bookkeeping if they need history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Roof limit-switch state.
    pub position: RoofPosition,
    /// Telescope park state.
    pub park: TelescopeParkDetail,
}

impl ControllerStatus {
    /// Decode a raw status reply.
    ///
    /// Pure and total: every input yields either a status or a
    /// [`DecodeError`], never a panic or an out-of-bounds access.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let mut chars = raw.chars();
        let (Some(position_char), Some(park_char)) = (chars.next(), chars.next()) else {
            return Err(DecodeError::Truncated {
                len: raw.chars().count(),
            });
        };

        let position = match position_char {
            '1' => RoofPosition::Open,
            '2' => RoofPosition::Closed,
            '3' => RoofPosition::Unknown,
            found => return Err(DecodeError::InvalidPosition { found }),
        };

        let park = match park_char {
            '0' => TelescopeParkDetail::Parked,
            '1' => TelescopeParkDetail::NotParked { dec: false, ra: false },
            '2' => TelescopeParkDetail::NotParked { dec: false, ra: true },
            '3' => TelescopeParkDetail::NotParked { dec: true, ra: false },
            found => return Err(DecodeError::InvalidParkDetail { found }),
        };

        Ok(Self { position, park })
    }

    /// The stand-in for a reply that could not be decoded: position
    /// unknown, park unconfirmed. An unverifiable park state can never
    /// satisfy the motion precondition.
    pub fn unverified() -> Self {
        Self {
            position: RoofPosition::Unknown,
            park: TelescopeParkDetail::NotParked { dec: false, ra: false },
        }
    }
}

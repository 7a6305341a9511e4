//! Tracking state machine.

use std::fmt;

/// State of the tracking front end.
///
/// `NoImagesYet -> NotInitialized -> Ok <-> Lost`; a reset returns to
/// `NoImagesYet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// Nothing received since start or the last reset.
    #[default]
    NoImagesYet,
    /// Waiting for a two-view initialization to succeed.
    NotInitialized,
    /// Tracking successfully.
    Ok,
    /// Tracking failed; relocalization is attempted on every capture.
    Lost,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackingState::NoImagesYet => "NO_IMAGES_YET",
            TrackingState::NotInitialized => "NOT_INITIALIZED",
            TrackingState::Ok => "OK",
            TrackingState::Lost => "LOST",
        };
        f.write_str(name)
    }
}

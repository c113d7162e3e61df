// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Failure taxonomy for resolution operations.
//!
//! Three layers are distinguished:
//!
//! - [`FetchError`]: what the host reports when a fetch effect fails.
//!   Cancellation is part of this type but is never treated as an error by the
//!   state machine — a cancelled completion is silently discarded.
//! - [`GeoError`]: the four-way classification of a failed device position
//!   request, reported by the host.
//! - [`Notice`]: the non-blocking, user-facing notifications the state machine
//!   emits in response. Hosts typically render these as toasts.

use alloc::string::String;

use thiserror::Error;

/// Failure reported by the host when a fetch effect completes unsuccessfully.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The transport was aborted, typically in response to
    /// [`Effect::CancelFetch`](crate::Effect::CancelFetch).
    ///
    /// Reporting this is always a silent no-op: no notice is emitted and no
    /// state changes.
    #[error("request cancelled")]
    Cancelled,
    /// Transport or server failure, with a host-provided description.
    #[error("request failed: {0}")]
    Failed(String),
}

impl FetchError {
    /// Shorthand for [`FetchError::Failed`] from any string-ish message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns `true` for [`FetchError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Classification of a failed device position request.
///
/// Mirrors the classes a browser-style geolocation API reports. The host maps
/// its platform error onto one of these; [`Notice`] carries the matching
/// user-facing message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GeoError {
    /// The user or platform denied access to the device position.
    #[error("location permission denied")]
    PermissionDenied,
    /// No position could be determined (no signal, no network).
    #[error("position unavailable")]
    PositionUnavailable,
    /// The position request exceeded its configured timeout.
    #[error("position request timed out")]
    Timeout,
    /// Any other failure.
    #[error("position lookup failed")]
    Other,
}

/// Non-blocking user-facing notification.
///
/// Emitted via [`Effect::Notify`](crate::Effect::Notify) when an operation
/// fails recoverably. The selector state always remains at its last consistent
/// point when one of these is emitted; the user may simply retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Notice {
    /// Loading hierarchy data (children, full path, or related levels) failed.
    #[error("failed to load address data")]
    LoadFailed,
    /// The free-text search call failed.
    #[error("address search failed")]
    SearchFailed,
    /// Rebuilding sibling levels for a picked search result failed.
    #[error("failed to apply the selected address")]
    PickupFailed,
    /// Location access was denied.
    #[error("location access was denied; allow it in your settings or pick an address manually")]
    LocateDenied,
    /// The device position is unavailable.
    #[error("could not determine your position; check network or GPS signal")]
    LocateUnavailable,
    /// The device position request timed out.
    #[error("locating timed out; check your connection or pick an address manually")]
    LocateTimeout,
    /// Locating failed for any other reason, including reverse geocoding.
    #[error("locating failed; pick an address manually")]
    LocateFailed,
}

impl From<GeoError> for Notice {
    fn from(error: GeoError) -> Self {
        match error {
            GeoError::PermissionDenied => Self::LocateDenied,
            GeoError::PositionUnavailable => Self::LocateUnavailable,
            GeoError::Timeout => Self::LocateTimeout,
            GeoError::Other => Self::LocateFailed,
        }
    }
}

// Copyright 2025 the Terrace Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request coordination primitives: generation tokens, per-operation slots,
//! debounced input, and click-cooldown gating.
//!
//! Cancellation is modeled as a generation counter rather than a mutable
//! "current controller" field: every asynchronous operation is identified by a
//! [`RequestToken`], and a completion is applied only if its token is still
//! the current one for its [`OpSlot`]. A slow superseded response therefore
//! can never overwrite state written by a faster later response; correctness
//! depends on the token check, not on arrival order.
//!
//! Time never comes from a clock here. All deadlines and cooldowns work on
//! caller-supplied millisecond timestamps, so hosts control time and tests are
//! deterministic.

use alloc::string::String;
use core::num::NonZeroU64;

/// Identity of one in-flight asynchronous operation.
///
/// Carried by every fetch effect and passed back with the completion; opaque
/// to hosts beyond equality. Tokens are never reused within one selector's
/// lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestToken(NonZeroU64);

/// Mints monotonically increasing [`RequestToken`]s.
#[derive(Debug)]
pub(crate) struct TokenSource {
    next: u64,
}

impl TokenSource {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn mint(&mut self) -> RequestToken {
        let token = RequestToken(NonZeroU64::new(self.next).expect("token counter starts at 1"));
        self.next += 1;
        token
    }
}

/// Tracks the current token for one kind of operation.
///
/// At most one request per slot is considered live. Beginning a new request
/// supersedes the previous one; the superseded token is handed back so the
/// caller can ask the host to abort its transport.
#[derive(Debug, Default)]
pub(crate) struct OpSlot {
    current: Option<RequestToken>,
}

impl OpSlot {
    /// Start a new request: returns the fresh token and the superseded one,
    /// if a request was still in flight.
    pub(crate) fn begin(&mut self, source: &mut TokenSource) -> (RequestToken, Option<RequestToken>) {
        let superseded = self.current;
        let token = source.mint();
        self.current = Some(token);
        (token, superseded)
    }

    /// Whether a completion carrying `token` should be applied.
    pub(crate) fn accepts(&self, token: RequestToken) -> bool {
        self.current == Some(token)
    }

    /// Mark the current request as completed. No-op if `token` is stale.
    pub(crate) fn finish(&mut self, token: RequestToken) {
        if self.accepts(token) {
            self.current = None;
        }
    }

    /// Invalidate the in-flight request, returning its token for a transport
    /// abort.
    pub(crate) fn cancel(&mut self) -> Option<RequestToken> {
        self.current.take()
    }

    /// Whether a request is outstanding.
    pub(crate) fn in_flight(&self) -> bool {
        self.current.is_some()
    }
}

/// Debounced text input.
///
/// Every submission restarts the delay; only the value present once the delay
/// elapses is released by [`poll`](Debounce::poll).
#[derive(Debug)]
pub(crate) struct Debounce {
    delay_ms: u64,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    value: String,
    deadline: u64,
}

impl Debounce {
    pub(crate) fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            pending: None,
        }
    }

    /// Record `value` at time `now`, restarting the delay. Returns the new
    /// deadline for the host's timer.
    pub(crate) fn submit(&mut self, value: impl Into<String>, now: u64) -> u64 {
        let deadline = now + self.delay_ms;
        self.pending = Some(Pending {
            value: value.into(),
            deadline,
        });
        deadline
    }

    /// Release the pending value if its deadline has elapsed at `now`.
    pub(crate) fn poll(&mut self, now: u64) -> Option<String> {
        if self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            self.pending.take().map(|p| p.value)
        } else {
            None
        }
    }

    /// Drop any pending value.
    pub(crate) fn cancel(&mut self) {
        self.pending = None;
    }
}

/// Fixed-window double-click suppression.
///
/// Admission updates the window; rejected clicks do not extend it, so a rapid
/// series of clicks lets one through per cooldown period.
#[derive(Debug)]
pub(crate) struct ClickGate {
    cooldown_ms: u64,
    last: Option<u64>,
}

impl ClickGate {
    pub(crate) fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            last: None,
        }
    }

    /// Whether a click at `now` is admitted.
    pub(crate) fn admit(&mut self, now: u64) -> bool {
        if self
            .last
            .is_some_and(|last| now.saturating_sub(last) < self.cooldown_ms)
        {
            return false;
        }
        self.last = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_ordered() {
        let mut source = TokenSource::new();
        let a = source.mint();
        let b = source.mint();
        assert_ne!(a, b);
    }

    #[test]
    fn slot_accepts_only_current_token() {
        let mut source = TokenSource::new();
        let mut slot = OpSlot::default();

        let (a, superseded) = slot.begin(&mut source);
        assert!(superseded.is_none());
        assert!(slot.accepts(a));

        // Beginning a second request supersedes the first.
        let (b, superseded) = slot.begin(&mut source);
        assert_eq!(superseded, Some(a));
        assert!(!slot.accepts(a));
        assert!(slot.accepts(b));

        // The stale token cannot finish the slot.
        slot.finish(a);
        assert!(slot.in_flight());
        slot.finish(b);
        assert!(!slot.in_flight());
    }

    #[test]
    fn cancel_returns_in_flight_token() {
        let mut source = TokenSource::new();
        let mut slot = OpSlot::default();

        assert!(slot.cancel().is_none());
        let (token, _) = slot.begin(&mut source);
        assert_eq!(slot.cancel(), Some(token));
        assert!(!slot.accepts(token));
    }

    #[test]
    fn debounce_releases_only_after_delay() {
        let mut debounce = Debounce::new(500);
        assert_eq!(debounce.submit("hai", 1_000), 1_500);

        assert!(debounce.poll(1_499).is_none());
        assert_eq!(debounce.poll(1_500).as_deref(), Some("hai"));
        // Released exactly once.
        assert!(debounce.poll(2_000).is_none());
    }

    #[test]
    fn debounce_restarts_on_every_submission() {
        let mut debounce = Debounce::new(500);
        debounce.submit("h", 1_000);
        debounce.submit("ha", 1_300);
        debounce.submit("hai", 1_600);

        // The first two deadlines have passed, but they were superseded.
        assert!(debounce.poll(1_599).is_none());
        assert_eq!(debounce.poll(2_100).as_deref(), Some("hai"));
    }

    #[test]
    fn debounce_cancel_drops_pending_value() {
        let mut debounce = Debounce::new(500);
        debounce.submit("hai", 1_000);
        debounce.cancel();
        assert!(debounce.poll(10_000).is_none());
    }

    #[test]
    fn click_gate_suppresses_rapid_clicks() {
        let mut gate = ClickGate::new(300);
        assert!(gate.admit(1_000));
        assert!(!gate.admit(1_100));
        assert!(!gate.admit(1_299));
        assert!(gate.admit(1_300));
    }

    #[test]
    fn rejected_clicks_do_not_extend_the_window() {
        let mut gate = ClickGate::new(300);
        assert!(gate.admit(1_000));
        // A storm of rejected clicks must not push the window forward.
        assert!(!gate.admit(1_290));
        assert!(gate.admit(1_301));
    }
}

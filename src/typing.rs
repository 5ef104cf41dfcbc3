//! Typing presence tracker.
//!
//! Outgoing signals are debounced to one broadcast per interval with an
//! explicit stop after idle; inbound entries decay by timeout so a lost
//! stop signal can never leave a ghost typist on screen. Expiry is checked
//! lazily on read, no background timer required.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::types::message::UserId;
use crate::types::presence::{TypingSignal, Typist};

pub struct TypingTracker {
    broadcast_interval: Duration,
    idle_stop: Duration,
    expiry: chrono::Duration,
    /// Inbound entries keyed by user id, refreshed on every signal.
    remote: HashMap<UserId, Typist>,
    last_broadcast: Option<Instant>,
    last_input: Option<Instant>,
    /// Whether we have announced `Started` without a matching `Stopped`.
    broadcasting: bool,
}

impl TypingTracker {
    pub fn new(broadcast_interval: Duration, idle_stop: Duration, expiry: Duration) -> Self {
        Self {
            broadcast_interval,
            idle_stop,
            expiry: chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::zero()),
            remote: HashMap::new(),
            last_broadcast: None,
            last_input: None,
            broadcasting: false,
        }
    }

    /// Called on every local input change. Returns `Started` when a
    /// broadcast is due; at most one per interval regardless of keystroke
    /// rate.
    pub fn on_local_typing(&mut self) -> Option<TypingSignal> {
        self.on_local_typing_at(Instant::now())
    }

    pub fn on_local_typing_at(&mut self, now: Instant) -> Option<TypingSignal> {
        self.last_input = Some(now);
        let due = match self.last_broadcast {
            None => true,
            Some(at) => now.duration_since(at) >= self.broadcast_interval,
        };
        if due {
            self.last_broadcast = Some(now);
            self.broadcasting = true;
            Some(TypingSignal::Started)
        } else {
            None
        }
    }

    /// Returns `Stopped` once the idle window since the last input elapsed.
    /// The conversation handle polls this from its timer task; the pending
    /// stop deadline is implicitly replaced by every new input.
    pub fn poll_idle(&mut self) -> Option<TypingSignal> {
        self.poll_idle_at(Instant::now())
    }

    pub fn poll_idle_at(&mut self, now: Instant) -> Option<TypingSignal> {
        if !self.broadcasting {
            return None;
        }
        let idle = self
            .last_input
            .is_none_or(|at| now.duration_since(at) >= self.idle_stop);
        if idle {
            self.broadcasting = false;
            self.last_broadcast = None;
            Some(TypingSignal::Stopped)
        } else {
            None
        }
    }

    /// Deadline at which [`poll_idle`] would fire, for timer scheduling.
    pub fn idle_deadline(&self) -> Option<Instant> {
        if !self.broadcasting {
            return None;
        }
        self.last_input.map(|at| at + self.idle_stop)
    }

    /// Explicit stop, e.g. when the composer is cleared by a send.
    pub fn stop_local_typing(&mut self) -> Option<TypingSignal> {
        if !self.broadcasting {
            return None;
        }
        self.broadcasting = false;
        self.last_broadcast = None;
        Some(TypingSignal::Stopped)
    }

    /// Inbound typing signal; creates or refreshes the user's entry.
    pub fn on_remote_signal(&mut self, user_id: UserId, name: String) {
        self.on_remote_signal_at(user_id, name, Utc::now());
    }

    pub fn on_remote_signal_at(&mut self, user_id: UserId, name: String, at: DateTime<Utc>) {
        self.remote.insert(
            user_id.clone(),
            Typist {
                user_id,
                name,
                last_signal_at: at,
            },
        );
    }

    /// Inbound explicit "stopped typing" signal.
    pub fn on_remote_stop(&mut self, user_id: &str) {
        self.remote.remove(user_id);
    }

    /// Users currently typing, expired entries purged. Ordered by when each
    /// user started signalling, so the caption stays stable.
    pub fn active_typers(&mut self) -> Vec<Typist> {
        self.active_typers_at(Utc::now())
    }

    pub fn active_typers_at(&mut self, now: DateTime<Utc>) -> Vec<Typist> {
        let expiry = self.expiry;
        self.remote
            .retain(|_, t| now.signed_duration_since(t.last_signal_at) < expiry);
        let mut typers: Vec<Typist> = self.remote.values().cloned().collect();
        typers.sort_by(|a, b| {
            a.last_signal_at
                .cmp(&b.last_signal_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        typers
    }
}

/// Indicator text: nothing, "A is typing", "A and B are typing", or
/// "A and N others are typing".
pub fn typing_caption(typers: &[Typist]) -> Option<String> {
    match typers {
        [] => None,
        [one] => Some(format!("{} is typing", one.name)),
        [a, b] => Some(format!("{} and {} are typing", a.name, b.name)),
        [first, rest @ ..] => Some(format!(
            "{} and {} others are typing",
            first.name,
            rest.len()
        )),
    }
}

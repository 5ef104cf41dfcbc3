use std::time::Duration;

/// Tunables for the messaging core. Tests shrink the timing windows; the
/// defaults match the production behavior.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Messages fetched per history page.
    pub page_size: usize,
    /// Outgoing typing broadcasts are rate-limited to one per interval.
    pub typing_broadcast_interval: Duration,
    /// Idle time after the last keystroke before an explicit stop signal.
    pub typing_idle_stop: Duration,
    /// Inbound typing entries expire after this, covering lost stop signals.
    pub typing_expiry: Duration,
    /// Confirmed own messages may be edited within this window.
    pub edit_window: Duration,
    /// Distance from the top (px) that triggers an older-page load.
    pub near_top_threshold: f32,
    /// Distance from the bottom (px) under which incoming messages
    /// auto-scroll into view.
    pub near_bottom_threshold: f32,
    /// Retention cap for loaded history; the oldest page worth of messages
    /// is dropped once the cap is exceeded.
    pub max_retained_messages: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            typing_broadcast_interval: Duration::from_secs(3),
            typing_idle_stop: Duration::from_secs(2),
            typing_expiry: Duration::from_secs(6),
            edit_window: Duration::from_secs(15 * 60),
            near_top_threshold: 200.0,
            near_bottom_threshold: 120.0,
            max_retained_messages: 500,
        }
    }
}

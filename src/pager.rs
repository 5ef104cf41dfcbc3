//! Scroll-anchored pagination controller.
//!
//! Pure decision logic driven by viewport metrics the UI reports. It decides
//! when to request older history, keeps the user's scroll anchor stationary
//! across a prepend, and tracks whether new messages may auto-scroll into
//! view.

use log::debug;

/// Viewport metrics as reported by the scroll collaborator.
#[derive(Debug, Clone, Copy)]
pub struct ScrollMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f32 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

pub struct ScrollPager {
    near_top_threshold: f32,
    near_bottom_threshold: f32,
    loading: bool,
    has_more: bool,
    near_bottom: bool,
    loaded_once: bool,
    pending_new_messages: bool,
}

impl ScrollPager {
    pub fn new(near_top_threshold: f32, near_bottom_threshold: f32) -> Self {
        Self {
            near_top_threshold,
            near_bottom_threshold,
            loading: false,
            has_more: true,
            near_bottom: true,
            loaded_once: false,
            pending_new_messages: false,
        }
    }

    /// Feed a scroll update. Returns true exactly when an older-page load
    /// should be requested: near the top, nothing in flight, more history
    /// available. Further triggers are suppressed until the load resolves.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> bool {
        self.near_bottom = metrics.distance_from_bottom() <= self.near_bottom_threshold;
        if self.near_bottom {
            self.pending_new_messages = false;
        }
        if metrics.scroll_top <= self.near_top_threshold && self.begin_load() {
            debug!(target: "Pager", "near top at {:.0}px, requesting older page", metrics.scroll_top);
            return true;
        }
        false
    }

    /// Claim the in-flight slot (also used for the initial page load).
    /// Returns false when a load is already running or history is exhausted.
    pub fn begin_load(&mut self) -> bool {
        if self.loading || !self.has_more {
            return false;
        }
        self.loading = true;
        true
    }

    /// An older page resolved and was merged into the list.
    pub fn page_loaded(&mut self, has_more: bool) {
        self.loading = false;
        self.loaded_once = true;
        self.has_more = has_more;
    }

    /// A page load failed; existing state is untouched and a later scroll
    /// may trigger again.
    pub fn page_load_failed(&mut self) {
        self.loading = false;
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn near_bottom(&self) -> bool {
        self.near_bottom
    }

    /// A new message arrived. Returns true when the view should follow it
    /// (viewer is at the bottom); otherwise the "new messages" affordance
    /// flag is raised instead.
    pub fn on_incoming_message(&mut self) -> bool {
        if self.near_bottom {
            true
        } else {
            self.pending_new_messages = true;
            false
        }
    }

    /// Whether the "new messages" affordance should be shown.
    pub fn has_pending_new_messages(&self) -> bool {
        self.pending_new_messages
    }

    /// The affordance was used (or the user scrolled down); clear it.
    pub fn acknowledge_new_messages(&mut self) {
        self.pending_new_messages = false;
        self.near_bottom = true;
    }

    /// Marking-as-read is allowed once messages are loaded and no older-page
    /// fetch is in flight, so unseen history is never marked.
    pub fn can_mark_read(&self) -> bool {
        self.loaded_once && !self.loading
    }
}

/// Scroll offset that keeps previously visible content stationary after a
/// prepend: the height added above the anchor is added to the offset. Called
/// by the view once it has measured the rendered height delta.
pub fn anchored_offset(previous_scroll_top: f32, added_height: f32) -> f32 {
    previous_scroll_top + added_height
}

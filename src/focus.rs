//! Focus Module
//!
//! Per-frame focus state and the connection-wide record of which frame has
//! the keyboard focus.
//!
//! Implicit focus approximates real focus from pointer crossings for when no
//! window manager hands out focus. It never overrides focus the server has
//! actually reported.

use serde::Serialize;
use tracing::debug;

use crate::frame::FrameId;

/// Focus state of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    #[default]
    None,
    /// Pointer is inside the frame and nothing has explicit focus
    Implicit,
    /// The server reported a FocusIn
    Explicit,
}

impl FocusState {
    pub fn on_focus_in(self) -> Self {
        FocusState::Explicit
    }

    pub fn on_focus_out(self) -> Self {
        FocusState::None
    }

    /// Pointer entered; only promotes a frame without focus.
    pub fn on_enter(self) -> Self {
        match self {
            FocusState::None => FocusState::Implicit,
            other => other,
        }
    }

    /// Pointer left; only drops focus that the pointer gave.
    pub fn on_leave(self) -> Self {
        match self {
            FocusState::Implicit => FocusState::None,
            other => other,
        }
    }

    pub fn is_focused(self) -> bool {
        self != FocusState::None
    }
}

/// Connection-wide focus bookkeeping
#[derive(Debug, Clone, Default)]
pub struct FocusTracker {
    /// Frame holding the keyboard focus
    pub focus_frame: Option<FrameId>,
    /// Last frame a focus or crossing event was seen for
    pub focus_event_frame: Option<FrameId>,
    /// Frame drawn as focused
    pub highlight_frame: Option<FrameId>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the state a frame moved to after a focus-related event.
    ///
    /// Returns true when the focused frame changed.
    pub fn frame_changed(&mut self, frame: FrameId, old: FocusState, new: FocusState) -> bool {
        self.focus_event_frame = Some(frame);
        if old == new {
            return false;
        }

        let previous = self.focus_frame;
        if new.is_focused() {
            self.focus_frame = Some(frame);
        } else if self.focus_frame == Some(frame) {
            self.focus_frame = None;
        }
        self.highlight_frame = self.focus_frame;

        if previous != self.focus_frame {
            debug!("Focus frame {:?} -> {:?}", previous, self.focus_frame);
            true
        } else {
            false
        }
    }

    /// Drop every reference to a frame that is going away.
    pub fn forget(&mut self, frame: FrameId) {
        if self.focus_frame == Some(frame) {
            self.focus_frame = None;
        }
        if self.focus_event_frame == Some(frame) {
            self.focus_event_frame = None;
        }
        if self.highlight_frame == Some(frame) {
            self.highlight_frame = None;
        }
    }
}

//! Scroll bar geometry
//!
//! Handle positions are kept relative to the inside of the bar, so the
//! handle keeps a minimum visible length however small the shown portion of
//! the content is.

use tracing::debug;

use crate::display::DisplayConnection;
use crate::error::DisplayResult;
use crate::server::{Window, WindowSpec, NONE, BUTTON_PRESS_MASK, BUTTON_RELEASE_MASK, EXPOSURE_MASK, POINTER_MOTION_MASK};

pub const LEFT_BORDER: u16 = 2;
pub const RIGHT_BORDER: u16 = 2;
pub const TOP_BORDER: u16 = 2;
pub const BOTTOM_BORDER: u16 = 2;
pub const MIN_HANDLE: u16 = 5;

const SCROLL_BAR_EVENT_MASK: u32 = EXPOSURE_MASK | BUTTON_PRESS_MASK | BUTTON_RELEASE_MASK | POINTER_MOTION_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollBar {
    pub window: Window,
    pub top: i16,
    pub left: i16,
    pub width: u16,
    pub height: u16,
    /// Handle start, relative to the inside of the bar
    pub start: i32,
    /// Handle end, relative to the inside of the bar
    pub end: i32,
    /// Pointer offset into the handle while dragging
    pub dragging: Option<i32>,
    pub orientation: Orientation,
}

/// Usable length inside the borders of a vertical bar `height` tall
pub fn inside_height(height: u16) -> i32 {
    height as i32 - TOP_BORDER as i32 - BOTTOM_BORDER as i32
}

pub fn inside_width(width: u16) -> i32 {
    width as i32 - LEFT_BORDER as i32 - RIGHT_BORDER as i32
}

/// Furthest the top of a vertical handle can go
pub fn top_range(height: u16) -> i32 {
    inside_height(height) - MIN_HANDLE as i32
}

/// Furthest the left of a horizontal handle can go
pub fn left_range(width: u16) -> i32 {
    inside_width(width) - MIN_HANDLE as i32
}

impl ScrollBar {
    pub fn new(orientation: Orientation, left: i16, top: i16, width: u16, height: u16) -> Self {
        Self {
            window: NONE,
            top,
            left,
            width,
            height,
            start: 0,
            end: 0,
            dragging: None,
            orientation,
        }
    }

    /// Create the bar's window under `parent` with the connection's scroll
    /// bar cursor.
    pub fn create(&mut self, conn: &mut DisplayConnection, parent: Window) -> DisplayResult<Window> {
        let cursors = *conn.cursors();
        let cursor = match self.orientation {
            Orientation::Vertical => cursors.vertical_scroll_bar,
            Orientation::Horizontal => cursors.horizontal_scroll_bar,
        };
        let spec = WindowSpec {
            parent,
            x: self.left,
            y: self.top,
            width: self.width.max(1),
            height: self.height.max(1),
            border_width: 0,
            depth: conn.visual().depth,
            visual: conn.visual().id,
            colormap: conn.colormap(),
            background_pixel: conn.color_model().white_pixel,
            border_pixel: conn.color_model().black_pixel,
            event_mask: SCROLL_BAR_EVENT_MASK,
        };
        let server = conn.server();
        let window = server.create_window(&spec)?;
        server.define_cursor(window, cursor)?;
        self.window = window;
        debug!("Scroll bar 0x{:x} created ({:?})", window, self.orientation);
        Ok(window)
    }

    pub fn destroy(&mut self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        if self.window != NONE {
            conn.server().destroy_window(self.window)?;
            self.window = NONE;
        }
        Ok(())
    }

    /// How far the handle's leading edge can travel
    pub fn range(&self) -> i32 {
        match self.orientation {
            Orientation::Vertical => top_range(self.height),
            Orientation::Horizontal => left_range(self.width),
        }
    }

    /// Move the handle, clamping it into the bar while keeping its length.
    /// During a drag the end may run past the range so the handle does not
    /// shrink under the pointer.
    pub fn set_handle(&mut self, start: i32, end: i32) {
        let range = self.range().max(0);
        let length = end - start;
        let start = start.clamp(0, range);
        let mut end = start + length;
        if end < start {
            end = start;
        } else if end > range && self.dragging.is_none() {
            end = range;
        }
        self.start = start;
        self.end = end;
    }

    pub fn begin_drag(&mut self, position: i32) {
        self.dragging = Some(position - self.start);
    }

    /// New handle start for a pointer at `position` during a drag
    pub fn drag_to(&mut self, position: i32) -> Option<i32> {
        let offset = self.dragging?;
        let length = self.end - self.start;
        let start = position - offset;
        self.set_handle(start, start + length);
        Some(self.start)
    }

    pub fn end_drag(&mut self) {
        self.dragging = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }
}

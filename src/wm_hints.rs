//! Hints Module
//!
//! Cache of a frame's `WM_HINTS` (XWMHints equivalent). Setting one field
//! only ever adds its flag, so writing the property never resets a hint set
//! earlier. Urgency is the one flag that can be cleared again.

use bitflags::bitflags;

use crate::error::ServerError;
use crate::server::{Pixmap, Window, XServer, NONE};

/// Predefined `WM_HINTS` atom, used as both property name and type
pub const WM_HINTS: u32 = 35;

pub const WITHDRAWN_STATE: u32 = 0;
pub const NORMAL_STATE: u32 = 1;
pub const ICONIC_STATE: u32 = 3;

bitflags! {
    /// Which `WM_HINTS` fields are meaningful
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct WmHintFlags: u32 {
        const INPUT         = 1 << 0;
        const STATE         = 1 << 1;
        const ICON_PIXMAP   = 1 << 2;
        const ICON_WINDOW   = 1 << 3;
        const ICON_POSITION = 1 << 4;
        const ICON_MASK     = 1 << 5;
        const WINDOW_GROUP  = 1 << 6;
        const URGENCY       = 1 << 8;
    }
}

/// WM hints (XWMHints equivalent)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WmHints {
    pub flags: WmHintFlags,
    pub input: bool,
    pub initial_state: u32,
    pub icon_pixmap: Pixmap,
    pub icon_window: Window,
    pub icon_x: i32,
    pub icon_y: i32,
    pub icon_mask: Pixmap,
    pub window_group: Window,
}

impl WmHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input(&mut self, input: bool) {
        self.input = input;
        self.flags |= WmHintFlags::INPUT;
    }

    pub fn set_initial_state(&mut self, state: u32) {
        self.initial_state = state;
        self.flags |= WmHintFlags::STATE;
    }

    /// Icon pixmap and optional mask. `NONE` leaves the previous value.
    pub fn set_icon_pixmap(&mut self, pixmap: Pixmap, mask: Pixmap) {
        if pixmap != NONE {
            self.icon_pixmap = pixmap;
            self.flags |= WmHintFlags::ICON_PIXMAP;
        }
        if mask != NONE {
            self.icon_mask = mask;
            self.flags |= WmHintFlags::ICON_MASK;
        }
    }

    pub fn set_icon_window(&mut self, window: Window) {
        self.icon_window = window;
        self.flags |= WmHintFlags::ICON_WINDOW;
    }

    pub fn set_icon_position(&mut self, x: i32, y: i32) {
        self.icon_x = x;
        self.icon_y = y;
        self.flags |= WmHintFlags::ICON_POSITION;
    }

    pub fn set_window_group(&mut self, leader: Window) {
        self.window_group = leader;
        self.flags |= WmHintFlags::WINDOW_GROUP;
    }

    pub fn set_urgency(&mut self, urgent: bool) {
        self.flags.set(WmHintFlags::URGENCY, urgent);
    }

    pub fn is_urgent(&self) -> bool {
        self.flags.contains(WmHintFlags::URGENCY)
    }

    /// The nine 32-bit words of the property
    pub fn encode(&self) -> [u32; 9] {
        [
            self.flags.bits(),
            self.input as u32,
            self.initial_state,
            self.icon_pixmap,
            self.icon_window,
            self.icon_x as u32,
            self.icon_y as u32,
            self.icon_mask,
            self.window_group,
        ]
    }

    /// Parse property words. Older clients write only the first eight.
    pub fn decode(values: &[u32]) -> Option<Self> {
        if values.len() < 8 {
            return None;
        }
        Some(Self {
            flags: WmHintFlags::from_bits_truncate(values[0]),
            input: values[1] & 1 != 0,
            initial_state: values[2],
            icon_pixmap: values[3],
            icon_window: values[4],
            icon_x: values[5] as i32,
            icon_y: values[6] as i32,
            icon_mask: values[7],
            window_group: values.get(8).copied().unwrap_or(NONE),
        })
    }

    /// Read the hints currently set on `window`
    pub fn read(server: &mut dyn XServer, window: Window) -> Result<Option<Self>, ServerError> {
        Ok(server
            .get_property(window, WM_HINTS, WM_HINTS, 9)?
            .and_then(|p| p.value32())
            .and_then(|v| Self::decode(&v)))
    }

    pub fn write(&self, server: &mut dyn XServer, window: Window) -> Result<(), ServerError> {
        server.change_property32(window, WM_HINTS, WM_HINTS, &self.encode())
    }
}

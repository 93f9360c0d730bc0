//! Protocol seam
//!
//! Everything the core needs from the display server goes through [`XServer`].
//! The production implementation lives in [`crate::x11`]; tests use a
//! call-counting fake. Request methods either return a reply (a blocking round
//! trip) or only queue the request, in which case any error shows up later
//! through [`XServer::sync`] or as an event.

use std::fmt;

use crate::error::{ProtocolError, ServerError};
use crate::events::RawEvent;

pub type Atom = u32;
pub type Window = u32;
pub type Pixmap = u32;
pub type Drawable = u32;
pub type Gcontext = u32;
pub type Cursor = u32;
pub type Colormap = u32;
pub type Pixel = u32;
pub type Timestamp = u32;
pub type Keycode = u8;
pub type Keysym = u32;
pub type VisualId = u32;

/// The "no resource" value shared by every handle type
pub const NONE: u32 = 0;

/// Identity of one server connection (its socket descriptor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub i32);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Color with 16-bit channels, the protocol's native precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgb16 {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
}

impl Rgb16 {
    pub const fn new(red: u16, green: u16, blue: u16) -> Self {
        Self { red, green, blue }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualClass {
    StaticGray,
    GrayScale,
    StaticColor,
    PseudoColor,
    TrueColor,
    DirectColor,
}

impl VisualClass {
    /// Whether color cells of this class can be allocated and freed.
    pub fn is_mutable(self) -> bool {
        !matches!(
            self,
            VisualClass::StaticGray | VisualClass::StaticColor | VisualClass::TrueColor
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "staticgray" => Some(Self::StaticGray),
            "grayscale" => Some(Self::GrayScale),
            "staticcolor" => Some(Self::StaticColor),
            "pseudocolor" => Some(Self::PseudoColor),
            "truecolor" => Some(Self::TrueColor),
            "directcolor" => Some(Self::DirectColor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualInfo {
    pub id: VisualId,
    pub class: VisualClass,
    pub depth: u8,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub bits_per_rgb: u8,
    pub colormap_entries: u16,
}

/// Static description of the screen a connection is bound to
#[derive(Debug, Clone)]
pub struct ScreenInfo {
    pub number: usize,
    pub root: Window,
    pub width_px: u16,
    pub height_px: u16,
    pub width_mm: u16,
    pub height_mm: u16,
    pub root_depth: u8,
    pub root_visual: VisualId,
    pub default_colormap: Colormap,
    pub black_pixel: Pixel,
    pub white_pixel: Pixel,
    pub visuals: Vec<VisualInfo>,
}

impl ScreenInfo {
    pub fn visual(&self, id: VisualId) -> Option<&VisualInfo> {
        self.visuals.iter().find(|v| v.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
    pub version: Option<(u32, u32)>,
}

/// Raw property contents as returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub type_: Atom,
    pub format: u8,
    pub data: Vec<u8>,
}

impl PropertyValue {
    /// 32-bit items in native byte order, if the property has format 32
    pub fn value32(&self) -> Option<Vec<u32>> {
        if self.format != 32 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyboardMapping {
    pub min_keycode: Keycode,
    pub keysyms_per_keycode: u8,
    pub keysyms: Vec<Keysym>,
}

impl KeyboardMapping {
    /// Keysyms bound to `code`, empty when out of range
    pub fn keysyms_for(&self, code: Keycode) -> &[Keysym] {
        let per = self.keysyms_per_keycode as usize;
        if per == 0 || code < self.min_keycode {
            return &[];
        }
        let start = (code - self.min_keycode) as usize * per;
        self.keysyms.get(start..start + per).unwrap_or(&[])
    }
}

/// Eight rows (shift, lock, control, mod1..mod5) of keycodes
#[derive(Debug, Clone, Default)]
pub struct ModifierMapping {
    pub keycodes_per_modifier: u8,
    pub keycodes: Vec<Keycode>,
}

impl ModifierMapping {
    pub fn row(&self, index: usize) -> &[Keycode] {
        let per = self.keycodes_per_modifier as usize;
        self.keycodes
            .get(index * per..(index + 1) * per)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcValues {
    pub foreground: Pixel,
    pub background: Pixel,
}

/// Parameters of a window the core creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub parent: Window,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub depth: u8,
    pub visual: VisualId,
    pub colormap: Colormap,
    pub background_pixel: Pixel,
    pub border_pixel: Pixel,
    pub event_mask: u32,
}

/// Event mask every frame window selects.
pub const STANDARD_EVENT_MASK: u32 = KEY_PRESS_MASK
    | EXPOSURE_MASK
    | BUTTON_PRESS_MASK
    | BUTTON_RELEASE_MASK
    | POINTER_MOTION_MASK
    | STRUCTURE_NOTIFY_MASK
    | FOCUS_CHANGE_MASK
    | LEAVE_WINDOW_MASK
    | ENTER_WINDOW_MASK
    | VISIBILITY_CHANGE_MASK
    | PROPERTY_CHANGE_MASK;

pub const KEY_PRESS_MASK: u32 = 1 << 0;
pub const BUTTON_PRESS_MASK: u32 = 1 << 2;
pub const BUTTON_RELEASE_MASK: u32 = 1 << 3;
pub const ENTER_WINDOW_MASK: u32 = 1 << 4;
pub const LEAVE_WINDOW_MASK: u32 = 1 << 5;
pub const POINTER_MOTION_MASK: u32 = 1 << 6;
pub const EXPOSURE_MASK: u32 = 1 << 15;
pub const VISIBILITY_CHANGE_MASK: u32 = 1 << 16;
pub const STRUCTURE_NOTIFY_MASK: u32 = 1 << 17;
pub const FOCUS_CHANGE_MASK: u32 = 1 << 21;
pub const PROPERTY_CHANGE_MASK: u32 = 1 << 22;

/// Requests the core issues against one display server.
pub trait XServer {
    fn handle(&self) -> ConnectionHandle;

    fn display_name(&self) -> &str;

    fn screen(&self) -> &ScreenInfo;

    /// Sequence number of the most recently issued request
    fn last_request(&self) -> u64;

    fn flush(&mut self) -> Result<(), ServerError>;

    /// Round trip: wait until every request issued so far has been processed
    /// and return the protocol errors received meanwhile.
    fn sync(&mut self) -> Result<Vec<ProtocolError>, ServerError>;

    /// Next queued event, without blocking
    fn poll_event(&mut self) -> Result<Option<RawEvent>, ServerError>;

    /// Pipelined atom lookup. With `only_if_exists`, absent names map to `NONE`.
    fn intern_atoms(&mut self, names: &[&str], only_if_exists: bool) -> Result<Vec<Atom>, ServerError>;

    fn query_extension(&mut self, name: &str) -> Result<Option<ExtensionInfo>, ServerError>;

    fn keyboard_mapping(&mut self) -> Result<KeyboardMapping, ServerError>;

    fn modifier_mapping(&mut self) -> Result<ModifierMapping, ServerError>;

    /// `type_ == NONE` accepts any property type.
    fn get_property(
        &mut self,
        window: Window,
        property: Atom,
        type_: Atom,
        max_words: u32,
    ) -> Result<Option<PropertyValue>, ServerError>;

    fn change_property32(
        &mut self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), ServerError>;

    fn create_colormap(&mut self, visual: VisualId) -> Result<Colormap, ServerError>;

    /// `None` when the server does not know the name
    fn lookup_color(&mut self, cmap: Colormap, name: &str) -> Result<Option<Rgb16>, ServerError>;

    /// `None` when the colormap has no free cell for the color
    fn alloc_color(&mut self, cmap: Colormap, rgb: Rgb16) -> Result<Option<(Pixel, Rgb16)>, ServerError>;

    fn query_colors(&mut self, cmap: Colormap, pixels: &[Pixel]) -> Result<Vec<Rgb16>, ServerError>;

    fn free_colors(&mut self, cmap: Colormap, pixels: &[Pixel]) -> Result<(), ServerError>;

    /// Depth-1 pixmap from XBM-layout data (rows padded to bytes, LSB first)
    fn create_bitmap(&mut self, width: u16, height: u16, data: &[u8]) -> Result<Pixmap, ServerError>;

    fn create_pixmap(&mut self, depth: u8, drawable: Drawable, width: u16, height: u16)
        -> Result<Pixmap, ServerError>;

    fn free_pixmap(&mut self, pixmap: Pixmap) -> Result<(), ServerError>;

    fn create_window(&mut self, spec: &WindowSpec) -> Result<Window, ServerError>;

    fn destroy_window(&mut self, window: Window) -> Result<(), ServerError>;

    fn map_window(&mut self, window: Window) -> Result<(), ServerError>;

    fn create_gc(&mut self, drawable: Drawable, values: GcValues) -> Result<Gcontext, ServerError>;

    fn free_gc(&mut self, gc: Gcontext) -> Result<(), ServerError>;

    /// Copy the `width`x`height` area at the origin of `src` to the origin of `dst`
    fn copy_area(
        &mut self,
        src: Drawable,
        dst: Drawable,
        gc: Gcontext,
        width: u16,
        height: u16,
    ) -> Result<(), ServerError>;

    /// Cursor from the standard cursor font
    fn create_font_cursor(&mut self, shape: u16) -> Result<Cursor, ServerError>;

    /// Fully transparent cursor
    fn create_blank_cursor(&mut self) -> Result<Cursor, ServerError>;

    fn free_cursor(&mut self, cursor: Cursor) -> Result<(), ServerError>;

    fn define_cursor(&mut self, window: Window, cursor: Cursor) -> Result<(), ServerError>;

    /// Hide or show the pointer through XFIXES
    fn set_pointer_visible(&mut self, window: Window, visible: bool) -> Result<(), ServerError>;

    /// Input contexts belong to the input method library, not the server, so
    /// the default does nothing.
    fn destroy_input_context(&mut self, _ic: u32) {}
}

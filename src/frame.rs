//! Frame Module
//!
//! Server-side resources of one top-level window ("frame"): the window and
//! its back buffer, graphics contexts, cursors, window manager hints, input
//! context and focus state.
//!
//! A frame belongs to exactly one connection but does not own it; every
//! operation that talks to the server takes the connection as a parameter.

use std::collections::BTreeMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bitmap::{BitmapId, BitmapSource};
use crate::config::{CursorConfig, ToolkitKind};
use crate::display::{cursor_font, DisplayConnection, WmType};
use crate::error::{DisplayError, DisplayResult, ServerError};
use crate::events::RawEvent;
use crate::focus::FocusState;
use crate::server::*;
use crate::wm_hints::WmHints;

/// Stable identity of a frame within a [`FrameSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FrameId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameGeometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// Window borders and corners, in the order of [`FrameCursors::edges`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
}

const EDGE_GLYPHS: [u16; 8] = [
    cursor_font::LEFT_SIDE,
    cursor_font::TOP_LEFT_CORNER,
    cursor_font::TOP_SIDE,
    cursor_font::TOP_RIGHT_CORNER,
    cursor_font::RIGHT_SIDE,
    cursor_font::BOTTOM_RIGHT_CORNER,
    cursor_font::BOTTOM_SIDE,
    cursor_font::BOTTOM_LEFT_CORNER,
];

/// Pointer shapes a frame switches between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerShape {
    Text,
    Nontext,
    Modeline,
    Hand,
    Hourglass,
    HorizontalDrag,
    VerticalDrag,
    Edge(Edge),
}

/// Cursor font cursors owned by one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCursors {
    pub text: Cursor,
    pub nontext: Cursor,
    pub modeline: Cursor,
    pub hand: Cursor,
    pub hourglass: Cursor,
    pub horizontal_drag: Cursor,
    pub vertical_drag: Cursor,
    pub edges: [Cursor; 8],
}

impl FrameCursors {
    /// Create every cursor in place. On failure the cursors created so far
    /// stay recorded so they can be freed.
    fn fill(&mut self, server: &mut dyn XServer, overrides: &CursorConfig) -> Result<(), ServerError> {
        for (cursor, glyph) in self.edges.iter_mut().zip(EDGE_GLYPHS) {
            *cursor = server.create_font_cursor(glyph)?;
        }
        self.text = server.create_font_cursor(overrides.text.unwrap_or(cursor_font::XTERM))?;
        self.nontext = server.create_font_cursor(overrides.nontext.unwrap_or(cursor_font::LEFT_PTR))?;
        self.modeline = server.create_font_cursor(overrides.modeline.unwrap_or(cursor_font::XTERM))?;
        self.hand = server.create_font_cursor(overrides.hand.unwrap_or(cursor_font::HAND2))?;
        self.hourglass = server.create_font_cursor(overrides.hourglass.unwrap_or(cursor_font::WATCH))?;
        self.horizontal_drag =
            server.create_font_cursor(overrides.horizontal_drag.unwrap_or(cursor_font::SB_H_DOUBLE_ARROW))?;
        self.vertical_drag =
            server.create_font_cursor(overrides.vertical_drag.unwrap_or(cursor_font::SB_V_DOUBLE_ARROW))?;
        Ok(())
    }

    pub fn get(&self, shape: PointerShape) -> Cursor {
        match shape {
            PointerShape::Text => self.text,
            PointerShape::Nontext => self.nontext,
            PointerShape::Modeline => self.modeline,
            PointerShape::Hand => self.hand,
            PointerShape::Hourglass => self.hourglass,
            PointerShape::HorizontalDrag => self.horizontal_drag,
            PointerShape::VerticalDrag => self.vertical_drag,
            PointerShape::Edge(edge) => self.edges[edge as usize],
        }
    }

    fn all(&self) -> impl Iterator<Item = Cursor> + '_ {
        [
            self.text,
            self.nontext,
            self.modeline,
            self.hand,
            self.hourglass,
            self.horizontal_drag,
            self.vertical_drag,
        ]
        .into_iter()
        .chain(self.edges)
    }
}

/// Windows created by the toolkit that wraps the frame, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameToolkit {
    None,
    Xt {
        shell: Window,
        edit: Window,
        menubar: Window,
        menubar_height: u16,
    },
    Gtk {
        outer: Window,
        edit: Window,
        vbox: Window,
        hbox: Window,
        menubar: Window,
        toolbar: Window,
        /// Toolbar lives in the horizontal box (left/right placement)
        toolbar_in_hbox: bool,
        toolbar_is_packed: bool,
        hint_flags: u32,
    },
}

impl FrameToolkit {
    fn for_kind(kind: ToolkitKind) -> Self {
        match kind {
            ToolkitKind::None => FrameToolkit::None,
            ToolkitKind::Xt => FrameToolkit::Xt {
                shell: NONE,
                edit: NONE,
                menubar: NONE,
                menubar_height: 0,
            },
            ToolkitKind::Gtk => FrameToolkit::Gtk {
                outer: NONE,
                edit: NONE,
                vbox: NONE,
                hbox: NONE,
                menubar: NONE,
                toolbar: NONE,
                toolbar_in_hbox: false,
                toolbar_is_packed: false,
                hint_flags: 0,
            },
        }
    }

    /// Top-level window the toolkit created, if it has one yet
    fn outer(&self) -> Window {
        match self {
            FrameToolkit::None => NONE,
            FrameToolkit::Xt { shell, .. } => *shell,
            FrameToolkit::Gtk { outer, .. } => *outer,
        }
    }

    fn menubar(&self) -> Window {
        match self {
            FrameToolkit::None => NONE,
            FrameToolkit::Xt { menubar, .. } | FrameToolkit::Gtk { menubar, .. } => *menubar,
        }
    }

    fn windows(&self) -> Vec<Window> {
        let windows = match self {
            FrameToolkit::None => vec![],
            FrameToolkit::Xt { shell, edit, menubar, .. } => vec![*shell, *edit, *menubar],
            FrameToolkit::Gtk {
                outer,
                edit,
                vbox,
                hbox,
                menubar,
                toolbar,
                ..
            } => vec![*outer, *edit, *vbox, *hbox, *menubar, *toolbar],
        };
        windows.into_iter().filter(|&w| w != NONE).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameGcs {
    pub normal: Gcontext,
    pub reverse: Gcontext,
    pub cursor: Gcontext,
}

/// One side of the 3D relief drawn around boxes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relief {
    pub gc: Gcontext,
    pub pixel: Pixel,
}

/// Input method context attached to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputContext {
    pub handle: u32,
    pub style: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visibility {
    pub visible: bool,
    pub iconified: bool,
    pub asked_for_visible: bool,
    pub has_been_visible: bool,
}

/// Per-frame server resources
#[derive(Debug)]
pub struct FrameSurface {
    id: FrameId,
    connection: ConnectionHandle,
    window: Window,
    drawable: Drawable,
    depth: u8,
    geometry: FrameGeometry,
    /// Offscreen pixmap, `NONE` when single-buffered
    back_buffer: Pixmap,
    back_buffer_size: (u16, u16),
    /// Size the back buffer should have at the next flip
    desired_size: Option<(u16, u16)>,
    need_flip: bool,

    icon_window: Window,
    parent: Window,
    /// Embedded in a foreign window rather than a child of the root
    explicit_parent: bool,
    pub visibility: Visibility,

    gcs: FrameGcs,
    white_relief: Relief,
    black_relief: Relief,
    relief_background: Option<Pixel>,
    /// Server font the rendering layer draws with
    font: Option<u32>,
    cursors: FrameCursors,
    current_cursor: Cursor,
    hourglass_shown: bool,

    pub wm_hints: WmHints,
    icon_bitmap: Option<BitmapId>,
    input_context: Option<InputContext>,
    pub focus_state: FocusState,

    expected_position: Option<(i32, i32)>,
    move_offset: (i32, i32),
    saved_menu_event: Option<RawEvent>,
    toolkit: FrameToolkit,
    freed: bool,
}

impl FrameSurface {
    /// Create the window and the frame's graphics contexts and cursors.
    pub fn realize(
        conn: &mut DisplayConnection,
        id: FrameId,
        geometry: FrameGeometry,
        parent: Option<Window>,
    ) -> DisplayResult<Self> {
        let visual = conn.visual().clone();
        let colormap = conn.colormap();
        let black = conn.color_model().black_pixel;
        let white = conn.color_model().white_pixel;
        let overrides = conn.cursor_overrides().clone();
        let parent_window = parent.unwrap_or_else(|| conn.root());

        let spec = WindowSpec {
            parent: parent_window,
            x: geometry.x,
            y: geometry.y,
            width: geometry.width.max(1),
            height: geometry.height.max(1),
            border_width: 0,
            depth: visual.depth,
            visual: visual.id,
            colormap,
            background_pixel: white,
            border_pixel: black,
            event_mask: STANDARD_EVENT_MASK,
        };

        let window = conn.server().create_window(&spec)?;

        let mut wm_hints = WmHints::new();
        wm_hints.set_input(true);

        let mut frame = Self {
            id,
            connection: conn.handle(),
            window,
            drawable: window,
            depth: visual.depth,
            geometry,
            back_buffer: NONE,
            back_buffer_size: (0, 0),
            desired_size: None,
            need_flip: false,
            icon_window: NONE,
            parent: parent_window,
            explicit_parent: parent.is_some(),
            visibility: Visibility::default(),
            gcs: FrameGcs::default(),
            white_relief: Relief::default(),
            black_relief: Relief::default(),
            relief_background: None,
            font: None,
            cursors: FrameCursors::default(),
            current_cursor: NONE,
            hourglass_shown: false,
            wm_hints,
            icon_bitmap: None,
            input_context: None,
            focus_state: FocusState::None,
            expected_position: None,
            move_offset: (0, 0),
            saved_menu_event: None,
            toolkit: FrameToolkit::for_kind(conn.toolkit()),
            freed: false,
        };
        conn.attach_frame();

        if let Err(e) = frame.create_resources(conn, &overrides, black, white) {
            warn!("Realizing frame {} failed, releasing partial resources: {}", id.0, e);
            if let Err(cleanup) = frame.free_resources(conn) {
                warn!("Frame {} cleanup after failed realize: {}", id.0, cleanup);
            }
            return Err(e);
        }

        info!(
            "Frame {} realized as window 0x{:x} ({}x{})",
            id.0, window, spec.width, spec.height
        );
        Ok(frame)
    }

    /// Graphics contexts, cursors and back buffer of a freshly created window.
    /// Each handle is recorded as soon as it exists.
    fn create_resources(
        &mut self,
        conn: &mut DisplayConnection,
        overrides: &CursorConfig,
        black: Pixel,
        white: Pixel,
    ) -> DisplayResult<()> {
        let server = conn.server();
        let window = self.window;
        self.gcs.normal = server.create_gc(window, GcValues { foreground: black, background: white })?;
        self.gcs.reverse = server.create_gc(window, GcValues { foreground: white, background: black })?;
        self.gcs.cursor = server.create_gc(window, GcValues { foreground: white, background: black })?;
        self.cursors.fill(server, overrides)?;
        server.define_cursor(window, self.cursors.nontext)?;
        self.current_cursor = self.cursors.nontext;

        if conn.double_buffered_default() {
            self.set_double_buffered(conn, true)?;
        }
        Ok(())
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Drawable to render into. Every write path goes through here so the
    /// frame is always marked for the next flip.
    pub fn drawable_for_write(&mut self) -> Drawable {
        self.need_flip = true;
        self.drawable
    }

    /// Drawable for reading or inspection; does not mark the frame dirty.
    pub fn raw_drawable(&self) -> Drawable {
        self.drawable
    }

    pub fn need_flip(&self) -> bool {
        self.need_flip
    }

    pub fn is_double_buffered(&self) -> bool {
        self.back_buffer != NONE
    }

    pub fn back_buffer_size(&self) -> (u16, u16) {
        self.back_buffer_size
    }

    pub fn gcs(&self) -> &FrameGcs {
        &self.gcs
    }

    pub fn cursors(&self) -> &FrameCursors {
        &self.cursors
    }

    pub fn font(&self) -> Option<u32> {
        self.font
    }

    pub fn set_font(&mut self, font: Option<u32>) {
        self.font = font;
    }

    pub fn toolkit(&self) -> &FrameToolkit {
        &self.toolkit
    }

    /// Filled in by the toolkit layer as it creates its widgets
    pub fn toolkit_mut(&mut self) -> &mut FrameToolkit {
        &mut self.toolkit
    }

    pub fn parent(&self) -> Window {
        self.parent
    }

    pub fn explicit_parent(&self) -> bool {
        self.explicit_parent
    }

    pub fn icon_window(&self) -> Window {
        self.icon_window
    }

    pub fn set_icon_window(&mut self, window: Window) {
        self.icon_window = window;
        self.wm_hints.set_icon_window(window);
    }

    /// Window the window manager sees: the toolkit shell if there is one
    pub fn outer_window(&self) -> Window {
        match self.toolkit.outer() {
            NONE => self.window,
            outer => outer,
        }
    }

    /// Map the frame's window. Toolkit windows are mapped by their toolkit.
    pub fn map(&self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        conn.server().map_window(self.window)?;
        Ok(())
    }

    /// Whether `window` is one of this frame's windows
    pub fn owns_window(&self, window: Window) -> bool {
        window != NONE
            && (window == self.window
                || window == self.icon_window
                || self.toolkit.windows().contains(&window))
    }

    pub fn menubar_window(&self) -> Window {
        self.toolkit.menubar()
    }

    pub fn is_freed(&self) -> bool {
        self.freed
    }

    // Double buffering

    /// Publish the back buffer to the window. Single-buffered frames only
    /// get their dirty flag cleared.
    ///
    /// Returns whether anything was copied.
    pub fn flip(&mut self, conn: &mut DisplayConnection) -> DisplayResult<bool> {
        if !self.is_double_buffered() {
            self.need_flip = false;
            return Ok(false);
        }

        if let Some((width, height)) = self.desired_size.take() {
            if (width, height) != self.back_buffer_size {
                self.resize_back_buffer(conn, width, height)?;
            }
        }

        let (width, height) = self.back_buffer_size;
        conn.server()
            .copy_area(self.back_buffer, self.window, self.gcs.normal, width, height)?;
        self.need_flip = false;
        debug!("Frame {} flipped ({}x{})", self.id.0, width, height);
        Ok(true)
    }

    fn resize_back_buffer(&mut self, conn: &mut DisplayConnection, width: u16, height: u16) -> DisplayResult<()> {
        let width = width.max(1);
        let height = height.max(1);
        let (old_width, old_height) = self.back_buffer_size;
        let server = conn.server();
        let pixmap = server.create_pixmap(self.depth, self.window, width, height)?;
        server.copy_area(
            self.back_buffer,
            pixmap,
            self.gcs.normal,
            old_width.min(width),
            old_height.min(height),
        )?;
        server.free_pixmap(self.back_buffer)?;
        self.back_buffer = pixmap;
        self.drawable = pixmap;
        self.back_buffer_size = (width, height);
        debug!("Frame {} back buffer resized to {}x{}", self.id.0, width, height);
        Ok(())
    }

    /// Switch between drawing to an offscreen pixmap and drawing to the
    /// window directly.
    pub fn set_double_buffered(&mut self, conn: &mut DisplayConnection, enable: bool) -> DisplayResult<()> {
        if enable == self.is_double_buffered() {
            return Ok(());
        }

        if enable {
            let width = self.geometry.width.max(1);
            let height = self.geometry.height.max(1);
            let pixmap = conn.server().create_pixmap(self.depth, self.window, width, height)?;
            self.back_buffer = pixmap;
            self.back_buffer_size = (width, height);
            self.drawable = pixmap;
        } else {
            conn.server().free_pixmap(self.back_buffer)?;
            self.back_buffer = NONE;
            self.back_buffer_size = (0, 0);
            self.drawable = self.window;
            self.need_flip = false;
        }
        self.desired_size = None;
        debug!("Frame {} double buffering {}", self.id.0, enable);
        Ok(())
    }

    /// Record a new geometry. The back buffer follows lazily at the next flip.
    pub fn on_configure(&mut self, geometry: FrameGeometry) {
        self.geometry = geometry;
        if self.is_double_buffered() {
            let size = (geometry.width, geometry.height);
            self.desired_size = (size != self.back_buffer_size).then_some(size);
        }
    }

    // Window manager move compensation

    /// Remember where a requested move should place the frame.
    pub fn expect_move(&mut self, x: i32, y: i32) {
        self.expected_position = Some((x, y));
    }

    /// Compare the position the window manager reported with the expected
    /// one. The first mismatch classifies the manager as type A and returns
    /// the position to request so the frame lands where it was meant to.
    pub fn check_expected_move(&mut self, conn: &mut DisplayConnection, x: i32, y: i32) -> Option<(i32, i32)> {
        let (expected_x, expected_y) = self.expected_position.take()?;
        if conn.wm_type() != WmType::Unknown {
            return None;
        }
        if (x, y) == (expected_x, expected_y) {
            conn.set_wm_type(WmType::B);
            return None;
        }
        conn.set_wm_type(WmType::A);
        self.move_offset = (expected_x - x, expected_y - y);
        debug!("Frame {} move offset {:?}", self.id.0, self.move_offset);
        Some((expected_x + self.move_offset.0, expected_y + self.move_offset.1))
    }

    pub fn move_offset(&self) -> (i32, i32) {
        self.move_offset
    }

    // Graphics contexts

    /// Recreate the relief contexts for a new background. Nothing happens
    /// when the background is unchanged.
    pub fn update_reliefs(&mut self, conn: &mut DisplayConnection, background: Pixel) -> DisplayResult<bool> {
        if self.relief_background == Some(background) {
            return Ok(false);
        }

        let base = conn.query_color(background)?;
        let light = conn.allocate_color(scale_color(base, 1.2, 0x8000))?;
        let dark = conn.allocate_color(scale_color(base, 0.6, 0x4000))?;

        self.free_reliefs(conn)?;
        let server = conn.server();
        self.white_relief = Relief {
            gc: server.create_gc(self.window, GcValues { foreground: light.pixel, background })?,
            pixel: light.pixel,
        };
        self.black_relief = Relief {
            gc: server.create_gc(self.window, GcValues { foreground: dark.pixel, background })?,
            pixel: dark.pixel,
        };
        self.relief_background = Some(background);
        Ok(true)
    }

    pub fn reliefs(&self) -> (Relief, Relief) {
        (self.white_relief, self.black_relief)
    }

    fn free_reliefs(&mut self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        let mut pixels = Vec::new();
        for relief in [&mut self.white_relief, &mut self.black_relief] {
            if relief.gc != NONE {
                conn.server().free_gc(relief.gc)?;
                pixels.push(relief.pixel);
            }
            *relief = Relief::default();
        }
        self.relief_background = None;
        conn.free_colors(&pixels)
    }

    // Cursors

    pub fn define_cursor(&mut self, conn: &mut DisplayConnection, shape: PointerShape) -> DisplayResult<()> {
        let cursor = self.cursors.get(shape);
        if cursor == self.current_cursor {
            return Ok(());
        }
        self.current_cursor = cursor;
        if !self.hourglass_shown {
            conn.server().define_cursor(self.window, cursor)?;
        }
        Ok(())
    }

    pub fn current_cursor(&self) -> Cursor {
        self.current_cursor
    }

    pub fn show_hourglass(&mut self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        if !self.hourglass_shown {
            conn.server().define_cursor(self.window, self.cursors.hourglass)?;
            self.hourglass_shown = true;
        }
        Ok(())
    }

    pub fn hide_hourglass(&mut self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        if self.hourglass_shown {
            conn.server().define_cursor(self.window, self.current_cursor)?;
            self.hourglass_shown = false;
        }
        Ok(())
    }

    pub fn hourglass_shown(&self) -> bool {
        self.hourglass_shown
    }

    // Icon and hints

    /// Use `source` as the frame's icon, sharing an already loaded bitmap.
    pub fn set_icon(&mut self, conn: &mut DisplayConnection, source: BitmapSource) -> DisplayResult<BitmapId> {
        let id = conn.acquire_bitmap(source)?;
        self.install_icon(conn, id)?;
        Ok(id)
    }

    /// Use the connection's default icon.
    pub fn use_default_icon(&mut self, conn: &mut DisplayConnection) -> DisplayResult<Option<BitmapId>> {
        let Some(default) = conn.icon_bitmap() else {
            return Ok(None);
        };
        let id = conn.share_bitmap(default)?;
        self.install_icon(conn, id)?;
        Ok(Some(id))
    }

    fn install_icon(&mut self, conn: &mut DisplayConnection, id: BitmapId) -> DisplayResult<()> {
        if let Some(old) = self.icon_bitmap.replace(id) {
            conn.release_bitmap(old)?;
        }
        let record = conn.bitmap(id).ok_or(DisplayError::UnknownBitmap(id.0))?;
        let (pixmap, mask) = (record.pixmap, record.mask.unwrap_or(NONE));
        self.wm_hints.set_icon_pixmap(pixmap, mask);
        Ok(())
    }

    pub fn icon_bitmap(&self) -> Option<BitmapId> {
        self.icon_bitmap
    }

    pub fn set_urgency(&mut self, conn: &mut DisplayConnection, urgent: bool) -> DisplayResult<()> {
        self.wm_hints.set_urgency(urgent);
        self.write_wm_hints(conn)
    }

    pub fn write_wm_hints(&self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        self.wm_hints.write(conn.server(), self.outer_window())?;
        Ok(())
    }

    // Input method

    /// Attach an input context created by the input method layer. Refused
    /// when the connection does not use input methods.
    pub fn attach_input_context(&mut self, conn: &DisplayConnection, ic: InputContext) -> bool {
        if !conn.use_input_method() {
            return false;
        }
        self.input_context = Some(ic);
        true
    }

    pub fn input_context(&self) -> Option<InputContext> {
        self.input_context
    }

    // Menus

    /// Keep a button press that should open a menu once the toolkit is ready.
    pub fn save_menu_event(&mut self, event: RawEvent) {
        self.saved_menu_event = Some(event);
    }

    pub fn take_menu_event(&mut self) -> Option<RawEvent> {
        self.saved_menu_event.take()
    }

    // Teardown

    /// Release every server resource of the frame and detach it from the
    /// connection. Safe to call more than once.
    ///
    /// Freeing continues past a failed request; the first failure is
    /// returned.
    pub fn free_resources(&mut self, conn: &mut DisplayConnection) -> DisplayResult<()> {
        if self.freed {
            return Ok(());
        }
        self.freed = true;

        let mut first_error: Option<DisplayError> = None;
        let mut note = |result: DisplayResult<()>| {
            if let Err(e) = result {
                warn!("Frame teardown: {}", e);
                first_error.get_or_insert(e);
            }
        };

        note(self.free_reliefs(conn));

        let server = conn.server();
        if self.back_buffer != NONE {
            note(server.free_pixmap(self.back_buffer).map_err(Into::into));
        }
        for gc in [self.gcs.normal, self.gcs.reverse, self.gcs.cursor] {
            if gc != NONE {
                note(server.free_gc(gc).map_err(Into::into));
            }
        }
        for cursor in self.cursors.all().filter(|&c| c != NONE) {
            note(server.free_cursor(cursor).map_err(Into::into));
        }
        if let Some(ic) = self.input_context.take() {
            server.destroy_input_context(ic.handle);
        }
        if self.icon_window != NONE {
            note(server.destroy_window(self.icon_window).map_err(Into::into));
        }
        if self.window != NONE {
            note(server.destroy_window(self.window).map_err(Into::into));
        }
        if let Some(icon) = self.icon_bitmap.take() {
            note(conn.release_bitmap(icon));
        }

        conn.focus.forget(self.id);
        if conn.mouse.mouse_frame == Some(self.id) {
            conn.mouse.mouse_frame = None;
        }
        if conn.mouse.last_glyph_frame == Some(self.id) {
            conn.mouse.last_glyph_frame = None;
        }
        conn.detach_frame();

        self.clear_handles();
        info!("Frame {} freed", self.id.0);
        first_error.map_or(Ok(()), Err)
    }

    /// Forget every handle after the connection died. Issues no requests.
    pub(crate) fn abandon(&mut self) {
        self.freed = true;
        self.input_context = None;
        self.icon_bitmap = None;
        self.clear_handles();
    }

    fn clear_handles(&mut self) {
        self.window = NONE;
        self.drawable = NONE;
        self.back_buffer = NONE;
        self.back_buffer_size = (0, 0);
        self.desired_size = None;
        self.need_flip = false;
        self.icon_window = NONE;
        self.gcs = FrameGcs::default();
        self.white_relief = Relief::default();
        self.black_relief = Relief::default();
        self.relief_background = None;
        self.cursors = FrameCursors::default();
        self.current_cursor = NONE;
        self.saved_menu_event = None;
    }
}

/// Lighten (`factor > 1`) or darken a color. When scaling has no effect, as
/// for black, `delta` is added or subtracted instead.
fn scale_color(rgb: Rgb16, factor: f64, delta: u16) -> Rgb16 {
    let scale = |c: u16| (c as f64 * factor).min(65535.0) as u16;
    let scaled = Rgb16::new(scale(rgb.red), scale(rgb.green), scale(rgb.blue));
    if scaled != rgb {
        return scaled;
    }
    let shift = |c: u16| {
        if factor > 1.0 {
            c.saturating_add(delta)
        } else {
            c.saturating_sub(delta)
        }
    };
    Rgb16::new(shift(rgb.red), shift(rgb.green), shift(rgb.blue))
}

/// All frames of the process, across connections
#[derive(Debug, Default)]
pub struct FrameSet {
    frames: BTreeMap<FrameId, FrameSurface>,
    next_id: u32,
}

impl FrameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realize(
        &mut self,
        conn: &mut DisplayConnection,
        geometry: FrameGeometry,
        parent: Option<Window>,
    ) -> DisplayResult<FrameId> {
        self.next_id += 1;
        let id = FrameId(self.next_id);
        let frame = FrameSurface::realize(conn, id, geometry, parent)?;
        self.frames.insert(id, frame);
        Ok(id)
    }

    pub fn get(&self, id: FrameId) -> Option<&FrameSurface> {
        self.frames.get(&id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameSurface> {
        self.frames.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSurface> {
        self.frames.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FrameSurface> {
        self.frames.values_mut()
    }

    /// Frame on `connection` that owns `window`
    pub fn find_by_window(&self, connection: ConnectionHandle, window: Window) -> Option<FrameId> {
        self.frames
            .values()
            .find(|f| f.connection == connection && f.owns_window(window))
            .map(|f| f.id)
    }

    pub fn on_connection(&self, connection: ConnectionHandle) -> Vec<FrameId> {
        self.frames
            .values()
            .filter(|f| f.connection == connection)
            .map(|f| f.id)
            .collect()
    }

    /// Free a frame's resources and drop it.
    pub fn destroy(&mut self, conn: &mut DisplayConnection, id: FrameId) -> DisplayResult<()> {
        match self.frames.remove(&id) {
            Some(mut frame) => frame.free_resources(conn),
            None => Ok(()),
        }
    }

    /// Drop every frame of a lost connection without talking to the server.
    pub(crate) fn abandon_connection(&mut self, connection: ConnectionHandle) -> usize {
        let ids = self.on_connection(connection);
        for id in &ids {
            if let Some(mut frame) = self.frames.remove(id) {
                frame.abandon();
            }
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fake::FakeServer;

    fn open(fake: &FakeServer, double_buffered: bool) -> DisplayConnection {
        let mut config = Config::default();
        config.display.double_buffered = double_buffered;
        DisplayConnection::open_with(Box::new(fake.clone()), &config).unwrap()
    }

    fn geometry(width: u16, height: u16) -> FrameGeometry {
        FrameGeometry {
            x: 10,
            y: 20,
            width,
            height,
        }
    }

    #[test]
    fn failed_back_buffer_releases_partial_frame() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, true);
        let live = fake.live_count();
        fake.fail_requests("create_pixmap");

        assert!(FrameSurface::realize(&mut conn, FrameId(1), geometry(64, 32), None).is_err());
        assert_eq!(fake.live_count(), live);
        assert_eq!(fake.calls("destroy_window"), 1);
        assert_eq!(fake.calls("free_gc"), 3);
        assert_eq!(fake.calls("free_cursor"), 15);
        assert_eq!(conn.frames_attached(), 0);
    }

    #[test]
    fn failed_cursor_releases_window_and_gcs() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let live = fake.live_count();
        fake.fail_requests("create_font_cursor");

        assert!(FrameSurface::realize(&mut conn, FrameId(1), geometry(64, 32), None).is_err());
        assert_eq!(fake.live_count(), live);
        assert_eq!(fake.calls("free_gc"), 3);
        assert_eq!(fake.calls("free_cursor"), 0);
        assert_eq!(conn.frames_attached(), 0);
    }

    #[test]
    fn single_buffered_drawable_is_the_window() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(200, 100), None).unwrap();

        assert!(!frame.is_double_buffered());
        assert_eq!(frame.drawable_for_write(), frame.window());
        assert!(frame.need_flip());
        assert!(!frame.flip(&mut conn).unwrap());
        assert!(!frame.need_flip());
        assert_eq!(frame.raw_drawable(), frame.window());
        assert!(fake.copies().is_empty());
    }

    #[test]
    fn double_buffered_flip_copies_back_buffer() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, true);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(200, 100), None).unwrap();

        let drawable = frame.drawable_for_write();
        assert_ne!(drawable, frame.window());
        assert!(frame.need_flip());

        assert!(frame.flip(&mut conn).unwrap());
        assert!(!frame.need_flip());
        assert_eq!(fake.copies(), vec![(drawable, frame.window(), 200, 100)]);
    }

    #[test]
    fn raw_drawable_does_not_mark_dirty() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, true);
        let frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(20, 10), None).unwrap();
        let _ = frame.raw_drawable();
        assert!(!frame.need_flip());
    }

    #[test]
    fn resize_reallocates_lazily_on_flip() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, true);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(200, 100), None).unwrap();
        let old = frame.raw_drawable();
        let pixmaps = fake.calls("create_pixmap");

        frame.on_configure(geometry(300, 50));
        frame.on_configure(geometry(320, 60));
        assert_eq!(fake.calls("create_pixmap"), pixmaps);
        assert_eq!(frame.back_buffer_size(), (200, 100));

        frame.drawable_for_write();
        frame.flip(&mut conn).unwrap();
        let new = frame.raw_drawable();

        assert_eq!(fake.calls("create_pixmap"), pixmaps + 1);
        assert_ne!(new, old);
        assert!(fake.was_freed(old));
        assert_eq!(frame.back_buffer_size(), (320, 60));
        // Overlap preserved, then published at the new size.
        assert_eq!(
            fake.copies(),
            vec![(old, new, 200, 60), (new, frame.window(), 320, 60)]
        );
    }

    #[test]
    fn toggling_double_buffering() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(64, 32), None).unwrap();

        frame.set_double_buffered(&mut conn, true).unwrap();
        let back = frame.raw_drawable();
        assert_ne!(back, frame.window());
        assert_eq!(frame.back_buffer_size(), (64, 32));

        frame.drawable_for_write();
        frame.set_double_buffered(&mut conn, false).unwrap();
        assert_eq!(frame.raw_drawable(), frame.window());
        assert!(!frame.need_flip());
        assert!(fake.was_freed(back));
    }

    #[test]
    fn realize_attaches_and_free_detaches_once() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, true);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(64, 32), None).unwrap();
        let window = frame.window();
        let back = frame.raw_drawable();
        assert_eq!(conn.frames_attached(), 1);
        assert_eq!(fake.calls("create_font_cursor"), 2 + 15);

        frame.map(&mut conn).unwrap();
        assert_eq!(fake.calls("map_window"), 1);

        frame.free_resources(&mut conn).unwrap();
        frame.free_resources(&mut conn).unwrap();

        assert_eq!(conn.frames_attached(), 0);
        assert!(fake.was_freed(window));
        assert!(fake.was_freed(back));
        assert_eq!(fake.calls("destroy_window"), 1);
        assert_eq!(fake.calls("free_gc"), 3);
        assert_eq!(fake.calls("free_cursor"), 15);
        assert_eq!(frame.window(), NONE);
        assert!(frame.is_freed());
    }

    #[test]
    fn cursor_overrides_apply() {
        let fake = FakeServer::new();
        let mut config = Config::default();
        config.cursors.text = Some(cursor_font::LEFT_PTR);
        let mut conn = DisplayConnection::open_with(Box::new(fake.clone()), &config).unwrap();
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();

        let defines = fake.calls("define_cursor");
        frame.define_cursor(&mut conn, PointerShape::Text).unwrap();
        assert_eq!(frame.current_cursor(), frame.cursors().text);
        assert_eq!(fake.calls("define_cursor"), defines + 1);
        // Same shape again: no request.
        frame.define_cursor(&mut conn, PointerShape::Text).unwrap();
        assert_eq!(fake.calls("define_cursor"), defines + 1);
    }

    #[test]
    fn hourglass_restores_current_cursor() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();

        frame.show_hourglass(&mut conn).unwrap();
        // Shape changes while busy are remembered but not shown.
        let defines = fake.calls("define_cursor");
        frame.define_cursor(&mut conn, PointerShape::Hand).unwrap();
        assert_eq!(fake.calls("define_cursor"), defines);

        frame.hide_hourglass(&mut conn).unwrap();
        assert!(!frame.hourglass_shown());
        assert_eq!(frame.current_cursor(), frame.cursors().hand);
        assert_eq!(fake.calls("define_cursor"), defines + 1);
    }

    #[test]
    fn type_a_window_manager_offsets_moves() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();

        assert_eq!(frame.check_expected_move(&mut conn, 5, 5), None);
        frame.expect_move(100, 50);
        let corrected = frame.check_expected_move(&mut conn, 104, 72);
        assert_eq!(conn.wm_type(), WmType::A);
        assert_eq!(frame.move_offset(), (-4, -22));
        assert_eq!(corrected, Some((96, 28)));

        // Classification happens once.
        frame.expect_move(0, 0);
        assert_eq!(frame.check_expected_move(&mut conn, 9, 9), None);
    }

    #[test]
    fn type_b_window_manager() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();
        frame.expect_move(30, 40);
        assert_eq!(frame.check_expected_move(&mut conn, 30, 40), None);
        assert_eq!(conn.wm_type(), WmType::B);
        assert_eq!(frame.move_offset(), (0, 0));
    }

    #[test]
    fn reliefs_rebuilt_only_on_background_change() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();
        let gcs = fake.calls("create_gc");

        assert!(frame.update_reliefs(&mut conn, 0x808080).unwrap());
        assert!(!frame.update_reliefs(&mut conn, 0x808080).unwrap());
        assert_eq!(fake.calls("create_gc"), gcs + 2);

        let (light, dark) = frame.reliefs();
        assert!(light.pixel > dark.pixel);

        assert!(frame.update_reliefs(&mut conn, 0x000000).unwrap());
        assert_eq!(fake.calls("free_gc"), 2);
        let (light, _) = frame.reliefs();
        assert_ne!(light.pixel, 0);
    }

    #[test]
    fn scale_color_falls_back_to_delta() {
        assert_eq!(scale_color(Rgb16::new(0, 0, 0), 1.2, 0x8000), Rgb16::new(0x8000, 0x8000, 0x8000));
        assert_eq!(scale_color(Rgb16::new(1000, 0, 0), 0.5, 0x4000), Rgb16::new(500, 0, 0));
    }

    #[test]
    fn icons_share_bitmaps_and_set_hints() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut set = FrameSet::new();
        let a = set.realize(&mut conn, geometry(10, 10), None).unwrap();
        let b = set.realize(&mut conn, geometry(10, 10), None).unwrap();
        let source = BitmapSource::Data {
            width: 8,
            height: 1,
            bits: vec![0xaa],
        };

        let id_a = set.get_mut(a).unwrap().set_icon(&mut conn, source.clone()).unwrap();
        let id_b = set.get_mut(b).unwrap().set_icon(&mut conn, source).unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(conn.bitmaps().refcount(id_a), 2);
        assert_ne!(set.get(a).unwrap().wm_hints.icon_pixmap, NONE);

        set.destroy(&mut conn, a).unwrap();
        assert_eq!(conn.bitmaps().refcount(id_a), 1);
        set.destroy(&mut conn, b).unwrap();
        assert_eq!(conn.bitmaps().refcount(id_a), 0);
        assert_eq!(conn.frames_attached(), 0);
    }

    #[test]
    fn urgency_hint_is_written_to_outer_window() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();

        frame.set_urgency(&mut conn, true).unwrap();
        let written = WmHints::read(conn.server(), frame.outer_window()).unwrap().unwrap();
        assert!(written.is_urgent());
        assert!(written.input);
    }

    #[test]
    fn toolkit_variant_follows_connection() {
        let fake = FakeServer::new();
        let mut config = Config::default();
        config.display.toolkit = ToolkitKind::Xt;
        let mut conn = DisplayConnection::open_with(Box::new(fake.clone()), &config).unwrap();
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();

        assert_eq!(frame.outer_window(), frame.window());
        if let FrameToolkit::Xt { shell, menubar, .. } = frame.toolkit_mut() {
            *shell = 0x9000;
            *menubar = 0x9001;
        }
        assert_eq!(frame.outer_window(), 0x9000);
        assert!(frame.owns_window(0x9001));
        assert_eq!(frame.menubar_window(), 0x9001);
        assert!(!frame.owns_window(NONE));
    }

    #[test]
    fn input_context_needs_input_method_enabled() {
        let fake = FakeServer::new();
        let mut config = Config::default();
        config.display.use_input_method = false;
        let mut conn = DisplayConnection::open_with(Box::new(fake.clone()), &config).unwrap();
        let mut frame = FrameSurface::realize(&mut conn, FrameId(1), geometry(10, 10), None).unwrap();
        let ic = InputContext { handle: 5, style: 0x408 };
        assert!(!frame.attach_input_context(&conn, ic));
        assert_eq!(frame.input_context(), None);
    }

    #[test]
    fn frame_set_lookup_by_window() {
        let fake = FakeServer::new();
        let mut conn = open(&fake, false);
        let mut set = FrameSet::new();
        let id = set.realize(&mut conn, geometry(10, 10), None).unwrap();
        let window = set.get(id).unwrap().window();

        assert_eq!(set.find_by_window(conn.handle(), window), Some(id));
        assert_eq!(set.find_by_window(ConnectionHandle(99), window), None);
        assert_eq!(set.find_by_window(conn.handle(), 0x1), None);

        set.get_mut(id).unwrap().set_icon_window(0x7777);
        assert_eq!(set.find_by_window(conn.handle(), 0x7777), Some(id));
    }
}

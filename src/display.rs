//! Display Module
//!
//! One `DisplayConnection` per open server connection. It owns the caches
//! shared by every frame on that connection (atoms, colors, bitmaps), the
//! connection-wide cursors, the error trap stack and the global input state:
//! modifier masks, window manager capabilities, focus and mouse tracking.

use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::atoms::{AtomTable, Atoms};
use crate::bitmap::{BitmapId, BitmapRecord, BitmapSource, BitmapTable};
use crate::color::{Allocation, ColorCache, ColorModel};
use crate::config::{Config, CursorConfig, ToolkitKind};
use crate::error::{DisplayError, DisplayResult, ProtocolError, ServerError};
use crate::focus::FocusTracker;
use crate::frame::FrameId;
use crate::modifiers::{ModifierMasks, Modifiers};
use crate::server::*;
use crate::trap::{CheckOutcome, ErrorTraps, TrapGuard, TrapHandler};
use crate::x11::X11Server;

/// Glyphs of the standard cursor font
pub mod cursor_font {
    pub const BOTTOM_LEFT_CORNER: u16 = 12;
    pub const BOTTOM_RIGHT_CORNER: u16 = 14;
    pub const BOTTOM_SIDE: u16 = 16;
    pub const HAND2: u16 = 60;
    pub const LEFT_PTR: u16 = 68;
    pub const LEFT_SIDE: u16 = 70;
    pub const RIGHT_SIDE: u16 = 96;
    pub const SB_H_DOUBLE_ARROW: u16 = 108;
    pub const SB_V_DOUBLE_ARROW: u16 = 116;
    pub const TOP_LEFT_CORNER: u16 = 134;
    pub const TOP_RIGHT_CORNER: u16 = 136;
    pub const TOP_SIDE: u16 = 138;
    pub const WATCH: u16 = 150;
    pub const XTERM: u16 = 152;
}

/// 2x2 checkerboard used for stippled drawing
const GRAY_BITS: [u8; 2] = [0x01, 0x02];

/// Extensions found on the server. `None` means absent or unusable.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    pub xfixes: Option<ExtensionInfo>,
    pub randr: Option<ExtensionInfo>,
    pub render: Option<ExtensionInfo>,
    pub shape: Option<ExtensionInfo>,
    pub xinput: Option<ExtensionInfo>,
}

impl Extensions {
    pub fn have_xfixes(&self) -> bool {
        self.xfixes.is_some()
    }

    pub fn randr_version(&self) -> Option<(u32, u32)> {
        self.randr.and_then(|r| r.version)
    }
}

/// Cursors shared by every frame on the connection
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionCursors {
    pub vertical_scroll_bar: Cursor,
    pub horizontal_scroll_bar: Cursor,
    /// Blank cursor for hiding the pointer when XFIXES is missing
    pub invisible: Cursor,
}

/// How the window manager reports frame positions after a move
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WmType {
    /// No move has been checked yet
    #[default]
    Unknown,
    /// Reports the position of the decoration, offset from what we asked for
    A,
    /// Reports the position we asked for
    B,
}

/// The window manager's `_NET_SUPPORTED` list
#[derive(Debug, Clone, Default)]
struct WmSupport {
    check_window: Window,
    supported: HashSet<Atom>,
}

/// Last known pointer state
#[derive(Debug, Clone, Default)]
pub struct MouseTracking {
    pub mouse_frame: Option<FrameId>,
    pub last_glyph_frame: Option<FrameId>,
    pub last_motion: (i16, i16),
    pub last_motion_time: Timestamp,
}

/// One open connection to a display server
pub struct DisplayConnection {
    server: Box<dyn XServer>,
    x_id: u32,
    name: String,
    screen: ScreenInfo,
    visual: VisualInfo,
    colormap: Colormap,
    /// Dots per inch, horizontal and vertical
    resolution: (f64, f64),

    atom_table: AtomTable,
    atoms: Atoms,
    xsettings_selection: Atom,
    colors: ColorCache,
    bitmaps: BitmapTable,
    traps: ErrorTraps,
    untrapped: Vec<ProtocolError>,

    extensions: Extensions,
    cursors: ConnectionCursors,
    cursor_overrides: CursorConfig,
    modifiers: ModifierMasks,
    gray: Pixmap,
    icon_bitmap: Option<BitmapId>,

    wm_support: Option<WmSupport>,
    wm_type: WmType,
    last_user_time: Timestamp,
    pub focus: FocusTracker,
    pub mouse: MouseTracking,
    dnd_atoms: Vec<Atom>,
    pointer_invisible: bool,

    frames_attached: usize,
    toolkit: ToolkitKind,
    double_buffered: bool,
    use_input_method: bool,
    synchronous: bool,
}

impl std::fmt::Debug for DisplayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayConnection")
            .field("x_id", &self.x_id)
            .field("name", &self.name)
            .field("handle", &self.handle())
            .field("frames_attached", &self.frames_attached)
            .finish_non_exhaustive()
    }
}

impl DisplayConnection {
    /// Connect to `name` (or the configured display, or `$DISPLAY`).
    pub fn connect(name: Option<&str>, config: &Config) -> DisplayResult<Self> {
        let name = name.or(config.display.name.as_deref());
        let server = X11Server::connect(name).map_err(|e| DisplayError::Connect {
            name: name.unwrap_or("$DISPLAY").to_string(),
            reason: e.to_string(),
        })?;
        Self::open_with(Box::new(server), config)
    }

    /// Set up the connection state on top of an established server link.
    pub fn open_with(mut server: Box<dyn XServer>, config: &Config) -> DisplayResult<Self> {
        let screen = server.screen().clone();
        let name = server.display_name().to_string();
        info!("Opening display {} (screen {})", name, screen.number);

        let mut atom_table = AtomTable::new();
        let atoms = Atoms::intern(&mut atom_table, server.as_mut())?;
        let xsettings_selection =
            atom_table.intern(server.as_mut(), &format!("_XSETTINGS_S{}", screen.number))?;
        debug!("Interned {} atoms", atom_table.len());

        let extensions = detect_extensions(server.as_mut())?;
        info!(
            "X11 Extensions: xfixes={}, randr={:?}, render={}, shape={}, xinput={}",
            extensions.xfixes.is_some(),
            extensions.randr_version(),
            extensions.render.is_some(),
            extensions.shape.is_some(),
            extensions.xinput.is_some(),
        );

        let modifiers = match discover_modifiers(server.as_mut()) {
            Ok(masks) => masks,
            Err(ServerError::Protocol(e)) => {
                warn!("Cannot read keyboard mapping, modifiers degraded: {}", e);
                ModifierMasks::default()
            }
            Err(e) => return Err(e.into()),
        };

        let visual = select_visual(&screen, &config.display);
        let colormap = if visual.id == screen.root_visual {
            screen.default_colormap
        } else {
            server.create_colormap(visual.id)?
        };
        info!(
            "Visual 0x{:x} ({:?}, depth {}), colormap 0x{:x}",
            visual.id, visual.class, visual.depth, colormap
        );
        let model = ColorModel::from_visual(&visual, colormap, screen.black_pixel, screen.white_pixel);

        let cursors = ConnectionCursors {
            vertical_scroll_bar: server.create_font_cursor(cursor_font::SB_V_DOUBLE_ARROW)?,
            horizontal_scroll_bar: server.create_font_cursor(cursor_font::SB_H_DOUBLE_ARROW)?,
            invisible: if extensions.have_xfixes() {
                NONE
            } else {
                server.create_blank_cursor()?
            },
        };

        let gray = match server.create_bitmap(2, 2, &GRAY_BITS) {
            Ok(pixmap) => pixmap,
            Err(ServerError::Protocol(e)) => {
                warn!("Cannot create gray stipple: {}", e);
                NONE
            }
            Err(e) => return Err(e.into()),
        };

        let resolution = (
            dots_per_inch(screen.width_px, screen.width_mm),
            dots_per_inch(screen.height_px, screen.height_mm),
        );
        debug!("Resolution {:.1}x{:.1} dpi", resolution.0, resolution.1);

        server.flush()?;

        Ok(Self {
            server,
            x_id: 0,
            name,
            screen,
            visual,
            colormap,
            resolution,
            atom_table,
            atoms,
            xsettings_selection,
            colors: ColorCache::new(model),
            bitmaps: BitmapTable::new(),
            traps: ErrorTraps::new(),
            untrapped: Vec::new(),
            extensions,
            cursors,
            cursor_overrides: config.cursors.clone(),
            modifiers,
            gray,
            icon_bitmap: None,
            wm_support: None,
            wm_type: WmType::Unknown,
            last_user_time: 0,
            focus: FocusTracker::new(),
            mouse: MouseTracking::default(),
            dnd_atoms: Vec::new(),
            pointer_invisible: false,
            frames_attached: 0,
            toolkit: config.display.toolkit,
            double_buffered: config.display.double_buffered,
            use_input_method: config.display.use_input_method,
            synchronous: config.display.synchronous,
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.server.handle()
    }

    /// Logical id assigned by the registry
    pub fn x_id(&self) -> u32 {
        self.x_id
    }

    pub(crate) fn set_x_id(&mut self, id: u32) {
        self.x_id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn screen(&self) -> &ScreenInfo {
        &self.screen
    }

    pub fn root(&self) -> Window {
        self.screen.root
    }

    pub fn visual(&self) -> &VisualInfo {
        &self.visual
    }

    pub fn colormap(&self) -> Colormap {
        self.colormap
    }

    pub fn color_model(&self) -> &ColorModel {
        self.colors.model()
    }

    pub fn resolution(&self) -> (f64, f64) {
        self.resolution
    }

    pub fn pixel_width(&self) -> u16 {
        self.screen.width_px
    }

    pub fn pixel_height(&self) -> u16 {
        self.screen.height_px
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    pub fn xsettings_selection(&self) -> Atom {
        self.xsettings_selection
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn cursors(&self) -> &ConnectionCursors {
        &self.cursors
    }

    pub fn cursor_overrides(&self) -> &CursorConfig {
        &self.cursor_overrides
    }

    pub fn modifiers(&self) -> &ModifierMasks {
        &self.modifiers
    }

    /// Server state bits to abstract modifiers
    pub fn state_to_modifiers(&self, state: u16) -> Modifiers {
        self.modifiers.to_modifiers(state)
    }

    pub fn modifiers_to_state(&self, mods: Modifiers) -> u16 {
        self.modifiers.to_state(mods)
    }

    pub fn gray_pixmap(&self) -> Pixmap {
        self.gray
    }

    pub fn toolkit(&self) -> ToolkitKind {
        self.toolkit
    }

    pub fn double_buffered_default(&self) -> bool {
        self.double_buffered
    }

    pub fn use_input_method(&self) -> bool {
        self.use_input_method
    }

    pub fn wm_type(&self) -> WmType {
        self.wm_type
    }

    pub fn set_wm_type(&mut self, wm_type: WmType) {
        if self.wm_type != wm_type {
            debug!("Window manager type {:?}", wm_type);
            self.wm_type = wm_type;
        }
    }

    pub fn last_user_time(&self) -> Timestamp {
        self.last_user_time
    }

    /// Record the time of a user interaction. Time zero means "unknown".
    pub fn record_user_time(&mut self, time: Timestamp) {
        if time != 0 {
            self.last_user_time = time;
        }
    }

    /// Direct access to the protocol seam
    pub fn server(&mut self) -> &mut dyn XServer {
        self.server.as_mut()
    }

    pub fn flush(&mut self) -> DisplayResult<()> {
        if self.synchronous {
            return self.sync();
        }
        self.server.flush()?;
        Ok(())
    }

    /// Round trip. Errors that arrived meanwhile go to their traps.
    pub fn sync(&mut self) -> DisplayResult<()> {
        let errors = self.server.sync()?;
        let through = self.server.last_request();
        for err in errors {
            if let Some(err) = self.handle_error(err) {
                self.untrapped.push(err);
            }
        }
        self.traps.mark_synced(through);
        Ok(())
    }

    /// Attribute a protocol error to its trap. An untrapped error is logged
    /// and handed back.
    pub fn handle_error(&mut self, err: ProtocolError) -> Option<ProtocolError> {
        let err = self.traps.record(err)?;
        error!("Untrapped X protocol error on {}: {}", self.name, err);
        Some(err)
    }

    /// Untrapped errors collected by round trips since the last call
    pub fn take_untrapped_errors(&mut self) -> Vec<ProtocolError> {
        std::mem::take(&mut self.untrapped)
    }

    /// Run one request whose failure is expected and recoverable. Inside a
    /// trap a protocol error is recorded there and `None` is returned.
    pub fn trapped<T>(
        &mut self,
        request: impl FnOnce(&mut dyn XServer) -> Result<T, ServerError>,
    ) -> DisplayResult<Option<T>> {
        match request(self.server.as_mut()) {
            Ok(value) => Ok(Some(value)),
            Err(ServerError::Protocol(err)) if self.traps.is_active() => {
                self.handle_error(err);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // Error traps

    pub fn begin_trap(&mut self) {
        let last = self.server.last_request();
        self.traps.begin(last, None);
    }

    pub fn begin_trap_with_handler(&mut self, handler: TrapHandler) {
        let last = self.server.last_request();
        self.traps.begin(last, Some(handler));
    }

    /// Open a trap that ends when the guard goes out of scope.
    pub fn trap(&mut self) -> TrapGuard<'_> {
        self.begin_trap();
        TrapGuard::new(self)
    }

    pub fn trap_with_handler(&mut self, handler: TrapHandler) -> TrapGuard<'_> {
        self.begin_trap_with_handler(handler);
        TrapGuard::new(self)
    }

    pub fn trap_depth(&self) -> usize {
        self.traps.depth()
    }

    fn sync_if_needed(&mut self) -> DisplayResult<()> {
        if self.traps.needs_sync(self.server.last_request()) {
            self.sync()?;
        }
        Ok(())
    }

    /// Whether any request in the innermost trap has failed so far
    pub fn had_errors(&mut self) -> DisplayResult<bool> {
        self.sync_if_needed()?;
        Ok(self.traps.had_errors())
    }

    /// Wait for every outstanding request, then surface the innermost trap's
    /// errors through its handler. Without a handler the first error is
    /// returned, labelled with `label`.
    pub fn check_errors(&mut self, label: &str) -> DisplayResult<()> {
        self.sync_if_needed()?;
        match self.traps.surface(label) {
            CheckOutcome::Clean => Ok(()),
            CheckOutcome::Handled(count) => {
                debug!("{}: {} error(s) handled", label, count);
                Ok(())
            }
            CheckOutcome::Failed(error) => Err(DisplayError::Protocol {
                context: label.to_string(),
                error,
            }),
        }
    }

    pub fn clear_errors(&mut self) {
        self.traps.clear();
    }

    /// Close the innermost trap once every request issued inside it has been
    /// acknowledged.
    pub fn end_trap(&mut self) -> DisplayResult<()> {
        if !self.traps.is_active() {
            warn!("end_trap without an open trap");
            return Ok(());
        }
        self.sync_if_needed()?;
        self.traps.end();
        Ok(())
    }

    /// Close the innermost trap right after `check_errors`, skipping the
    /// round trip.
    pub fn end_trap_after_check(&mut self) {
        self.traps.end();
    }

    // Atoms

    pub fn intern_atom(&mut self, name: &str) -> DisplayResult<Atom> {
        Ok(self.atom_table.intern(self.server.as_mut(), name)?)
    }

    /// `NONE` when the server does not know `name`
    pub fn intern_optional_atom(&mut self, name: &str) -> DisplayResult<Atom> {
        Ok(self.atom_table.intern_optional(self.server.as_mut(), name)?)
    }

    pub fn atom_name(&self, atom: Atom) -> Option<&str> {
        self.atom_table.name_of(atom)
    }

    // Colors

    pub fn resolve_color(&mut self, name: &str) -> DisplayResult<Rgb16> {
        self.colors.resolve(self.server.as_mut(), name)
    }

    pub fn allocate_color(&mut self, rgb: Rgb16) -> DisplayResult<Allocation> {
        self.colors.allocate(self.server.as_mut(), rgb)
    }

    pub fn allocate_named_color(&mut self, name: &str) -> DisplayResult<Allocation> {
        self.colors.allocate_named(self.server.as_mut(), name)
    }

    pub fn copy_color(&mut self, pixel: Pixel) -> DisplayResult<Pixel> {
        self.colors.copy_color(self.server.as_mut(), pixel)
    }

    pub fn free_colors(&mut self, pixels: &[Pixel]) -> DisplayResult<()> {
        self.colors.free_colors(self.server.as_mut(), pixels)
    }

    pub fn query_color(&mut self, pixel: Pixel) -> DisplayResult<Rgb16> {
        self.colors.query(self.server.as_mut(), pixel)
    }

    pub fn color_cache(&self) -> &ColorCache {
        &self.colors
    }

    // Bitmaps

    pub fn acquire_bitmap(&mut self, source: BitmapSource) -> DisplayResult<BitmapId> {
        self.bitmaps.acquire(self.server.as_mut(), source)
    }

    pub fn share_bitmap(&mut self, id: BitmapId) -> DisplayResult<BitmapId> {
        self.bitmaps.share(id)
    }

    pub fn release_bitmap(&mut self, id: BitmapId) -> DisplayResult<()> {
        self.bitmaps.release(self.server.as_mut(), id)
    }

    pub fn set_bitmap_mask(&mut self, id: BitmapId, mask: Pixmap) -> DisplayResult<()> {
        self.bitmaps.set_mask(self.server.as_mut(), id, mask)
    }

    pub fn bitmap(&self, id: BitmapId) -> Option<&BitmapRecord> {
        self.bitmaps.get(id)
    }

    pub fn bitmaps(&self) -> &BitmapTable {
        &self.bitmaps
    }

    /// Default icon given to frames without one of their own
    pub fn icon_bitmap(&self) -> Option<BitmapId> {
        self.icon_bitmap
    }

    pub fn set_icon_bitmap(&mut self, source: BitmapSource) -> DisplayResult<BitmapId> {
        let id = self.acquire_bitmap(source)?;
        if let Some(old) = self.icon_bitmap.replace(id) {
            self.release_bitmap(old)?;
        }
        Ok(id)
    }

    // Window manager

    /// Whether the running window manager lists `atom` in `_NET_SUPPORTED`.
    ///
    /// The list is fetched once and kept until the supporting-WM-check
    /// window changes.
    pub fn supports(&mut self, atom: Atom) -> DisplayResult<bool> {
        if self.wm_support.is_none() {
            let support = self.query_wm_support()?;
            info!(
                "Window manager check window 0x{:x}, {} supported hint(s)",
                support.check_window,
                support.supported.len()
            );
            self.wm_support = Some(support);
        }
        Ok(self
            .wm_support
            .as_ref()
            .map(|s| s.supported.contains(&atom))
            .unwrap_or(false))
    }

    pub fn invalidate_wm_support(&mut self) {
        if self.wm_support.take().is_some() {
            debug!("Window manager support cache invalidated");
        }
    }

    fn query_wm_support(&mut self) -> DisplayResult<WmSupport> {
        let root = self.screen.root;
        let check = self.atoms.net_supporting_wm_check;
        let supported_atom = self.atoms.net_supported;

        let mut guard = self.trap();
        let check_window = guard
            .trapped(|s| s.get_property(root, check, WINDOW_ATOM, 1))?
            .flatten()
            .and_then(|p| p.value32())
            .and_then(|v| v.first().copied())
            .unwrap_or(NONE);

        if check_window == NONE {
            guard.end()?;
            return Ok(WmSupport::default());
        }

        // The check window must point at itself, or the manager is gone.
        let confirmed = guard
            .trapped(|s| s.get_property(check_window, check, WINDOW_ATOM, 1))?
            .flatten()
            .and_then(|p| p.value32())
            .and_then(|v| v.first().copied());
        if confirmed != Some(check_window) {
            debug!("Stale window manager check window 0x{:x}", check_window);
            guard.end()?;
            return Ok(WmSupport::default());
        }

        let supported = guard
            .trapped(|s| s.get_property(root, supported_atom, ATOM_ATOM, 0x10000))?
            .flatten()
            .and_then(|p| p.value32())
            .unwrap_or_default();
        guard.end()?;

        Ok(WmSupport {
            check_window,
            supported: supported.into_iter().collect(),
        })
    }

    // Drag and drop

    /// Treat client messages of type `atom` as drag-and-drop traffic.
    pub fn register_dnd_atom(&mut self, atom: Atom) {
        if atom != NONE && !self.dnd_atoms.contains(&atom) {
            self.dnd_atoms.push(atom);
        }
    }

    pub fn is_dnd_message(&self, message_type: Atom) -> bool {
        self.dnd_atoms.contains(&message_type)
    }

    pub fn dnd_atoms(&self) -> &[Atom] {
        &self.dnd_atoms
    }

    // Pointer

    /// Hide or show the pointer over `window`. Without XFIXES this swaps in
    /// the blank cursor and restores `restore` when showing again.
    pub fn set_pointer_visible(&mut self, window: Window, visible: bool, restore: Cursor) -> DisplayResult<()> {
        if visible != self.pointer_invisible {
            return Ok(());
        }
        if self.extensions.have_xfixes() {
            self.server.set_pointer_visible(window, visible)?;
        } else {
            let cursor = if visible { restore } else { self.cursors.invisible };
            self.server.define_cursor(window, cursor)?;
        }
        self.pointer_invisible = !visible;
        self.flush()
    }

    pub fn pointer_invisible(&self) -> bool {
        self.pointer_invisible
    }

    // Frame references

    pub(crate) fn attach_frame(&mut self) {
        self.frames_attached += 1;
    }

    pub(crate) fn detach_frame(&mut self) {
        self.frames_attached = self.frames_attached.saturating_sub(1);
    }

    pub fn frames_attached(&self) -> usize {
        self.frames_attached
    }

    /// Free the connection-wide resources before disconnecting.
    pub(crate) fn release_resources(&mut self) -> DisplayResult<()> {
        let server = self.server.as_mut();
        let mut first_error: Option<DisplayError> = None;
        let mut note = |what: &str, result: DisplayResult<()>| {
            if let Err(e) = result {
                warn!("Failed to free {} on close: {}", what, e);
                first_error.get_or_insert(e);
            }
        };

        for cursor in [
            self.cursors.vertical_scroll_bar,
            self.cursors.horizontal_scroll_bar,
            self.cursors.invisible,
        ] {
            if cursor != NONE {
                note("cursor", server.free_cursor(cursor).map_err(DisplayError::from));
            }
        }
        self.cursors = ConnectionCursors::default();

        if self.gray != NONE {
            note("gray stipple", server.free_pixmap(self.gray).map_err(DisplayError::from));
            self.gray = NONE;
        }

        self.icon_bitmap = None;
        note("bitmaps", self.bitmaps.free_all(server));
        note("connection", server.flush().map_err(DisplayError::from));
        info!("Display {} closed", self.name);
        first_error.map_or(Ok(()), Err)
    }

    /// Drop all state after the server went away, without any requests.
    pub(crate) fn abandon(&mut self) {
        self.bitmaps.abandon();
        self.icon_bitmap = None;
        self.wm_support = None;
        self.frames_attached = 0;
        warn!("Display {} lost", self.name);
    }
}

const ATOM_ATOM: Atom = 4;
const WINDOW_ATOM: Atom = 33;

fn dots_per_inch(pixels: u16, millimetres: u16) -> f64 {
    if millimetres == 0 {
        return 96.0;
    }
    pixels as f64 * 25.4 / millimetres as f64
}

/// Query the extensions the core can use. A protocol failure for one of them
/// only marks it absent.
fn detect_extensions(server: &mut dyn XServer) -> DisplayResult<Extensions> {
    let mut query = |name: &str| -> DisplayResult<Option<ExtensionInfo>> {
        match server.query_extension(name) {
            Ok(info) => Ok(info),
            Err(ServerError::Protocol(e)) => {
                warn!("Extension {} unusable: {}", name, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    };

    Ok(Extensions {
        xfixes: query("XFIXES")?,
        randr: query("RANDR")?,
        render: query("RENDER")?,
        shape: query("SHAPE")?,
        xinput: query("XInputExtension")?,
    })
}

fn discover_modifiers(server: &mut dyn XServer) -> Result<ModifierMasks, ServerError> {
    let keyboard = server.keyboard_mapping()?;
    let modifiers = server.modifier_mapping()?;
    Ok(ModifierMasks::discover(&keyboard, &modifiers))
}

/// The configured class/depth when the screen offers it, else the root visual.
fn select_visual(screen: &ScreenInfo, config: &crate::config::DisplayConfig) -> VisualInfo {
    let root = screen.visual(screen.root_visual).cloned().unwrap_or_else(|| VisualInfo {
        id: screen.root_visual,
        class: VisualClass::TrueColor,
        depth: screen.root_depth,
        red_mask: 0xff0000,
        green_mask: 0x00ff00,
        blue_mask: 0x0000ff,
        bits_per_rgb: 8,
        colormap_entries: 256,
    });

    let class = match config.visual_class.as_deref() {
        Some(name) => match VisualClass::from_name(name) {
            Some(class) => Some(class),
            None => {
                warn!("Unknown visual class {:?}, using default visual", name);
                return root;
            }
        },
        None => None,
    };
    if class.is_none() && config.visual_depth.is_none() {
        return root;
    }

    let wanted = |v: &&VisualInfo| {
        class.map(|c| v.class == c).unwrap_or(true) && config.visual_depth.map(|d| v.depth == d).unwrap_or(true)
    };
    if wanted(&&root) {
        return root;
    }
    match screen.visuals.iter().find(wanted) {
        Some(visual) => visual.clone(),
        None => {
            warn!(
                "No visual matches class {:?} depth {:?}, using default visual",
                class, config.visual_depth
            );
            root
        }
    }
}

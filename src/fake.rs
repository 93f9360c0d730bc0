//! In-memory display server for unit tests.
//!
//! Clones share state, so a test can hand one clone to a connection and keep
//! another to inspect call counts, inject errors and queue events.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::error::{ProtocolError, ServerError};
use crate::events::RawEvent;
use crate::server::*;

pub const ROOT: Window = 0x100;

#[derive(Debug)]
struct FakeState {
    calls: HashMap<&'static str, usize>,
    sequence: u64,
    next_id: u32,
    next_atom: Atom,
    atoms: HashMap<String, Atom>,
    named_colors: HashMap<String, Rgb16>,
    cells: Vec<Option<(Rgb16, u32)>>,
    pending_errors: Vec<ProtocolError>,
    events: VecDeque<RawEvent>,
    live: HashSet<u32>,
    freed: Vec<u32>,
    extensions: HashSet<String>,
    properties: HashMap<(Window, Atom), PropertyValue>,
    keyboard: KeyboardMapping,
    modifiers: ModifierMapping,
    copies: Vec<(Drawable, Drawable, u16, u16)>,
    fail_bitmaps: bool,
    failing: HashSet<&'static str>,
    pointer_hidden: bool,
}

#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Rc<RefCell<FakeState>>,
    screen: ScreenInfo,
}

fn truecolor_visual() -> VisualInfo {
    VisualInfo {
        id: 0x21,
        class: VisualClass::TrueColor,
        depth: 24,
        red_mask: 0xff0000,
        green_mask: 0x00ff00,
        blue_mask: 0x0000ff,
        bits_per_rgb: 8,
        colormap_entries: 256,
    }
}

fn pseudocolor_visual(entries: u16) -> VisualInfo {
    VisualInfo {
        id: 0x22,
        class: VisualClass::PseudoColor,
        depth: 8,
        red_mask: 0,
        green_mask: 0,
        blue_mask: 0,
        bits_per_rgb: 8,
        colormap_entries: entries,
    }
}

pub fn protocol_error(sequence: u64) -> ProtocolError {
    ProtocolError {
        code: 3,
        name: "Window".to_string(),
        sequence,
        bad_value: 0xdead,
        major_opcode: 18,
        minor_opcode: 0,
    }
}

impl FakeServer {
    /// TrueColor 24-bit screen
    pub fn new() -> Self {
        Self::with_visuals(truecolor_visual(), vec![pseudocolor_visual(16)])
    }

    /// PseudoColor screen with a colormap of `entries` cells
    pub fn pseudocolor(entries: u16) -> Self {
        Self::with_visuals(pseudocolor_visual(entries), vec![truecolor_visual()])
    }

    fn with_visuals(root_visual: VisualInfo, others: Vec<VisualInfo>) -> Self {
        let mut named_colors = HashMap::new();
        named_colors.insert("red".to_string(), Rgb16::new(0xffff, 0, 0));
        named_colors.insert("white".to_string(), Rgb16::new(0xffff, 0xffff, 0xffff));
        named_colors.insert("black".to_string(), Rgb16::new(0, 0, 0));
        named_colors.insert("gray50".to_string(), Rgb16::new(0x7f7f, 0x7f7f, 0x7f7f));

        let entries = if root_visual.class.is_mutable() {
            root_visual.colormap_entries as usize
        } else {
            0
        };
        let mut visuals = vec![root_visual.clone()];
        visuals.extend(others);

        let screen = ScreenInfo {
            number: 0,
            root: ROOT,
            width_px: 1920,
            height_px: 1080,
            width_mm: 508,
            height_mm: 286,
            root_depth: root_visual.depth,
            root_visual: root_visual.id,
            default_colormap: 0x20,
            black_pixel: 0,
            white_pixel: 0xffffff,
            visuals,
        };

        let state = FakeState {
            calls: HashMap::new(),
            sequence: 0,
            next_id: 0x40_0000,
            next_atom: 100,
            atoms: HashMap::new(),
            named_colors,
            cells: vec![None; entries],
            pending_errors: Vec::new(),
            events: VecDeque::new(),
            live: HashSet::new(),
            freed: Vec::new(),
            extensions: ["XFIXES", "RANDR", "RENDER"].iter().map(|s| s.to_string()).collect(),
            properties: HashMap::new(),
            keyboard: KeyboardMapping::default(),
            modifiers: ModifierMapping::default(),
            copies: Vec::new(),
            fail_bitmaps: false,
            failing: HashSet::new(),
            pointer_hidden: false,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
            screen,
        }
    }

    fn request(&self, name: &'static str) -> u64 {
        let mut state = self.state.borrow_mut();
        *state.calls.entry(name).or_insert(0) += 1;
        state.sequence += 1;
        state.sequence
    }

    /// Record a request that fails with a protocol error when `name` was
    /// passed to [`FakeServer::fail_requests`].
    fn fallible(&self, name: &'static str) -> Result<u64, ServerError> {
        let seq = self.request(name);
        if self.state.borrow().failing.contains(name) {
            return Err(ServerError::Protocol(protocol_error(seq)));
        }
        Ok(seq)
    }

    fn new_resource(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id);
        id
    }

    fn release(&self, id: u32) {
        let mut state = self.state.borrow_mut();
        state.live.remove(&id);
        state.freed.push(id);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.state.borrow().calls.get(name).copied().unwrap_or(0)
    }

    pub fn sequence(&self) -> u64 {
        self.state.borrow().sequence
    }

    pub fn define_atom(&self, name: &str) {
        let mut state = self.state.borrow_mut();
        if !state.atoms.contains_key(name) {
            state.next_atom += 1;
            let atom = state.next_atom;
            state.atoms.insert(name.to_string(), atom);
        }
    }

    /// Queue an asynchronous error against request `sequence`.
    pub fn inject_error(&self, sequence: u64) {
        self.state.borrow_mut().pending_errors.push(protocol_error(sequence));
    }

    /// Queue an error against the most recent request.
    pub fn fail_last_request(&self) {
        let sequence = self.sequence();
        self.inject_error(sequence);
    }

    pub fn push_event(&self, event: RawEvent) {
        self.state.borrow_mut().events.push_back(event);
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.state.borrow().live.contains(&id)
    }

    pub fn was_freed(&self, id: u32) -> bool {
        self.state.borrow().freed.contains(&id)
    }

    pub fn remove_extension(&self, name: &str) {
        self.state.borrow_mut().extensions.remove(name);
    }

    pub fn set_property(&self, window: Window, property: Atom, type_: Atom, data: &[u32]) {
        let value = PropertyValue {
            type_,
            format: 32,
            data: data.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        };
        self.state.borrow_mut().properties.insert((window, property), value);
    }

    pub fn property(&self, window: Window, property: Atom) -> Option<PropertyValue> {
        self.state.borrow().properties.get(&(window, property)).cloned()
    }

    pub fn set_keyboard(&self, keyboard: KeyboardMapping, modifiers: ModifierMapping) {
        let mut state = self.state.borrow_mut();
        state.keyboard = keyboard;
        state.modifiers = modifiers;
    }

    /// Occupy the first cells of the colormap with `colors`.
    pub fn fill_cells(&self, colors: &[Rgb16]) {
        let mut state = self.state.borrow_mut();
        for (cell, rgb) in state.cells.iter_mut().zip(colors) {
            *cell = Some((*rgb, 1));
        }
    }

    pub fn cell_refcount(&self, pixel: Pixel) -> u32 {
        self.state
            .borrow()
            .cells
            .get(pixel as usize)
            .and_then(|c| c.map(|(_, n)| n))
            .unwrap_or(0)
    }

    pub fn copies(&self) -> Vec<(Drawable, Drawable, u16, u16)> {
        self.state.borrow().copies.clone()
    }

    /// Make every later `name` request fail.
    pub fn fail_requests(&self, name: &'static str) {
        self.state.borrow_mut().failing.insert(name);
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn set_fail_bitmaps(&self, fail: bool) {
        self.state.borrow_mut().fail_bitmaps = fail;
    }

    pub fn pointer_hidden(&self) -> bool {
        self.state.borrow().pointer_hidden
    }
}

impl XServer for FakeServer {
    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle(7)
    }

    fn display_name(&self) -> &str {
        ":99"
    }

    fn screen(&self) -> &ScreenInfo {
        &self.screen
    }

    fn last_request(&self) -> u64 {
        self.sequence()
    }

    fn flush(&mut self) -> Result<(), ServerError> {
        Ok(())
    }

    fn sync(&mut self) -> Result<Vec<ProtocolError>, ServerError> {
        self.request("sync");
        Ok(std::mem::take(&mut self.state.borrow_mut().pending_errors))
    }

    fn poll_event(&mut self) -> Result<Option<RawEvent>, ServerError> {
        Ok(self.state.borrow_mut().events.pop_front())
    }

    fn intern_atoms(&mut self, names: &[&str], only_if_exists: bool) -> Result<Vec<Atom>, ServerError> {
        self.request("intern_atoms");
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if !only_if_exists {
                self.define_atom(name);
            }
            out.push(self.state.borrow().atoms.get(*name).copied().unwrap_or(NONE));
        }
        Ok(out)
    }

    fn query_extension(&mut self, name: &str) -> Result<Option<ExtensionInfo>, ServerError> {
        self.request("query_extension");
        Ok(self.state.borrow().extensions.contains(name).then_some(ExtensionInfo {
            major_opcode: 130,
            first_event: 90,
            first_error: 140,
            version: Some((1, 5)),
        }))
    }

    fn keyboard_mapping(&mut self) -> Result<KeyboardMapping, ServerError> {
        self.request("keyboard_mapping");
        Ok(self.state.borrow().keyboard.clone())
    }

    fn modifier_mapping(&mut self) -> Result<ModifierMapping, ServerError> {
        self.request("modifier_mapping");
        Ok(self.state.borrow().modifiers.clone())
    }

    fn get_property(
        &mut self,
        window: Window,
        property: Atom,
        _type: Atom,
        _max_words: u32,
    ) -> Result<Option<PropertyValue>, ServerError> {
        let seq = self.request("get_property");
        if window != ROOT && !self.is_live(window) && self.property(window, property).is_none() {
            return Err(ServerError::Protocol(protocol_error(seq)));
        }
        Ok(self.property(window, property))
    }

    fn change_property32(
        &mut self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), ServerError> {
        self.request("change_property");
        self.set_property(window, property, type_, data);
        Ok(())
    }

    fn create_colormap(&mut self, _visual: VisualId) -> Result<Colormap, ServerError> {
        self.request("create_colormap");
        Ok(self.new_resource())
    }

    fn lookup_color(&mut self, _cmap: Colormap, name: &str) -> Result<Option<Rgb16>, ServerError> {
        self.request("lookup_color");
        Ok(self.state.borrow().named_colors.get(&name.to_ascii_lowercase()).copied())
    }

    fn alloc_color(&mut self, _cmap: Colormap, rgb: Rgb16) -> Result<Option<(Pixel, Rgb16)>, ServerError> {
        self.request("alloc_color");
        let mut state = self.state.borrow_mut();
        if state.cells.is_empty() {
            let pixel = ((rgb.red as u32 >> 8) << 16) | ((rgb.green as u32 >> 8) << 8) | (rgb.blue as u32 >> 8);
            return Ok(Some((pixel, rgb)));
        }
        if let Some(index) = state.cells.iter().position(|c| matches!(c, Some((c, _)) if *c == rgb)) {
            if let Some((_, count)) = state.cells[index].as_mut() {
                *count += 1;
            }
            return Ok(Some((index as Pixel, rgb)));
        }
        match state.cells.iter().position(Option::is_none) {
            Some(index) => {
                state.cells[index] = Some((rgb, 1));
                Ok(Some((index as Pixel, rgb)))
            }
            None => Ok(None),
        }
    }

    fn query_colors(&mut self, _cmap: Colormap, pixels: &[Pixel]) -> Result<Vec<Rgb16>, ServerError> {
        self.request("query_colors");
        let state = self.state.borrow();
        Ok(pixels
            .iter()
            .map(|&p| {
                state
                    .cells
                    .get(p as usize)
                    .and_then(|c| c.map(|(rgb, _)| rgb))
                    .unwrap_or_default()
            })
            .collect())
    }

    fn free_colors(&mut self, _cmap: Colormap, pixels: &[Pixel]) -> Result<(), ServerError> {
        self.request("free_colors");
        let mut state = self.state.borrow_mut();
        for &pixel in pixels {
            if let Some(cell) = state.cells.get_mut(pixel as usize) {
                if let Some((_, count)) = cell.as_mut() {
                    *count -= 1;
                    if *count == 0 {
                        *cell = None;
                    }
                }
            }
        }
        Ok(())
    }

    fn create_bitmap(&mut self, _width: u16, _height: u16, _data: &[u8]) -> Result<Pixmap, ServerError> {
        let seq = self.request("create_bitmap");
        if self.state.borrow().fail_bitmaps {
            return Err(ServerError::Protocol(ProtocolError {
                code: 11,
                name: "Alloc".to_string(),
                ..protocol_error(seq)
            }));
        }
        Ok(self.new_resource())
    }

    fn create_pixmap(&mut self, _depth: u8, _drawable: Drawable, _w: u16, _h: u16) -> Result<Pixmap, ServerError> {
        self.fallible("create_pixmap")?;
        Ok(self.new_resource())
    }

    fn free_pixmap(&mut self, pixmap: Pixmap) -> Result<(), ServerError> {
        self.fallible("free_pixmap")?;
        self.release(pixmap);
        Ok(())
    }

    fn create_window(&mut self, _spec: &WindowSpec) -> Result<Window, ServerError> {
        self.request("create_window");
        Ok(self.new_resource())
    }

    fn destroy_window(&mut self, window: Window) -> Result<(), ServerError> {
        self.request("destroy_window");
        self.release(window);
        Ok(())
    }

    fn map_window(&mut self, _window: Window) -> Result<(), ServerError> {
        self.request("map_window");
        Ok(())
    }

    fn create_gc(&mut self, _drawable: Drawable, _values: GcValues) -> Result<Gcontext, ServerError> {
        self.fallible("create_gc")?;
        Ok(self.new_resource())
    }

    fn free_gc(&mut self, gc: Gcontext) -> Result<(), ServerError> {
        self.request("free_gc");
        self.release(gc);
        Ok(())
    }

    fn copy_area(
        &mut self,
        src: Drawable,
        dst: Drawable,
        _gc: Gcontext,
        width: u16,
        height: u16,
    ) -> Result<(), ServerError> {
        self.request("copy_area");
        self.state.borrow_mut().copies.push((src, dst, width, height));
        Ok(())
    }

    fn create_font_cursor(&mut self, _shape: u16) -> Result<Cursor, ServerError> {
        self.fallible("create_font_cursor")?;
        Ok(self.new_resource())
    }

    fn create_blank_cursor(&mut self) -> Result<Cursor, ServerError> {
        self.request("create_blank_cursor");
        Ok(self.new_resource())
    }

    fn free_cursor(&mut self, cursor: Cursor) -> Result<(), ServerError> {
        self.request("free_cursor");
        self.release(cursor);
        Ok(())
    }

    fn define_cursor(&mut self, _window: Window, _cursor: Cursor) -> Result<(), ServerError> {
        self.request("define_cursor");
        Ok(())
    }

    fn set_pointer_visible(&mut self, _window: Window, visible: bool) -> Result<(), ServerError> {
        self.request("set_pointer_visible");
        self.state.borrow_mut().pointer_hidden = !visible;
        Ok(())
    }
}

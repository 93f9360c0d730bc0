//! X11 Connection
//!
//! [`XServer`] over an x11rb `RustConnection`.
//!
//! Requests without a reply drop their cookie right away, so x11rb delivers
//! their errors as events. [`XServer::sync`] makes a round trip and hands
//! those errors back; other events read meanwhile are kept for
//! [`XServer::poll_event`].

use std::collections::VecDeque;
use std::os::unix::io::AsRawFd;
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ReplyError, ReplyOrIdError};
use x11rb::protocol::xproto::{
    self, ChangeWindowAttributesAux, ColormapAlloc, ConnectionExt as _, CreateGCAux, CreateWindowAux, EventMask,
    ImageFormat, ImageOrder, PropMode, Property, WindowClass,
};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::x11_utils::X11Error;

use crate::error::{ProtocolError, ServerError};
use crate::events::{NotifyDetail, RawEvent};
use crate::server::*;

/// Crossing event flag: the window is or contains the focus window
const CROSSING_FOCUS: u8 = 1 << 0;

pub struct X11Server {
    conn: RustConnection,
    display_name: String,
    screen: ScreenInfo,
    last_request: u64,
    events: VecDeque<RawEvent>,
    cursor_font: Option<xproto::Font>,
}

fn lost(err: impl std::fmt::Display) -> ServerError {
    ServerError::ConnectionLost(err.to_string())
}

fn id_error(err: ReplyOrIdError) -> ServerError {
    lost(err)
}

/// Rebuild the full sequence number of an error from its 16-bit wire value.
fn full_sequence(last_request: u64, wire: u16) -> u64 {
    let behind = (last_request as u16).wrapping_sub(wire) as u64;
    last_request.saturating_sub(behind)
}

fn protocol_error(last_request: u64, err: &X11Error) -> ProtocolError {
    ProtocolError {
        code: err.error_code,
        name: format!("{:?}", err.error_kind),
        sequence: full_sequence(last_request, err.sequence),
        bad_value: err.bad_value,
        major_opcode: err.major_opcode,
        minor_opcode: err.minor_opcode,
    }
}

fn reply_error(last_request: u64, err: ReplyError) -> ServerError {
    match err {
        ReplyError::X11Error(e) => ServerError::Protocol(protocol_error(last_request, &e)),
        ReplyError::ConnectionError(e) => lost(e),
    }
}

fn visual_class(class: xproto::VisualClass) -> VisualClass {
    match class {
        xproto::VisualClass::STATIC_GRAY => VisualClass::StaticGray,
        xproto::VisualClass::GRAY_SCALE => VisualClass::GrayScale,
        xproto::VisualClass::STATIC_COLOR => VisualClass::StaticColor,
        xproto::VisualClass::PSEUDO_COLOR => VisualClass::PseudoColor,
        xproto::VisualClass::TRUE_COLOR => VisualClass::TrueColor,
        _ => VisualClass::DirectColor,
    }
}

fn screen_info(number: usize, screen: &xproto::Screen) -> ScreenInfo {
    let visuals = screen
        .allowed_depths
        .iter()
        .flat_map(|depth| {
            depth.visuals.iter().map(move |v| VisualInfo {
                id: v.visual_id,
                class: visual_class(v.class),
                depth: depth.depth,
                red_mask: v.red_mask,
                green_mask: v.green_mask,
                blue_mask: v.blue_mask,
                bits_per_rgb: v.bits_per_rgb_value,
                colormap_entries: v.colormap_entries,
            })
        })
        .collect();

    ScreenInfo {
        number,
        root: screen.root,
        width_px: screen.width_in_pixels,
        height_px: screen.height_in_pixels,
        width_mm: screen.width_in_millimeters,
        height_mm: screen.height_in_millimeters,
        root_depth: screen.root_depth,
        root_visual: screen.root_visual,
        default_colormap: screen.default_colormap,
        black_pixel: screen.black_pixel,
        white_pixel: screen.white_pixel,
        visuals,
    }
}

/// Re-layout XBM rows (byte padded, least significant bit first) for a
/// server with the given scanline pad and bit order.
pub fn xbm_to_image(width: u16, height: u16, bits: &[u8], scanline_pad: u8, msb_first: bool) -> Vec<u8> {
    let src_stride = (width as usize + 7) / 8;
    let pad = (scanline_pad.max(8) / 8) as usize;
    let dst_stride = (src_stride + pad - 1) / pad * pad;

    let mut image = vec![0u8; dst_stride * height as usize];
    for (row, dst) in image.chunks_exact_mut(dst_stride).enumerate() {
        let src = bits.get(row * src_stride..(row + 1) * src_stride).unwrap_or(&[]);
        for (d, s) in dst.iter_mut().zip(src) {
            *d = if msb_first { s.reverse_bits() } else { *s };
        }
    }
    image
}

fn convert_event(last_request: u64, event: Event) -> RawEvent {
    match event {
        Event::Error(e) => RawEvent::Error(protocol_error(last_request, &e)),
        Event::FocusIn(e) => RawEvent::FocusIn {
            window: e.event,
            detail: NotifyDetail::from_raw(u8::from(e.detail)),
        },
        Event::FocusOut(e) => RawEvent::FocusOut {
            window: e.event,
            detail: NotifyDetail::from_raw(u8::from(e.detail)),
        },
        Event::EnterNotify(e) => RawEvent::Enter {
            window: e.event,
            detail: NotifyDetail::from_raw(u8::from(e.detail)),
            focus: e.same_screen_focus & CROSSING_FOCUS != 0,
            time: e.time,
        },
        Event::LeaveNotify(e) => RawEvent::Leave {
            window: e.event,
            detail: NotifyDetail::from_raw(u8::from(e.detail)),
            focus: e.same_screen_focus & CROSSING_FOCUS != 0,
            time: e.time,
        },
        Event::PropertyNotify(e) => RawEvent::PropertyNotify {
            window: e.window,
            atom: e.atom,
            time: e.time,
            deleted: e.state == Property::DELETE,
        },
        Event::SelectionNotify(e) => RawEvent::SelectionNotify {
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
            time: e.time,
        },
        Event::SelectionRequest(e) => RawEvent::SelectionRequest {
            owner: e.owner,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
            time: e.time,
        },
        Event::SelectionClear(e) => RawEvent::SelectionClear {
            owner: e.owner,
            selection: e.selection,
            time: e.time,
        },
        Event::ClientMessage(e) => RawEvent::ClientMessage {
            window: e.window,
            type_: e.type_,
            format: e.format,
            data: e.data.as_data32(),
        },
        Event::ConfigureNotify(e) => RawEvent::ConfigureNotify {
            window: e.window,
            x: e.x,
            y: e.y,
            width: e.width,
            height: e.height,
        },
        Event::KeyPress(e) => RawEvent::KeyPress {
            window: e.event,
            keycode: e.detail,
            state: u16::from(e.state),
            time: e.time,
        },
        Event::ButtonPress(e) => RawEvent::ButtonPress {
            window: e.event,
            button: e.detail,
            state: u16::from(e.state),
            x: e.event_x,
            y: e.event_y,
            time: e.time,
        },
        Event::ButtonRelease(e) => RawEvent::ButtonRelease {
            window: e.event,
            button: e.detail,
            state: u16::from(e.state),
            time: e.time,
        },
        Event::MotionNotify(e) => RawEvent::Motion {
            window: e.event,
            x: e.event_x,
            y: e.event_y,
            time: e.time,
        },
        _ => RawEvent::Other,
    }
}

impl X11Server {
    /// Connect to `name`, or `$DISPLAY` when `None`.
    pub fn connect(name: Option<&str>) -> Result<Self, ConnectError> {
        let (conn, screen_num) = RustConnection::connect(name)?;
        let display_name = name
            .map(str::to_string)
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_default();

        let setup = conn.setup();
        let screen = setup
            .roots
            .get(screen_num)
            .map(|s| screen_info(screen_num, s))
            .ok_or(ConnectError::InvalidScreen)?;
        info!(
            "Connected to X server {} (vendor {}, release {})",
            display_name,
            String::from_utf8_lossy(&setup.vendor),
            setup.release_number
        );

        Ok(Self {
            conn,
            display_name,
            screen,
            last_request: 0,
            events: VecDeque::new(),
            cursor_font: None,
        })
    }

    /// Read everything the connection has buffered. Errors are returned,
    /// other events queued.
    fn drain(&mut self) -> Result<Vec<ProtocolError>, ServerError> {
        let mut errors = Vec::new();
        while let Some(event) = self.conn.poll_for_event().map_err(lost)? {
            match convert_event(self.last_request, event) {
                RawEvent::Error(err) => errors.push(err),
                RawEvent::Other => {}
                other => self.events.push_back(other),
            }
        }
        Ok(errors)
    }

    fn cursor_font(&mut self) -> Result<xproto::Font, ServerError> {
        if let Some(font) = self.cursor_font {
            return Ok(font);
        }
        let font = self.conn.generate_id().map_err(lost)?;
        self.last_request = self.conn.open_font(font, b"cursor").map_err(lost)?.sequence_number();
        self.cursor_font = Some(font);
        Ok(font)
    }
}

impl XServer for X11Server {
    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.conn.stream().as_raw_fd())
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn screen(&self) -> &ScreenInfo {
        &self.screen
    }

    fn last_request(&self) -> u64 {
        self.last_request
    }

    fn flush(&mut self) -> Result<(), ServerError> {
        self.conn.flush().map_err(lost)
    }

    fn sync(&mut self) -> Result<Vec<ProtocolError>, ServerError> {
        let cookie = self.conn.get_input_focus().map_err(lost)?;
        self.last_request = cookie.sequence_number();
        cookie.reply().map_err(|e| reply_error(self.last_request, e))?;
        self.drain()
    }

    fn poll_event(&mut self) -> Result<Option<RawEvent>, ServerError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        while let Some(event) = self.conn.poll_for_event().map_err(lost)? {
            match convert_event(self.last_request, event) {
                RawEvent::Other => continue,
                event => return Ok(Some(event)),
            }
        }
        Ok(None)
    }

    fn intern_atoms(&mut self, names: &[&str], only_if_exists: bool) -> Result<Vec<Atom>, ServerError> {
        let mut cookies = Vec::with_capacity(names.len());
        for name in names {
            let cookie = self.conn.intern_atom(only_if_exists, name.as_bytes()).map_err(lost)?;
            self.last_request = cookie.sequence_number();
            cookies.push(cookie);
        }
        let last = self.last_request;
        cookies
            .into_iter()
            .map(|c| c.reply().map(|r| r.atom).map_err(|e| reply_error(last, e)))
            .collect()
    }

    fn query_extension(&mut self, name: &str) -> Result<Option<ExtensionInfo>, ServerError> {
        let cookie = self.conn.query_extension(name.as_bytes()).map_err(lost)?;
        self.last_request = cookie.sequence_number();
        let reply = cookie.reply().map_err(|e| reply_error(self.last_request, e))?;
        if !reply.present {
            return Ok(None);
        }

        // Some extensions refuse requests until their version was queried.
        let version = match name {
            "XFIXES" => {
                use x11rb::protocol::xfixes::ConnectionExt as _;
                let cookie = self.conn.xfixes_query_version(5, 0).map_err(lost)?;
                self.last_request = cookie.sequence_number();
                cookie.reply().ok().map(|r| (r.major_version, r.minor_version))
            }
            "RANDR" => {
                use x11rb::protocol::randr::ConnectionExt as _;
                let cookie = self.conn.randr_query_version(1, 6).map_err(lost)?;
                self.last_request = cookie.sequence_number();
                cookie.reply().ok().map(|r| (r.major_version, r.minor_version))
            }
            "RENDER" => {
                use x11rb::protocol::render::ConnectionExt as _;
                let cookie = self.conn.render_query_version(0, 11).map_err(lost)?;
                self.last_request = cookie.sequence_number();
                cookie.reply().ok().map(|r| (r.major_version, r.minor_version))
            }
            "SHAPE" => {
                use x11rb::protocol::shape::ConnectionExt as _;
                let cookie = self.conn.shape_query_version().map_err(lost)?;
                self.last_request = cookie.sequence_number();
                cookie
                    .reply()
                    .ok()
                    .map(|r| (r.major_version as u32, r.minor_version as u32))
            }
            "XInputExtension" => {
                let cookie = x11rb::protocol::xinput::xi_query_version(&self.conn, 2, 2).map_err(lost)?;
                self.last_request = cookie.sequence_number();
                cookie
                    .reply()
                    .ok()
                    .map(|r| (r.major_version as u32, r.minor_version as u32))
            }
            _ => None,
        };
        debug!("Extension {} present, version {:?}", name, version);

        Ok(Some(ExtensionInfo {
            major_opcode: reply.major_opcode,
            first_event: reply.first_event,
            first_error: reply.first_error,
            version,
        }))
    }

    fn keyboard_mapping(&mut self) -> Result<KeyboardMapping, ServerError> {
        let (min, max) = {
            let setup = self.conn.setup();
            (setup.min_keycode, setup.max_keycode)
        };
        let cookie = self
            .conn
            .get_keyboard_mapping(min, max.saturating_sub(min).saturating_add(1))
            .map_err(lost)?;
        self.last_request = cookie.sequence_number();
        let reply = cookie.reply().map_err(|e| reply_error(self.last_request, e))?;
        Ok(KeyboardMapping {
            min_keycode: min,
            keysyms_per_keycode: reply.keysyms_per_keycode,
            keysyms: reply.keysyms,
        })
    }

    fn modifier_mapping(&mut self) -> Result<ModifierMapping, ServerError> {
        let cookie = self.conn.get_modifier_mapping().map_err(lost)?;
        self.last_request = cookie.sequence_number();
        let reply = cookie.reply().map_err(|e| reply_error(self.last_request, e))?;
        Ok(ModifierMapping {
            keycodes_per_modifier: (reply.keycodes.len() / 8) as u8,
            keycodes: reply.keycodes,
        })
    }

    fn get_property(
        &mut self,
        window: Window,
        property: Atom,
        type_: Atom,
        max_words: u32,
    ) -> Result<Option<PropertyValue>, ServerError> {
        let cookie = self
            .conn
            .get_property(false, window, property, type_, 0, max_words)
            .map_err(lost)?;
        self.last_request = cookie.sequence_number();
        let reply = cookie.reply().map_err(|e| reply_error(self.last_request, e))?;
        if reply.type_ == NONE || (type_ != NONE && reply.type_ != type_) {
            return Ok(None);
        }
        Ok(Some(PropertyValue {
            type_: reply.type_,
            format: reply.format,
            data: reply.value,
        }))
    }

    fn change_property32(
        &mut self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), ServerError> {
        self.last_request = self
            .conn
            .change_property32(PropMode::REPLACE, window, property, type_, data)
            .map_err(lost)?
            .sequence_number();
        Ok(())
    }

    fn create_colormap(&mut self, visual: VisualId) -> Result<Colormap, ServerError> {
        let cmap = self.conn.generate_id().map_err(id_error)?;
        self.last_request = self
            .conn
            .create_colormap(ColormapAlloc::NONE, cmap, self.screen.root, visual)
            .map_err(lost)?
            .sequence_number();
        Ok(cmap)
    }

    fn lookup_color(&mut self, cmap: Colormap, name: &str) -> Result<Option<Rgb16>, ServerError> {
        let cookie = self.conn.lookup_color(cmap, name.as_bytes()).map_err(lost)?;
        self.last_request = cookie.sequence_number();
        match cookie.reply() {
            Ok(r) => Ok(Some(Rgb16::new(r.exact_red, r.exact_green, r.exact_blue))),
            Err(ReplyError::X11Error(e)) if e.error_kind == ErrorKind::Name => Ok(None),
            Err(e) => Err(reply_error(self.last_request, e)),
        }
    }

    fn alloc_color(&mut self, cmap: Colormap, rgb: Rgb16) -> Result<Option<(Pixel, Rgb16)>, ServerError> {
        let cookie = self
            .conn
            .alloc_color(cmap, rgb.red, rgb.green, rgb.blue)
            .map_err(lost)?;
        self.last_request = cookie.sequence_number();
        match cookie.reply() {
            Ok(r) => Ok(Some((r.pixel, Rgb16::new(r.red, r.green, r.blue)))),
            Err(ReplyError::X11Error(e)) if e.error_kind == ErrorKind::Alloc => Ok(None),
            Err(e) => Err(reply_error(self.last_request, e)),
        }
    }

    fn query_colors(&mut self, cmap: Colormap, pixels: &[Pixel]) -> Result<Vec<Rgb16>, ServerError> {
        let cookie = self.conn.query_colors(cmap, pixels).map_err(lost)?;
        self.last_request = cookie.sequence_number();
        let reply = cookie.reply().map_err(|e| reply_error(self.last_request, e))?;
        Ok(reply
            .colors
            .into_iter()
            .map(|c| Rgb16::new(c.red, c.green, c.blue))
            .collect())
    }

    fn free_colors(&mut self, cmap: Colormap, pixels: &[Pixel]) -> Result<(), ServerError> {
        self.last_request = self.conn.free_colors(cmap, 0, pixels).map_err(lost)?.sequence_number();
        Ok(())
    }

    fn create_bitmap(&mut self, width: u16, height: u16, data: &[u8]) -> Result<Pixmap, ServerError> {
        let (pad, msb_first) = {
            let setup = self.conn.setup();
            (
                setup.bitmap_format_scanline_pad,
                setup.bitmap_format_bit_order == ImageOrder::MSB_FIRST,
            )
        };
        let image = xbm_to_image(width, height, data, pad, msb_first);

        let pixmap = self.conn.generate_id().map_err(id_error)?;
        let gc = self.conn.generate_id().map_err(id_error)?;
        self.conn
            .create_pixmap(1, pixmap, self.screen.root, width, height)
            .map_err(lost)?;
        self.conn
            .create_gc(gc, pixmap, &CreateGCAux::new().foreground(1).background(0))
            .map_err(lost)?;
        self.conn
            .put_image(ImageFormat::XY_BITMAP, pixmap, gc, width, height, 0, 0, 0, 1, &image)
            .map_err(lost)?;
        self.last_request = self.conn.free_gc(gc).map_err(lost)?.sequence_number();
        Ok(pixmap)
    }

    fn create_pixmap(&mut self, depth: u8, drawable: Drawable, width: u16, height: u16) -> Result<Pixmap, ServerError> {
        let pixmap = self.conn.generate_id().map_err(id_error)?;
        self.last_request = self
            .conn
            .create_pixmap(depth, pixmap, drawable, width, height)
            .map_err(lost)?
            .sequence_number();
        Ok(pixmap)
    }

    fn free_pixmap(&mut self, pixmap: Pixmap) -> Result<(), ServerError> {
        self.last_request = self.conn.free_pixmap(pixmap).map_err(lost)?.sequence_number();
        Ok(())
    }

    fn create_window(&mut self, spec: &WindowSpec) -> Result<Window, ServerError> {
        let window = self.conn.generate_id().map_err(id_error)?;
        let aux = CreateWindowAux::new()
            .background_pixel(spec.background_pixel)
            .border_pixel(spec.border_pixel)
            .colormap(spec.colormap)
            .event_mask(EventMask::from(spec.event_mask));
        self.last_request = self
            .conn
            .create_window(
                spec.depth,
                window,
                spec.parent,
                spec.x,
                spec.y,
                spec.width,
                spec.height,
                spec.border_width,
                WindowClass::INPUT_OUTPUT,
                spec.visual,
                &aux,
            )
            .map_err(lost)?
            .sequence_number();
        Ok(window)
    }

    fn destroy_window(&mut self, window: Window) -> Result<(), ServerError> {
        self.last_request = self.conn.destroy_window(window).map_err(lost)?.sequence_number();
        Ok(())
    }

    fn map_window(&mut self, window: Window) -> Result<(), ServerError> {
        self.last_request = self.conn.map_window(window).map_err(lost)?.sequence_number();
        Ok(())
    }

    fn create_gc(&mut self, drawable: Drawable, values: GcValues) -> Result<Gcontext, ServerError> {
        let gc = self.conn.generate_id().map_err(id_error)?;
        let aux = CreateGCAux::new()
            .foreground(values.foreground)
            .background(values.background)
            .graphics_exposures(0);
        self.last_request = self.conn.create_gc(gc, drawable, &aux).map_err(lost)?.sequence_number();
        Ok(gc)
    }

    fn free_gc(&mut self, gc: Gcontext) -> Result<(), ServerError> {
        self.last_request = self.conn.free_gc(gc).map_err(lost)?.sequence_number();
        Ok(())
    }

    fn copy_area(
        &mut self,
        src: Drawable,
        dst: Drawable,
        gc: Gcontext,
        width: u16,
        height: u16,
    ) -> Result<(), ServerError> {
        self.last_request = self
            .conn
            .copy_area(src, dst, gc, 0, 0, 0, 0, width, height)
            .map_err(lost)?
            .sequence_number();
        Ok(())
    }

    fn create_font_cursor(&mut self, shape: u16) -> Result<Cursor, ServerError> {
        let font = self.cursor_font()?;
        let cursor = self.conn.generate_id().map_err(id_error)?;
        // The mask glyph follows its shape glyph in the cursor font.
        self.last_request = self
            .conn
            .create_glyph_cursor(cursor, font, font, shape, shape + 1, 0, 0, 0, 0xffff, 0xffff, 0xffff)
            .map_err(lost)?
            .sequence_number();
        Ok(cursor)
    }

    fn create_blank_cursor(&mut self) -> Result<Cursor, ServerError> {
        let pixmap = self.create_bitmap(1, 1, &[0])?;
        let cursor = self.conn.generate_id().map_err(id_error)?;
        self.conn
            .create_cursor(cursor, pixmap, pixmap, 0, 0, 0, 0, 0, 0, 0, 0)
            .map_err(lost)?;
        self.last_request = self.conn.free_pixmap(pixmap).map_err(lost)?.sequence_number();
        Ok(cursor)
    }

    fn free_cursor(&mut self, cursor: Cursor) -> Result<(), ServerError> {
        self.last_request = self.conn.free_cursor(cursor).map_err(lost)?.sequence_number();
        Ok(())
    }

    fn define_cursor(&mut self, window: Window, cursor: Cursor) -> Result<(), ServerError> {
        let aux = ChangeWindowAttributesAux::new().cursor(cursor);
        self.last_request = self
            .conn
            .change_window_attributes(window, &aux)
            .map_err(lost)?
            .sequence_number();
        Ok(())
    }

    fn set_pointer_visible(&mut self, window: Window, visible: bool) -> Result<(), ServerError> {
        use x11rb::protocol::xfixes::ConnectionExt as _;
        let cookie = if visible {
            self.conn.xfixes_show_cursor(window)
        } else {
            self.conn.xfixes_hide_cursor(window)
        };
        self.last_request = cookie.map_err(lost)?.sequence_number();
        Ok(())
    }
}

impl Drop for X11Server {
    fn drop(&mut self) {
        if let Some(font) = self.cursor_font.take() {
            if let Err(e) = self.conn.close_font(font) {
                warn!("Failed to close cursor font: {}", e);
            }
        }
        let _ = self.conn.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_rebuilt_from_wire_value() {
        assert_eq!(full_sequence(0x1_0005, 0x0003), 0x1_0003);
        assert_eq!(full_sequence(0x2_0001, 0xfffe), 0x1_fffe);
        assert_eq!(full_sequence(7, 7), 7);
    }

    #[test]
    fn xbm_rows_are_padded_to_scanline() {
        // 10 pixels wide: two bytes per XBM row, four per 32-bit scanline.
        let bits = [0x01, 0x02, 0x03, 0x00];
        let image = xbm_to_image(10, 2, &bits, 32, false);
        assert_eq!(image, vec![0x01, 0x02, 0, 0, 0x03, 0x00, 0, 0]);
    }

    #[test]
    fn xbm_bits_reversed_for_msb_first_servers() {
        let image = xbm_to_image(8, 1, &[0x01], 8, true);
        assert_eq!(image, vec![0x80]);
    }

    #[test]
    fn short_xbm_data_is_zero_filled() {
        let image = xbm_to_image(8, 2, &[0xff], 8, false);
        assert_eq!(image, vec![0xff, 0x00]);
    }
}

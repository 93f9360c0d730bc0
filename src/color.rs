//! Color Module
//!
//! Color name resolution and pixel allocation for one connection.
//!
//! On a TrueColor visual pixels are computed locally by bit-packing the
//! channels; nothing is allocated and nothing needs freeing. Other visuals go
//! through the server, and only mutable colormaps are reference counted.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{DisplayError, DisplayResult};
use crate::server::{Colormap, Pixel, Rgb16, VisualClass, VisualInfo, XServer};

/// How pixels are formed on the connection's visual
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorModel {
    pub class: VisualClass,
    pub depth: u8,
    pub colormap: Colormap,
    pub colormap_entries: u16,
    pub red_bits: u8,
    pub red_offset: u8,
    pub green_bits: u8,
    pub green_offset: u8,
    pub blue_bits: u8,
    pub blue_offset: u8,
    pub black_pixel: Pixel,
    pub white_pixel: Pixel,
}

/// Width and position of the run of set bits in `mask`
fn bits_and_offset(mask: u32) -> (u8, u8) {
    if mask == 0 {
        return (0, 0);
    }
    let offset = mask.trailing_zeros();
    let bits = (mask >> offset).trailing_ones();
    (bits as u8, offset as u8)
}

impl ColorModel {
    pub fn from_visual(visual: &VisualInfo, colormap: Colormap, black_pixel: Pixel, white_pixel: Pixel) -> Self {
        let (red_bits, red_offset) = bits_and_offset(visual.red_mask);
        let (green_bits, green_offset) = bits_and_offset(visual.green_mask);
        let (blue_bits, blue_offset) = bits_and_offset(visual.blue_mask);
        Self {
            class: visual.class,
            depth: visual.depth,
            colormap,
            colormap_entries: visual.colormap_entries,
            red_bits,
            red_offset,
            green_bits,
            green_offset,
            blue_bits,
            blue_offset,
            black_pixel,
            white_pixel,
        }
    }

    /// Whether colors must be allocated and freed on the server
    pub fn is_mutable(&self) -> bool {
        self.class.is_mutable()
    }

    /// Scale 16-bit channels down to the visual's widths and shift them into
    /// place.
    pub fn pack_truecolor(&self, rgb: Rgb16) -> Pixel {
        fn channel(value: u16, bits: u8, offset: u8) -> u32 {
            if bits == 0 {
                return 0;
            }
            ((value as u32) >> (16 - bits.min(16) as u32)) << offset
        }
        channel(rgb.red, self.red_bits, self.red_offset)
            | channel(rgb.green, self.green_bits, self.green_offset)
            | channel(rgb.blue, self.blue_bits, self.blue_offset)
    }

    /// Inverse of [`pack_truecolor`](Self::pack_truecolor), replicating the
    /// high bits into the low ones.
    pub fn unpack_truecolor(&self, pixel: Pixel) -> Rgb16 {
        fn channel(pixel: u32, bits: u8, offset: u8) -> u16 {
            if bits == 0 {
                return 0;
            }
            let max = (1u32 << bits) - 1;
            let value = (pixel >> offset) & max;
            (value * 0xffff / max) as u16
        }
        Rgb16 {
            red: channel(pixel, self.red_bits, self.red_offset),
            green: channel(pixel, self.green_bits, self.green_offset),
            blue: channel(pixel, self.blue_bits, self.blue_offset),
        }
    }
}

/// Result of a pixel allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub pixel: Pixel,
    /// Color actually stored in the cell
    pub rgb: Rgb16,
    /// False when the colormap was full and the closest existing color was
    /// substituted.
    pub exact: bool,
}

#[derive(Debug, Clone)]
struct ColorNameEntry {
    name: String,
    rgb: Rgb16,
}

/// Per-connection color state
#[derive(Debug)]
pub struct ColorCache {
    model: ColorModel,
    /// Append-only; first match wins
    names: Vec<ColorNameEntry>,
    /// Snapshot of the whole colormap, mutable visuals only
    cells: Option<Vec<Rgb16>>,
    /// Local reference counts for pixels allocated on a mutable colormap
    allocated: HashMap<Pixel, u32>,
}

impl ColorCache {
    pub fn new(model: ColorModel) -> Self {
        Self {
            model,
            names: Vec::new(),
            cells: None,
            allocated: HashMap::new(),
        }
    }

    pub fn model(&self) -> &ColorModel {
        &self.model
    }

    /// Number of cached name resolutions
    pub fn cached_names(&self) -> usize {
        self.names.len()
    }

    /// Resolve a color name or numeric spec to its channel values.
    pub fn resolve(&mut self, server: &mut dyn XServer, name: &str) -> DisplayResult<Rgb16> {
        if let Some(rgb) = parse_color_spec(name) {
            return Ok(rgb);
        }

        if let Some(entry) = self.names.iter().find(|e| e.name.eq_ignore_ascii_case(name)) {
            return Ok(entry.rgb);
        }

        match server.lookup_color(self.model.colormap, name)? {
            Some(rgb) => {
                debug!("Cached color {:?} = {:?}", name, rgb);
                self.names.push(ColorNameEntry {
                    name: name.to_string(),
                    rgb,
                });
                Ok(rgb)
            }
            None => Err(DisplayError::ColorNotFound(name.to_string())),
        }
    }

    /// Allocate a pixel for `rgb`.
    ///
    /// On a full mutable colormap the closest existing color is substituted
    /// and the allocation is reported as inexact rather than failing.
    pub fn allocate(&mut self, server: &mut dyn XServer, rgb: Rgb16) -> DisplayResult<Allocation> {
        if self.model.class == VisualClass::TrueColor {
            return Ok(Allocation {
                pixel: self.model.pack_truecolor(rgb),
                rgb,
                exact: true,
            });
        }

        if let Some((pixel, actual)) = server.alloc_color(self.model.colormap, rgb)? {
            self.note_allocated(pixel);
            return Ok(Allocation {
                pixel,
                rgb: actual,
                exact: true,
            });
        }

        if !self.model.is_mutable() {
            return Err(DisplayError::ColorAllocation(rgb.red, rgb.green, rgb.blue));
        }

        // The snapshot may be stale; retry once with a fresh one.
        for attempt in 0..2 {
            if attempt > 0 {
                self.refresh_cells(server)?;
            }
            let Some(nearest) = self.nearest_cell(server, rgb)? else {
                break;
            };
            if let Some((pixel, actual)) = server.alloc_color(self.model.colormap, nearest)? {
                warn!("Colormap full, substituted {:?} for {:?}", actual, rgb);
                self.note_allocated(pixel);
                return Ok(Allocation {
                    pixel,
                    rgb: actual,
                    exact: false,
                });
            }
        }

        Err(DisplayError::ColorAllocation(rgb.red, rgb.green, rgb.blue))
    }

    /// Resolve `name` and allocate it.
    pub fn allocate_named(&mut self, server: &mut dyn XServer, name: &str) -> DisplayResult<Allocation> {
        let rgb = self.resolve(server, name)?;
        self.allocate(server, rgb)
    }

    fn note_allocated(&mut self, pixel: Pixel) {
        if self.model.is_mutable() {
            *self.allocated.entry(pixel).or_insert(0) += 1;
        }
    }

    fn nearest_cell(&mut self, server: &mut dyn XServer, rgb: Rgb16) -> DisplayResult<Option<Rgb16>> {
        let cells = self.color_cells(server)?;
        let distance = |c: &Rgb16| {
            let dr = (rgb.red >> 8) as i64 - (c.red >> 8) as i64;
            let dg = (rgb.green >> 8) as i64 - (c.green >> 8) as i64;
            let db = (rgb.blue >> 8) as i64 - (c.blue >> 8) as i64;
            dr * dr + dg * dg + db * db
        };
        Ok(cells.iter().min_by_key(|c| distance(c)).copied())
    }

    /// Snapshot of every cell in a mutable colormap, fetched on first use.
    /// Immutable visuals have no snapshot and return an empty slice.
    pub fn color_cells(&mut self, server: &mut dyn XServer) -> DisplayResult<&[Rgb16]> {
        if !self.model.is_mutable() {
            return Ok(&[]);
        }
        if self.cells.is_none() {
            self.refresh_cells(server)?;
        }
        Ok(self.cells.as_deref().unwrap_or(&[]))
    }

    pub fn refresh_cells(&mut self, server: &mut dyn XServer) -> DisplayResult<()> {
        let pixels: Vec<Pixel> = (0..self.model.colormap_entries as Pixel).collect();
        let colors = server.query_colors(self.model.colormap, &pixels)?;
        debug!("Color cell snapshot refreshed ({} cells)", colors.len());
        self.cells = Some(colors);
        Ok(())
    }

    /// Channel values stored for `pixel`
    pub fn query(&mut self, server: &mut dyn XServer, pixel: Pixel) -> DisplayResult<Rgb16> {
        if self.model.class == VisualClass::TrueColor {
            return Ok(self.model.unpack_truecolor(pixel));
        }
        let colors = server.query_colors(self.model.colormap, &[pixel])?;
        Ok(colors.first().copied().unwrap_or_default())
    }

    /// Take another reference on an allocated pixel.
    pub fn copy_color(&mut self, server: &mut dyn XServer, pixel: Pixel) -> DisplayResult<Pixel> {
        if !self.model.is_mutable() {
            return Ok(pixel);
        }
        let rgb = self.query(server, pixel)?;
        match server.alloc_color(self.model.colormap, rgb)? {
            Some((copied, _)) => {
                self.note_allocated(copied);
                Ok(copied)
            }
            None => Err(DisplayError::ColorAllocation(rgb.red, rgb.green, rgb.blue)),
        }
    }

    /// Drop references taken by `allocate` or `copy_color`. Black and white
    /// belong to the server and are never freed.
    pub fn free_colors(&mut self, server: &mut dyn XServer, pixels: &[Pixel]) -> DisplayResult<()> {
        if !self.model.is_mutable() {
            return Ok(());
        }
        let to_free: Vec<Pixel> = pixels
            .iter()
            .copied()
            .filter(|&p| p != self.model.black_pixel && p != self.model.white_pixel)
            .collect();
        if to_free.is_empty() {
            return Ok(());
        }
        for pixel in &to_free {
            if let Some(count) = self.allocated.get_mut(pixel) {
                *count -= 1;
                if *count == 0 {
                    self.allocated.remove(pixel);
                }
            }
        }
        server.free_colors(self.model.colormap, &to_free)?;
        Ok(())
    }

    /// References this connection holds on `pixel`
    pub fn allocated_count(&self, pixel: Pixel) -> u32 {
        self.allocated.get(&pixel).copied().unwrap_or(0)
    }
}

fn scale_hex(digits: &str) -> Option<u16> {
    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(digits, 16).ok()?;
    let max = (1u32 << (4 * digits.len())) - 1;
    Some((value * 0xffff / max) as u16)
}

fn scale_intensity(text: &str) -> Option<u16> {
    let value: f64 = text.parse().ok()?;
    if !(0.0..=1.0).contains(&value) {
        return None;
    }
    Some((value * 65535.0).round() as u16)
}

/// Parse the numeric color forms that need no server: `#RGB` .. `#RRRRGGGGBBBB`,
/// `rgb:R/G/B` (1-4 hex digits each) and `rgbi:R/G/B` (intensities 0..1).
pub fn parse_color_spec(spec: &str) -> Option<Rgb16> {
    if let Some(hex) = spec.strip_prefix('#') {
        let n = hex.len() / 3;
        if n == 0 || n > 4 || hex.len() != n * 3 || !hex.is_ascii() {
            return None;
        }
        return Some(Rgb16 {
            red: scale_hex(&hex[0..n])?,
            green: scale_hex(&hex[n..2 * n])?,
            blue: scale_hex(&hex[2 * n..])?,
        });
    }

    let (rest, parse): (&str, fn(&str) -> Option<u16>) = if let Some(rest) = spec.strip_prefix("rgb:") {
        (rest, scale_hex)
    } else if let Some(rest) = spec.strip_prefix("rgbi:") {
        (rest, scale_intensity)
    } else {
        return None;
    };

    let mut parts = rest.split('/');
    let rgb = Rgb16 {
        red: parse(parts.next()?)?,
        green: parse(parts.next()?)?,
        blue: parse(parts.next()?)?,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(rgb)
}

//! Bitmap Module
//!
//! Reference-counted depth-1 pixmaps shared by every frame on a connection,
//! used for icons and stipples. Identical sources are loaded once.
//!
//! Records live in an arena; a slot whose count drops to zero goes on a free
//! list and is handed out again before the arena grows.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{DisplayError, DisplayResult, ServerError};
use crate::server::{Pixmap, XServer};

/// Index of a record in a connection's bitmap table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitmapId(pub usize);

/// Where a bitmap's bits come from; also the de-duplication key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitmapSource {
    /// XBM file on disk
    File(PathBuf),
    /// Bits in XBM layout: rows padded to whole bytes, least significant bit first
    Data { width: u16, height: u16, bits: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct BitmapRecord {
    pub pixmap: Pixmap,
    pub mask: Option<Pixmap>,
    pub source: BitmapSource,
    pub refcount: u32,
    pub width: u16,
    pub height: u16,
    pub depth: u8,
}

/// Per-connection bitmap registry
#[derive(Debug, Default)]
pub struct BitmapTable {
    slots: Vec<Option<BitmapRecord>>,
    free: Vec<usize>,
}

impl BitmapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a bitmap for `source`, loading it on first use.
    pub fn acquire(&mut self, server: &mut dyn XServer, source: BitmapSource) -> DisplayResult<BitmapId> {
        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().map(|r| r.source == source).unwrap_or(false))
        {
            if let Some(record) = self.slots[index].as_mut() {
                record.refcount += 1;
                debug!("Bitmap {} shared ({} refs)", index, record.refcount);
            }
            return Ok(BitmapId(index));
        }

        let (width, height, bits) = match &source {
            BitmapSource::File(path) => {
                let image = read_xbm_file(path)?;
                (image.width, image.height, image.bits)
            }
            BitmapSource::Data { width, height, bits } => {
                let needed = row_bytes(*width) * *height as usize;
                if bits.len() < needed {
                    return Err(DisplayError::BitmapAllocation(format!(
                        "{}x{} bitmap needs {} bytes, got {}",
                        width,
                        height,
                        needed,
                        bits.len()
                    )));
                }
                (*width, *height, bits.clone())
            }
        };

        let pixmap = match server.create_bitmap(width, height, &bits) {
            Ok(pixmap) => pixmap,
            Err(ServerError::Protocol(err)) => return Err(DisplayError::BitmapAllocation(err.to_string())),
            Err(err) => return Err(err.into()),
        };

        let record = BitmapRecord {
            pixmap,
            mask: None,
            source,
            refcount: 1,
            width,
            height,
            depth: 1,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(record);
                index
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        debug!("Bitmap {} created ({}x{})", index, width, height);
        Ok(BitmapId(index))
    }

    /// Take another reference on an existing bitmap.
    pub fn share(&mut self, id: BitmapId) -> DisplayResult<BitmapId> {
        let record = self.record_mut(id)?;
        record.refcount += 1;
        Ok(id)
    }

    /// Drop one reference. The pixmap and its mask are freed with the last one.
    pub fn release(&mut self, server: &mut dyn XServer, id: BitmapId) -> DisplayResult<()> {
        let record = self.record_mut(id)?;
        record.refcount -= 1;
        if record.refcount > 0 {
            return Ok(());
        }

        match self.slots[id.0].take() {
            Some(record) => {
                self.free.push(id.0);
                let result = free_record(server, &record);
                debug!("Bitmap {} freed", id.0);
                result
            }
            None => Ok(()),
        }
    }

    /// Attach a mask pixmap, freeing any previous one.
    pub fn set_mask(&mut self, server: &mut dyn XServer, id: BitmapId, mask: Pixmap) -> DisplayResult<()> {
        let record = self.record_mut(id)?;
        if let Some(old) = record.mask.replace(mask) {
            server.free_pixmap(old)?;
        }
        Ok(())
    }

    pub fn get(&self, id: BitmapId) -> Option<&BitmapRecord> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn refcount(&self, id: BitmapId) -> u32 {
        self.get(id).map(|r| r.refcount).unwrap_or(0)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free every pixmap regardless of reference counts. Used on close.
    /// Every record is attempted; the first failure is returned.
    pub fn free_all(&mut self, server: &mut dyn XServer) -> DisplayResult<()> {
        let mut first_error: Option<DisplayError> = None;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(record) = slot.take() {
                if record.refcount > 0 {
                    warn!("Bitmap {} still has {} reference(s) at close", index, record.refcount);
                }
                if let Err(e) = free_record(server, &record) {
                    warn!("Failed to free bitmap {}: {}", index, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.slots.clear();
        self.free.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Forget every record without touching the server
    pub fn abandon(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    fn record_mut(&mut self, id: BitmapId) -> DisplayResult<&mut BitmapRecord> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(DisplayError::UnknownBitmap(id.0))
    }
}

/// Free a record's pixmap and mask. The mask is freed even when the
/// pixmap is refused.
fn free_record(server: &mut dyn XServer, record: &BitmapRecord) -> DisplayResult<()> {
    let pixmap = server.free_pixmap(record.pixmap);
    let mask = match record.mask {
        Some(mask) => server.free_pixmap(mask),
        None => Ok(()),
    };
    pixmap.and(mask).map_err(DisplayError::from)
}

fn row_bytes(width: u16) -> usize {
    (width as usize + 7) / 8
}

/// Decoded XBM image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XbmImage {
    pub width: u16,
    pub height: u16,
    pub bits: Vec<u8>,
}

fn read_xbm_file(path: &Path) -> DisplayResult<XbmImage> {
    let text = fs::read_to_string(path).map_err(|e| DisplayError::BitmapFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_xbm(&text).map_err(|reason| DisplayError::BitmapFile {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse the `#define NAME_width`/`NAME_height` lines and the hex byte array
/// of an XBM file.
pub fn parse_xbm(text: &str) -> Result<XbmImage, String> {
    let mut width = None;
    let mut height = None;

    for line in text.lines() {
        let mut words = line.split_whitespace();
        if words.next() != Some("#define") {
            continue;
        }
        let (Some(name), Some(value)) = (words.next(), words.next()) else {
            continue;
        };
        let value: u16 = match value.parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if name.ends_with("_width") {
            width = Some(value);
        } else if name.ends_with("_height") {
            height = Some(value);
        }
    }

    let width = width.ok_or("missing width")?;
    let height = height.ok_or("missing height")?;

    let start = text.find('{').ok_or("missing data")?;
    let end = text[start..].find('}').map(|e| start + e).ok_or("unterminated data")?;

    let bits = text[start + 1..end]
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            let hex = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")).unwrap_or(t);
            u8::from_str_radix(hex, 16).map_err(|_| format!("bad byte {:?}", t))
        })
        .collect::<Result<Vec<u8>, String>>()?;

    let needed = row_bytes(width) * height as usize;
    if bits.len() < needed {
        return Err(format!("expected {} bytes, found {}", needed, bits.len()));
    }

    Ok(XbmImage { width, height, bits })
}

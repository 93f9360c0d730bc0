//! Flip Module
//!
//! Decides when dirty frames publish their back buffers. Frames inside an
//! update (between `begin_update` and `end_update`) are left alone so a
//! partially drawn picture never reaches the screen.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::display::DisplayConnection;
use crate::error::DisplayResult;
use crate::frame::{FrameId, FrameSet};

#[derive(Debug, Default)]
pub struct BufferFlipScheduler {
    updates: HashMap<FrameId, u32>,
}

impl BufferFlipScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start drawing a frame. Updates nest.
    pub fn begin_update(&mut self, frame: FrameId) {
        *self.updates.entry(frame).or_insert(0) += 1;
    }

    /// Finish drawing. Returns true when the outermost update ended.
    pub fn end_update(&mut self, frame: FrameId) -> bool {
        match self.updates.get_mut(&frame) {
            Some(depth) if *depth > 1 => {
                *depth -= 1;
                false
            }
            Some(_) => {
                self.updates.remove(&frame);
                true
            }
            None => {
                warn!("end_update for frame {} without begin_update", frame.0);
                false
            }
        }
    }

    pub fn in_update(&self, frame: FrameId) -> bool {
        self.updates.contains_key(&frame)
    }

    /// Drop state for a destroyed frame.
    pub fn forget(&mut self, frame: FrameId) {
        self.updates.remove(&frame);
    }

    /// Flip every dirty frame on `conn` that is not being drawn, then flush.
    ///
    /// Returns the number of frames whose back buffer was copied.
    pub fn flip_pending(&self, conn: &mut DisplayConnection, frames: &mut FrameSet) -> DisplayResult<usize> {
        let handle = conn.handle();
        let mut flipped = 0;
        for frame in frames.iter_mut() {
            if frame.connection() != handle || !frame.need_flip() || self.in_update(frame.id()) {
                continue;
            }
            if frame.flip(conn)? {
                flipped += 1;
            }
        }
        if flipped > 0 {
            debug!("Flipped {} frame(s) on {}", flipped, handle);
            conn.flush()?;
        }
        Ok(flipped)
    }
}

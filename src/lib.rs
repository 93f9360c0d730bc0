//! xframe
//!
//! Per-display resource core for X11 frame windows: caches shared by every
//! frame on a connection (atoms, colors, bitmaps), protocol error trapping,
//! double-buffered frame surfaces and the routing of focus, crossing,
//! selection and window manager events back to the frames they concern.

pub mod atoms;
pub mod bitmap;
pub mod color;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod flip;
pub mod focus;
pub mod frame;
pub mod modifiers;
pub mod registry;
pub mod scrollbar;
pub mod selection;
pub mod server;
pub mod trap;
pub mod wm_hints;
pub mod x11;
pub mod x11_async;

#[cfg(test)]
mod fake;

pub use config::Config;
pub use display::DisplayConnection;
pub use error::{DisplayError, DisplayResult, ProtocolError, ServerError};
pub use events::{EventOutcome, EventRouter, RawEvent};
pub use flip::BufferFlipScheduler;
pub use frame::{FrameGeometry, FrameId, FrameSet, FrameSurface};
pub use registry::DisplayRegistry;
pub use server::{ConnectionHandle, XServer};

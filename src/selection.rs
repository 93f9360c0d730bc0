//! Selection Module
//!
//! Correlates selection protocol events with the frame they concern. Only
//! correlation lives here; converting and transferring data is the job of the
//! [`SelectionHandler`] the host supplies.

use std::collections::HashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::events::RawEvent;
use crate::frame::{FrameId, FrameSet};
use crate::server::{Atom, ConnectionHandle, Timestamp, Window, NONE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    PropertyNotify { deleted: bool },
    Notify,
    Request,
    Clear,
}

/// One selection protocol event, built when it arrives and consumed by the
/// handler before the next one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEvent {
    pub connection: ConnectionHandle,
    pub kind: SelectionKind,
    /// Window the event was delivered for
    pub window: Window,
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    pub property: Atom,
    pub time: Timestamp,
}

/// Entry points of the selection protocol layer
pub trait SelectionHandler {
    fn property_notify(&mut self, frame: FrameId, event: &SelectionEvent);

    fn selection_notify(&mut self, frame: FrameId, event: &SelectionEvent);

    fn selection_request(&mut self, frame: FrameId, event: &SelectionEvent);

    fn selection_clear(&mut self, frame: FrameId, event: &SelectionEvent);
}

/// Handler that drops everything, for hosts without selection support
#[derive(Debug, Default)]
pub struct NoSelections;

impl SelectionHandler for NoSelections {
    fn property_notify(&mut self, _frame: FrameId, _event: &SelectionEvent) {}
    fn selection_notify(&mut self, _frame: FrameId, _event: &SelectionEvent) {}
    fn selection_request(&mut self, _frame: FrameId, _event: &SelectionEvent) {}
    fn selection_clear(&mut self, _frame: FrameId, _event: &SelectionEvent) {}
}

#[derive(Debug, Default)]
pub struct SelectionEventRouter {
    /// Foreign windows taking part in a transfer, and the frame doing it
    pending: HashMap<(ConnectionHandle, Window), FrameId>,
}

impl SelectionEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events for `window` to `frame` until [`forget`](Self::forget)
    /// is called, e.g. property changes on a requestor during an incremental
    /// transfer.
    pub fn expect(&mut self, connection: ConnectionHandle, window: Window, frame: FrameId) {
        self.pending.insert((connection, window), frame);
    }

    pub fn forget(&mut self, connection: ConnectionHandle, window: Window) {
        self.pending.remove(&(connection, window));
    }

    /// Drop every pending transfer of a frame that is going away.
    pub fn forget_frame(&mut self, frame: FrameId) {
        self.pending.retain(|_, f| *f != frame);
    }

    /// Drop every pending transfer on a connection that went away.
    pub fn forget_connection(&mut self, connection: ConnectionHandle) {
        self.pending.retain(|(c, _), _| *c != connection);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Build the structured event for a raw selection event. `None` for
    /// events of other categories.
    pub fn translate(connection: ConnectionHandle, event: &RawEvent) -> Option<SelectionEvent> {
        let event = match *event {
            RawEvent::PropertyNotify {
                window,
                atom,
                time,
                deleted,
            } => SelectionEvent {
                connection,
                kind: SelectionKind::PropertyNotify { deleted },
                window,
                requestor: window,
                selection: NONE,
                target: NONE,
                property: atom,
                time,
            },
            RawEvent::SelectionNotify {
                requestor,
                selection,
                target,
                property,
                time,
            } => SelectionEvent {
                connection,
                kind: SelectionKind::Notify,
                window: requestor,
                requestor,
                selection,
                target,
                property,
                time,
            },
            RawEvent::SelectionRequest {
                owner,
                requestor,
                selection,
                target,
                property,
                time,
            } => SelectionEvent {
                connection,
                kind: SelectionKind::Request,
                window: owner,
                requestor,
                selection,
                target,
                // Obsolete clients leave the property unset.
                property: if property == NONE { target } else { property },
                time,
            },
            RawEvent::SelectionClear { owner, selection, time } => SelectionEvent {
                connection,
                kind: SelectionKind::Clear,
                window: owner,
                requestor: NONE,
                selection,
                target: NONE,
                property: NONE,
                time,
            },
            _ => return None,
        };
        Some(event)
    }

    /// Dispatch a selection event to the frame it concerns.
    ///
    /// Malformed events and events for windows no frame owns are dropped.
    pub fn route(
        &self,
        connection: ConnectionHandle,
        frames: &FrameSet,
        event: &RawEvent,
        handler: &mut dyn SelectionHandler,
    ) -> Option<(FrameId, SelectionEvent)> {
        let event = Self::translate(connection, event)?;

        let malformed = match event.kind {
            SelectionKind::PropertyNotify { .. } => event.property == NONE,
            SelectionKind::Clear => event.selection == NONE,
            SelectionKind::Notify | SelectionKind::Request => event.selection == NONE || event.target == NONE,
        };
        if malformed {
            warn!("Dropping malformed selection event {:?}", event);
            return None;
        }

        let frame = self
            .pending
            .get(&(connection, event.window))
            .copied()
            .filter(|id| frames.get(*id).is_some())
            .or_else(|| frames.find_by_window(connection, event.window));
        let Some(frame) = frame else {
            if !matches!(event.kind, SelectionKind::PropertyNotify { .. }) {
                warn!(
                    "Selection event for unknown window 0x{:x} on {}",
                    event.window, connection
                );
            }
            return None;
        };

        debug!("Selection {:?} for frame {}", event.kind, frame.0);
        match event.kind {
            SelectionKind::PropertyNotify { .. } => handler.property_notify(frame, &event),
            SelectionKind::Notify => handler.selection_notify(frame, &event),
            SelectionKind::Request => handler.selection_request(frame, &event),
            SelectionKind::Clear => handler.selection_clear(frame, &event),
        }
        Some((frame, event))
    }
}

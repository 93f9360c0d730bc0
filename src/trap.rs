//! Error traps
//!
//! The server reports errors asynchronously and, left alone, fatally. A trap
//! lets a caller issue a batch of requests that may fail and inspect the
//! outcome locally. Traps nest per connection; an error is attributed to the
//! innermost trap that was already open when the failing request was issued,
//! by comparing sequence numbers rather than arrival order.

use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{debug, error};

use crate::display::DisplayConnection;
use crate::error::{DisplayResult, ProtocolError};

/// Custom handler: receives each trapped error and the label passed to `check`
pub type TrapHandler = Box<dyn FnMut(&ProtocolError, &str)>;

struct Trap {
    /// First request sequence covered by this trap
    start: u64,
    handler: Option<TrapHandler>,
    errors: Vec<ProtocolError>,
}

impl fmt::Debug for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trap")
            .field("start", &self.start)
            .field("custom_handler", &self.handler.is_some())
            .field("errors", &self.errors)
            .finish()
    }
}

/// Stack of open traps for one connection
#[derive(Debug, Default)]
pub struct ErrorTraps {
    stack: Vec<Trap>,
    /// Highest request sequence known to be acknowledged by the server
    synced_through: u64,
}

/// What `check` decided about the innermost trap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Clean,
    /// Errors went to the custom handler
    Handled(usize),
    /// No custom handler; the first error is returned to the caller
    Failed(ProtocolError),
}

impl ErrorTraps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a trap covering every request after `last_request`.
    pub fn begin(&mut self, last_request: u64, handler: Option<TrapHandler>) {
        debug!("Error trap {} opened after request {}", self.stack.len() + 1, last_request);
        self.stack.push(Trap {
            start: last_request + 1,
            handler,
            errors: Vec::new(),
        });
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_active(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Whether a round trip is needed before the recorded errors are complete
    pub fn needs_sync(&self, last_request: u64) -> bool {
        last_request > self.synced_through
    }

    pub fn mark_synced(&mut self, through: u64) {
        self.synced_through = self.synced_through.max(through);
    }

    /// Attribute `err` to the innermost trap open when its request was issued.
    ///
    /// Returns the error back when no trap covers it.
    pub fn record(&mut self, err: ProtocolError) -> Option<ProtocolError> {
        match self.stack.iter_mut().rev().find(|t| t.start <= err.sequence) {
            Some(trap) => {
                debug!("Trapped protocol error: {}", err);
                trap.errors.push(err);
                None
            }
            None => Some(err),
        }
    }

    /// Whether the innermost trap has recorded an error
    pub fn had_errors(&self) -> bool {
        self.stack.last().map(|t| !t.errors.is_empty()).unwrap_or(false)
    }

    pub fn first_error(&self) -> Option<&ProtocolError> {
        self.stack.last().and_then(|t| t.errors.first())
    }

    /// Forget the errors recorded by the innermost trap.
    pub fn clear(&mut self) {
        if let Some(trap) = self.stack.last_mut() {
            trap.errors.clear();
        }
    }

    /// Surface the innermost trap's errors through its handler, or report the
    /// first one when it has none. Recorded errors are consumed either way.
    pub fn surface(&mut self, label: &str) -> CheckOutcome {
        let Some(trap) = self.stack.last_mut() else {
            return CheckOutcome::Clean;
        };
        if trap.errors.is_empty() {
            return CheckOutcome::Clean;
        }
        let errors = std::mem::take(&mut trap.errors);
        match trap.handler.as_mut() {
            Some(handler) => {
                for err in &errors {
                    handler(err, label);
                }
                CheckOutcome::Handled(errors.len())
            }
            None => {
                let mut errors = errors.into_iter();
                match errors.next() {
                    Some(first) => CheckOutcome::Failed(first),
                    None => CheckOutcome::Clean,
                }
            }
        }
    }

    /// Close the innermost trap, restoring the one below it.
    pub fn end(&mut self) {
        if let Some(trap) = self.stack.pop() {
            if !trap.errors.is_empty() {
                debug!(
                    "Error trap closed with {} unchecked error(s), first: {}",
                    trap.errors.len(),
                    trap.errors[0]
                );
            }
        }
    }
}

/// Scoped trap. Ends the trap when dropped, on every exit path.
///
/// Derefs to the connection so requests can be issued through the guard, and
/// a nested trap is just another `trap()` call on it.
pub struct TrapGuard<'a> {
    conn: &'a mut DisplayConnection,
    ended: bool,
}

impl<'a> TrapGuard<'a> {
    pub(crate) fn new(conn: &'a mut DisplayConnection) -> Self {
        Self { conn, ended: false }
    }

    pub fn check(&mut self, label: &str) -> DisplayResult<()> {
        self.conn.check_errors(label)
    }

    pub fn had_errors(&mut self) -> DisplayResult<bool> {
        self.conn.had_errors()
    }

    /// End the trap, waiting for outstanding requests first.
    pub fn end(mut self) -> DisplayResult<()> {
        self.ended = true;
        self.conn.end_trap()
    }

    /// End the trap right after a `check`, without another round trip.
    pub fn end_after_check(mut self) {
        self.ended = true;
        self.conn.end_trap_after_check();
    }
}

impl Deref for TrapGuard<'_> {
    type Target = DisplayConnection;

    fn deref(&self) -> &DisplayConnection {
        self.conn
    }
}

impl DerefMut for TrapGuard<'_> {
    fn deref_mut(&mut self) -> &mut DisplayConnection {
        self.conn
    }
}

impl Drop for TrapGuard<'_> {
    fn drop(&mut self) {
        if !self.ended {
            if let Err(e) = self.conn.end_trap() {
                error!("Failed to close error trap: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::protocol_error;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_handler(log: &Rc<RefCell<Vec<(u64, String)>>>) -> TrapHandler {
        let log = log.clone();
        Box::new(move |err: &ProtocolError, label: &str| log.borrow_mut().push((err.sequence, label.to_string())))
    }

    #[test]
    fn error_is_attributed_by_sequence_not_arrival() {
        let mut traps = ErrorTraps::new();
        traps.begin(0, None); // outer covers 1..
        traps.begin(10, None); // inner covers 11..

        // Request 4 was issued before the inner trap opened.
        assert!(traps.record(protocol_error(4)).is_none());
        assert!(!traps.had_errors());

        traps.end();
        assert!(traps.had_errors());
        assert_eq!(traps.first_error().map(|e| e.sequence), Some(4));
    }

    #[test]
    fn error_before_any_trap_is_untrapped() {
        let mut traps = ErrorTraps::new();
        traps.begin(5, None);
        let err = traps.record(protocol_error(3));
        assert_eq!(err.map(|e| e.sequence), Some(3));
    }

    #[test]
    fn nested_end_restores_outer_handler() {
        let outer_log = Rc::new(RefCell::new(Vec::new()));
        let inner_log = Rc::new(RefCell::new(Vec::new()));
        let mut traps = ErrorTraps::new();

        traps.begin(0, Some(recording_handler(&outer_log)));
        traps.begin(2, Some(recording_handler(&inner_log)));
        traps.end();

        // Issued after the inner trap ended, before the outer one did.
        assert!(traps.record(protocol_error(5)).is_none());
        assert_eq!(traps.surface("outer"), CheckOutcome::Handled(1));

        assert_eq!(outer_log.borrow().as_slice(), &[(5, "outer".to_string())]);
        assert!(inner_log.borrow().is_empty());
    }

    #[test]
    fn surface_without_handler_reports_first_error() {
        let mut traps = ErrorTraps::new();
        traps.begin(0, None);
        traps.record(protocol_error(2));
        traps.record(protocol_error(3));

        assert_eq!(traps.surface("set_wm_hints"), CheckOutcome::Failed(protocol_error(2)));
        assert!(!traps.had_errors());
        assert_eq!(traps.surface("set_wm_hints"), CheckOutcome::Clean);
    }

    #[test]
    fn clear_discards_recorded_errors() {
        let mut traps = ErrorTraps::new();
        traps.begin(0, None);
        traps.record(protocol_error(1));
        traps.clear();
        assert!(!traps.had_errors());
    }

    #[test]
    fn sync_bookkeeping() {
        let mut traps = ErrorTraps::new();
        assert!(traps.needs_sync(3));
        traps.mark_synced(3);
        assert!(!traps.needs_sync(3));
        traps.mark_synced(1);
        assert!(!traps.needs_sync(3));
        assert!(traps.needs_sync(4));
    }
}

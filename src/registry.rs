//! Registry of open display connections, owned by the host application and
//! passed to whatever needs to find a connection by its handle.

use tracing::{error, info};

use crate::config::Config;
use crate::display::DisplayConnection;
use crate::error::{DisplayError, DisplayResult};
use crate::frame::FrameSet;
use crate::server::ConnectionHandle;

#[derive(Debug, Default)]
pub struct DisplayRegistry {
    connections: Vec<DisplayConnection>,
    next_x_id: u32,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a display and register the connection.
    pub fn open(&mut self, name: Option<&str>, config: &Config) -> DisplayResult<ConnectionHandle> {
        let conn = DisplayConnection::connect(name, config)?;
        self.add(conn)
    }

    /// Register an opened connection, giving it the next logical id.
    pub fn add(&mut self, mut conn: DisplayConnection) -> DisplayResult<ConnectionHandle> {
        let handle = conn.handle();
        if self.find_by_handle(handle).is_some() {
            return Err(DisplayError::Connect {
                name: conn.name().to_string(),
                reason: format!("connection {} is already registered", handle),
            });
        }
        self.next_x_id += 1;
        conn.set_x_id(self.next_x_id);
        info!("Registered display {} as {} (id {})", conn.name(), handle, self.next_x_id);
        self.connections.push(conn);
        Ok(handle)
    }

    pub fn find_by_handle(&self, handle: ConnectionHandle) -> Option<&DisplayConnection> {
        self.connections.iter().find(|c| c.handle() == handle)
    }

    pub fn find_by_handle_mut(&mut self, handle: ConnectionHandle) -> Option<&mut DisplayConnection> {
        self.connections.iter_mut().find(|c| c.handle() == handle)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&DisplayConnection> {
        self.connections.iter().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DisplayConnection> {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DisplayConnection> {
        self.connections.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Take a connection out of the registry without closing it.
    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<DisplayConnection> {
        let index = self.connections.iter().position(|c| c.handle() == handle)?;
        Some(self.connections.remove(index))
    }

    /// Release a connection's resources and drop it. Every frame must have
    /// been destroyed first. The connection is dropped even when a free is
    /// refused; the first refusal is returned.
    pub fn close(&mut self, handle: ConnectionHandle) -> DisplayResult<()> {
        let conn = self
            .find_by_handle(handle)
            .ok_or(DisplayError::UnknownConnection(handle))?;
        if conn.frames_attached() > 0 {
            return Err(DisplayError::FramesAttached {
                handle,
                frames: conn.frames_attached(),
            });
        }
        match self.remove(handle) {
            Some(mut conn) => conn.release_resources(),
            None => Ok(()),
        }
    }

    /// Forget a connection whose server went away, together with its frames.
    /// No requests are sent. Returns the number of frames dropped.
    pub fn connection_lost(&mut self, handle: ConnectionHandle, frames: &mut FrameSet) -> usize {
        let dropped = frames.abandon_connection(handle);
        match self.remove(handle) {
            Some(mut conn) => {
                error!("Connection to {} lost, dropped {} frame(s)", conn.name(), dropped);
                conn.abandon();
            }
            None => error!("Unknown connection {} lost", handle),
        }
        dropped
    }
}

//! Atom cache
//!
//! One `AtomTable` per connection. The first lookup of a name costs a round
//! trip, later ones are answered locally. The names every connection needs are
//! resolved eagerly into [`Atoms`] when the connection opens.

use std::collections::HashMap;
use tracing::debug;

use crate::error::ServerError;
use crate::server::{Atom, XServer, NONE};

/// Atoms the core protocol defines with fixed values
const PREDEFINED: &[(&str, Atom)] = &[
    ("PRIMARY", 1),
    ("SECONDARY", 2),
    ("ATOM", 4),
    ("BITMAP", 5),
    ("CARDINAL", 6),
    ("INTEGER", 19),
    ("PIXMAP", 20),
    ("STRING", 31),
    ("WINDOW", 33),
    ("WM_COMMAND", 34),
    ("WM_HINTS", 35),
    ("WM_CLIENT_MACHINE", 36),
    ("WM_ICON_NAME", 37),
    ("WM_ICON_SIZE", 38),
    ("WM_NAME", 39),
    ("WM_NORMAL_HINTS", 40),
    ("WM_SIZE_HINTS", 41),
    ("WM_CLASS", 67),
    ("WM_TRANSIENT_FOR", 68),
];

/// Per-connection name -> atom cache
#[derive(Debug)]
pub struct AtomTable {
    by_name: HashMap<String, Atom>,
    by_atom: HashMap<Atom, String>,
}

impl AtomTable {
    pub fn new() -> Self {
        let mut table = Self {
            by_name: HashMap::new(),
            by_atom: HashMap::new(),
        };
        for &(name, atom) in PREDEFINED {
            table.insert(name, atom);
        }
        table
    }

    fn insert(&mut self, name: &str, atom: Atom) {
        self.by_name.insert(name.to_string(), atom);
        self.by_atom.insert(atom, name.to_string());
    }

    /// Resolve `name`, creating the atom on the server if needed.
    pub fn intern(&mut self, server: &mut dyn XServer, name: &str) -> Result<Atom, ServerError> {
        if let Some(&atom) = self.by_name.get(name) {
            return Ok(atom);
        }
        let atom = server
            .intern_atoms(&[name], false)?
            .first()
            .copied()
            .unwrap_or(NONE);
        debug!("Interned atom {} = {}", name, atom);
        if atom != NONE {
            self.insert(name, atom);
        }
        Ok(atom)
    }

    /// Resolve `name` only if the server already knows it.
    ///
    /// Returns `NONE` for an absent atom. Absent results are not cached since
    /// the extension that defines the name may show up later.
    pub fn intern_optional(&mut self, server: &mut dyn XServer, name: &str) -> Result<Atom, ServerError> {
        if let Some(&atom) = self.by_name.get(name) {
            return Ok(atom);
        }
        let atom = server
            .intern_atoms(&[name], true)?
            .first()
            .copied()
            .unwrap_or(NONE);
        if atom == NONE {
            debug!("Optional atom {} is not present", name);
        } else {
            self.insert(name, atom);
        }
        Ok(atom)
    }

    /// Resolve several names with a single pipelined batch for the misses.
    pub fn intern_batch(&mut self, server: &mut dyn XServer, names: &[&str]) -> Result<Vec<Atom>, ServerError> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| !self.by_name.contains_key(*name))
            .collect();

        if !missing.is_empty() {
            let atoms = server.intern_atoms(&missing, false)?;
            for (name, atom) in missing.iter().zip(atoms) {
                if atom != NONE {
                    self.insert(name, atom);
                }
            }
        }

        Ok(names
            .iter()
            .map(|name| self.by_name.get(*name).copied().unwrap_or(NONE))
            .collect())
    }

    pub fn cached(&self, name: &str) -> Option<Atom> {
        self.by_name.get(name).copied()
    }

    /// Name of a cached atom, for diagnostics
    pub fn name_of(&self, atom: Atom) -> Option<&str> {
        self.by_atom.get(&atom).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! well_known_atoms {
    ($($field:ident => $name:literal),* $(,)?) => {
        /// Atoms resolved when a connection opens
        #[derive(Debug, Clone, Default)]
        pub struct Atoms {
            $(pub $field: Atom,)*
        }

        impl Atoms {
            pub const NAMES: &'static [&'static str] = &[$($name),*];

            /// Intern every well-known atom in one batch
            pub fn intern(table: &mut AtomTable, server: &mut dyn XServer) -> Result<Self, ServerError> {
                let resolved = table.intern_batch(server, Self::NAMES)?;
                let mut resolved = resolved.into_iter();
                Ok(Self {
                    $($field: resolved.next().unwrap_or(NONE),)*
                })
            }
        }
    };
}

well_known_atoms! {
    // ICCCM window manager protocols
    wm_protocols => "WM_PROTOCOLS",
    wm_take_focus => "WM_TAKE_FOCUS",
    wm_save_yourself => "WM_SAVE_YOURSELF",
    wm_delete_window => "WM_DELETE_WINDOW",
    wm_change_state => "WM_CHANGE_STATE",
    wm_state => "WM_STATE",
    wm_configure_denied => "WM_CONFIGURE_DENIED",
    wm_window_moved => "WM_MOVED",
    wm_client_leader => "WM_CLIENT_LEADER",
    editres => "Editres",
    // Selection targets
    clipboard => "CLIPBOARD",
    timestamp => "TIMESTAMP",
    text => "TEXT",
    delete => "DELETE",
    compound_text => "COMPOUND_TEXT",
    utf8_string => "UTF8_STRING",
    multiple => "MULTIPLE",
    incr => "INCR",
    transfer_tmp => "_XFRAME_TMP_",
    targets => "TARGETS",
    null => "NULL",
    atom_pair => "ATOM_PAIR",
    clipboard_manager => "CLIPBOARD_MANAGER",
    // Font properties
    pixel_size => "PIXEL_SIZE",
    average_width => "AVERAGE_WIDTH",
    // Ghostscript
    done => "DONE",
    page => "PAGE",
    // Toolkit scroll bar messages
    scrollbar => "SCROLLBAR",
    horizontal_scrollbar => "HORIZONTAL_SCROLLBAR",
    // XEmbed
    xembed => "_XEMBED",
    xembed_info => "_XEMBED_INFO",
    // EWMH
    net_supported => "_NET_SUPPORTED",
    net_supporting_wm_check => "_NET_SUPPORTING_WM_CHECK",
    net_wm_window_type => "_NET_WM_WINDOW_TYPE",
    net_wm_window_type_tooltip => "_NET_WM_WINDOW_TYPE_TOOLTIP",
    net_active_window => "_NET_ACTIVE_WINDOW",
    net_wm_state => "_NET_WM_STATE",
    net_wm_state_fullscreen => "_NET_WM_STATE_FULLSCREEN",
    net_wm_state_maximized_horz => "_NET_WM_STATE_MAXIMIZED_HORZ",
    net_wm_state_maximized_vert => "_NET_WM_STATE_MAXIMIZED_VERT",
    net_wm_state_sticky => "_NET_WM_STATE_STICKY",
    net_wm_state_above => "_NET_WM_STATE_ABOVE",
    net_wm_state_below => "_NET_WM_STATE_BELOW",
    net_wm_state_hidden => "_NET_WM_STATE_HIDDEN",
    net_wm_state_skip_taskbar => "_NET_WM_STATE_SKIP_TASKBAR",
    net_frame_extents => "_NET_FRAME_EXTENTS",
    net_current_desktop => "_NET_CURRENT_DESKTOP",
    net_workarea => "_NET_WORKAREA",
    net_wm_name => "_NET_WM_NAME",
    net_wm_icon_name => "_NET_WM_ICON_NAME",
    net_wm_window_opacity => "_NET_WM_WINDOW_OPACITY",
    // XSETTINGS
    xsettings_prop => "_XSETTINGS_SETTINGS",
    xsettings_mgr => "MANAGER",
    // Session management
    sm_client_id => "SM_CLIENT_ID",
}

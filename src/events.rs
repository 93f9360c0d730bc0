//! Events Module
//!
//! Raw protocol events as the core sees them, and the router that applies
//! them to connection and frame state. The router never blocks; what the
//! host should do next comes back as an [`EventOutcome`].

use serde::Serialize;
use tracing::{debug, warn};

use crate::display::DisplayConnection;
use crate::error::ProtocolError;
use crate::focus::FocusState;
use crate::frame::{FrameGeometry, FrameId, FrameSet};
use crate::selection::{SelectionEventRouter, SelectionHandler, SelectionKind};
use crate::server::{Atom, Timestamp, Window};

/// `detail` of focus and crossing events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDetail {
    Ancestor,
    Virtual,
    Inferior,
    Nonlinear,
    NonlinearVirtual,
    Pointer,
    PointerRoot,
    None,
}

impl NotifyDetail {
    pub fn from_raw(detail: u8) -> Self {
        match detail {
            0 => NotifyDetail::Ancestor,
            1 => NotifyDetail::Virtual,
            2 => NotifyDetail::Inferior,
            3 => NotifyDetail::Nonlinear,
            4 => NotifyDetail::NonlinearVirtual,
            5 => NotifyDetail::Pointer,
            6 => NotifyDetail::PointerRoot,
            _ => NotifyDetail::None,
        }
    }
}

/// Protocol event delivered by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    FocusIn {
        window: Window,
        detail: NotifyDetail,
    },
    FocusOut {
        window: Window,
        detail: NotifyDetail,
    },
    Enter {
        window: Window,
        detail: NotifyDetail,
        /// The window is, or contains, the focus window
        focus: bool,
        time: Timestamp,
    },
    Leave {
        window: Window,
        detail: NotifyDetail,
        focus: bool,
        time: Timestamp,
    },
    PropertyNotify {
        window: Window,
        atom: Atom,
        time: Timestamp,
        deleted: bool,
    },
    SelectionNotify {
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    },
    SelectionRequest {
        owner: Window,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    },
    SelectionClear {
        owner: Window,
        selection: Atom,
        time: Timestamp,
    },
    ClientMessage {
        window: Window,
        type_: Atom,
        format: u8,
        data: [u32; 5],
    },
    ConfigureNotify {
        window: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    },
    KeyPress {
        window: Window,
        keycode: u8,
        state: u16,
        time: Timestamp,
    },
    ButtonPress {
        window: Window,
        button: u8,
        state: u16,
        x: i16,
        y: i16,
        time: Timestamp,
    },
    ButtonRelease {
        window: Window,
        button: u8,
        state: u16,
        time: Timestamp,
    },
    Motion {
        window: Window,
        x: i16,
        y: i16,
        time: Timestamp,
    },
    Error(ProtocolError),
    /// Anything the core does not look at
    Other,
}

impl RawEvent {
    /// Window the event was delivered to, if it has one
    pub fn window(&self) -> Option<Window> {
        match *self {
            RawEvent::FocusIn { window, .. }
            | RawEvent::FocusOut { window, .. }
            | RawEvent::Enter { window, .. }
            | RawEvent::Leave { window, .. }
            | RawEvent::PropertyNotify { window, .. }
            | RawEvent::ClientMessage { window, .. }
            | RawEvent::ConfigureNotify { window, .. }
            | RawEvent::KeyPress { window, .. }
            | RawEvent::ButtonPress { window, .. }
            | RawEvent::ButtonRelease { window, .. }
            | RawEvent::Motion { window, .. } => Some(window),
            RawEvent::SelectionNotify { requestor, .. } => Some(requestor),
            RawEvent::SelectionRequest { owner, .. } | RawEvent::SelectionClear { owner, .. } => Some(owner),
            RawEvent::Error(_) | RawEvent::Other => None,
        }
    }
}

/// What routing an event did, for the host loop to act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventOutcome {
    Ignored,
    Focus {
        frame: FrameId,
        state: FocusState,
        /// The connection's focus frame changed
        focus_changed: bool,
    },
    Selection {
        frame: FrameId,
        selection: SelectionKind,
    },
    DeleteWindow {
        frame: FrameId,
    },
    TakeFocus {
        frame: FrameId,
        time: Timestamp,
    },
    SaveYourself {
        frame: FrameId,
    },
    DragAndDrop {
        frame: FrameId,
        message_type: Atom,
        data: [u32; 5],
    },
    Resized {
        frame: FrameId,
        width: u16,
        height: u16,
        /// Position to request again for a window manager that misplaced the frame
        move_to: Option<(i32, i32)>,
    },
    UserInput {
        frame: FrameId,
        time: Timestamp,
    },
    MenuActivation {
        frame: FrameId,
    },
    Motion {
        frame: FrameId,
        x: i16,
        y: i16,
    },
    WmSupportChanged,
    ProtocolError {
        error: ProtocolError,
    },
}

/// Applies events to connection and frame state
#[derive(Debug, Default)]
pub struct EventRouter {
    pub selections: SelectionEventRouter,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        &mut self,
        conn: &mut DisplayConnection,
        frames: &mut FrameSet,
        event: RawEvent,
        handler: &mut dyn SelectionHandler,
    ) -> EventOutcome {
        let handle = conn.handle();

        match event {
            RawEvent::Error(err) => match conn.handle_error(err) {
                Some(error) => EventOutcome::ProtocolError { error },
                None => EventOutcome::Ignored,
            },

            RawEvent::PropertyNotify { window, atom, .. }
                if window == conn.root() && atom == conn.atoms().net_supporting_wm_check =>
            {
                conn.invalidate_wm_support();
                EventOutcome::WmSupportChanged
            }

            RawEvent::PropertyNotify { .. }
            | RawEvent::SelectionNotify { .. }
            | RawEvent::SelectionRequest { .. }
            | RawEvent::SelectionClear { .. } => {
                match self.selections.route(handle, frames, &event, handler) {
                    Some((frame, routed)) => EventOutcome::Selection {
                        frame,
                        selection: routed.kind,
                    },
                    None => EventOutcome::Ignored,
                }
            }

            RawEvent::FocusIn { window, detail } | RawEvent::FocusOut { window, detail } => {
                // Pointer-detail focus events describe the pointer window, not
                // the real focus; inferior ones stay within the frame.
                if matches!(detail, NotifyDetail::Pointer | NotifyDetail::Inferior) {
                    return EventOutcome::Ignored;
                }
                let focus_in = matches!(event, RawEvent::FocusIn { .. });
                self.update_focus(conn, frames, window, |state| {
                    if focus_in {
                        state.on_focus_in()
                    } else {
                        state.on_focus_out()
                    }
                })
            }

            RawEvent::Enter {
                window,
                detail,
                focus,
                time,
            }
            | RawEvent::Leave {
                window,
                detail,
                focus,
                time,
            } => {
                let entering = matches!(event, RawEvent::Enter { .. });
                let Some(id) = frames.find_by_window(handle, window) else {
                    return EventOutcome::Ignored;
                };
                if entering {
                    conn.mouse.mouse_frame = Some(id);
                    conn.mouse.last_motion_time = time;
                } else if conn.mouse.mouse_frame == Some(id) {
                    conn.mouse.mouse_frame = None;
                }

                if !focus || detail == NotifyDetail::Inferior {
                    return EventOutcome::Ignored;
                }
                self.update_focus(conn, frames, window, |state| {
                    if entering {
                        state.on_enter()
                    } else {
                        state.on_leave()
                    }
                })
            }

            RawEvent::ClientMessage {
                window,
                type_,
                format,
                data,
            } => {
                let Some(frame) = frames.find_by_window(handle, window) else {
                    debug!("Client message for unknown window 0x{:x}", window);
                    return EventOutcome::Ignored;
                };
                let atoms = conn.atoms();
                if type_ == atoms.wm_protocols && format == 32 {
                    let protocol = data[0];
                    if protocol == atoms.wm_delete_window {
                        EventOutcome::DeleteWindow { frame }
                    } else if protocol == atoms.wm_take_focus {
                        EventOutcome::TakeFocus { frame, time: data[1] }
                    } else if protocol == atoms.wm_save_yourself {
                        EventOutcome::SaveYourself { frame }
                    } else {
                        debug!("Unhandled WM_PROTOCOLS message {}", protocol);
                        EventOutcome::Ignored
                    }
                } else if conn.is_dnd_message(type_) {
                    EventOutcome::DragAndDrop {
                        frame,
                        message_type: type_,
                        data,
                    }
                } else {
                    EventOutcome::Ignored
                }
            }

            RawEvent::ConfigureNotify {
                window,
                x,
                y,
                width,
                height,
            } => {
                let Some(id) = frames.find_by_window(handle, window) else {
                    return EventOutcome::Ignored;
                };
                let Some(frame) = frames.get_mut(id) else {
                    return EventOutcome::Ignored;
                };

                let move_to = if window == frame.outer_window() {
                    frame.check_expected_move(conn, x as i32, y as i32)
                } else {
                    None
                };
                if window != frame.window() {
                    return match move_to {
                        Some(_) => EventOutcome::Resized {
                            frame: id,
                            width: frame.geometry().width,
                            height: frame.geometry().height,
                            move_to,
                        },
                        None => EventOutcome::Ignored,
                    };
                }

                frame.on_configure(FrameGeometry { x, y, width, height });
                EventOutcome::Resized {
                    frame: id,
                    width,
                    height,
                    move_to,
                }
            }

            RawEvent::KeyPress { window, time, .. } | RawEvent::ButtonRelease { window, time, .. } => {
                let Some(frame) = frames.find_by_window(handle, window) else {
                    return EventOutcome::Ignored;
                };
                conn.record_user_time(time);
                EventOutcome::UserInput { frame, time }
            }

            RawEvent::ButtonPress { window, time, .. } => {
                let Some(id) = frames.find_by_window(handle, window) else {
                    return EventOutcome::Ignored;
                };
                conn.record_user_time(time);
                match frames.get_mut(id) {
                    Some(frame) if window == frame.menubar_window() => {
                        frame.save_menu_event(event.clone());
                        EventOutcome::MenuActivation { frame: id }
                    }
                    _ => EventOutcome::UserInput { frame: id, time },
                }
            }

            RawEvent::Motion { window, x, y, time } => {
                let Some(frame) = frames.find_by_window(handle, window) else {
                    return EventOutcome::Ignored;
                };
                conn.mouse.mouse_frame = Some(frame);
                conn.mouse.last_motion = (x, y);
                conn.mouse.last_motion_time = time;
                EventOutcome::Motion { frame, x, y }
            }

            RawEvent::Other => EventOutcome::Ignored,
        }
    }

    fn update_focus(
        &mut self,
        conn: &mut DisplayConnection,
        frames: &mut FrameSet,
        window: Window,
        transition: impl FnOnce(FocusState) -> FocusState,
    ) -> EventOutcome {
        let Some(id) = frames.find_by_window(conn.handle(), window) else {
            warn!("Focus event for unknown window 0x{:x}", window);
            return EventOutcome::Ignored;
        };
        let Some(frame) = frames.get_mut(id) else {
            return EventOutcome::Ignored;
        };

        let old = frame.focus_state;
        let new = transition(old);
        frame.focus_state = new;
        let focus_changed = conn.focus.frame_changed(id, old, new);
        if old != new {
            debug!("Frame {} focus {:?} -> {:?}", id.0, old, new);
        }
        EventOutcome::Focus {
            frame: id,
            state: new,
            focus_changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fake::{protocol_error, FakeServer, ROOT};
    use crate::frame::FrameToolkit;
    use crate::selection::NoSelections;
    use crate::server::{XServer, NONE};

    struct Harness {
        fake: FakeServer,
        conn: DisplayConnection,
        frames: FrameSet,
        router: EventRouter,
        frame: FrameId,
        window: Window,
    }

    impl Harness {
        fn new() -> Self {
            let fake = FakeServer::new();
            let mut conn = DisplayConnection::open_with(Box::new(fake.clone()), &Config::default()).unwrap();
            let mut frames = FrameSet::new();
            let geometry = FrameGeometry {
                x: 0,
                y: 0,
                width: 100,
                height: 50,
            };
            let frame = frames.realize(&mut conn, geometry, None).unwrap();
            let window = frames.get(frame).unwrap().window();
            Self {
                fake,
                conn,
                frames,
                router: EventRouter::new(),
                frame,
                window,
            }
        }

        fn route(&mut self, event: RawEvent) -> EventOutcome {
            self.router
                .route(&mut self.conn, &mut self.frames, event, &mut NoSelections)
        }

        fn state(&self) -> FocusState {
            self.frames.get(self.frame).unwrap().focus_state
        }

        fn enter(&mut self) -> EventOutcome {
            let window = self.window;
            self.route(RawEvent::Enter {
                window,
                detail: NotifyDetail::Nonlinear,
                focus: true,
                time: 1,
            })
        }

        fn leave(&mut self) -> EventOutcome {
            let window = self.window;
            self.route(RawEvent::Leave {
                window,
                detail: NotifyDetail::Nonlinear,
                focus: true,
                time: 2,
            })
        }

        fn focus_in(&mut self) -> EventOutcome {
            let window = self.window;
            self.route(RawEvent::FocusIn {
                window,
                detail: NotifyDetail::Nonlinear,
            })
        }

        fn focus_out(&mut self) -> EventOutcome {
            let window = self.window;
            self.route(RawEvent::FocusOut {
                window,
                detail: NotifyDetail::Nonlinear,
            })
        }
    }

    #[test]
    fn enter_then_leave_is_implicit_focus() {
        let mut h = Harness::new();
        h.enter();
        assert_eq!(h.state(), FocusState::Implicit);
        assert_eq!(h.conn.focus.focus_frame, Some(h.frame));
        h.leave();
        assert_eq!(h.state(), FocusState::None);
        assert_eq!(h.conn.focus.focus_frame, None);
    }

    #[test]
    fn explicit_focus_survives_crossings() {
        let mut h = Harness::new();
        let outcome = h.focus_in();
        assert_eq!(
            outcome,
            EventOutcome::Focus {
                frame: h.frame,
                state: FocusState::Explicit,
                focus_changed: true,
            }
        );
        h.enter();
        assert_eq!(h.state(), FocusState::Explicit);
        h.leave();
        assert_eq!(h.state(), FocusState::Explicit);
        h.focus_out();
        assert_eq!(h.state(), FocusState::None);
    }

    #[test]
    fn focus_in_overrides_implicit() {
        let mut h = Harness::new();
        h.enter();
        h.focus_in();
        assert_eq!(h.state(), FocusState::Explicit);
    }

    #[test]
    fn crossings_without_focus_bit_or_inferior_are_ignored() {
        let mut h = Harness::new();
        let window = h.window;
        let outcome = h.route(RawEvent::Enter {
            window,
            detail: NotifyDetail::Nonlinear,
            focus: false,
            time: 1,
        });
        assert_eq!(outcome, EventOutcome::Ignored);
        assert_eq!(h.conn.mouse.mouse_frame, Some(h.frame));

        h.route(RawEvent::Enter {
            window,
            detail: NotifyDetail::Inferior,
            focus: true,
            time: 1,
        });
        assert_eq!(h.state(), FocusState::None);
    }

    #[test]
    fn pointer_detail_focus_is_ignored() {
        let mut h = Harness::new();
        let window = h.window;
        h.route(RawEvent::FocusIn {
            window,
            detail: NotifyDetail::Pointer,
        });
        assert_eq!(h.state(), FocusState::None);
    }

    #[test]
    fn queued_events_drain_in_order() {
        let mut h = Harness::new();
        let window = h.window;
        let delete = h.conn.atoms().wm_delete_window;
        let protocols = h.conn.atoms().wm_protocols;
        h.fake.push_event(RawEvent::FocusIn {
            window,
            detail: NotifyDetail::Pointer,
        });
        h.fake.push_event(RawEvent::FocusIn {
            window,
            detail: NotifyDetail::Nonlinear,
        });
        h.fake.push_event(RawEvent::ClientMessage {
            window,
            type_: protocols,
            format: 32,
            data: [delete, 0, 0, 0, 0],
        });

        let mut outcomes = Vec::new();
        while let Some(event) = h.conn.server().poll_event().unwrap() {
            let outcome = h.route(event);
            if outcome != EventOutcome::Ignored {
                outcomes.push(outcome);
            }
        }

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], EventOutcome::Focus { .. }));
        assert_eq!(outcomes[1], EventOutcome::DeleteWindow { frame: h.frame });
        assert_eq!(h.state(), FocusState::Explicit);
        assert!(h.conn.server().poll_event().unwrap().is_none());
    }

    #[test]
    fn wm_protocol_messages() {
        let mut h = Harness::new();
        let atoms = h.conn.atoms().clone();
        let window = h.window;
        let message = |protocol: Atom| RawEvent::ClientMessage {
            window,
            type_: atoms.wm_protocols,
            format: 32,
            data: [protocol, 77, 0, 0, 0],
        };

        assert_eq!(
            h.route(message(atoms.wm_delete_window)),
            EventOutcome::DeleteWindow { frame: h.frame }
        );
        assert_eq!(
            h.route(message(atoms.wm_take_focus)),
            EventOutcome::TakeFocus { frame: h.frame, time: 77 }
        );
        assert_eq!(
            h.route(message(atoms.wm_save_yourself)),
            EventOutcome::SaveYourself { frame: h.frame }
        );
    }

    #[test]
    fn registered_dnd_messages_are_reported() {
        let mut h = Harness::new();
        let xdnd = h.conn.intern_atom("XdndEnter").unwrap();
        let window = h.window;
        let event = RawEvent::ClientMessage {
            window,
            type_: xdnd,
            format: 32,
            data: [1, 2, 3, 4, 5],
        };

        assert_eq!(h.route(event.clone()), EventOutcome::Ignored);
        h.conn.register_dnd_atom(xdnd);
        assert_eq!(
            h.route(event),
            EventOutcome::DragAndDrop {
                frame: h.frame,
                message_type: xdnd,
                data: [1, 2, 3, 4, 5],
            }
        );
    }

    #[test]
    fn configure_records_desired_size() {
        let mut h = Harness::new();
        let window = h.window;
        let outcome = h.route(RawEvent::ConfigureNotify {
            window,
            x: 0,
            y: 0,
            width: 300,
            height: 200,
        });
        assert_eq!(
            outcome,
            EventOutcome::Resized {
                frame: h.frame,
                width: 300,
                height: 200,
                move_to: None,
            }
        );
        let frame = h.frames.get(h.frame).unwrap();
        assert_eq!(frame.geometry().width, 300);
        // Reallocation waits for the next flip.
        assert_eq!(frame.back_buffer_size(), (100, 50));
    }

    #[test]
    fn configure_on_toolkit_shell_checks_expected_move() {
        let fake = FakeServer::new();
        let mut config = Config::default();
        config.display.toolkit = crate::config::ToolkitKind::Xt;
        let mut conn = DisplayConnection::open_with(Box::new(fake), &config).unwrap();
        let mut frames = FrameSet::new();
        let geometry = FrameGeometry {
            x: 0,
            y: 0,
            width: 40,
            height: 30,
        };
        let id = frames.realize(&mut conn, geometry, None).unwrap();
        let frame = frames.get_mut(id).unwrap();
        if let FrameToolkit::Xt { shell, .. } = frame.toolkit_mut() {
            *shell = 0x8000;
        }
        frame.expect_move(10, 10);

        let mut router = EventRouter::new();
        let outcome = router.route(
            &mut conn,
            &mut frames,
            RawEvent::ConfigureNotify {
                window: 0x8000,
                x: 15,
                y: 30,
                width: 1,
                height: 1,
            },
            &mut NoSelections,
        );
        assert_eq!(
            outcome,
            EventOutcome::Resized {
                frame: id,
                width: 40,
                height: 30,
                move_to: Some((5, -10)),
            }
        );
    }

    #[test]
    fn input_records_user_time_and_menu_press_is_saved() {
        let mut h = Harness::new();
        let window = h.window;
        h.route(RawEvent::KeyPress {
            window,
            keycode: 38,
            state: 0,
            time: 500,
        });
        assert_eq!(h.conn.last_user_time(), 500);

        if let Some(frame) = h.frames.get_mut(h.frame) {
            *frame.toolkit_mut() = FrameToolkit::Xt {
                shell: NONE,
                edit: NONE,
                menubar: 0x8100,
                menubar_height: 20,
            };
        }
        let press = RawEvent::ButtonPress {
            window: 0x8100,
            button: 1,
            state: 0,
            x: 4,
            y: 4,
            time: 600,
        };
        assert_eq!(h.route(press.clone()), EventOutcome::MenuActivation { frame: h.frame });
        assert_eq!(h.conn.last_user_time(), 600);
        assert_eq!(h.frames.get_mut(h.frame).unwrap().take_menu_event(), Some(press));
    }

    #[test]
    fn motion_updates_mouse_tracking() {
        let mut h = Harness::new();
        let window = h.window;
        h.route(RawEvent::Motion {
            window,
            x: 12,
            y: 34,
            time: 9,
        });
        assert_eq!(h.conn.mouse.last_motion, (12, 34));
        assert_eq!(h.conn.mouse.last_motion_time, 9);
        assert_eq!(h.conn.mouse.mouse_frame, Some(h.frame));
    }

    #[test]
    fn wm_check_change_invalidates_support_cache() {
        let mut h = Harness::new();
        let atoms = h.conn.atoms().clone();
        let check = 0x6000;
        h.fake.set_property(ROOT, atoms.net_supporting_wm_check, 33, &[check]);
        h.fake.set_property(check, atoms.net_supporting_wm_check, 33, &[check]);
        h.fake.set_property(ROOT, atoms.net_supported, 4, &[atoms.net_wm_state_fullscreen]);
        assert!(h.conn.supports(atoms.net_wm_state_fullscreen).unwrap());

        h.fake.set_property(ROOT, atoms.net_supported, 4, &[]);
        assert!(h.conn.supports(atoms.net_wm_state_fullscreen).unwrap());

        let outcome = h.route(RawEvent::PropertyNotify {
            window: ROOT,
            atom: atoms.net_supporting_wm_check,
            time: 0,
            deleted: false,
        });
        assert_eq!(outcome, EventOutcome::WmSupportChanged);
        assert!(!h.conn.supports(atoms.net_wm_state_fullscreen).unwrap());
    }

    #[test]
    fn errors_go_to_traps_or_surface() {
        let mut h = Harness::new();
        let untrapped = h.route(RawEvent::Error(protocol_error(1)));
        assert!(matches!(untrapped, EventOutcome::ProtocolError { .. }));

        h.conn.begin_trap();
        let seq = h.fake.sequence() + 1;
        h.conn.server().free_gc(0x1234).unwrap();
        assert_eq!(h.route(RawEvent::Error(protocol_error(seq))), EventOutcome::Ignored);
        assert!(h.conn.had_errors().unwrap());
        h.conn.end_trap_after_check();
    }

    #[test]
    fn selection_events_are_routed() {
        let mut h = Harness::new();
        let window = h.window;
        let outcome = h.route(RawEvent::SelectionClear {
            owner: window,
            selection: 1,
            time: 0,
        });
        assert_eq!(
            outcome,
            EventOutcome::Selection {
                frame: h.frame,
                selection: SelectionKind::Clear,
            }
        );
    }

    #[test]
    fn outcomes_serialize_as_tagged_json() {
        let json = serde_json::to_string(&EventOutcome::DeleteWindow { frame: FrameId(3) }).unwrap();
        assert_eq!(json, r#"{"kind":"delete_window","frame":3}"#);
    }
}

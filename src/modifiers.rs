//! Modifiers Module
//!
//! Works out which server modifier bits carry Meta, Alt, Super and Hyper by
//! reading the keyboard and modifier mappings, and converts between server
//! state bits and abstract modifiers.

use bitflags::bitflags;
use serde::Serialize;
use tracing::debug;

use crate::server::{KeyboardMapping, Keysym, ModifierMapping};

pub const SHIFT_MASK: u16 = 1 << 0;
pub const LOCK_MASK: u16 = 1 << 1;
pub const CONTROL_MASK: u16 = 1 << 2;

const XK_SHIFT_LOCK: Keysym = 0xffe6;
const XK_META_L: Keysym = 0xffe7;
const XK_META_R: Keysym = 0xffe8;
const XK_ALT_L: Keysym = 0xffe9;
const XK_ALT_R: Keysym = 0xffea;
const XK_SUPER_L: Keysym = 0xffeb;
const XK_SUPER_R: Keysym = 0xffec;
const XK_HYPER_L: Keysym = 0xffed;
const XK_HYPER_R: Keysym = 0xffee;

/// Row of the lock modifier in the modifier mapping
const LOCK_ROW: usize = 1;
/// Mod1 through Mod5
const MOD_ROWS: std::ops::Range<usize> = 3..8;

bitflags! {
    /// Abstract modifiers, independent of the server's bit assignment
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL  = 1 << 1;
        const META  = 1 << 2;
        const ALT   = 1 << 3;
        const SUPER = 1 << 4;
        const HYPER = 1 << 5;
    }
}

/// Server modifier bits assigned to each abstract modifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModifierMasks {
    pub meta: u16,
    pub alt: u16,
    pub super_: u16,
    pub hyper: u16,
    /// `LOCK_MASK` when the lock key is Shift_Lock rather than Caps_Lock
    pub shift_lock: u16,
}

impl ModifierMasks {
    /// Inspect the keysyms bound to each modifier row.
    ///
    /// A keycode carrying Meta or Alt is never also counted as Super or Hyper.
    /// Without any Meta key, the Alt keys act as Meta.
    pub fn discover(keyboard: &KeyboardMapping, modifiers: &ModifierMapping) -> Self {
        let mut masks = Self::default();

        for row in MOD_ROWS {
            let bit = 1u16 << row;
            'row: for &code in modifiers.row(row) {
                if code == 0 {
                    continue;
                }
                let mut found_alt_or_meta = false;
                for &sym in keyboard.keysyms_for(code) {
                    match sym {
                        XK_META_L | XK_META_R => {
                            found_alt_or_meta = true;
                            masks.meta |= bit;
                        }
                        XK_ALT_L | XK_ALT_R => {
                            found_alt_or_meta = true;
                            masks.alt |= bit;
                        }
                        XK_HYPER_L | XK_HYPER_R => {
                            if !found_alt_or_meta {
                                masks.hyper |= bit;
                            }
                            break 'row;
                        }
                        XK_SUPER_L | XK_SUPER_R => {
                            if !found_alt_or_meta {
                                masks.super_ |= bit;
                            }
                            break 'row;
                        }
                        _ => {}
                    }
                }
            }
        }

        let shift_lock = modifiers
            .row(LOCK_ROW)
            .iter()
            .filter(|&&code| code != 0)
            .any(|&code| keyboard.keysyms_for(code).contains(&XK_SHIFT_LOCK));
        if shift_lock {
            masks.shift_lock = LOCK_MASK;
        }

        if masks.meta == 0 {
            masks.meta = masks.alt;
            masks.alt = 0;
        }
        // Meta wins over Alt when both sit on the same bit.
        masks.alt &= !masks.meta;

        debug!(
            "Modifier masks: meta=0x{:x} alt=0x{:x} super=0x{:x} hyper=0x{:x} shift_lock=0x{:x}",
            masks.meta, masks.alt, masks.super_, masks.hyper, masks.shift_lock
        );
        masks
    }

    /// Server state bits to abstract modifiers
    pub fn to_modifiers(&self, state: u16) -> Modifiers {
        let mut mods = Modifiers::empty();
        if state & SHIFT_MASK != 0 || (self.shift_lock != 0 && state & self.shift_lock != 0) {
            mods |= Modifiers::SHIFT;
        }
        if state & CONTROL_MASK != 0 {
            mods |= Modifiers::CTRL;
        }
        if state & self.meta != 0 {
            mods |= Modifiers::META;
        }
        if state & self.alt != 0 {
            mods |= Modifiers::ALT;
        }
        if state & self.super_ != 0 {
            mods |= Modifiers::SUPER;
        }
        if state & self.hyper != 0 {
            mods |= Modifiers::HYPER;
        }
        mods
    }

    /// Abstract modifiers to server state bits
    pub fn to_state(&self, mods: Modifiers) -> u16 {
        let mut state = 0;
        if mods.contains(Modifiers::SHIFT) {
            state |= SHIFT_MASK;
        }
        if mods.contains(Modifiers::CTRL) {
            state |= CONTROL_MASK;
        }
        if mods.contains(Modifiers::META) {
            state |= self.meta;
        }
        if mods.contains(Modifiers::ALT) {
            state |= self.alt;
        }
        if mods.contains(Modifiers::SUPER) {
            state |= self.super_;
        }
        if mods.contains(Modifiers::HYPER) {
            state |= self.hyper;
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XK_CAPS_LOCK: Keysym = 0xffe5;

    /// Keycodes start at 8, two keysyms each. `rows[i]` lists the keycodes of
    /// modifier row i.
    fn mapping(keys: &[&[Keysym]], rows: &[&[u8]]) -> (KeyboardMapping, ModifierMapping) {
        let mut keysyms = Vec::new();
        for syms in keys {
            keysyms.push(syms.first().copied().unwrap_or(0));
            keysyms.push(syms.get(1).copied().unwrap_or(0));
        }
        let keyboard = KeyboardMapping {
            min_keycode: 8,
            keysyms_per_keycode: 2,
            keysyms,
        };

        let per = 2;
        let mut keycodes = vec![0u8; 8 * per];
        for (row, codes) in rows.iter().enumerate() {
            for (col, &code) in codes.iter().enumerate() {
                keycodes[row * per + col] = code;
            }
        }
        let modifiers = ModifierMapping {
            keycodes_per_modifier: per as u8,
            keycodes,
        };
        (keyboard, modifiers)
    }

    #[test]
    fn alt_becomes_meta_when_no_meta_key() {
        // keycode 8: Alt_L on mod1, keycode 9: Super_L on mod4
        let (kb, mods) = mapping(
            &[&[XK_ALT_L], &[XK_SUPER_L]],
            &[&[], &[], &[], &[8], &[], &[], &[9], &[]],
        );
        let masks = ModifierMasks::discover(&kb, &mods);
        assert_eq!(masks.meta, 1 << 3);
        assert_eq!(masks.alt, 0);
        assert_eq!(masks.super_, 1 << 6);
        assert_eq!(masks.hyper, 0);
    }

    #[test]
    fn meta_and_alt_on_separate_rows() {
        let (kb, mods) = mapping(
            &[&[XK_META_L], &[XK_ALT_L], &[XK_HYPER_R]],
            &[&[], &[], &[], &[8], &[9], &[10], &[], &[]],
        );
        let masks = ModifierMasks::discover(&kb, &mods);
        assert_eq!(masks.meta, 1 << 3);
        assert_eq!(masks.alt, 1 << 4);
        assert_eq!(masks.hyper, 1 << 5);
    }

    #[test]
    fn super_on_an_alt_key_is_ignored() {
        // One keycode producing both Alt_L and Super_L.
        let (kb, mods) = mapping(&[&[XK_ALT_L, XK_SUPER_L]], &[&[], &[], &[], &[8], &[], &[], &[], &[]]);
        let masks = ModifierMasks::discover(&kb, &mods);
        assert_eq!(masks.super_, 0);
        assert_eq!(masks.meta, 1 << 3);
    }

    #[test]
    fn shift_lock_only_from_lock_row() {
        let (kb, mods) = mapping(&[&[XK_SHIFT_LOCK]], &[&[], &[8], &[], &[], &[], &[], &[], &[]]);
        assert_eq!(ModifierMasks::discover(&kb, &mods).shift_lock, LOCK_MASK);

        let (kb, mods) = mapping(&[&[XK_CAPS_LOCK]], &[&[], &[8], &[], &[], &[], &[], &[], &[]]);
        assert_eq!(ModifierMasks::discover(&kb, &mods).shift_lock, 0);
    }

    #[test]
    fn state_conversion_both_ways() {
        let masks = ModifierMasks {
            meta: 1 << 3,
            alt: 1 << 4,
            super_: 1 << 6,
            hyper: 0,
            shift_lock: LOCK_MASK,
        };
        let mods = masks.to_modifiers(CONTROL_MASK | (1 << 3) | (1 << 6));
        assert_eq!(mods, Modifiers::CTRL | Modifiers::META | Modifiers::SUPER);
        assert_eq!(masks.to_state(mods), CONTROL_MASK | (1 << 3) | (1 << 6));

        // Shift_Lock counts as shift; without it the lock bit means nothing.
        assert_eq!(masks.to_modifiers(LOCK_MASK), Modifiers::SHIFT);
        let no_shift_lock = ModifierMasks { shift_lock: 0, ..masks };
        assert_eq!(no_shift_lock.to_modifiers(LOCK_MASK), Modifiers::empty());
    }
}

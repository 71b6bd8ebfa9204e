// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Keycode and modifier model.
//!
//! Keycodes are macOS virtual keycodes (ANSI layout) for regular keys, and a
//! reserved range above [`NX_KEYCODE_BASE`] for the media keys that arrive as
//! `NSSystemDefined` events rather than plain key-downs. Modifiers are kept
//! in a single bit set that stores both the general flavor of a modifier
//! (`alt`) and its sided variants (`lalt`, `ralt`); which bits a rule sets
//! decides how strictly an incoming event is matched.

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

bitflags::bitflags! {
  /// Modifier bits carried by rules and by decoded key events.
  ///
  /// `PASSTHROUGH` and `ACTIVATE` are rule-only flags; the platform layer
  /// never sets them on events.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
  pub struct ModifierSet: u32 {
    const ALT = 1 << 0;
    const LALT = 1 << 1;
    const RALT = 1 << 2;
    const SHIFT = 1 << 3;
    const LSHIFT = 1 << 4;
    const RSHIFT = 1 << 5;
    const CMD = 1 << 6;
    const LCMD = 1 << 7;
    const RCMD = 1 << 8;
    const CONTROL = 1 << 9;
    const LCONTROL = 1 << 10;
    const RCONTROL = 1 << 11;
    const FN = 1 << 12;
    const NX = 1 << 13;
    const PASSTHROUGH = 1 << 14;
    const ACTIVATE = 1 << 15;
  }
}

impl ModifierSet {
  /// `hyper` is shorthand for cmd + shift + alt + control.
  pub const HYPER: ModifierSet = ModifierSet::CMD
    .union(ModifierSet::SHIFT)
    .union(ModifierSet::ALT)
    .union(ModifierSet::CONTROL);

  /// `meh` is shorthand for shift + alt + control.
  pub const MEH: ModifierSet = ModifierSet::SHIFT
    .union(ModifierSet::ALT)
    .union(ModifierSet::CONTROL);

  /// Returns `true` if an event carrying `event` satisfies a rule carrying
  /// `self`.
  ///
  /// For each of alt/cmd/control/shift: a sided rule bit requires the same
  /// sided event bit, a general rule bit accepts either side, and a rule
  /// with none of the three requires the event to carry none. `fn` and `nx`
  /// are compared exactly.
  pub fn matches_event(self, event: ModifierSet) -> bool {
    sided_match(self, event, Self::ALT, Self::LALT, Self::RALT)
      && sided_match(self, event, Self::SHIFT, Self::LSHIFT, Self::RSHIFT)
      && sided_match(self, event, Self::CMD, Self::LCMD, Self::RCMD)
      && sided_match(self, event, Self::CONTROL, Self::LCONTROL, Self::RCONTROL)
      && self.contains(Self::FN) == event.contains(Self::FN)
      && self.contains(Self::NX) == event.contains(Self::NX)
  }

  /// The bits describing physically held modifiers, with the rule-only
  /// flags masked out.
  pub fn physical(self) -> ModifierSet {
    self & !(Self::PASSTHROUGH | Self::ACTIVATE)
  }
}

fn sided_match(
  rule: ModifierSet,
  event: ModifierSet,
  general: ModifierSet,
  left: ModifierSet,
  right: ModifierSet,
) -> bool {
  if rule.contains(left) {
    event.contains(left)
  } else if rule.contains(right) {
    event.contains(right)
  } else if rule.contains(general) {
    event.intersects(general | left | right)
  } else {
    !event.intersects(general | left | right)
  }
}

/// Canonical keyword spellings, in serialization order.
const MODIFIER_KEYWORDS: &[(&str, ModifierSet)] = &[
  ("cmd", ModifierSet::CMD),
  ("lcmd", ModifierSet::LCMD),
  ("rcmd", ModifierSet::RCMD),
  ("shift", ModifierSet::SHIFT),
  ("lshift", ModifierSet::LSHIFT),
  ("rshift", ModifierSet::RSHIFT),
  ("alt", ModifierSet::ALT),
  ("lalt", ModifierSet::LALT),
  ("ralt", ModifierSet::RALT),
  ("ctrl", ModifierSet::CONTROL),
  ("lctrl", ModifierSet::LCONTROL),
  ("rctrl", ModifierSet::RCONTROL),
  ("fn", ModifierSet::FN),
];

/// Maps a config keyword to the modifier bits it names.
///
/// Recognizes the sided spellings (`lalt`, `rcmd`, ...), the `control`
/// aliases, and the `hyper`/`meh` combinations.
pub fn modifier_for_keyword(word: &str) -> Option<ModifierSet> {
  let set = match word {
    "alt" => ModifierSet::ALT,
    "lalt" => ModifierSet::LALT,
    "ralt" => ModifierSet::RALT,
    "shift" => ModifierSet::SHIFT,
    "lshift" => ModifierSet::LSHIFT,
    "rshift" => ModifierSet::RSHIFT,
    "cmd" => ModifierSet::CMD,
    "lcmd" => ModifierSet::LCMD,
    "rcmd" => ModifierSet::RCMD,
    "ctrl" | "control" => ModifierSet::CONTROL,
    "lctrl" | "lcontrol" => ModifierSet::LCONTROL,
    "rctrl" | "rcontrol" => ModifierSet::RCONTROL,
    "fn" => ModifierSet::FN,
    "hyper" => ModifierSet::HYPER,
    "meh" => ModifierSet::MEH,
    _ => return None,
  };
  Some(set)
}

/// Returns `true` if `word` names a modifier in the config language.
pub fn is_modifier_keyword(word: &str) -> bool {
  modifier_for_keyword(word).is_some()
}

impl fmt::Display for ModifierSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for (word, bit) in MODIFIER_KEYWORDS {
      if self.contains(*bit) {
        if !first {
          f.write_str(" + ")?;
        }
        f.write_str(word)?;
        first = false;
      }
    }
    if first {
      f.write_str("(none)")?;
    }
    Ok(())
  }
}

/// A decoded key: the modifier bits plus a keycode. Both the physical
/// events fed into the dispatch core and the synthesized keys a rule can
/// forward to are expressed as this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyPress {
  pub modifiers: ModifierSet,
  pub keycode: u32,
}

impl KeyPress {
  pub const fn new(modifiers: ModifierSet, keycode: u32) -> Self {
    KeyPress { modifiers, keycode }
  }
}

impl fmt::Display for KeyPress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.modifiers.physical().is_empty() {
      write!(f, "{:#04x}", self.keycode)
    } else {
      write!(f, "{} - {:#04x}", self.modifiers.physical(), self.keycode)
    }
  }
}

/// Media keys live above this base so they can never collide with virtual
/// keycodes; the `NX` modifier bit marks the events that carry them.
pub const NX_KEYCODE_BASE: u32 = 0x1_0000;

/// NX key types from IOKit's `ev_keymap.h`, offset into the reserved range.
const fn nx(keytype: u32) -> u32 {
  NX_KEYCODE_BASE + keytype
}

lazy_static! {
  /// Literal key names accepted after the `-` of a hotkey, with the
  /// modifier bits the literal carries implicitly: the function-key area
  /// sets `fn`, the media keys set `nx`.
  static ref LITERAL_TABLE: HashMap<&'static str, (u32, ModifierSet)> = {
    let none = ModifierSet::empty();
    let f = ModifierSet::FN;
    let x = ModifierSet::NX;
    let entries: &[(&str, u32, ModifierSet)] = &[
      ("return", 0x24, none),
      ("tab", 0x30, none),
      ("space", 0x31, none),
      ("backspace", 0x33, none),
      ("escape", 0x35, none),
      ("delete", 0x75, f),
      ("home", 0x73, f),
      ("end", 0x77, f),
      ("pageup", 0x74, f),
      ("pagedown", 0x79, f),
      ("insert", 0x72, f),
      ("left", 0x7b, f),
      ("right", 0x7c, f),
      ("up", 0x7e, f),
      ("down", 0x7d, f),
      ("f1", 0x7a, f),
      ("f2", 0x78, f),
      ("f3", 0x63, f),
      ("f4", 0x76, f),
      ("f5", 0x60, f),
      ("f6", 0x61, f),
      ("f7", 0x62, f),
      ("f8", 0x64, f),
      ("f9", 0x65, f),
      ("f10", 0x6d, f),
      ("f11", 0x67, f),
      ("f12", 0x6f, f),
      ("f13", 0x69, f),
      ("f14", 0x6b, f),
      ("f15", 0x71, f),
      ("f16", 0x6a, f),
      ("f17", 0x40, f),
      ("f18", 0x4f, f),
      ("f19", 0x50, f),
      ("f20", 0x5a, f),
      ("sound_up", nx(0), x),
      ("sound_down", nx(1), x),
      ("brightness_up", nx(2), x),
      ("brightness_down", nx(3), x),
      ("mute", nx(7), x),
      ("play", nx(16), x),
      ("next", nx(17), x),
      ("previous", nx(18), x),
      ("fast", nx(19), x),
      ("rewind", nx(20), x),
      ("illumination_up", nx(21), x),
      ("illumination_down", nx(22), x),
    ];
    entries.iter().map(|&(name, code, flags)| (name, (code, flags))).collect()
  };
}

/// Resolves a literal key name to its keycode and implicit modifier bits.
pub fn keycode_for_literal(name: &str) -> Option<(u32, ModifierSet)> {
  LITERAL_TABLE.get(name).copied()
}

/// Returns `true` if `word` is a literal key name.
pub fn is_literal_key(word: &str) -> bool {
  LITERAL_TABLE.contains_key(word)
}

/// Resolves a single printable character to its ANSI virtual keycode.
///
/// The table is the US layout; rules written for other layouts can always
/// fall back to `0x..` hex keycodes.
pub fn keycode_for_char(c: char) -> Option<u32> {
  let code = match c.to_ascii_lowercase() {
    'a' => 0x00,
    's' => 0x01,
    'd' => 0x02,
    'f' => 0x03,
    'h' => 0x04,
    'g' => 0x05,
    'z' => 0x06,
    'x' => 0x07,
    'c' => 0x08,
    'v' => 0x09,
    'b' => 0x0b,
    'q' => 0x0c,
    'w' => 0x0d,
    'e' => 0x0e,
    'r' => 0x0f,
    'y' => 0x10,
    't' => 0x11,
    '1' => 0x12,
    '2' => 0x13,
    '3' => 0x14,
    '4' => 0x15,
    '6' => 0x16,
    '5' => 0x17,
    '=' => 0x18,
    '9' => 0x19,
    '7' => 0x1a,
    '-' => 0x1b,
    '8' => 0x1c,
    '0' => 0x1d,
    ']' => 0x1e,
    'o' => 0x1f,
    'u' => 0x20,
    '[' => 0x21,
    'i' => 0x22,
    'p' => 0x23,
    'l' => 0x25,
    'j' => 0x26,
    '\'' => 0x27,
    'k' => 0x28,
    ';' => 0x29,
    '\\' => 0x2a,
    ',' => 0x2b,
    '/' => 0x2c,
    'n' => 0x2d,
    'm' => 0x2e,
    '.' => 0x2f,
    '`' => 0x32,
    _ => return None,
  };
  Some(code)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn general_modifier_accepts_either_side() {
    let rule = ModifierSet::CMD;
    assert!(rule.matches_event(ModifierSet::CMD | ModifierSet::LCMD));
    assert!(rule.matches_event(ModifierSet::CMD | ModifierSet::RCMD));
    assert!(rule.matches_event(
      ModifierSet::CMD | ModifierSet::LCMD | ModifierSet::RCMD
    ));
    assert!(!rule.matches_event(ModifierSet::empty()));
  }

  #[test]
  fn sided_modifier_requires_that_side() {
    let rule = ModifierSet::LCMD;
    assert!(rule.matches_event(ModifierSet::CMD | ModifierSet::LCMD));
    assert!(!rule.matches_event(ModifierSet::CMD | ModifierSet::RCMD));
  }

  #[test]
  fn absent_modifier_rejects_presence() {
    let rule = ModifierSet::SHIFT;
    let event = ModifierSet::SHIFT | ModifierSet::LSHIFT | ModifierSet::CMD | ModifierSet::LCMD;
    assert!(!rule.matches_event(event));
    assert!(rule.matches_event(ModifierSet::SHIFT | ModifierSet::RSHIFT));
  }

  #[test]
  fn fn_and_nx_match_exactly() {
    let rule = ModifierSet::FN;
    assert!(rule.matches_event(ModifierSet::FN));
    assert!(!rule.matches_event(ModifierSet::empty()));
    assert!(!ModifierSet::empty().matches_event(ModifierSet::FN));
  }

  #[test]
  fn hyper_and_meh_aliases() {
    assert_eq!(
      modifier_for_keyword("hyper"),
      Some(ModifierSet::CMD | ModifierSet::SHIFT | ModifierSet::ALT | ModifierSet::CONTROL)
    );
    assert_eq!(
      modifier_for_keyword("meh"),
      Some(ModifierSet::SHIFT | ModifierSet::ALT | ModifierSet::CONTROL)
    );
    assert_eq!(modifier_for_keyword("meta"), None);
  }

  #[test]
  fn control_spellings() {
    assert_eq!(modifier_for_keyword("ctrl"), modifier_for_keyword("control"));
    assert_eq!(modifier_for_keyword("lctrl"), modifier_for_keyword("lcontrol"));
  }

  #[test]
  fn literal_implicit_flags() {
    let (code, flags) = keycode_for_literal("left").unwrap();
    assert_eq!(code, 0x7b);
    assert_eq!(flags, ModifierSet::FN);

    let (code, flags) = keycode_for_literal("play").unwrap();
    assert!(code >= NX_KEYCODE_BASE);
    assert_eq!(flags, ModifierSet::NX);

    let (_, flags) = keycode_for_literal("return").unwrap();
    assert!(flags.is_empty());

    assert!(keycode_for_literal("bogus").is_none());
  }

  #[test]
  fn char_keycodes() {
    assert_eq!(keycode_for_char('a'), Some(0x00));
    assert_eq!(keycode_for_char('A'), Some(0x00));
    assert_eq!(keycode_for_char('n'), Some(0x2d));
    assert_eq!(keycode_for_char('§'), None);
  }

  #[test]
  fn keyword_roundtrip() {
    // Serializing a parsed set and parsing it back lands on the same bits.
    for phrase in ["cmd + shift", "lalt + rctrl + fn", "hyper", "meh + fn"] {
      let mut set = ModifierSet::empty();
      for word in phrase.split('+').map(str::trim) {
        set |= modifier_for_keyword(word).unwrap();
      }
      let mut reparsed = ModifierSet::empty();
      for word in set.to_string().split('+').map(str::trim) {
        reparsed |= modifier_for_keyword(word).unwrap();
      }
      assert_eq!(set, reparsed, "roundtrip failed for: {}", phrase);
    }
  }
}

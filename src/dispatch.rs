// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Stateless event classification.
//!
//! [`dispatch`] is a pure function of the published rule set, the active
//! mode, the decoded key event, and the cached foreground process name. It
//! borrows everything it returns from the `Mappings` it was given, so the
//! hot path never touches the heap.

use crate::hotkey::{LoweredName, ProcessCommandRef};
use crate::keyboard::KeyPress;
use crate::mappings::{Mappings, ModeId};

/// What the platform layer should do with the event it just delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition<'a> {
  /// Suppress the event and do nothing else (capture mode, no rule).
  Swallow,
  /// Suppress the event and run a shell command.
  Shell(&'a str),
  /// Suppress the event and synthesize this key instead.
  Forward(KeyPress),
  /// Deliver the event to the OS, optionally also running a command.
  Passthrough(Option<&'a str>),
  /// Suppress the event and switch the mode cursor to `target`. `command`
  /// is the activation's own command and runs before the target mode's
  /// `on_enter` command.
  ActivateMode {
    target: &'a str,
    command: Option<&'a str>,
    on_enter: Option<&'a str>,
  },
  /// No rule claimed the event; the OS sees it unchanged.
  LetThrough,
}

/// Classifies one key event.
///
/// `process` is the pre-lowered foreground process name cached by the core
/// loop. Resolution order: blacklist, then rule lookup in the active mode,
/// then the rule's per-process table with wildcard fallback.
pub fn dispatch<'a>(
  mappings: &'a Mappings,
  mode: ModeId,
  event: &KeyPress,
  process: &LoweredName,
) -> Disposition<'a> {
  if !process.overflow() && mappings.blacklist_contains(process.as_str()) {
    return Disposition::LetThrough;
  }

  let hotkey = match mappings.lookup(mode, event) {
    Some(hotkey) => hotkey,
    None => {
      return if mappings.mode(mode).capture {
        Disposition::Swallow
      } else {
        Disposition::LetThrough
      };
    }
  };

  let command = if process.overflow() {
    hotkey.wildcard_or_unbound()
  } else {
    hotkey.find_command_lowered(process.as_bytes(), process.hash())
  };

  match command {
    ProcessCommandRef::Unbound => Disposition::LetThrough,
    ProcessCommandRef::Activate { target, command } => {
      let on_enter = mappings
        .mode_id(target)
        .and_then(|id| mappings.mode(id).on_enter_command.as_deref());
      Disposition::ActivateMode {
        target,
        command,
        on_enter,
      }
    }
    ProcessCommandRef::Command(cmd) => {
      if hotkey.passthrough() {
        Disposition::Passthrough(Some(cmd))
      } else {
        Disposition::Shell(cmd)
      }
    }
    ProcessCommandRef::Forwarded(key) => Disposition::Forward(key),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hotkey::{Hotkey, ProcessCommand, ACTIVATE_SENTINEL};
  use crate::keyboard::ModifierSet;
  use crate::mappings::Mappings;

  fn press(modifiers: ModifierSet, keycode: u32) -> KeyPress {
    KeyPress::new(modifiers, keycode)
  }

  fn event_cmd() -> ModifierSet {
    ModifierSet::CMD | ModifierSet::LCMD
  }

  #[test]
  fn wildcard_vs_specific_process() {
    let mut mappings = Mappings::new();
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x2d);
    hk.bind_process("terminal", ProcessCommand::Command("echo A".into()));
    hk.set_wildcard(ProcessCommand::Command("echo B".into()));
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let event = press(event_cmd(), 0x2d);
    let terminal = LoweredName::new("Terminal");
    let safari = LoweredName::new("Safari");
    assert_eq!(
      dispatch(&mappings, Mappings::DEFAULT_MODE, &event, &terminal),
      Disposition::Shell("echo A")
    );
    assert_eq!(
      dispatch(&mappings, Mappings::DEFAULT_MODE, &event, &safari),
      Disposition::Shell("echo B")
    );
  }

  #[test]
  fn blacklisted_process_passes() {
    let mut mappings = Mappings::new();
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x2d);
    hk.set_wildcard(ProcessCommand::Command("echo hit".into()));
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();
    mappings.add_blacklist(["Games"]);

    let event = press(event_cmd(), 0x2d);
    assert_eq!(
      dispatch(
        &mappings,
        Mappings::DEFAULT_MODE,
        &event,
        &LoweredName::new("games")
      ),
      Disposition::LetThrough
    );
  }

  #[test]
  fn unmatched_event_respects_capture() {
    let mut mappings = Mappings::new();
    let edit = mappings.declare_mode("edit", true, None).unwrap();

    let event = press(event_cmd(), 0x0e);
    let nobody = LoweredName::new("finder");
    assert_eq!(
      dispatch(&mappings, Mappings::DEFAULT_MODE, &event, &nobody),
      Disposition::LetThrough
    );
    assert_eq!(
      dispatch(&mappings, edit, &event, &nobody),
      Disposition::Swallow
    );
  }

  #[test]
  fn unbound_lets_through() {
    // ctrl - left, unbound in kitty, forwarded to alt - left elsewhere;
    // arrow keys carry the implicit fn flag on both sides
    let mut mappings = Mappings::new();
    let mut hk = Hotkey::new(ModifierSet::CONTROL | ModifierSet::FN, 0x7b);
    hk.bind_process("kitty", ProcessCommand::Unbound);
    hk.set_wildcard(ProcessCommand::Forwarded(press(
      ModifierSet::ALT | ModifierSet::FN,
      0x7b,
    )));
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let event = press(
      ModifierSet::CONTROL | ModifierSet::LCONTROL | ModifierSet::FN,
      0x7b,
    );
    assert_eq!(
      dispatch(
        &mappings,
        Mappings::DEFAULT_MODE,
        &event,
        &LoweredName::new("Kitty")
      ),
      Disposition::LetThrough
    );
    assert_eq!(
      dispatch(
        &mappings,
        Mappings::DEFAULT_MODE,
        &event,
        &LoweredName::new("Safari")
      ),
      Disposition::Forward(press(ModifierSet::ALT | ModifierSet::FN, 0x7b))
    );
  }

  #[test]
  fn left_right_discrimination() {
    let mut mappings = Mappings::new();
    let mut left = Hotkey::new(ModifierSet::LCMD, 0x0e);
    left.set_wildcard(ProcessCommand::Command("echo L".into()));
    mappings.add_hotkey(left, &[Mappings::DEFAULT_MODE]).unwrap();
    let mut right = Hotkey::new(ModifierSet::RCMD, 0x22);
    right.set_wildcard(ProcessCommand::Command("echo R".into()));
    mappings.add_hotkey(right, &[Mappings::DEFAULT_MODE]).unwrap();

    let nobody = LoweredName::new("finder");
    let lcmd_e = press(ModifierSet::CMD | ModifierSet::LCMD, 0x0e);
    let rcmd_e = press(ModifierSet::CMD | ModifierSet::RCMD, 0x0e);
    let rcmd_i = press(ModifierSet::CMD | ModifierSet::RCMD, 0x22);
    assert_eq!(
      dispatch(&mappings, Mappings::DEFAULT_MODE, &lcmd_e, &nobody),
      Disposition::Shell("echo L")
    );
    assert_eq!(
      dispatch(&mappings, Mappings::DEFAULT_MODE, &rcmd_e, &nobody),
      Disposition::LetThrough
    );
    assert_eq!(
      dispatch(&mappings, Mappings::DEFAULT_MODE, &rcmd_i, &nobody),
      Disposition::Shell("echo R")
    );
  }

  #[test]
  fn activation_reports_both_commands_in_order() {
    let mut mappings = Mappings::new();
    mappings
      .declare_mode("test", false, Some("echo entered".into()))
      .unwrap();
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x11);
    hk.bind_process(
      ACTIVATE_SENTINEL,
      ProcessCommand::Activate {
        target: "test".into(),
        command: Some("echo switching".into()),
      },
    );
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let event = press(event_cmd(), 0x11);
    assert_eq!(
      dispatch(
        &mappings,
        Mappings::DEFAULT_MODE,
        &event,
        &LoweredName::new("finder")
      ),
      Disposition::ActivateMode {
        target: "test",
        command: Some("echo switching"),
        on_enter: Some("echo entered"),
      }
    );
  }

  #[test]
  fn passthrough_carries_command() {
    let mut mappings = Mappings::new();
    let mut hk = Hotkey::new(ModifierSet::CMD | ModifierSet::PASSTHROUGH, 0x23);
    hk.set_wildcard(ProcessCommand::Command("echo P".into()));
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let event = press(event_cmd(), 0x23);
    assert_eq!(
      dispatch(
        &mappings,
        Mappings::DEFAULT_MODE,
        &event,
        &LoweredName::new("finder")
      ),
      Disposition::Passthrough(Some("echo P"))
    );
  }

  #[test]
  fn determinism() {
    let mut mappings = Mappings::new();
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x2d);
    hk.set_wildcard(ProcessCommand::Command("echo once".into()));
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let event = press(event_cmd(), 0x2d);
    let name = LoweredName::new("finder");
    let first = dispatch(&mappings, Mappings::DEFAULT_MODE, &event, &name);
    for _ in 0..100 {
      assert_eq!(
        dispatch(&mappings, Mappings::DEFAULT_MODE, &event, &name),
        first
      );
    }
  }
}

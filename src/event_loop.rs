// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! The runtime core the platform layer drives.
//!
//! [`CoreLoop`] owns the only mutable runtime state: the active-mode cursor
//! and the cached foreground process name. All calls arrive on the platform
//! event thread, one at a time; the reloader prepares a fresh [`Mappings`]
//! on its own thread and hands it over through [`CoreLoop::swap_mappings`],
//! so the hot path never takes a lock and never allocates.

use std::sync::Arc;

use crate::dispatch::{dispatch, Disposition};
use crate::hotkey::LoweredName;
use crate::keyboard::KeyPress;
use crate::mappings::{Mappings, ModeId};

pub struct CoreLoop {
  mappings: Arc<Mappings>,
  mode: ModeId,
  process: LoweredName,
}

impl CoreLoop {
  pub fn new(mappings: Arc<Mappings>) -> Self {
    CoreLoop {
      mappings,
      mode: Mappings::DEFAULT_MODE,
      process: LoweredName::default(),
    }
  }

  /// Classifies a key event and advances the mode cursor when the matched
  /// rule activates a mode. The returned disposition borrows from the
  /// installed mappings; nothing on this path touches the heap.
  pub fn on_key_event(&mut self, event: &KeyPress) -> Disposition<'_> {
    let mappings: &Mappings = &self.mappings;
    let disposition = dispatch(mappings, self.mode, event, &self.process);
    if let Disposition::ActivateMode { target, .. } = disposition {
      // activation targets are validated at parse time
      if let Some(id) = mappings.mode_id(target) {
        self.mode = id;
      }
    }
    disposition
  }

  /// Caches the new foreground process name, lowercased into the fixed
  /// buffer. Oversized names are flagged so lookups fall back to wildcard
  /// entries.
  pub fn on_process_changed(&mut self, name: &str) {
    self.process = LoweredName::new(name);
  }

  /// Installs a freshly loaded rule set. The cursor stays on the mode with
  /// the same name when the new table has one, and falls back to `default`
  /// otherwise.
  pub fn swap_mappings(&mut self, new: Arc<Mappings>) {
    let current_name = &self.mappings.mode(self.mode).name;
    self.mode = new.mode_id(current_name).unwrap_or(Mappings::DEFAULT_MODE);
    self.mappings = new;
  }

  pub fn mappings(&self) -> &Mappings {
    &self.mappings
  }

  pub fn current_mode(&self) -> ModeId {
    self.mode
  }

  pub fn current_mode_name(&self) -> &str {
    &self.mappings.mode(self.mode).name
  }

  pub fn current_process(&self) -> &LoweredName {
    &self.process
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hotkey::{Hotkey, ProcessCommand, ACTIVATE_SENTINEL};
  use crate::keyboard::ModifierSet;

  fn activation_mappings() -> Mappings {
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
    mappings
  }

  #[test]
  fn activation_moves_the_cursor() {
    let mut core = CoreLoop::new(Arc::new(activation_mappings()));
    let event = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x11);
    match core.on_key_event(&event) {
      Disposition::ActivateMode {
        target,
        command,
        on_enter,
      } => {
        assert_eq!(target, "test");
        assert_eq!(command, Some("echo switching"));
        assert_eq!(on_enter, Some("echo entered"));
      }
      other => panic!("expected activation, got {:?}", other),
    }
    assert_eq!(core.current_mode_name(), "test");

    // 'test' does not capture, so unmapped events pass through
    let unmapped = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x0e);
    assert_eq!(core.on_key_event(&unmapped), Disposition::LetThrough);
  }

  #[test]
  fn capture_mode_swallows_unmapped() {
    let mut mappings = Mappings::new();
    mappings.declare_mode("edit", true, None).unwrap();
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x0e);
    hk.bind_process(
      ACTIVATE_SENTINEL,
      ProcessCommand::Activate {
        target: "edit".into(),
        command: None,
      },
    );
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let mut core = CoreLoop::new(Arc::new(mappings));
    let enter = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x0e);
    assert!(matches!(
      core.on_key_event(&enter),
      Disposition::ActivateMode { .. }
    ));
    assert_eq!(core.current_mode_name(), "edit");

    let unmapped = KeyPress::new(ModifierSet::empty(), 0x2d);
    assert_eq!(core.on_key_event(&unmapped), Disposition::Swallow);
  }

  #[test]
  fn swap_keeps_mode_by_name() {
    let mut core = CoreLoop::new(Arc::new(activation_mappings()));
    let event = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x11);
    core.on_key_event(&event);
    assert_eq!(core.current_mode_name(), "test");

    // the reloaded config still declares 'test': cursor stays
    core.swap_mappings(Arc::new(activation_mappings()));
    assert_eq!(core.current_mode_name(), "test");

    // the reloaded config dropped 'test': cursor resets
    core.swap_mappings(Arc::new(Mappings::new()));
    assert_eq!(core.current_mode_name(), "default");
  }

  #[test]
  fn process_changes_affect_lookup() {
    let mut mappings = Mappings::new();
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x2d);
    hk.bind_process("terminal", ProcessCommand::Command("echo A".into()));
    hk.set_wildcard(ProcessCommand::Command("echo B".into()));
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let mut core = CoreLoop::new(Arc::new(mappings));
    let event = KeyPress::new(ModifierSet::CMD | ModifierSet::RCMD, 0x2d);

    core.on_process_changed("Terminal");
    assert_eq!(core.on_key_event(&event), Disposition::Shell("echo A"));
    core.on_process_changed("Safari");
    assert_eq!(core.on_key_event(&event), Disposition::Shell("echo B"));
  }
}

// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! A single hotkey rule and its per-process command table.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use crate::error::SourceLocation;
use crate::keyboard::{KeyPress, ModifierSet};
use crate::mappings::ModeId;

/// Process name storage is bounded so dispatch can lowercase incoming names
/// on the stack. Names longer than this are never matched per-process; the
/// rule's wildcard applies instead.
pub const PROCESS_NAME_CAP: usize = 256;

/// The sentinel "process name" a mode-activation entry is stored under; the
/// config syntax cannot produce it as a real process name.
pub(crate) const ACTIVATE_SENTINEL: &str = ";";

/// What a rule does for one process (or for the `*` wildcard).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCommand {
  /// Suppress the key and run this shell command.
  Command(String),
  /// Suppress the key and synthesize this one.
  Forwarded(KeyPress),
  /// Recognize the key but let the OS see it.
  Unbound,
  /// Suppress the key and switch modes; `command` is the extra shell
  /// command attached to the activation itself (`; mode : cmd`).
  Activate {
    target: String,
    command: Option<String>,
  },
}

/// Borrowed view of a [`ProcessCommand`], handed out on the dispatch path
/// so no string is cloned per key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCommandRef<'a> {
  Command(&'a str),
  Forwarded(KeyPress),
  Unbound,
  Activate {
    target: &'a str,
    command: Option<&'a str>,
  },
}

impl ProcessCommand {
  fn as_view(&self) -> ProcessCommandRef<'_> {
    match self {
      ProcessCommand::Command(cmd) => ProcessCommandRef::Command(cmd),
      ProcessCommand::Forwarded(key) => ProcessCommandRef::Forwarded(*key),
      ProcessCommand::Unbound => ProcessCommandRef::Unbound,
      ProcessCommand::Activate { target, command } => ProcessCommandRef::Activate {
        target,
        command: command.as_deref(),
      },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandTag {
  Command,
  Forwarded,
  Unbound,
  Activate,
}

/// Struct-of-arrays storage for per-process entries. The hash scan walks
/// `hashes` alone, which keeps the common miss case cache-dense for typical
/// table sizes.
#[derive(Debug, Clone, Default)]
struct ProcessTable {
  names: Vec<Box<str>>,
  hashes: Vec<u64>,
  tags: Vec<CommandTag>,
  strings: Vec<Option<Box<str>>>,
  forwards: Vec<Option<KeyPress>>,
  activation_commands: Vec<Option<Box<str>>>,
}

impl ProcessTable {
  fn push(&mut self, name: Box<str>, command: ProcessCommand) {
    self.hashes.push(hash_bytes(name.as_bytes()));
    self.names.push(name);
    match command {
      ProcessCommand::Command(cmd) => {
        self.tags.push(CommandTag::Command);
        self.strings.push(Some(cmd.into_boxed_str()));
        self.forwards.push(None);
        self.activation_commands.push(None);
      }
      ProcessCommand::Forwarded(key) => {
        self.tags.push(CommandTag::Forwarded);
        self.strings.push(None);
        self.forwards.push(Some(key));
        self.activation_commands.push(None);
      }
      ProcessCommand::Unbound => {
        self.tags.push(CommandTag::Unbound);
        self.strings.push(None);
        self.forwards.push(None);
        self.activation_commands.push(None);
      }
      ProcessCommand::Activate { target, command } => {
        self.tags.push(CommandTag::Activate);
        self.strings.push(Some(target.into_boxed_str()));
        self.forwards.push(None);
        self
          .activation_commands
          .push(command.map(String::into_boxed_str));
      }
    }
  }

  fn view(&self, index: usize) -> ProcessCommandRef<'_> {
    match self.tags[index] {
      CommandTag::Command => {
        ProcessCommandRef::Command(self.strings[index].as_deref().unwrap_or(""))
      }
      CommandTag::Forwarded => {
        ProcessCommandRef::Forwarded(self.forwards[index].unwrap_or_default())
      }
      CommandTag::Unbound => ProcessCommandRef::Unbound,
      CommandTag::Activate => ProcessCommandRef::Activate {
        target: self.strings[index].as_deref().unwrap_or(""),
        command: self.activation_commands[index].as_deref(),
      },
    }
  }

  fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
  let mut hasher = DefaultHasher::new();
  hasher.write(bytes);
  hasher.finish()
}

/// An incoming process name, ASCII-lowercased into a fixed buffer with its
/// hash precomputed, so lookups against rule tables stay free of heap
/// traffic. Built once per foreground-app change.
#[derive(Debug, Clone, Copy)]
pub struct LoweredName {
  buf: [u8; PROCESS_NAME_CAP],
  len: usize,
  hash: u64,
  overflow: bool,
}

impl LoweredName {
  pub fn new(name: &str) -> Self {
    let mut lowered = LoweredName {
      buf: [0; PROCESS_NAME_CAP],
      len: 0,
      hash: 0,
      overflow: name.len() > PROCESS_NAME_CAP,
    };
    if !lowered.overflow {
      for (dst, src) in lowered.buf.iter_mut().zip(name.bytes()) {
        *dst = src.to_ascii_lowercase();
      }
      lowered.len = name.len();
      lowered.hash = hash_bytes(&lowered.buf[..lowered.len]);
    }
    lowered
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.buf[..self.len]
  }

  pub fn as_str(&self) -> &str {
    // ASCII lowercasing never breaks UTF-8 validity.
    std::str::from_utf8(self.as_bytes()).unwrap_or("")
  }

  pub fn hash(&self) -> u64 {
    self.hash
  }

  /// `true` if the original name did not fit; matching falls back to the
  /// wildcard entry in that case.
  pub fn overflow(&self) -> bool {
    self.overflow
  }
}

impl Default for LoweredName {
  fn default() -> Self {
    LoweredName::new("")
  }
}

/// One rule: a modifier expression, a keycode, and what to do with the key
/// per foreground process. Owned by `Mappings`; modes refer to it by id.
#[derive(Debug, Clone)]
pub struct Hotkey {
  pub modifiers: ModifierSet,
  pub keycode: u32,
  owners: Vec<ModeId>,
  table: ProcessTable,
  wildcard: Option<ProcessCommand>,
  location: Option<SourceLocation>,
}

impl Hotkey {
  pub fn new(modifiers: ModifierSet, keycode: u32) -> Self {
    Hotkey {
      modifiers,
      keycode,
      owners: Vec::new(),
      table: ProcessTable::default(),
      wildcard: None,
      location: None,
    }
  }

  pub fn with_location(mut self, location: SourceLocation) -> Self {
    self.location = Some(location);
    self
  }

  pub fn location(&self) -> Option<&SourceLocation> {
    self.location.as_ref()
  }

  pub fn passthrough(&self) -> bool {
    self.modifiers.contains(ModifierSet::PASSTHROUGH)
  }

  pub fn activates(&self) -> bool {
    self.modifiers.contains(ModifierSet::ACTIVATE)
  }

  pub(crate) fn add_owner(&mut self, mode: ModeId) {
    if !self.owners.contains(&mode) {
      self.owners.push(mode);
    }
  }

  pub fn owners(&self) -> &[ModeId] {
    &self.owners
  }

  /// Binds `process` (lowercased here, hashed once) to `command`. The first
  /// binding for a name wins at lookup time, so a group expansion cannot
  /// override an earlier explicit entry.
  pub fn bind_process(&mut self, process: &str, command: ProcessCommand) {
    if let ProcessCommand::Activate { .. } = command {
      self.modifiers.insert(ModifierSet::ACTIVATE);
    }
    self
      .table
      .push(process.to_ascii_lowercase().into_boxed_str(), command);
  }

  pub fn set_wildcard(&mut self, command: ProcessCommand) {
    if let ProcessCommand::Activate { .. } = command {
      self.modifiers.insert(ModifierSet::ACTIVATE);
    }
    self.wildcard = Some(command);
  }

  pub fn has_process_bindings(&self) -> bool {
    !self.table.is_empty()
  }

  /// Resolves the command for a foreground process name.
  ///
  /// Lowercases into a fixed stack buffer, scans the precomputed hashes,
  /// byte-compares on a hash hit, and falls back to the wildcard entry
  /// (`Unbound` when none is present).
  pub fn find_command_for_process(&self, process: &str) -> ProcessCommandRef<'_> {
    if self.table.is_empty() {
      return self.wildcard_or_unbound();
    }
    let lowered = LoweredName::new(process);
    if lowered.overflow() {
      return self.wildcard_or_unbound();
    }
    self.find_command_lowered(lowered.as_bytes(), lowered.hash())
  }

  /// Same as [`find_command_for_process`](Self::find_command_for_process)
  /// but for a name that was already lowered and hashed.
  pub(crate) fn find_command_lowered(&self, bytes: &[u8], hash: u64) -> ProcessCommandRef<'_> {
    for (index, &entry_hash) in self.table.hashes.iter().enumerate() {
      if entry_hash == hash && self.table.names[index].as_bytes() == bytes {
        return self.table.view(index);
      }
    }
    self.wildcard_or_unbound()
  }

  pub(crate) fn wildcard_or_unbound(&self) -> ProcessCommandRef<'_> {
    match &self.wildcard {
      Some(command) => command.as_view(),
      None => ProcessCommandRef::Unbound,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn hotkey_with(entries: &[(&str, ProcessCommand)], wildcard: Option<ProcessCommand>) -> Hotkey {
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x2d);
    for (name, command) in entries {
      hk.bind_process(name, command.clone());
    }
    if let Some(w) = wildcard {
      hk.set_wildcard(w);
    }
    hk
  }

  #[test]
  fn process_match_is_case_insensitive() {
    let hk = hotkey_with(
      &[("Terminal", ProcessCommand::Command("echo A".into()))],
      Some(ProcessCommand::Command("echo B".into())),
    );
    for name in ["terminal", "Terminal", "TERMINAL"] {
      assert_eq!(
        hk.find_command_for_process(name),
        ProcessCommandRef::Command("echo A")
      );
    }
    assert_eq!(
      hk.find_command_for_process("Safari"),
      ProcessCommandRef::Command("echo B")
    );
  }

  #[test]
  fn empty_table_uses_wildcard() {
    let hk = hotkey_with(
      &[],
      Some(ProcessCommand::Forwarded(KeyPress::new(
        ModifierSet::ALT,
        0x7b,
      ))),
    );
    assert_eq!(
      hk.find_command_for_process("anything"),
      ProcessCommandRef::Forwarded(KeyPress::new(ModifierSet::ALT, 0x7b))
    );
  }

  #[test]
  fn no_wildcard_means_unbound() {
    let hk = hotkey_with(&[("kitty", ProcessCommand::Unbound)], None);
    assert_eq!(
      hk.find_command_for_process("kitty"),
      ProcessCommandRef::Unbound
    );
    assert_eq!(
      hk.find_command_for_process("emacs"),
      ProcessCommandRef::Unbound
    );
  }

  #[test]
  fn oversized_name_falls_back_to_wildcard() {
    let huge = "x".repeat(PROCESS_NAME_CAP + 1);
    let hk = hotkey_with(
      &[(huge.as_str(), ProcessCommand::Command("never".into()))],
      Some(ProcessCommand::Command("echo W".into())),
    );
    assert_eq!(
      hk.find_command_for_process(&huge),
      ProcessCommandRef::Command("echo W")
    );
  }

  #[test]
  fn first_binding_wins() {
    let hk = hotkey_with(
      &[
        ("kitty", ProcessCommand::Command("first".into())),
        ("kitty", ProcessCommand::Command("second".into())),
      ],
      None,
    );
    assert_eq!(
      hk.find_command_for_process("kitty"),
      ProcessCommandRef::Command("first")
    );
  }

  #[test]
  fn activation_entry_sets_flag_and_round_trips() {
    let mut hk = Hotkey::new(ModifierSet::CMD, 0x11);
    hk.bind_process(
      ACTIVATE_SENTINEL,
      ProcessCommand::Activate {
        target: "work".into(),
        command: Some("echo switching".into()),
      },
    );
    assert!(hk.activates());
    assert_eq!(
      hk.find_command_for_process(ACTIVATE_SENTINEL),
      ProcessCommandRef::Activate {
        target: "work",
        command: Some("echo switching"),
      }
    );
  }

  #[test]
  fn lowered_name_flags_overflow() {
    let lowered = LoweredName::new(&"y".repeat(PROCESS_NAME_CAP + 1));
    assert!(lowered.overflow());
    assert_eq!(lowered.as_bytes(), b"");

    let lowered = LoweredName::new("Kitty");
    assert!(!lowered.overflow());
    assert_eq!(lowered.as_str(), "kitty");
  }
}

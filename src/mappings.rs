// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! The rule registry built by the parser and read by the dispatcher.
//!
//! Modes and hotkeys live in two arenas owned by [`Mappings`] and refer to
//! each other by index, which keeps the read path pointer-free and lets a
//! reload replace the whole graph with one pointer swap. A `Mappings` is
//! mutated only while a load is running; afterwards it is shared read-only
//! until the next successful reload replaces it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::{env, fmt};

use crate::error::SourceLocation;
use crate::hotkey::Hotkey;
use crate::keyboard::KeyPress;

/// Index of a mode in the registry's mode arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeId(u32);

/// Index of a hotkey in the registry's hotkey arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotkeyId(u32);

/// A named hotkey namespace. One mode is active at a time; `default` always
/// exists and is active at startup.
#[derive(Debug, Clone)]
pub struct Mode {
  pub name: String,
  /// A capturing mode swallows events that match no rule instead of letting
  /// the OS see them.
  pub capture: bool,
  pub on_enter_command: Option<String>,
  /// Whether a `:: name` declaration was seen. The default mode starts
  /// undeclared so a later `:: default` can still attach properties to it.
  declared: bool,
  hotkeys: Vec<HotkeyId>,
  /// Hotkeys of this mode bucketed by keycode; buckets keep insertion
  /// order, which makes lookup deterministic.
  buckets: HashMap<u32, Vec<HotkeyId>>,
}

impl Mode {
  fn new(name: &str) -> Self {
    Mode {
      name: name.to_owned(),
      capture: false,
      on_enter_command: None,
      declared: false,
      hotkeys: Vec::new(),
      buckets: HashMap::new(),
    }
  }

  pub fn hotkeys(&self) -> &[HotkeyId] {
    &self.hotkeys
  }
}

/// A `.define name : template` command template. `{{N}}` placeholders are
/// 1-based; malformed `{{` sequences are literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
  pub template: String,
  pub max_placeholder: usize,
}

impl CommandTemplate {
  pub fn new(template: impl Into<String>) -> Self {
    let template = template.into();
    let max_placeholder = max_placeholder(&template);
    CommandTemplate {
      template,
      max_placeholder,
    }
  }

  /// Substitutes `{{N}}` with `args[N - 1]`. Callers pass exactly
  /// `max_placeholder` arguments; placeholders beyond the argument list and
  /// malformed sequences stay literal.
  pub fn expand(&self, args: &[&str]) -> String {
    let mut out = String::with_capacity(self.template.len());
    let mut rest = self.template.as_str();
    while let Some(pos) = rest.find("{{") {
      let (head, tail) = rest.split_at(pos);
      out.push_str(head);
      let after = &tail[2..];
      let digits = after
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
      if digits > 0 && after[digits..].starts_with("}}") {
        if let Ok(n) = after[..digits].parse::<usize>() {
          if n >= 1 && n <= args.len() {
            out.push_str(args[n - 1]);
            rest = &after[digits + 2..];
            continue;
          }
        }
      }
      out.push_str("{{");
      rest = after;
    }
    out.push_str(rest);
    out
  }
}

fn max_placeholder(template: &str) -> usize {
  let mut max = 0;
  let mut rest = template;
  while let Some(pos) = rest.find("{{") {
    let after = &rest[pos + 2..];
    let digits = after
      .bytes()
      .take_while(|b| b.is_ascii_digit())
      .count();
    if digits > 0 && after[digits..].starts_with("}}") {
      if let Ok(n) = after[..digits].parse::<usize>() {
        if n >= 1 && n > max {
          max = n;
        }
      }
    }
    rest = after;
  }
  max
}

/// Insertion failures surfaced by the registry; the parser renders these as
/// positioned errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  ModeAlreadyDeclared(String),
  DuplicateHotkey {
    mode: String,
    existing: Option<SourceLocation>,
  },
}

impl fmt::Display for RegistryError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RegistryError::ModeAlreadyDeclared(name) => {
        write!(f, "mode '{}' already declared", name)
      }
      RegistryError::DuplicateHotkey { mode, existing } => match existing {
        Some(location) => write!(
          f,
          "duplicate hotkey in mode '{}' (first defined at {})",
          mode, location
        ),
        None => write!(f, "duplicate hotkey in mode '{}'", mode),
      },
    }
  }
}

#[derive(Debug, Clone)]
pub struct Mappings {
  modes: Vec<Mode>,
  mode_ids: HashMap<String, ModeId>,
  hotkeys: Vec<Hotkey>,
  process_groups: HashMap<String, Vec<String>>,
  command_templates: HashMap<String, CommandTemplate>,
  blacklist: HashSet<String>,
  shell: String,
  loaded_files: Vec<PathBuf>,
}

impl Default for Mappings {
  fn default() -> Self {
    Self::new()
  }
}

impl Mappings {
  /// The auto-created `default` mode is always the first arena slot.
  pub const DEFAULT_MODE: ModeId = ModeId(0);

  pub fn new() -> Self {
    let mut mappings = Mappings {
      modes: Vec::new(),
      mode_ids: HashMap::new(),
      hotkeys: Vec::new(),
      process_groups: HashMap::new(),
      command_templates: HashMap::new(),
      blacklist: HashSet::new(),
      shell: env::var("SHELL").unwrap_or_else(|_| String::from("/bin/bash")),
      loaded_files: Vec::new(),
    };
    let id = ModeId(0);
    mappings.modes.push(Mode::new("default"));
    mappings.mode_ids.insert(String::from("default"), id);
    mappings
  }

  pub fn mode_id(&self, name: &str) -> Option<ModeId> {
    self.mode_ids.get(name).copied()
  }

  pub fn mode(&self, id: ModeId) -> &Mode {
    &self.modes[id.0 as usize]
  }

  pub fn modes(&self) -> impl Iterator<Item = &Mode> {
    self.modes.iter()
  }

  pub fn hotkey(&self, id: HotkeyId) -> &Hotkey {
    &self.hotkeys[id.0 as usize]
  }

  pub fn hotkey_count(&self) -> usize {
    self.hotkeys.len()
  }

  /// Registers a `:: name` declaration. The default mode may be declared
  /// once to attach capture/on-enter properties to it; every other name may
  /// be declared once, full stop.
  pub fn declare_mode(
    &mut self,
    name: &str,
    capture: bool,
    on_enter_command: Option<String>,
  ) -> Result<ModeId, RegistryError> {
    if let Some(id) = self.mode_id(name) {
      let mode = &mut self.modes[id.0 as usize];
      if mode.declared {
        return Err(RegistryError::ModeAlreadyDeclared(name.to_owned()));
      }
      mode.declared = true;
      mode.capture = capture;
      mode.on_enter_command = on_enter_command;
      return Ok(id);
    }
    let id = ModeId(self.modes.len() as u32);
    let mut mode = Mode::new(name);
    mode.declared = true;
    mode.capture = capture;
    mode.on_enter_command = on_enter_command;
    self.modes.push(mode);
    self.mode_ids.insert(name.to_owned(), id);
    Ok(id)
  }

  /// Inserts a hotkey into every owner mode's table.
  ///
  /// Two rules are duplicates when their keycode and modifier bits are
  /// equal bit-for-bit (both sides are rule-side, so left/right variants
  /// compare exactly); the rule-only passthrough/activate flags do not
  /// disambiguate two rules that would match the same events.
  pub fn add_hotkey(&mut self, hotkey: Hotkey, owners: &[ModeId]) -> Result<HotkeyId, RegistryError> {
    for &owner in owners {
      let mode = self.mode(owner);
      if let Some(bucket) = mode.buckets.get(&hotkey.keycode) {
        for &id in bucket {
          let existing = &self.hotkeys[id.0 as usize];
          if existing.modifiers.physical() == hotkey.modifiers.physical() {
            return Err(RegistryError::DuplicateHotkey {
              mode: mode.name.clone(),
              existing: existing.location().cloned(),
            });
          }
        }
      }
    }
    let id = HotkeyId(self.hotkeys.len() as u32);
    let mut hotkey = hotkey;
    for &owner in owners {
      hotkey.add_owner(owner);
    }
    let keycode = hotkey.keycode;
    self.hotkeys.push(hotkey);
    for &owner in owners {
      let mode = &mut self.modes[owner.0 as usize];
      mode.hotkeys.push(id);
      mode.buckets.entry(keycode).or_default().push(id);
    }
    Ok(id)
  }

  /// Finds the rule in `mode` matching `event`, if any. Buckets are keyed
  /// by keycode; within a bucket the first insertion-order entry whose
  /// modifier expression accepts the event wins.
  pub fn lookup(&self, mode: ModeId, event: &KeyPress) -> Option<&Hotkey> {
    let bucket = self.mode(mode).buckets.get(&event.keycode)?;
    bucket
      .iter()
      .map(|&id| &self.hotkeys[id.0 as usize])
      .find(|hotkey| hotkey.modifiers.matches_event(event.modifiers))
  }

  pub fn add_process_group(&mut self, name: &str, members: Vec<String>) {
    let members = members
      .into_iter()
      .map(|m| m.to_ascii_lowercase())
      .collect();
    self.process_groups.insert(name.to_owned(), members);
  }

  pub fn process_group(&self, name: &str) -> Option<&[String]> {
    self.process_groups.get(name).map(Vec::as_slice)
  }

  pub fn add_command_template(&mut self, name: &str, template: impl Into<String>) {
    self
      .command_templates
      .insert(name.to_owned(), CommandTemplate::new(template));
  }

  pub fn command_template(&self, name: &str) -> Option<&CommandTemplate> {
    self.command_templates.get(name)
  }

  pub fn add_blacklist<I, S>(&mut self, names: I)
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for name in names {
      self.blacklist.insert(name.as_ref().to_ascii_lowercase());
    }
  }

  /// `name` must already be lowercased; dispatch passes the cached buffer.
  pub fn blacklist_contains(&self, name: &str) -> bool {
    !self.blacklist.is_empty() && self.blacklist.contains(name)
  }

  pub fn set_shell(&mut self, shell: impl Into<String>) {
    self.shell = shell.into();
  }

  pub fn shell(&self) -> &str {
    &self.shell
  }

  /// Records an absolute path as loaded; returns `false` if it was already
  /// present (each file is read at most once per load).
  pub fn append_loaded_file(&mut self, path: PathBuf) -> bool {
    if self.loaded_files.iter().any(|p| p == &path) {
      return false;
    }
    self.loaded_files.push(path);
    true
  }

  pub fn is_file_loaded(&self, path: &Path) -> bool {
    self.loaded_files.iter().any(|p| p == path)
  }

  pub fn loaded_files(&self) -> &[PathBuf] {
    &self.loaded_files
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::keyboard::ModifierSet;

  #[test]
  fn default_mode_exists() {
    let mappings = Mappings::new();
    assert_eq!(mappings.mode_id("default"), Some(Mappings::DEFAULT_MODE));
    assert!(!mappings.mode(Mappings::DEFAULT_MODE).capture);
  }

  #[test]
  fn default_mode_can_be_declared_once() {
    let mut mappings = Mappings::new();
    let id = mappings
      .declare_mode("default", false, Some("echo hi".into()))
      .unwrap();
    assert_eq!(id, Mappings::DEFAULT_MODE);
    assert_eq!(
      mappings.declare_mode("default", false, None),
      Err(RegistryError::ModeAlreadyDeclared("default".into()))
    );
  }

  #[test]
  fn duplicate_hotkey_is_rejected() {
    let mut mappings = Mappings::new();
    let hk = Hotkey::new(ModifierSet::CMD, 0x2d);
    mappings.add_hotkey(hk, &[Mappings::DEFAULT_MODE]).unwrap();

    let dup = Hotkey::new(ModifierSet::CMD | ModifierSet::PASSTHROUGH, 0x2d);
    let err = mappings
      .add_hotkey(dup, &[Mappings::DEFAULT_MODE])
      .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateHotkey { .. }));
  }

  #[test]
  fn same_key_different_sides_coexist() {
    let mut mappings = Mappings::new();
    mappings
      .add_hotkey(Hotkey::new(ModifierSet::LCMD, 0x0e), &[Mappings::DEFAULT_MODE])
      .unwrap();
    mappings
      .add_hotkey(Hotkey::new(ModifierSet::RCMD, 0x0e), &[Mappings::DEFAULT_MODE])
      .unwrap();

    let event = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x0e);
    let hit = mappings.lookup(Mappings::DEFAULT_MODE, &event).unwrap();
    assert_eq!(hit.modifiers, ModifierSet::LCMD);
  }

  #[test]
  fn lookup_prefers_insertion_order() {
    let mut mappings = Mappings::new();
    mappings
      .add_hotkey(Hotkey::new(ModifierSet::CMD, 0x0e), &[Mappings::DEFAULT_MODE])
      .unwrap();
    mappings
      .add_hotkey(Hotkey::new(ModifierSet::LCMD, 0x0e), &[Mappings::DEFAULT_MODE])
      .unwrap();

    // both rules accept (cmd|lcmd); the earlier insertion wins
    let event = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x0e);
    let hit = mappings.lookup(Mappings::DEFAULT_MODE, &event).unwrap();
    assert_eq!(hit.modifiers, ModifierSet::CMD);
  }

  #[test]
  fn lookup_misses_on_other_mode() {
    let mut mappings = Mappings::new();
    let work = mappings.declare_mode("work", true, None).unwrap();
    mappings
      .add_hotkey(Hotkey::new(ModifierSet::CMD, 0x0e), &[work])
      .unwrap();

    let event = KeyPress::new(ModifierSet::CMD | ModifierSet::LCMD, 0x0e);
    assert!(mappings.lookup(Mappings::DEFAULT_MODE, &event).is_none());
    assert!(mappings.lookup(work, &event).is_some());
  }

  #[test]
  fn template_max_placeholder() {
    assert_eq!(CommandTemplate::new("yabai --focus {{1}}").max_placeholder, 1);
    assert_eq!(CommandTemplate::new("{{2}} and {{1}}").max_placeholder, 2);
    assert_eq!(CommandTemplate::new("no placeholders").max_placeholder, 0);
    assert_eq!(CommandTemplate::new("{{0}} {{x}} {{ 1}}").max_placeholder, 0);
  }

  #[test]
  fn template_expansion() {
    let template = CommandTemplate::new("yabai --focus {{1}} || yabai --move {{1}} {{2}}");
    assert_eq!(
      template.expand(&["west", "east"]),
      "yabai --focus west || yabai --move west east"
    );
  }

  #[test]
  fn template_expansion_leaves_malformed_literal() {
    let template = CommandTemplate::new("echo {{a}} {{1}}");
    assert_eq!(template.expand(&["ok"]), "echo {{a}} ok");
  }

  #[test]
  fn blacklist_is_lowercased() {
    let mut mappings = Mappings::new();
    mappings.add_blacklist(["Screensaver", "loginwindow"]);
    assert!(mappings.blacklist_contains("screensaver"));
    assert!(!mappings.blacklist_contains("finder"));
  }

  #[test]
  fn loaded_files_deduplicate() {
    let mut mappings = Mappings::new();
    assert!(mappings.append_loaded_file(PathBuf::from("/a/rc")));
    assert!(!mappings.append_loaded_file(PathBuf::from("/a/rc")));
    assert_eq!(mappings.loaded_files().len(), 1);
  }
}

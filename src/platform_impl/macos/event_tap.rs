// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! The session event tap: decodes key-downs into [`KeyPress`]es, feeds the
//! core loop, and turns the resulting disposition back into "drop or keep"
//! plus side effects (shell spawn, key synthesis).

use std::cell::RefCell;
use std::rc::Rc;

use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop, CFRunLoopSource};
use core_graphics::event::{
  CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
  CGEventType, CGKeyCode, CallbackResult, EventField,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use log::{debug, info, warn};

use super::TapState;
use crate::dispatch::Disposition;
use crate::error::Error;
use crate::exec;
use crate::keyboard::{KeyPress, ModifierSet, NX_KEYCODE_BASE};

// Device-dependent flag bits (IOKit), which CGEventFlags does not name:
// they are what distinguishes left from right modifiers.
const NX_DEVICELCTLKEYMASK: u64 = 0x0000_0001;
const NX_DEVICELSHIFTKEYMASK: u64 = 0x0000_0002;
const NX_DEVICERSHIFTKEYMASK: u64 = 0x0000_0004;
const NX_DEVICELCMDKEYMASK: u64 = 0x0000_0008;
const NX_DEVICERCMDKEYMASK: u64 = 0x0000_0010;
const NX_DEVICELALTKEYMASK: u64 = 0x0000_0020;
const NX_DEVICERALTKEYMASK: u64 = 0x0000_0040;
const NX_DEVICERCTLKEYMASK: u64 = 0x0000_2000;

pub(crate) struct KeyTap {
  _tap: CGEventTap<'static>,
  _source: CFRunLoopSource,
}

/// Creates the session-level tap and attaches it to the current run loop.
///
/// TODO: also tap NSSystemDefined events so the media-key (`nx`) rules
/// fire; plain key-down taps never see those keys.
pub(crate) fn install(state: Rc<RefCell<TapState>>) -> Result<KeyTap, Error> {
  let tap = CGEventTap::new(
    CGEventTapLocation::Session,
    CGEventTapPlacement::HeadInsertEventTap,
    CGEventTapOptions::Default,
    vec![CGEventType::KeyDown, CGEventType::TapDisabledByTimeout],
    move |_proxy, event_type, event| {
      if let CGEventType::TapDisabledByTimeout = event_type {
        warn!("event tap disabled by timeout; restart the daemon if keys stop responding");
        return CallbackResult::Keep;
      }
      let keycode =
        event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u32;
      let key = KeyPress::new(modifiers_from_flags(event.get_flags()), keycode);

      let mut guard = state.borrow_mut();
      let TapState {
        core,
        shell,
        reload,
      } = &mut *guard;

      while let Ok(new) = reload.try_recv() {
        core.swap_mappings(new);
        *shell = core.mappings().shell().to_owned();
        info!(
          "reloaded: {} hotkeys, mode '{}'",
          core.mappings().hotkey_count(),
          core.current_mode_name()
        );
      }

      match core.on_key_event(&key) {
        Disposition::Swallow => CallbackResult::Drop,
        Disposition::Shell(command) => {
          exec::spawn_detached(shell, command);
          CallbackResult::Drop
        }
        Disposition::Forward(forwarded) => {
          synthesize(forwarded);
          CallbackResult::Drop
        }
        Disposition::Passthrough(command) => {
          if let Some(command) = command {
            exec::spawn_detached(shell, command);
          }
          CallbackResult::Keep
        }
        Disposition::ActivateMode {
          target,
          command,
          on_enter,
        } => {
          debug!("mode '{}' activated", target);
          for command in [command, on_enter].into_iter().flatten() {
            exec::spawn_detached(shell, command);
          }
          CallbackResult::Drop
        }
        Disposition::LetThrough => CallbackResult::Keep,
      }
    },
  )
  .map_err(|_| {
    Error::Os(String::from(
      "failed to create event tap; is Accessibility permission granted?",
    ))
  })?;

  tap.enable();
  let source = tap
    .mach_port()
    .create_runloop_source(0)
    .map_err(|_| Error::Os(String::from("failed to create run loop source")))?;
  CFRunLoop::get_current().add_source(&source, unsafe { kCFRunLoopCommonModes });

  Ok(KeyTap {
    _tap: tap,
    _source: source,
  })
}

/// Diagnostic mode: print each key press instead of dispatching, in the
/// same spelling the config language accepts.
pub fn observe() -> Result<(), Error> {
  let tap = CGEventTap::new(
    CGEventTapLocation::Session,
    CGEventTapPlacement::HeadInsertEventTap,
    CGEventTapOptions::ListenOnly,
    vec![CGEventType::KeyDown],
    |_proxy, _event_type, event| {
      let keycode =
        event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u32;
      let modifiers = modifiers_from_flags(event.get_flags());
      println!("{}", KeyPress::new(modifiers, keycode));
      CallbackResult::Keep
    },
  )
  .map_err(|_| {
    Error::Os(String::from(
      "failed to create event tap; is Accessibility permission granted?",
    ))
  })?;

  tap.enable();
  let source = tap
    .mach_port()
    .create_runloop_source(0)
    .map_err(|_| Error::Os(String::from("failed to create run loop source")))?;
  CFRunLoop::get_current().add_source(&source, unsafe { kCFRunLoopCommonModes });
  CFRunLoop::run_current();
  Ok(())
}

fn modifiers_from_flags(flags: CGEventFlags) -> ModifierSet {
  let mut set = ModifierSet::empty();
  let device = flags.bits();

  if flags.contains(CGEventFlags::CGEventFlagAlternate) {
    set |= ModifierSet::ALT;
    if device & NX_DEVICELALTKEYMASK != 0 {
      set |= ModifierSet::LALT;
    }
    if device & NX_DEVICERALTKEYMASK != 0 {
      set |= ModifierSet::RALT;
    }
  }
  if flags.contains(CGEventFlags::CGEventFlagShift) {
    set |= ModifierSet::SHIFT;
    if device & NX_DEVICELSHIFTKEYMASK != 0 {
      set |= ModifierSet::LSHIFT;
    }
    if device & NX_DEVICERSHIFTKEYMASK != 0 {
      set |= ModifierSet::RSHIFT;
    }
  }
  if flags.contains(CGEventFlags::CGEventFlagCommand) {
    set |= ModifierSet::CMD;
    if device & NX_DEVICELCMDKEYMASK != 0 {
      set |= ModifierSet::LCMD;
    }
    if device & NX_DEVICERCMDKEYMASK != 0 {
      set |= ModifierSet::RCMD;
    }
  }
  if flags.contains(CGEventFlags::CGEventFlagControl) {
    set |= ModifierSet::CONTROL;
    if device & NX_DEVICELCTLKEYMASK != 0 {
      set |= ModifierSet::LCONTROL;
    }
    if device & NX_DEVICERCTLKEYMASK != 0 {
      set |= ModifierSet::RCONTROL;
    }
  }
  if flags.contains(CGEventFlags::CGEventFlagSecondaryFn) {
    set |= ModifierSet::FN;
  }
  set
}

/// Posts a key-down/key-up pair for a forwarded key.
fn synthesize(key: KeyPress) {
  if key.keycode >= NX_KEYCODE_BASE {
    // would need an NSEvent systemDefined post, which CGEvent cannot express
    debug!("media key synthesis is not supported; dropping forward");
    return;
  }
  let source = match CGEventSource::new(CGEventSourceStateID::HIDSystemState) {
    Ok(source) => source,
    Err(_) => {
      warn!("failed to create event source for synthesis");
      return;
    }
  };
  let flags = cg_flags_for(key.modifiers);
  for key_down in [true, false] {
    if let Ok(event) =
      CGEvent::new_keyboard_event(source.clone(), key.keycode as CGKeyCode, key_down)
    {
      event.set_flags(flags);
      event.post(CGEventTapLocation::HID);
    }
  }
}

fn cg_flags_for(modifiers: ModifierSet) -> CGEventFlags {
  let mut flags = CGEventFlags::CGEventFlagNull;
  if modifiers.intersects(ModifierSet::ALT | ModifierSet::LALT | ModifierSet::RALT) {
    flags |= CGEventFlags::CGEventFlagAlternate;
  }
  if modifiers.intersects(ModifierSet::SHIFT | ModifierSet::LSHIFT | ModifierSet::RSHIFT) {
    flags |= CGEventFlags::CGEventFlagShift;
  }
  if modifiers.intersects(ModifierSet::CMD | ModifierSet::LCMD | ModifierSet::RCMD) {
    flags |= CGEventFlags::CGEventFlagCommand;
  }
  if modifiers.intersects(
    ModifierSet::CONTROL | ModifierSet::LCONTROL | ModifierSet::RCONTROL,
  ) {
    flags |= CGEventFlags::CGEventFlagControl;
  }
  if modifiers.contains(ModifierSet::FN) {
    flags |= CGEventFlags::CGEventFlagSecondaryFn;
  }
  flags
}

// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

mod event_tap;
mod process_observer;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use core_foundation::runloop::CFRunLoop;
use crossbeam_channel::Receiver;
use log::info;

use crate::error::Error;
use crate::event_loop::CoreLoop;
use crate::mappings::Mappings;

pub use event_tap::observe;

/// Everything the tap callback touches. All access happens on the run-loop
/// thread; the `RefCell` only bridges the `Fn` closure the tap requires.
pub(crate) struct TapState {
  pub core: CoreLoop,
  /// Shell path copied out of the installed mappings, so dispositions that
  /// borrow the mappings can be executed without a second borrow.
  pub shell: String,
  pub reload: Receiver<Arc<Mappings>>,
}

/// Installs the event tap and the foreground-app observer, then parks in
/// the run loop. Returns only on tap-creation failure.
pub fn run(core: CoreLoop, reload: Receiver<Arc<Mappings>>) -> Result<(), Error> {
  let shell = core.mappings().shell().to_owned();
  let state = Rc::new(RefCell::new(TapState {
    core,
    shell,
    reload,
  }));

  if let Some(name) = process_observer::frontmost_process() {
    info!("frontmost application: {}", name);
    state.borrow_mut().core.on_process_changed(&name);
  }

  let _observer = process_observer::install({
    let state = Rc::clone(&state);
    move |name| state.borrow_mut().core.on_process_changed(&name)
  });

  let _tap = event_tap::install(state)?;
  CFRunLoop::run_current();
  Ok(())
}

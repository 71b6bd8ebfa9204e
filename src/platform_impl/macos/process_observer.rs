// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Foreground-application tracking via NSWorkspace notifications.
//!
//! An observer object is registered for
//! `NSWorkspaceDidActivateApplicationNotification`; each activation hands
//! the application's localized name to the callback. Notifications are
//! delivered on the main run loop, the same thread that owns the tap.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Once;

use cocoa::base::{id, nil};
use cocoa::foundation::NSString;
use objc::declare::ClassDecl;
use objc::runtime::{Class, Object, Sel};
use objc::{class, msg_send, sel, sel_impl};

const CALLBACK_PTR: &str = "hotkeydCallbackPtr";

type Callback = Box<dyn FnMut(String)>;

pub(crate) struct ProcessObserver {
  observer: id,
}

impl Drop for ProcessObserver {
  fn drop(&mut self) {
    unsafe {
      let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
      let center: id = msg_send![workspace, notificationCenter];
      let _: () = msg_send![center, removeObserver: self.observer];
      let _: () = msg_send![self.observer, release];
    }
  }
}

/// Registers `callback` for application activations. Keep the returned
/// observer alive for as long as notifications should flow.
pub(crate) fn install(callback: impl FnMut(String) + 'static) -> ProcessObserver {
  unsafe {
    let observer: id = msg_send![make_observer_class(), alloc];
    let observer: id = msg_send![observer, init];

    let boxed: Callback = Box::new(callback);
    let ptr = Box::into_raw(Box::new(boxed));
    (*observer).set_ivar(CALLBACK_PTR, ptr as usize);

    let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
    let center: id = msg_send![workspace, notificationCenter];
    let name = NSString::alloc(nil).init_str("NSWorkspaceDidActivateApplicationNotification");
    let _: () = msg_send![center,
      addObserver: observer
      selector: sel!(workspaceDidActivateApplication:)
      name: name
      object: nil];

    ProcessObserver { observer }
  }
}

/// The name of the frontmost application right now, for seeding the core
/// loop before the first activation notification arrives.
pub(crate) fn frontmost_process() -> Option<String> {
  unsafe {
    let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
    let app: id = msg_send![workspace, frontmostApplication];
    localized_name(app)
  }
}

unsafe fn localized_name(app: id) -> Option<String> {
  if app == nil {
    return None;
  }
  let name: id = msg_send![app, localizedName];
  if name == nil {
    return None;
  }
  let utf8: *const c_char = msg_send![name, UTF8String];
  if utf8.is_null() {
    return None;
  }
  Some(CStr::from_ptr(utf8).to_string_lossy().into_owned())
}

fn make_observer_class() -> *const Class {
  static mut OBSERVER_CLASS: *const Class = 0 as *const Class;
  static INIT: Once = Once::new();

  INIT.call_once(|| unsafe {
    let superclass = class!(NSObject);
    let mut decl = ClassDecl::new("HotkeydWorkspaceObserver", superclass).unwrap();
    decl.add_ivar::<usize>(CALLBACK_PTR);

    decl.add_method(
      sel!(workspaceDidActivateApplication:),
      workspace_did_activate as extern "C" fn(&Object, _, id),
    );
    decl.add_method(
      sel!(dealloc),
      dealloc_observer as extern "C" fn(&Object, _),
    );

    OBSERVER_CLASS = decl.register();
  });

  unsafe { OBSERVER_CLASS }
}

extern "C" fn workspace_did_activate(this: &Object, _: Sel, notification: id) {
  unsafe {
    let user_info: id = msg_send![notification, userInfo];
    if user_info == nil {
      return;
    }
    let key = NSString::alloc(nil).init_str("NSWorkspaceApplicationKey");
    let app: id = msg_send![user_info, objectForKey: key];
    let _: () = msg_send![key, release];
    if let Some(name) = localized_name(app) {
      let ptr: usize = *this.get_ivar(CALLBACK_PTR);
      if ptr != 0 {
        let callback = &mut *(ptr as *mut Callback);
        callback(name);
      }
    }
  }
}

extern "C" fn dealloc_observer(this: &Object, _: Sel) {
  unsafe {
    let ptr: usize = *this.get_ivar(CALLBACK_PTR);
    if ptr != 0 {
      let _callback = Box::from_raw(ptr as *mut Callback);
    }
    let _: () = msg_send![super(this, class!(NSObject)), dealloc];
  }
}

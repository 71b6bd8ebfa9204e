// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! OS integration: the event tap that feeds the dispatch core, key
//! synthesis, and the foreground-application tracker. Only macOS has a
//! backend; every other platform gets the core and the config tooling but
//! no way to acquire events.

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "macos")]
pub use macos::*;

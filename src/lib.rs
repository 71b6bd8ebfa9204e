// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Simple user-space hotkey daemon for macOS.
//!
//! A config file maps key chords to shell commands, key forwards, or mode
//! switches, with optional per-application bindings:
//!
//! ```text
//! # focus windows, except inside terminals
//! .define terms ["kitty", "wezterm"]
//! cmd - h [ @terms ~  * : yabai -m window --focus west ]
//!
//! # a capturing resize mode with an on-enter command
//! :: resize @ : echo resize
//! cmd - r ; resize
//! resize < escape ; default
//! ```
//!
//! The pipeline: [`tokenizer`] and [`parser`] turn source text into an
//! immutable [`mappings::Mappings`]; at runtime the platform event tap
//! feeds decoded keys into [`event_loop::CoreLoop`], which consults the
//! stateless [`dispatch`] function and hands the resulting
//! [`dispatch::Disposition`] back to the platform layer. Reloads build a
//! fresh `Mappings` off-thread and swap it in atomically.

pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod exec;
pub mod hotkey;
pub mod keyboard;
pub mod mappings;
pub mod parser;
pub mod platform_impl;
pub mod tokenizer;
pub mod watcher;

pub use crate::dispatch::{dispatch, Disposition};
pub use crate::error::{Error, ParseError};
pub use crate::event_loop::CoreLoop;
pub use crate::hotkey::{Hotkey, ProcessCommand};
pub use crate::keyboard::{KeyPress, ModifierSet};
pub use crate::mappings::Mappings;
pub use crate::parser::load;

// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::process;

use log::{error, info};

use hotkeyd::error::Error;
use hotkeyd::parser;

const USAGE: &str = "\
usage: hotkeyd [options]

options:
  -c, --config PATH   config file (default: see below)
  -o, --observe       print keycodes and modifiers of pressed keys
  -V, --verbose       debug logging
  -v, --version       print version and exit
  -h, --help          print this message

The default config is the first of:
  $XDG_CONFIG_HOME/hotkeyd/hotkeydrc
  $HOME/.config/hotkeyd/hotkeydrc
  $HOME/.hotkeydrc";

struct Args {
  config: Option<PathBuf>,
  observe: bool,
  verbose: bool,
}

fn parse_args() -> Result<Args, String> {
  let mut args = Args {
    config: None,
    observe: false,
    verbose: false,
  };
  let mut iter = env::args().skip(1);
  while let Some(arg) = iter.next() {
    match arg.as_str() {
      "-c" | "--config" => {
        let path = iter
          .next()
          .ok_or_else(|| String::from("missing argument for --config"))?;
        args.config = Some(PathBuf::from(path));
      }
      "-o" | "--observe" => args.observe = true,
      "-V" | "--verbose" => args.verbose = true,
      "-v" | "--version" => {
        println!("hotkeyd {}", env!("CARGO_PKG_VERSION"));
        process::exit(0);
      }
      "-h" | "--help" => {
        println!("{}", USAGE);
        process::exit(0);
      }
      other => return Err(format!("unknown argument '{}'", other)),
    }
  }
  Ok(args)
}

/// Probes the conventional config locations, in order.
fn locate_config() -> Result<PathBuf, Error> {
  let mut probed = Vec::new();
  if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
    probed.push(PathBuf::from(xdg).join("hotkeyd").join("hotkeydrc"));
  }
  if let Ok(home) = env::var("HOME") {
    let home = PathBuf::from(home);
    probed.push(home.join(".config").join("hotkeyd").join("hotkeydrc"));
    probed.push(home.join(".hotkeydrc"));
  }
  match probed.iter().find(|p| p.is_file()) {
    Some(path) => Ok(path.clone()),
    None => Err(Error::ConfigNotFound(probed)),
  }
}

fn main() {
  let args = match parse_args() {
    Ok(args) => args,
    Err(message) => {
      eprintln!("hotkeyd: {}", message);
      eprintln!("{}", USAGE);
      process::exit(2);
    }
  };

  env_logger::Builder::from_env(
    env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
  )
  .init();

  if let Err(e) = run(args) {
    error!("{}", e);
    process::exit(1);
  }
}

fn run(args: Args) -> Result<(), Error> {
  if args.observe {
    return observe();
  }

  let config = match args.config {
    Some(path) => path,
    None => locate_config()?,
  };
  let mappings = parser::load(&config)?;
  info!(
    "loaded {} hotkeys across {} modes from {}",
    mappings.hotkey_count(),
    mappings.modes().count(),
    config.display()
  );

  serve(config, mappings)
}

#[cfg(target_os = "macos")]
fn observe() -> Result<(), Error> {
  hotkeyd::platform_impl::observe()
}

#[cfg(not(target_os = "macos"))]
fn observe() -> Result<(), Error> {
  Err(Error::Os(String::from(
    "observe mode needs the macOS event tap",
  )))
}

#[cfg(target_os = "macos")]
fn serve(config: PathBuf, mappings: hotkeyd::Mappings) -> Result<(), Error> {
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  use hotkeyd::watcher::ConfigWatcher;
  use hotkeyd::CoreLoop;

  let _pidfile = pidfile::acquire()?;

  let watcher = ConfigWatcher::spawn(
    mappings.loaded_files().to_vec(),
    Duration::from_millis(500),
  )
  .map_err(|e| Error::Os(format!("failed to start config watcher: {}", e)))?;

  let (reload_tx, reload_rx) = crossbeam_channel::unbounded();
  thread::Builder::new()
    .name(String::from("config-reload"))
    .spawn(move || {
      for () in watcher.events().iter() {
        match parser::load(&config) {
          Ok(new) => {
            watcher.update_files(new.loaded_files().to_vec());
            if reload_tx.send(Arc::new(new)).is_err() {
              return;
            }
          }
          Err(e) => error!("reload failed, keeping current config:\n{}", e),
        }
      }
    })
    .map_err(|e| Error::Os(format!("failed to start reload thread: {}", e)))?;

  hotkeyd::platform_impl::run(CoreLoop::new(Arc::new(mappings)), reload_rx)
}

#[cfg(not(target_os = "macos"))]
fn serve(_config: PathBuf, _mappings: hotkeyd::Mappings) -> Result<(), Error> {
  Err(Error::Os(String::from(
    "config is valid, but event interception needs the macOS event tap",
  )))
}

#[cfg(target_os = "macos")]
mod pidfile {
  //! One daemon per user: an advisory lock on a pid file in /tmp. The lock
  //! dies with the process, so stale files never block a restart.

  use std::ffi::CString;
  use std::io::Write;

  use hotkeyd::error::Error;

  pub struct PidFile {
    fd: libc::c_int,
  }

  impl Drop for PidFile {
    fn drop(&mut self) {
      unsafe {
        libc::close(self.fd);
      }
    }
  }

  pub fn acquire() -> Result<PidFile, Error> {
    let user = std::env::var("USER").unwrap_or_else(|_| String::from("unknown"));
    let path = format!("/tmp/hotkeyd_{}.pid", user);
    let path_c =
      CString::new(path.clone()).map_err(|_| Error::Os(String::from("bad pid file path")))?;

    unsafe {
      let fd = libc::open(path_c.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o644);
      if fd < 0 {
        return Err(Error::Os(format!(
          "could not open pid file {}: {}",
          path,
          std::io::Error::last_os_error()
        )));
      }
      if libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) != 0 {
        libc::close(fd);
        return Err(Error::Os(format!(
          "another instance is already running (pid file {})",
          path
        )));
      }
      libc::ftruncate(fd, 0);
      let mut line = Vec::new();
      let _ = writeln!(line, "{}", std::process::id());
      libc::write(fd, line.as_ptr().cast(), line.len());
      Ok(PidFile { fd })
    }
  }
}

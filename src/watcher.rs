// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Config file change detection.
//!
//! A background thread polls the modification times of every loaded config
//! file (the root and everything it `.load`ed) and posts a notification
//! when any of them change. The receiver re-parses off the hot path and
//! swaps the result in; after a successful reload it hands the watcher the
//! new file list, since includes may have come or gone.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::debug;

pub struct ConfigWatcher {
  events: Receiver<()>,
  files: Sender<Vec<PathBuf>>,
}

impl ConfigWatcher {
  /// Starts the polling thread. The thread exits when the `ConfigWatcher`
  /// is dropped.
  pub fn spawn(files: Vec<PathBuf>, poll_interval: Duration) -> io::Result<ConfigWatcher> {
    // capacity 1: a pending notification already covers any further
    // changes seen before the reload runs
    let (event_tx, event_rx) = bounded(1);
    let (files_tx, files_rx) = unbounded();
    thread::Builder::new()
      .name(String::from("config-watcher"))
      .spawn(move || watch_loop(files, poll_interval, event_tx, files_rx))?;
    Ok(ConfigWatcher {
      events: event_rx,
      files: files_tx,
    })
  }

  /// One message per detected change; coalesced while a reload is pending.
  pub fn events(&self) -> &Receiver<()> {
    &self.events
  }

  /// Replaces the watched file list after a successful reload.
  pub fn update_files(&self, files: Vec<PathBuf>) {
    let _ = self.files.send(files);
  }
}

fn watch_loop(
  mut files: Vec<PathBuf>,
  poll_interval: Duration,
  events: Sender<()>,
  updates: Receiver<Vec<PathBuf>>,
) {
  let mut stamps = snapshot(&files);
  loop {
    match updates.recv_timeout(poll_interval) {
      Ok(new_files) => {
        files = new_files;
        stamps = snapshot(&files);
      }
      Err(RecvTimeoutError::Timeout) => {
        let current = snapshot(&files);
        if current != stamps {
          debug!("config change detected");
          stamps = current;
          let _ = events.try_send(());
        }
      }
      Err(RecvTimeoutError::Disconnected) => return,
    }
  }
}

/// Missing files snapshot as `None`; deletion and re-creation both count as
/// changes. Size is tracked alongside mtime to catch rewrites on
/// filesystems with coarse timestamps.
fn snapshot(files: &[PathBuf]) -> Vec<Option<(Option<SystemTime>, u64)>> {
  files
    .iter()
    .map(|path| {
      fs::metadata(path)
        .ok()
        .map(|m| (m.modified().ok(), m.len()))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::io::Write;

  fn unique_temp(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("hotkeyd-watch-{}-{}", std::process::id(), name))
  }

  #[test]
  fn detects_a_rewrite() {
    let path = unique_temp("rewrite");
    fs::write(&path, "cmd - a : true\n").unwrap();

    let watcher =
      ConfigWatcher::spawn(vec![path.clone()], Duration::from_millis(20)).unwrap();
    // no spurious event from the initial snapshot
    assert!(watcher
      .events()
      .recv_timeout(Duration::from_millis(120))
      .is_err());

    // rewrite with different length so even coarse mtimes can't hide it
    std::thread::sleep(Duration::from_millis(50));
    let mut f = fs::File::create(&path).unwrap();
    writeln!(f, "cmd + shift - b : false").unwrap();
    drop(f);

    assert!(watcher
      .events()
      .recv_timeout(Duration::from_secs(5))
      .is_ok());
    fs::remove_file(&path).ok();
  }

  #[test]
  fn deletion_counts_as_change() {
    let path = unique_temp("delete");
    fs::write(&path, "x").unwrap();

    let watcher =
      ConfigWatcher::spawn(vec![path.clone()], Duration::from_millis(20)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    fs::remove_file(&path).unwrap();

    assert!(watcher
      .events()
      .recv_timeout(Duration::from_secs(5))
      .is_ok());
  }
}

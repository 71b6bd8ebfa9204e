// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Detached shell execution.
//!
//! Commands run as grandchildren of the daemon via a double fork: the
//! intermediate child calls `setsid` and exits immediately, so the daemon
//! reaps only the intermediate and the command re-parents to init. The
//! daemon never waits on a command and never accumulates zombies, no matter
//! how long the command runs.

use std::ffi::CString;
use std::io;

use log::{debug, warn};

/// Runs `command` through `shell -c`, fully detached. Failures are logged
/// and swallowed; a broken command must never disturb event dispatch.
pub fn spawn_detached(shell: &str, command: &str) {
  match try_spawn(shell, command) {
    Ok(()) => debug!("spawned: {} -c {}", shell, command),
    Err(e) => warn!("failed to spawn '{}': {}", command, e),
  }
}

fn try_spawn(shell: &str, command: &str) -> io::Result<()> {
  let shell_c = CString::new(shell).map_err(|_| invalid("shell path contains NUL"))?;
  let flag_c = CString::new("-c").map_err(|_| invalid("unreachable"))?;
  let command_c = CString::new(command).map_err(|_| invalid("command contains NUL"))?;

  // The first fork gives us a child we can reap right away; that child
  // detaches with setsid and forks the actual command before exiting.
  let pid = unsafe { libc::fork() };
  if pid < 0 {
    return Err(io::Error::last_os_error());
  }
  if pid == 0 {
    unsafe {
      libc::setsid();
      let grandchild = libc::fork();
      if grandchild == 0 {
        let devnull = libc::open(b"/dev/null\0".as_ptr().cast(), libc::O_RDWR);
        if devnull >= 0 {
          libc::dup2(devnull, libc::STDIN_FILENO);
          libc::dup2(devnull, libc::STDOUT_FILENO);
          libc::dup2(devnull, libc::STDERR_FILENO);
          if devnull > libc::STDERR_FILENO {
            libc::close(devnull);
          }
        }
        let argv = [
          shell_c.as_ptr(),
          flag_c.as_ptr(),
          command_c.as_ptr(),
          std::ptr::null(),
        ];
        libc::execv(shell_c.as_ptr(), argv.as_ptr());
        // exec failed; nothing sane left to do in the grandchild
        libc::_exit(126);
      }
      libc::_exit(0);
    }
  }

  let mut status = 0;
  unsafe {
    libc::waitpid(pid, &mut status, 0);
  }
  Ok(())
}

fn invalid(message: &str) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidInput, message)
}

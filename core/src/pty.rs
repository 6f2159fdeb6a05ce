//! PTY process spawning: allocate a pseudo-terminal, exec a command inside it, and bridge its
//! stdout/stdin to async channels. Exit tracking and graceful-kill semantics live on [`PtyBridge`].

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{self, Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::{CoreError, CoreResult};

/// Grace period between SIGTERM and SIGKILL during a graceful stop.
pub const GRACEFUL_KILL_DEADLINE: std::time::Duration = std::time::Duration::from_secs(3);

/// Maps a fixed set of symbolic key names to the escape sequence a real terminal would send for
/// that key. This set is authoritative: any `text` value in `/api/sessions/{id}/input` that
/// happens to collide with one of these names is interpreted as the key, never as literal bytes.
pub fn symbolic_key_bytes(name: &str) -> Option<&'static [u8]> {
    match name {
        "arrow_up" => Some(b"\x1b[A"),
        "arrow_down" => Some(b"\x1b[B"),
        "arrow_right" => Some(b"\x1b[C"),
        "arrow_left" => Some(b"\x1b[D"),
        "escape" => Some(b"\x1b"),
        "enter" => Some(b"\r"),
        _ => None,
    }
}

fn build_command(argv: &[String], cwd: Option<&Path>, env: &[(String, String)]) -> CoreResult<CommandBuilder> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CoreError::InvalidRequest("command must have at least one argument".into()))?;

    let mut cmd = CommandBuilder::new(program);
    for arg in args {
        cmd.arg(arg);
    }
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    for (k, v) in env {
        cmd.env(k, v);
    }
    if let Some(dir) = cwd {
        cmd.cwd(dir);
    }
    Ok(cmd)
}

/// Exit status of the child process, delivered once on an mpsc channel when it terminates.
#[derive(Debug, Clone, Copy)]
pub struct PtyExit {
    pub exit_code: i32,
}

/// Writer half plus a handle to request resize/signal/kill on the spawned child. Reader output
/// arrives on the `mpsc::Receiver<Vec<u8>>` returned by [`spawn_pty`], exit status on the second
/// receiver.
pub struct PtyBridge {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
    resize_tx: sync::mpsc::Sender<(u16, u16)>,
    pid: Option<u32>,
}

/// Spawn `argv[0]` with `argv[1..]` as arguments inside a freshly allocated PTY of size
/// `cols`x`rows`. Returns the bridge, a receiver of raw output bytes, and a receiver that fires
/// exactly once with the exit status.
pub fn spawn_pty(
    argv: &[String],
    cwd: Option<&Path>,
    env: &[(String, String)],
    cols: u16,
    rows: u16,
) -> CoreResult<(PtyBridge, mpsc::Receiver<Vec<u8>>, mpsc::Receiver<PtyExit>)> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| CoreError::internal(format!("openpty failed: {e}")))?;

    let cmd = build_command(argv, cwd, env)?;
    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| CoreError::internal(format!("spawn failed: {e}")))?;
    let pid = child.process_id();

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| CoreError::internal(format!("clone pty reader failed: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| CoreError::internal(format!("take pty writer failed: {e}")))?;
    let master = pair.master;

    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(256);
    let (resize_tx, resize_rx) = sync::mpsc::channel::<(u16, u16)>();
    let (exit_tx, exit_rx) = mpsc::channel::<PtyExit>(1);

    let child = Arc::new(Mutex::new(child));

    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    std::thread::spawn(move || {
        while let Ok((cols, rows)) = resize_rx.recv() {
            let size = PtySize { cols, rows, pixel_width: 0, pixel_height: 0 };
            let _ = master.resize(size);
        }
    });

    let child_poll = Arc::clone(&child);
    std::thread::spawn(move || loop {
        let status = {
            let mut guard = match child_poll.lock() {
                Ok(g) => g,
                Err(_) => break,
            };
            guard.try_wait()
        };
        match status {
            Ok(None) => {}
            Ok(Some(status)) => {
                let _ = exit_tx.blocking_send(PtyExit { exit_code: status.exit_code() as i32 });
                break;
            }
            Err(_) => break,
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    });

    let bridge = PtyBridge {
        writer: Arc::new(Mutex::new(writer)),
        child,
        resize_tx,
        pid,
    };
    Ok((bridge, out_rx, exit_rx))
}

impl PtyBridge {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn write(&self, data: &[u8]) -> CoreResult<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| CoreError::internal("pty writer mutex poisoned"))?;
        guard.write_all(data)?;
        guard.flush()?;
        Ok(())
    }

    /// Request a PTY resize. Applied asynchronously by the dedicated resize thread.
    pub fn resize(&self, cols: u16, rows: u16) -> CoreResult<()> {
        self.resize_tx
            .send((cols, rows))
            .map_err(|_| CoreError::internal("pty resize channel closed"))
    }

    /// Immediately SIGKILL (or terminate on non-Unix) the child.
    pub fn kill(&self) -> CoreResult<()> {
        let mut guard = self.child.lock().map_err(|_| CoreError::internal("pty child mutex poisoned"))?;
        guard.kill().map_err(CoreError::from)
    }

    /// SIGTERM the process group, then poll up to [`GRACEFUL_KILL_DEADLINE`] for it to exit
    /// before escalating to SIGKILL. `is_exited` is polled so the caller's own exit-tracking task
    /// (which observes the PTY's exit channel) stays the single source of truth for status.
    pub async fn graceful_kill(&self, mut is_exited: impl FnMut() -> bool) -> CoreResult<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGTERM);
                }
            }
        }

        let deadline = tokio::time::Instant::now() + GRACEFUL_KILL_DEADLINE;
        loop {
            if is_exited() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        {
            self.kill()?;
        }
        Ok(())
    }

    /// Send a raw signal to the process group (Unix only).
    #[cfg(unix)]
    pub fn signal(&self, sig: i32) -> CoreResult<()> {
        let Some(pid) = self.pid else {
            return Err(CoreError::internal("pty has no pid"));
        };
        let ret = unsafe { libc::kill(-(pid as i32), sig) };
        if ret == 0 {
            Ok(())
        } else {
            Err(CoreError::Io(std::io::Error::last_os_error()))
        }
    }
}

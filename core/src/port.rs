//! Port-conflict resolution: before binding the listener, find whatever process already holds
//! the requested port and decide whether it's safe to reap automatically.

use serde::Serialize;
use sysinfo::{Pid, System};

/// What to do about an already-bound port.
#[derive(Debug, Clone, Serialize)]
pub struct PortConflict {
    pub port: u16,
    pub process_name: String,
    pub pid: u32,
    /// True when the occupying process looks like one of ours (same executable name) and can be
    /// terminated automatically; false for anything else, which must be surfaced to the operator.
    pub self_managed: bool,
    pub alternative_ports: Vec<u16>,
}

/// Our own binary's name, used to classify an occupying process as self-managed.
fn own_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "vibetunnel-server".to_string())
}

/// Scans local TCP listeners and returns a conflict description if `port` is already bound by
/// a process other than the caller. Returns `None` if the port is free.
pub fn check_port(port: u16) -> Option<PortConflict> {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let pid = find_listener_pid(port)?;
    let process = system.process(Pid::from_u32(pid))?;
    let process_name = process.name().to_string_lossy().to_string();
    let self_managed = process_name == own_process_name();

    Some(PortConflict {
        port,
        process_name,
        pid,
        self_managed,
        alternative_ports: alternative_ports(port),
    })
}

/// Candidate ports to suggest when the requested one is taken by something we don't own.
fn alternative_ports(port: u16) -> Vec<u16> {
    (1..=3).filter_map(|delta| port.checked_add(delta)).collect()
}

/// Finds the pid listening on `port` by parsing `/proc/net/tcp` (Linux) — the portable fallback
/// when no netlink/libproc binding is available. Best-effort: returns `None` on any read failure
/// or on non-Linux platforms the host would need a platform-specific implementation, which is out
/// of scope here (the resolver then simply reports no conflict, matching a fail-open policy for a
/// purely advisory pre-flight check).
/// Matches one data line of `/proc/net/tcp` against `hex_port` (the requested port in uppercase
/// hex) and, if it's a listener (`st == 0A`) bound to that port, returns its socket inode.
///
/// Column layout: `sl local_address rem_address st tx_queue:rx_queue tr:tm->when retrnsmt uid
/// timeout inode`. `local_address`/`rem_address` are `HEXIP:HEXPORT`.
fn listener_inode_for_port(line: &str, hex_port: &str) -> Option<String> {
    let mut fields = line.split_whitespace();
    let local_addr = fields.nth(1)?;
    let (_, p) = local_addr.split_once(':')?;
    // Skip rem_address (the next column) before reading st, the connection-state column.
    let state = fields.nth(1)?;
    if p.eq_ignore_ascii_case(hex_port) && state == "0A" {
        fields.nth(5).map(|s| s.to_string())
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn find_listener_pid(port: u16) -> Option<u32> {
    let hex_port = format!("{:04X}", port);
    let inode = std::fs::read_to_string("/proc/net/tcp")
        .ok()?
        .lines()
        .skip(1)
        .find_map(|line| listener_inode_for_port(line, &hex_port))?;

    for entry in std::fs::read_dir("/proc").ok()?.filter_map(|e| e.ok()) {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.filter_map(|f| f.ok()) {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link.to_string_lossy() == format!("socket:[{inode}]") {
                    return Some(pid);
                }
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn find_listener_pid(_port: u16) -> Option<u32> {
    None
}

/// Terminate the process occupying a port. Only ever called by the caller after confirming
/// `self_managed`; never invoked on a conflict we didn't classify as ours.
pub fn terminate_owner(conflict: &PortConflict) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let ret = unsafe { libc::kill(conflict.pid as i32, libc::SIGTERM) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = conflict;
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "not supported on this platform"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sl  local_address rem_address   st tx_queue:rx_queue tr:tm->when retrnsmt uid timeout inode
    const LISTENING_ON_1F90: &str =
        "  0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 54321 1 0000000000000000 100 0 0 10 0";
    const ESTABLISHED_ON_1F90: &str =
        "  1: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 54322 1 0000000000000000 100 0 0 10 0";

    #[test]
    fn matches_a_listening_socket_on_the_requested_port() {
        assert_eq!(listener_inode_for_port(LISTENING_ON_1F90, "1F90"), Some("54321".to_string()));
    }

    #[test]
    fn ignores_an_established_connection_even_on_the_same_local_port() {
        assert_eq!(listener_inode_for_port(ESTABLISHED_ON_1F90, "1F90"), None);
    }

    #[test]
    fn ignores_a_listener_on_a_different_port() {
        assert_eq!(listener_inode_for_port(LISTENING_ON_1F90, "0050"), None);
    }
}

//! Sources for the local TCP connection table.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    Other,
}

/// One row of the connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpEntry {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,
}

impl TcpEntry {
    pub fn is_established(&self) -> bool {
        self.state == TcpState::Established
    }
}

/// Something that can list the current TCP connections.
#[async_trait]
pub trait ConnectionTable: Send + Sync {
    async fn connections(&self) -> Result<Vec<TcpEntry>>;
}

/// Platform default: procfs on Linux, `netstat` elsewhere.
pub fn system_table() -> Box<dyn ConnectionTable> {
    if cfg!(target_os = "linux") {
        Box::new(ProcNetTcp::default())
    } else {
        Box::new(NetstatTable::default())
    }
}

// ---------------------------------------------------------------------------
// /proc/net/tcp
// ---------------------------------------------------------------------------

/// Reads `/proc/net/tcp` and `/proc/net/tcp6`.
pub struct ProcNetTcp {
    paths: Vec<PathBuf>,
}

impl Default for ProcNetTcp {
    fn default() -> Self {
        Self {
            paths: vec![
                PathBuf::from("/proc/net/tcp"),
                PathBuf::from("/proc/net/tcp6"),
            ],
        }
    }
}

impl ProcNetTcp {
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl ConnectionTable for ProcNetTcp {
    async fn connections(&self) -> Result<Vec<TcpEntry>> {
        let mut entries = Vec::new();
        let mut read_any = false;
        for path in &self.paths {
            // tcp6 is absent on kernels built without IPv6
            let content = match tokio::fs::read_to_string(path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to read {}", path.display()))
                }
            };
            read_any = true;
            entries.extend(content.lines().skip(1).filter_map(parse_proc_line));
        }
        if !read_any {
            anyhow::bail!("no readable TCP table under /proc/net");
        }
        Ok(entries)
    }
}

/// Parse one data line of `/proc/net/tcp{,6}`.
///
/// `  0: 0100007F:0CEA 0100007F:D2C4 01 ...`
pub fn parse_proc_line(line: &str) -> Option<TcpEntry> {
    let mut fields = line.split_whitespace();
    let _slot = fields.next()?;
    let local = parse_proc_addr(fields.next()?)?;
    let remote = parse_proc_addr(fields.next()?)?;
    let state = match fields.next()? {
        "01" => TcpState::Established,
        _ => TcpState::Other,
    };
    Some(TcpEntry {
        local,
        remote,
        state,
    })
}

fn parse_proc_addr(field: &str) -> Option<SocketAddr> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = match addr_hex.len() {
        8 => {
            let word = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        32 => {
            // Four 32-bit words, each printed in host byte order.
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&addr_hex[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

// ---------------------------------------------------------------------------
// netstat
// ---------------------------------------------------------------------------

/// Shells out to `netstat -an` (Windows, macOS, BSD).
pub struct NetstatTable {
    program: String,
}

impl Default for NetstatTable {
    fn default() -> Self {
        Self {
            program: "netstat".to_string(),
        }
    }
}

impl NetstatTable {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ConnectionTable for NetstatTable {
    async fn connections(&self) -> Result<Vec<TcpEntry>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-an");
        if cfg!(windows) {
            cmd.args(["-p", "TCP"]);
        } else {
            cmd.args(["-p", "tcp"]);
        }
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.program))?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, err.trim());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_netstat_line).collect())
    }
}

/// Parse a `netstat -an` row.
///
/// Windows: `  TCP    10.0.0.5:50123    10.0.0.9:445    ESTABLISHED`
/// macOS:   `tcp4  0  0  10.0.0.5.50123  10.0.0.9.445  ESTABLISHED`
pub fn parse_netstat_line(line: &str) -> Option<TcpEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let proto = fields.first()?.to_ascii_lowercase();
    if !proto.starts_with("tcp") {
        return None;
    }
    // State is the last column; remote and local precede it.
    let state_idx = fields.len().checked_sub(1)?;
    if state_idx < 2 {
        return None;
    }
    let state = if fields[state_idx].eq_ignore_ascii_case("ESTABLISHED") {
        TcpState::Established
    } else {
        TcpState::Other
    };
    let remote = parse_netstat_addr(fields[state_idx - 1])?;
    let local = parse_netstat_addr(fields[state_idx - 2])?;
    Some(TcpEntry {
        local,
        remote,
        state,
    })
}

fn parse_netstat_addr(field: &str) -> Option<SocketAddr> {
    if let Ok(addr) = field.parse::<SocketAddr>() {
        return Some(addr);
    }
    // BSD style: address and port joined by the last '.'
    let (addr, port) = field.rsplit_once('.')?;
    let port: u16 = port.parse().ok()?;
    let addr = addr.split('%').next()?;
    let ip: IpAddr = addr.parse().ok()?;
    Some(SocketAddr::new(ip, port))
}

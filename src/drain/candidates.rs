//! Candidate remote addresses for the drain check.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;

use crate::unc::UncPath;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid address range '{input}': {reason}")]
pub struct RangeError {
    pub input: String,
    pub reason: &'static str,
}

/// A single address, a CIDR block, or an inclusive `a-b` span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressRange {
    Single(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
    Span { start: IpAddr, end: IpAddr },
}

impl AddressRange {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let ip = canonical(*ip);
        match *self {
            Self::Single(addr) => addr == ip,
            Self::Cidr { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = mask_u32(prefix);
                    u32::from(net) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = mask_u128(prefix);
                    u128::from(net) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
            Self::Span { start, end } => match (start, end, ip) {
                (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(ip)) => {
                    (u32::from(s)..=u32::from(e)).contains(&u32::from(ip))
                }
                (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(ip)) => {
                    (u128::from(s)..=u128::from(e)).contains(&u128::from(ip))
                }
                _ => false,
            },
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

/// IPv4-mapped IPv6 addresses compare as their IPv4 form.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

impl FromStr for AddressRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = |reason| RangeError {
            input: s.to_string(),
            reason,
        };
        let parse_ip = |v: &str| v.trim().parse::<IpAddr>().map(canonical);

        if let Some((net, prefix)) = s.split_once('/') {
            let network = parse_ip(net).map_err(|_| err("bad network address"))?;
            let prefix: u8 = prefix.trim().parse().map_err(|_| err("bad prefix length"))?;
            let max = if network.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(err("prefix length out of range"));
            }
            return Ok(Self::Cidr { network, prefix });
        }

        if let Some((start, end)) = s.split_once('-') {
            let start = parse_ip(start).map_err(|_| err("bad start address"))?;
            let end = parse_ip(end).map_err(|_| err("bad end address"))?;
            if start.is_ipv4() != end.is_ipv4() {
                return Err(err("mixed address families"));
            }
            if start > end {
                return Err(err("start is after end"));
            }
            return Ok(Self::Span { start, end });
        }

        parse_ip(s)
            .map(Self::Single)
            .map_err(|_| err("not an IP address, CIDR block, or span"))
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(ip) => write!(f, "{ip}"),
            Self::Cidr { network, prefix } => write!(f, "{network}/{prefix}"),
            Self::Span { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Remote addresses the drain barrier watches.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    ranges: Vec<AddressRange>,
    addresses: BTreeSet<IpAddr>,
}

impl CandidateSet {
    pub fn new(ranges: Vec<AddressRange>) -> Self {
        Self {
            ranges,
            addresses: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, ip: IpAddr) {
        self.addresses.insert(canonical(ip));
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addresses.contains(&canonical(*ip)) || self.ranges.iter().any(|r| r.contains(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.addresses.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &IpAddr> {
        self.addresses.iter()
    }

    /// Add the addresses every target host resolves to.
    ///
    /// Literal IPs are added directly; names go through the system resolver.
    /// Lookup failures are logged and skipped.
    pub async fn resolve_targets(&mut self, targets: &[UncPath]) {
        let mut resolver: Option<TokioAsyncResolver> = None;
        for target in targets {
            if let Ok(ip) = target.host.parse::<IpAddr>() {
                self.insert(ip);
                continue;
            }
            if resolver.is_none() {
                match TokioAsyncResolver::tokio_from_system_conf() {
                    Ok(r) => resolver = Some(r),
                    Err(e) => {
                        warn!(error = %e, "DNS resolver unavailable, target hosts not resolved");
                        return;
                    }
                }
            }
            let Some(r) = resolver.as_ref() else { return };
            match r.lookup_ip(target.host.as_str()).await {
                Ok(lookup) => {
                    for ip in lookup.iter() {
                        debug!(host = %target.host, %ip, "resolved drain candidate");
                        self.insert(ip);
                    }
                }
                Err(e) => warn!(host = %target.host, error = %e, "failed to resolve target host"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_contains() {
        let range: AddressRange = "10.20.0.0/16".parse().unwrap();
        assert!(range.contains(&ip("10.20.3.4")));
        assert!(!range.contains(&ip("10.21.0.1")));
        assert!(range.contains(&ip("::ffff:10.20.9.9")));
    }

    #[test]
    fn test_span_contains() {
        let range: AddressRange = "192.168.1.10-192.168.1.20".parse().unwrap();
        assert!(range.contains(&ip("192.168.1.10")));
        assert!(range.contains(&ip("192.168.1.20")));
        assert!(!range.contains(&ip("192.168.1.21")));
    }

    #[test]
    fn test_ipv6_cidr() {
        let range: AddressRange = "fd00::/8".parse().unwrap();
        assert!(range.contains(&ip("fd12::1")));
        assert!(!range.contains(&ip("fe80::1")));
        assert!(!range.contains(&ip("10.0.0.1")));
    }

    #[test]
    fn test_zero_prefix_matches_family() {
        let range: AddressRange = "0.0.0.0/0".parse().unwrap();
        assert!(range.contains(&ip("8.8.8.8")));
    }

    #[test]
    fn test_invalid_ranges() {
        for bad in ["", "10.0.0.0/33", "10.0.0.9-10.0.0.1", "10.0.0.1-fe80::1", "fs01"] {
            assert!(bad.parse::<AddressRange>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_candidate_set_matches_addresses_and_ranges() {
        let mut set = CandidateSet::new(vec!["10.0.0.0/24".parse().unwrap()]);
        set.insert(ip("172.16.5.5"));
        assert!(set.contains(&ip("10.0.0.77")));
        assert!(set.contains(&ip("::ffff:172.16.5.5")));
        assert!(!set.contains(&ip("172.16.5.6")));
        assert!(!set.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_literal_targets_without_dns() {
        let targets = vec![
            UncPath::parse(r"\\10.9.8.7\data").unwrap(),
            UncPath::parse(r"\\10.9.8.8\data").unwrap(),
        ];
        let mut set = CandidateSet::default();
        set.resolve_targets(&targets).await;
        assert!(set.contains(&ip("10.9.8.7")));
        assert!(set.contains(&ip("10.9.8.8")));
        assert_eq!(set.addresses().count(), 2);
    }
}

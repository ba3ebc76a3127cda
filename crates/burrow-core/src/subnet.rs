use crate::error::CoreError;
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;

/// A network range in CIDR notation (`10.0.0.0/8`, `fd00::/8`).
///
/// A bare address is accepted as a single-host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix_len: u8,
}

impl TrustedSubnet {
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self, CoreError> {
        let max = max_prefix(&network);
        if prefix_len > max {
            return Err(CoreError::InvalidSubnet(format!(
                "prefix length {} exceeds {} for {}",
                prefix_len, max, network
            )));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `ip` lies in this range. Address families never cross-match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.network) {
            (IpAddr::V4(ip), IpAddr::V4(net)) => {
                let mask = u32::MAX
                    .checked_shl(32 - self.prefix_len as u32)
                    .unwrap_or(0);
                (u32::from_be_bytes(ip.octets()) & mask) == (u32::from_be_bytes(net.octets()) & mask)
            }
            (IpAddr::V6(ip), IpAddr::V6(net)) => {
                let mask = u128::MAX
                    .checked_shl(128 - self.prefix_len as u32)
                    .unwrap_or(0);
                (u128::from_be_bytes(ip.octets()) & mask)
                    == (u128::from_be_bytes(net.octets()) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for TrustedSubnet {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (network, prefix_len) = match s.split_once('/') {
            Some((network, prefix)) => {
                let prefix = prefix.parse::<u8>().map_err(|_| {
                    CoreError::InvalidSubnet(format!("invalid prefix length in '{}'", s))
                })?;
                (network, Some(prefix))
            }
            None => (s, None),
        };

        let network = network
            .parse::<IpAddr>()
            .map_err(|_| CoreError::InvalidSubnet(format!("invalid network address in '{}'", s)))?;
        let prefix_len = prefix_len.unwrap_or_else(|| max_prefix(&network));

        Self::new(network, prefix_len)
    }
}

impl Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

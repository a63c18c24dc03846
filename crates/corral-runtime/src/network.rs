//! Static guest addressing on the host's layer-2 segment.

use std::net::Ipv4Addr;

/// Prefix length of the host segment guests are placed on.
pub const PREFIX_LEN: u8 = 24;

/// Static IPv4 settings for one guest NIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Guest address.
    pub address: Ipv4Addr,
    /// Default gateway, `.1` of the guest's /24.
    pub gateway: Ipv4Addr,
    /// Resolvers.
    pub dns: Vec<Ipv4Addr>,
}

impl NetworkSpec {
    /// Network settings for `address`; the gateway is `.1` of its /24.
    pub fn for_address(address: Ipv4Addr, dns: &[Ipv4Addr]) -> Self {
        let [a, b, c, _] = address.octets();
        Self {
            address,
            gateway: Ipv4Addr::new(a, b, c, 1),
            dns: dns.to_vec(),
        }
    }

    /// `address/24`.
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, PREFIX_LEN)
    }

    /// DNS servers joined with `sep`.
    pub fn dns_joined(&self, sep: &str) -> String {
        self.dns
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(sep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_is_dot_one() {
        let spec = NetworkSpec::for_address(
            Ipv4Addr::new(10, 0, 0, 100),
            &[Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)],
        );
        assert_eq!(spec.gateway, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(spec.cidr(), "10.0.0.100/24");
        assert_eq!(spec.dns_joined(","), "8.8.8.8,1.1.1.1");
        assert_eq!(spec.dns_joined(" "), "8.8.8.8 1.1.1.1");
    }
}

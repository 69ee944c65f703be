//! Active network interface lookup.
//!
//! Pure query collaborator: reports the local address and interface name
//! the overlay should bind listening locators to. Looked up fresh per
//! connection attempt; failures degrade to loopback rather than blocking
//! establishment.

use std::net::{IpAddr, Ipv4Addr};

use crate::{log_error, log_info};

/// Address and name of the interface currently carrying traffic.
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    /// IPv4 address assigned to the interface.
    pub ip_address: IpAddr,

    /// OS interface name (e.g. "eth0", "wlan0").
    pub interface_name: String,
}

/// Look up the active network interface.
///
/// Returns the first interface that is up, not loopback, and has an IPv4
/// address. Falls back to loopback when nothing qualifies (or on
/// platforms without `getifaddrs`), so callers never block on a missing
/// uplink.
pub fn active_network_interface() -> NetworkInfo {
    // ---
    match lookup() {
        Ok(info) => {
            log_info!(
                "active iface '{}', ip {}",
                info.interface_name,
                info.ip_address
            );
            info
        }
        Err(err) => {
            log_error!("could not determine active network interface: {err}");
            NetworkInfo {
                ip_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                interface_name: "lo".to_string(),
            }
        }
    }
}

#[cfg(unix)]
fn lookup() -> std::io::Result<NetworkInfo> {
    // ---
    use nix::net::if_::InterfaceFlags;

    let addrs = nix::ifaddrs::getifaddrs().map_err(std::io::Error::other)?;

    for ifaddr in addrs {
        if !ifaddr.flags.contains(InterfaceFlags::IFF_UP)
            || ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
        {
            continue;
        }

        let Some(storage) = ifaddr.address else {
            continue;
        };
        let Some(sin) = storage.as_sockaddr_in() else {
            continue;
        };

        return Ok(NetworkInfo {
            ip_address: IpAddr::V4(sin.ip()),
            interface_name: ifaddr.interface_name,
        });
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no active non-loopback IPv4 interface",
    ))
}

#[cfg(not(unix))]
fn lookup() -> std::io::Result<NetworkInfo> {
    // ---
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "interface enumeration not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn lookup_always_yields_something() {
        // ---
        // Containers may expose only loopback; either way the fallback
        // guarantees a usable record.
        let info = active_network_interface();
        assert!(!info.interface_name.is_empty());
    }
}

//! Transport parameter resolution.
//!
//! Pure projection from the static [`SessionConfig`] plus the current
//! [`NetworkInfo`] to concrete link parameters. No state, no I/O: the
//! establisher calls [`resolve`] with a fresh interface lookup on every
//! connection attempt.
//!
//! Resolution is also where role/mode/transport compatibility is
//! enforced. Invalid combinations are [`Error::Config`] and must be
//! rejected here, before any connection attempt, never discovered at
//! runtime. The valid combinations:
//!
//! | role      | mode          | transport         | link                        |
//! |-----------|---------------|-------------------|-----------------------------|
//! | Initiator | ConnectToPeer | Stream            | tcp connect to remote       |
//! | Responder | ListenAsPeer  | Stream            | tcp listen on local address |
//! | any       | ListenAsPeer  | DatagramMulticast | udp listen on group         |

use std::fmt;
use std::net::IpAddr;

use crate::config::{DeviceRole, SessionConfig, SessionMode, TransportKind};
use crate::netinfo::NetworkInfo;
use crate::{Error, Result};

/// Wire protocol selected for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkProtocol {
    /// Unicast stream.
    Tcp,

    /// Multicast datagram.
    Udp,
}

impl fmt::Display for LinkProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkProtocol::Tcp => f.write_str("tcp"),
            LinkProtocol::Udp => f.write_str("udp"),
        }
    }
}

/// Ready-to-use connection parameters for one session attempt.
///
/// Immutable once built; a fresh record is resolved per attempt.
#[derive(Debug, Clone)]
pub struct LinkParams {
    /// Whether the session connects out or listens.
    pub mode: SessionMode,

    /// Wire protocol.
    pub protocol: LinkProtocol,

    /// Locator string, `proto/host:port` with an optional
    /// `#iface=NAME` suffix for listening links.
    pub locator: String,
}

/// Resolve connection parameters from the static configuration.
///
/// # Errors
///
/// [`Error::Config`] for invalid role/mode/transport combinations or
/// missing/ill-formed addresses. Configuration errors never reach the
/// connection stage.
pub fn resolve(config: &SessionConfig, net: &NetworkInfo) -> Result<LinkParams> {
    // ---
    let iface = config
        .interface
        .as_deref()
        .unwrap_or(&net.interface_name);

    match (config.role, config.mode, config.transport) {
        (_, SessionMode::ConnectToPeer, TransportKind::DatagramMulticast) => Err(Error::Config(
            "multicast transport cannot connect-to-peer (unsupported multicast/unicast combination)"
                .to_string(),
        )),

        (DeviceRole::Responder, SessionMode::ConnectToPeer, TransportKind::Stream) => {
            Err(Error::Config(
                "responder role cannot use a connect-only stream arrangement".to_string(),
            ))
        }

        (DeviceRole::Initiator, SessionMode::ListenAsPeer, TransportKind::Stream) => {
            Err(Error::Config(
                "initiator role must connect-to-peer on a stream transport".to_string(),
            ))
        }

        (DeviceRole::Initiator, SessionMode::ConnectToPeer, TransportKind::Stream) => {
            let remote = config.remote_address.as_deref().ok_or_else(|| {
                Error::Config("connect-to-peer requires a remote address".to_string())
            })?;

            Ok(LinkParams {
                mode: SessionMode::ConnectToPeer,
                protocol: LinkProtocol::Tcp,
                locator: format!("tcp/{remote}:{}", config.port),
            })
        }

        (DeviceRole::Responder, SessionMode::ListenAsPeer, TransportKind::Stream) => {
            Ok(LinkParams {
                mode: SessionMode::ListenAsPeer,
                protocol: LinkProtocol::Tcp,
                locator: format!("tcp/{}:{}#iface={iface}", net.ip_address, config.port),
            })
        }

        (_, SessionMode::ListenAsPeer, TransportKind::DatagramMulticast) => {
            let group = config.multicast_group.as_deref().ok_or_else(|| {
                Error::Config("multicast transport requires a group address".to_string())
            })?;

            let addr: IpAddr = group.parse().map_err(|_| {
                Error::Config(format!("'{group}' is not a valid multicast group address"))
            })?;
            if !addr.is_multicast() {
                return Err(Error::Config(format!(
                    "'{group}' is not a multicast group address"
                )));
            }

            Ok(LinkParams {
                mode: SessionMode::ListenAsPeer,
                protocol: LinkProtocol::Udp,
                locator: format!("udp/{group}:{}#iface={iface}", config.port),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::net::Ipv4Addr;

    fn net() -> NetworkInfo {
        NetworkInfo {
            ip_address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            interface_name: "eth0".to_string(),
        }
    }

    #[test]
    fn initiator_stream_connects_to_remote() {
        // ---
        let config = SessionConfig::initiator("192.168.137.37");
        let params = resolve(&config, &net()).expect("valid combination");

        assert_eq!(params.mode, SessionMode::ConnectToPeer);
        assert_eq!(params.protocol, LinkProtocol::Tcp);
        assert_eq!(params.locator, "tcp/192.168.137.37:7447");
    }

    #[test]
    fn responder_stream_listens_on_local_address() {
        // ---
        let config = SessionConfig::responder().with_port(7448);
        let params = resolve(&config, &net()).expect("valid combination");

        assert_eq!(params.mode, SessionMode::ListenAsPeer);
        assert_eq!(params.locator, "tcp/192.168.1.20:7448#iface=eth0");
    }

    #[test]
    fn multicast_peer_listens_on_group() {
        // ---
        for role in [DeviceRole::Initiator, DeviceRole::Responder] {
            let config = SessionConfig::peer(role, "224.0.0.251");
            let params = resolve(&config, &net()).expect("valid combination");

            assert_eq!(params.protocol, LinkProtocol::Udp);
            assert_eq!(params.locator, "udp/224.0.0.251:7447#iface=eth0");
        }
    }

    #[test]
    fn interface_override_wins() {
        // ---
        let config = SessionConfig::peer(DeviceRole::Initiator, "224.0.0.251")
            .with_interface("wlan0");
        let params = resolve(&config, &net()).expect("valid combination");

        assert!(params.locator.ends_with("#iface=wlan0"));
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        // ---
        // Responder paired with a connect-only stream arrangement.
        let mut config = SessionConfig::initiator("10.0.0.1");
        config.role = DeviceRole::Responder;
        assert!(matches!(resolve(&config, &net()), Err(Error::Config(_))));

        // Initiator trying to listen on a stream transport.
        let mut config = SessionConfig::responder();
        config.role = DeviceRole::Initiator;
        assert!(matches!(resolve(&config, &net()), Err(Error::Config(_))));

        // Multicast transport cannot connect-to-peer.
        let mut config = SessionConfig::peer(DeviceRole::Initiator, "224.0.0.251");
        config.mode = SessionMode::ConnectToPeer;
        assert!(matches!(resolve(&config, &net()), Err(Error::Config(_))));
    }

    #[test]
    fn address_problems_are_rejected() {
        // ---
        let mut config = SessionConfig::initiator("10.0.0.1");
        config.remote_address = None;
        assert!(matches!(resolve(&config, &net()), Err(Error::Config(_))));

        // Unicast address passed as a multicast group.
        let config = SessionConfig::peer(DeviceRole::Initiator, "192.168.1.5");
        assert!(matches!(resolve(&config, &net()), Err(Error::Config(_))));

        let config = SessionConfig::peer(DeviceRole::Initiator, "not-an-address");
        assert!(matches!(resolve(&config, &net()), Err(Error::Config(_))));
    }
}

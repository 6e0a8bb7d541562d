//! Virtual network device handling.
//!
//! The multiplexer only needs an async byte pipe speaking whole IP packets
//! per read/write, so anything satisfying [`PacketDevice`] plugs in. The
//! real thing is a TUN interface; tests substitute an in-memory duplex.

use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::error::TunnelError;

/// An async packet pipe: one IP packet per read, one per write.
pub trait PacketDevice: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> PacketDevice for T {}

/// Create and bring up a point-to-point TUN interface.
///
/// `local` is this host's tunnel address, `peer` the address at the far
/// end. Requires the privileges the platform demands for device creation.
pub fn create_tun(
    local: Ipv4Addr,
    peer: Ipv4Addr,
    netmask: Ipv4Addr,
    mtu: u16,
) -> Result<tun::AsyncDevice, TunnelError> {
    let mut config = tun::configure();
    config
        .address(local)
        .destination(peer)
        .netmask(netmask)
        .mtu(i32::from(mtu))
        .up();

    #[cfg(target_os = "linux")]
    config.platform(|platform| {
        platform.packet_information(false);
    });

    Ok(tun::create_as_async(&config)?)
}

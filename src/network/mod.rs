use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::constants::READ_AHEAD_SIZE;

/// Creates and configures a UDP socket for TS packet reception
/// Handles both unicast and multicast addresses
pub fn create_udp_socket(addr: SocketAddr) -> anyhow::Result<Socket> {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4,
        _ => anyhow::bail!("only IPv4 is supported"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(READ_AHEAD_SIZE)?;
    socket.bind(&addr.into())?;

    // Join multicast group if the address is multicast
    if ip.is_multicast() {
        let iface = Ipv4Addr::UNSPECIFIED; // default interface
        socket.join_multicast_v4(&ip, &iface)?;
    }

    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Socket connected to `target` for sending chunks; sets the TTL when the
/// target is a multicast group.
pub fn create_sender_socket(target: SocketAddr, multicast_ttl: u32) -> anyhow::Result<Socket> {
    let IpAddr::V4(ip) = target.ip() else {
        anyhow::bail!("only IPv4 is supported");
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_send_buffer_size(READ_AHEAD_SIZE)?;
    if ip.is_multicast() {
        socket.set_multicast_ttl_v4(multicast_ttl)?;
    }
    let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&any.into())?;
    socket.connect(&target.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Tokio wrappers around the sockets above
pub fn bind_receiver(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    Ok(UdpSocket::from_std(create_udp_socket(addr)?.into())?)
}

pub fn connect_sender(target: SocketAddr, multicast_ttl: u32) -> anyhow::Result<UdpSocket> {
    Ok(UdpSocket::from_std(create_sender_socket(target, multicast_ttl)?.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_reaches_receiver() {
        let rx = bind_receiver("127.0.0.1:0".parse().unwrap()).unwrap();
        let tx = connect_sender(rx.local_addr().unwrap(), 1).unwrap();
        tx.send(&[0x47; 188]).await.unwrap();
        let mut buf = [0u8; 2048];
        let n = rx.recv(&mut buf).await.unwrap();
        assert_eq!(n, 188);
    }

    #[test]
    fn rejects_ipv6() {
        assert!(create_sender_socket("[::1]:1234".parse().unwrap(), 1).is_err());
    }
}

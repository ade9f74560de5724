use embassy_net::{
    dns::{DnsQueryType, Error as DnsError},
    tcp::{ConnectError, TcpSocket},
    IpAddress, Ipv4Address, Stack,
};
use embassy_time::Duration;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum Error {
    #[allow(dead_code)]
    DnsQueryFailed(DnsError),
    DnsLookupFailed,
    #[allow(dead_code)]
    SocketConnectionError(ConnectError),
}

/// Opens a plain TCP connection to `host`, an IPv4 literal or a DNS name
pub async fn connect<'a>(
    stack: Stack<'static>,
    rx_buffer: &'a mut [u8],
    tx_buffer: &'a mut [u8],
    hostname: &str,
    port: u16,
) -> Result<TcpSocket<'a>, Error> {
    let addr = match hostname.parse::<Ipv4Address>() {
        Ok(ip) => IpAddress::Ipv4(ip),
        Err(_) => stack
            .dns_query(hostname, DnsQueryType::A)
            .await
            .map_err(Error::DnsQueryFailed)?
            .first()
            .copied()
            .ok_or(Error::DnsLookupFailed)?,
    };

    let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
    socket.set_timeout(Some(SOCKET_TIMEOUT));

    log::info!("Connecting TCP socket to {}:{}", hostname, port);
    socket
        .connect((addr, port))
        .await
        .map_err(Error::SocketConnectionError)?;
    log::info!("TCP connected");

    Ok(socket)
}

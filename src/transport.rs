//! Socket primitives used by the fleet protocol
//!
//! No phase logic lives here: these helpers create, configure and use the
//! datagram and stream sockets, and turn OS failures into [`FleetError`]s.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};

use crate::error::{FleetError, Result};
use crate::protocol::{Report, Signal};

/// Listen backlog; the kernel clamps it to its own maximum
pub const LISTEN_BACKLOG: u32 = 4096;

/// Unbound-port datagram socket for sending signals
pub async fn open_broadcast_socket() -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    Ok(socket)
}

/// Datagram socket a worker receives signals on
pub async fn open_signal_socket(addr: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(addr, port))).await?;
    Ok(socket)
}

/// Stream listener with address reuse, for barrier reports and notices
pub fn open_barrier_listener(addr: Ipv4Addr, port: u16) -> Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::V4(SocketAddrV4::new(addr, port)))?;
    let listener = socket.listen(LISTEN_BACKLOG)?;
    tracing::debug!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Run one peer operation under `limit`; expiry is an IO `TimedOut` error
pub async fn within<T, F>(limit: Duration, what: &str, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {:?}", what, limit),
        )
        .into()),
    }
}

/// Wait for one peer to connect
pub async fn accept_one(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    let accepted = listener.accept().await?;
    Ok(accepted)
}

pub async fn send_signal(
    socket: &UdpSocket,
    target: SocketAddr,
    signal: &Signal,
    message_length: usize,
) -> Result<()> {
    let buf = signal.encode(message_length);
    let sent = socket.send_to(&buf, target).await?;
    if sent != buf.len() {
        return Err(FleetError::Malformed(format!(
            "short datagram to {}: {} of {} bytes",
            target,
            sent,
            buf.len()
        )));
    }
    Ok(())
}

/// Receive one signal. Returns the decode result separately so a bad
/// datagram does not look like a socket failure.
pub async fn recv_signal(socket: &UdpSocket) -> Result<(Result<Signal>, SocketAddr)> {
    let mut buf = vec![0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf).await?;
    Ok((Signal::decode(&buf[..len]), from))
}

/// Connect and deliver one fixed-length signal over a stream
pub async fn notify(target: SocketAddr, signal: &Signal, message_length: usize) -> Result<()> {
    let mut stream = TcpStream::connect(target).await?;
    stream.write_all(&signal.encode(message_length)).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read one fixed-length signal from an accepted stream
pub async fn read_notice(stream: &mut TcpStream, message_length: usize) -> Result<Signal> {
    let mut buf = vec![0u8; message_length];
    stream.read_exact(&mut buf).await?;
    Signal::decode(&buf)
}

pub async fn send_report<R: Report>(target: SocketAddr, report: &R) -> Result<()> {
    let mut stream = TcpStream::connect(target).await?;
    stream.write_all(&report.encode()).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn read_report<R: Report>(stream: &mut TcpStream) -> Result<R> {
    let mut buf = vec![0u8; R::SIZE];
    stream.read_exact(&mut buf).await?;
    R::decode(&buf)
}

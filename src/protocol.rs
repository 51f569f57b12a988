//! Fleet wire format
//!
//! Signals travel as fixed-length datagrams (zero padded):
//!
//! ```text
//! [header: version(4 bits) | kind(4 bits)][payload ...][zero padding]
//! CACHE_GEN    payload: sender address (4 octets)
//! START_EXP    payload: sender address (4 octets), walk count (u32 LE)
//! END_EXP      payload: none
//! CACHE_READY  payload: none
//! ```
//!
//! Barrier reports travel over a stream connection, one per connection:
//!
//! ```text
//! cache report: worker address (4 octets), walker count (u32 LE)
//! end report:   worker address (4 octets), finished count (u32 LE), elapsed seconds (f64 LE)
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FleetError, Result};

pub const PROTOCOL_VERSION: u8 = 0;

/// Longest signal: header + address + walk count
pub const MIN_MESSAGE_LENGTH: usize = 1 + 4 + 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    CacheGen = 2,
    StartExp = 3,
    EndExp = 4,
    CacheReady = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = FleetError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::CacheGen),
            3 => Ok(Self::StartExp),
            4 => Ok(Self::EndExp),
            5 => Ok(Self::CacheReady),
            other => Err(FleetError::Malformed(format!("unknown message kind {}", other))),
        }
    }
}

/// Header byte: high nibble version, low nibble kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header(u8);

impl Header {
    pub fn new(kind: MessageKind) -> Self {
        Self((PROTOCOL_VERSION << 4) | kind as u8)
    }

    pub fn version(&self) -> u8 {
        self.0 >> 4
    }

    pub fn kind(&self) -> Result<MessageKind> {
        MessageKind::try_from(self.0 & 0x0f)
    }

    pub fn byte(&self) -> u8 {
        self.0
    }
}

impl From<u8> for Header {
    fn from(byte: u8) -> Self {
        Self(byte)
    }
}

/// Phase announcement sent by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    CacheGen { sender: Ipv4Addr },
    StartExp { sender: Ipv4Addr, walk_count: u32 },
    EndExp,
    CacheReady,
}

impl Signal {
    pub fn kind(&self) -> MessageKind {
        match self {
            Signal::CacheGen { .. } => MessageKind::CacheGen,
            Signal::StartExp { .. } => MessageKind::StartExp,
            Signal::EndExp => MessageKind::EndExp,
            Signal::CacheReady => MessageKind::CacheReady,
        }
    }

    /// Encode into a zero-padded buffer of `len` bytes, or
    /// [`MIN_MESSAGE_LENGTH`] if `len` is shorter
    pub fn encode(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len.max(MIN_MESSAGE_LENGTH)];
        buf[0] = Header::new(self.kind()).byte();
        match *self {
            Signal::CacheGen { sender } => {
                buf[1..5].copy_from_slice(&sender.octets());
            }
            Signal::StartExp { sender, walk_count } => {
                buf[1..5].copy_from_slice(&sender.octets());
                LittleEndian::write_u32(&mut buf[5..9], walk_count);
            }
            Signal::EndExp | Signal::CacheReady => {}
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = Header::from(
            *buf.first()
                .ok_or_else(|| FleetError::Malformed("empty signal".into()))?,
        );
        if header.version() != PROTOCOL_VERSION {
            return Err(FleetError::Malformed(format!(
                "unsupported protocol version {}",
                header.version()
            )));
        }

        let kind = header.kind()?;
        let need = match kind {
            MessageKind::CacheGen => 5,
            MessageKind::StartExp => 9,
            MessageKind::EndExp | MessageKind::CacheReady => 1,
        };
        if buf.len() < need {
            return Err(FleetError::Malformed(format!(
                "{:?} signal needs {} bytes, got {}",
                kind,
                need,
                buf.len()
            )));
        }

        Ok(match kind {
            MessageKind::CacheGen => Signal::CacheGen {
                sender: read_addr(&buf[1..5]),
            },
            MessageKind::StartExp => Signal::StartExp {
                sender: read_addr(&buf[1..5]),
                walk_count: LittleEndian::read_u32(&buf[5..9]),
            },
            MessageKind::EndExp => Signal::EndExp,
            MessageKind::CacheReady => Signal::CacheReady,
        })
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::CacheGen { sender } => write!(f, "CACHE_GEN from {}", sender),
            Signal::StartExp { sender, walk_count } => {
                write!(f, "START_EXP from {} ({} walks)", sender, walk_count)
            }
            Signal::EndExp => write!(f, "END_EXP"),
            Signal::CacheReady => write!(f, "CACHE_READY"),
        }
    }
}

/// Fixed-size report a worker sends at a barrier
pub trait Report: Sized + Send + 'static {
    const SIZE: usize;

    /// Address the worker claims in its payload
    fn worker(&self) -> Ipv4Addr;

    fn encode(&self) -> Vec<u8>;

    fn decode(buf: &[u8]) -> Result<Self>;
}

/// End of cache fill: how many walkers the worker generated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheReport {
    pub worker: Ipv4Addr,
    pub walkers: u32,
}

impl Report for CacheReport {
    const SIZE: usize = 8;

    fn worker(&self) -> Ipv4Addr {
        self.worker
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.worker.octets());
        LittleEndian::write_u32(&mut buf[4..8], self.walkers);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        check_len("cache report", buf, Self::SIZE)?;
        Ok(Self {
            worker: read_addr(&buf[0..4]),
            walkers: LittleEndian::read_u32(&buf[4..8]),
        })
    }
}

/// End of run: finished walkers and elapsed seconds on that worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndReport {
    pub worker: Ipv4Addr,
    pub finished: u32,
    pub elapsed_secs: f64,
}

impl Report for EndReport {
    const SIZE: usize = 16;

    fn worker(&self) -> Ipv4Addr {
        self.worker
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.worker.octets());
        LittleEndian::write_u32(&mut buf[4..8], self.finished);
        LittleEndian::write_f64(&mut buf[8..16], self.elapsed_secs);
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        check_len("end report", buf, Self::SIZE)?;
        Ok(Self {
            worker: read_addr(&buf[0..4]),
            finished: LittleEndian::read_u32(&buf[4..8]),
            elapsed_secs: LittleEndian::read_f64(&buf[8..16]),
        })
    }
}

fn read_addr(raw: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])
}

fn check_len(what: &str, buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(FleetError::Malformed(format!(
            "{} needs {} bytes, got {}",
            what,
            need,
            buf.len()
        )));
    }
    Ok(())
}

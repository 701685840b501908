use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sanity ceiling for a single packet payload. Anything larger is treated as
/// a corrupt length field, not real data.
pub const MAX_PAYLOAD_LEN: usize = 10_000_000;

const HEADER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Video,
    Audio,
    Text,
    UserAudio,
}

impl PacketType {
    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::Video => 1,
            PacketType::Audio => 2,
            PacketType::Text => 3,
            PacketType::UserAudio => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PacketType::Video),
            2 => Some(PacketType::Audio),
            3 => Some(PacketType::Text),
            4 => Some(PacketType::UserAudio),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PacketType::Video => "video",
            PacketType::Audio => "audio",
            PacketType::Text => "text",
            PacketType::UserAudio => "user_audio",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub payload: Bytes,
}

/// Result of a successful packet read. A zero-length packet is an explicit
/// end-of-stream sentinel, never an empty frame, so callers are forced to
/// branch on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEvent {
    Frame(Packet),
    EndOfStream(PacketType),
}

/// Writes one `[type:1][length:4 BE][payload]` packet.
pub async fn write_packet<W>(
    writer: &mut W,
    packet_type: PacketType,
    payload: &[u8],
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(TransportError::ProtocolViolation(format!(
            "payload of {} bytes exceeds {} byte ceiling",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut header = [0u8; HEADER_LEN];
    header[0] = packet_type.as_byte();
    header[1..].copy_from_slice(&(payload.len() as u32).to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes the zero-length sentinel that terminates a logical stream.
pub async fn write_end_of_stream<W>(
    writer: &mut W,
    packet_type: PacketType,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    write_packet(writer, packet_type, &[]).await
}

/// Reads one full packet, blocking until header and payload are complete.
/// A short read anywhere maps to `Disconnected`; an oversized length field
/// aborts before any body bytes are consumed.
pub async fn read_packet<R>(reader: &mut R) -> Result<PacketEvent, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_disconnect(reader, &mut header).await?;

    let packet_type = PacketType::from_byte(header[0]).ok_or_else(|| {
        TransportError::ProtocolViolation(format!("unknown packet type byte {:#04x}", header[0]))
    })?;
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    if length == 0 {
        return Ok(PacketEvent::EndOfStream(packet_type));
    }
    if length > MAX_PAYLOAD_LEN {
        return Err(TransportError::ProtocolViolation(format!(
            "declared payload of {length} bytes exceeds {MAX_PAYLOAD_LEN} byte ceiling"
        )));
    }

    let mut payload = vec![0u8; length];
    read_exact_or_disconnect(reader, &mut payload).await?;

    Ok(PacketEvent::Frame(Packet {
        packet_type,
        payload: Bytes::from(payload),
    }))
}

async fn read_exact_or_disconnect<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransportError::Disconnected)
        }
        Err(err) => Err(TransportError::Io(err)),
    }
}

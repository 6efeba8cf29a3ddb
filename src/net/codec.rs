//! Packet framing: a big-endian `u32` length followed by a JSON packet.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::net::transport::TransportError;
use crate::protocol::Packet;

/// Default upper bound for a single packet body.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Encode and write one packet, then flush.
pub async fn write_packet<W>(writer: &mut W, packet: &Packet, max_frame_bytes: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(packet)?;
    if body.len() > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(TransportError::FrameTooLarge {
            size: body.len(),
            limit: max_frame_bytes,
        });
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one packet. Returns `Ok(None)` on a clean end of stream.
pub async fn read_packet<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Packet>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > max_frame_bytes {
        return Err(TransportError::FrameTooLarge {
            size: len,
            limit: max_frame_bytes,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, HeadMetadata, RequestMessage, RouteKey};

    fn request_packet() -> Packet {
        let request = RequestMessage::new(HeadMetadata::new(RouteKey::merge(3, 9), 1), b"payload".to_vec());
        Packet::oneway(Frame::Request(request))
    }

    #[tokio::test]
    async fn packets_survive_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let packet = request_packet();

        write_packet(&mut client, &packet, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        drop(client);

        let decoded = read_packet(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(decoded, Some(packet));
        assert!(read_packet(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(1024).await.unwrap();

        let err = read_packet(&mut server, 16).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 1024, limit: 16 }));
    }

    #[tokio::test]
    async fn oversized_packet_is_not_written() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = write_packet(&mut client, &request_packet(), 8).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { limit: 8, .. }));
    }
}

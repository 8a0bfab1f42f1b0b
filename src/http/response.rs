//! Upgrade response serialization.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::SessionDescriptor;

const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// `101 Switching Protocols` response for an accepted handshake.
///
/// Protocol and extension headers are only present when something was
/// negotiated.
pub fn switching_protocols(descriptor: &SessionDescriptor) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         upgrade: websocket\r\n\
         Connection: upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        descriptor.accept_key
    );
    if let Some(protocol) = &descriptor.protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    if !descriptor.extensions.is_empty() {
        response.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            descriptor.extensions.join(", ")
        ));
    }
    response.push_str("\r\n");
    response
}

/// Write the rejection response and shut the write side down.
pub async fn write_rejection<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(BAD_REQUEST).await?;
    writer.flush().await?;
    writer.shutdown().await
}

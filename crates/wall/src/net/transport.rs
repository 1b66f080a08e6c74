use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

use super::protocol::{Frame, MAX_FRAME_SIZE};
use super::socket::{Outbound, SocketHandle, SocketId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Error,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
pub enum Inbound {
    Frame { socket: SocketHandle, frame: Frame },
    Disconnected { id: SocketId, reason: DisconnectReason },
}

/// Splits a TCP stream into a reader task that forwards decoded frames to
/// `inbound` and a writer task fed by the returned handle.
pub fn spawn_connection(stream: TcpStream, inbound: mpsc::UnboundedSender<Inbound>) -> SocketHandle {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Failed to set TCP_NODELAY: {}", e);
    }
    let (socket, rx) = SocketHandle::channel();
    let (reader, writer) = stream.into_split();

    tokio::spawn(write_loop(writer, rx, socket.id()));
    tokio::spawn(read_loop(reader, socket.clone(), inbound));

    socket
}

pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> io::Result<SocketHandle> {
    let stream = TcpStream::connect(addr).await?;
    Ok(spawn_connection(stream, inbound))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    id: SocketId,
) {
    while let Some(outbound) = rx.recv().await {
        let frame = match outbound {
            Outbound::Frame(frame) => frame,
            Outbound::Close => break,
        };
        let mut data = match frame.serialize() {
            Ok(data) => data,
            Err(e) => {
                log::warn!("{}: dropping outgoing {}: {}", id, frame.kind, e);
                continue;
            }
        };
        data.push(b'\n');
        if let Err(e) = writer.write_all(&data).await {
            log::debug!("{}: write failed: {}", id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Outcome of reading one newline-terminated frame.
enum ReadLine {
    Line,
    Eof,
    TooLong(usize),
}

/// Reads up to the next newline into `buf`, never buffering more than
/// `MAX_FRAME_SIZE` bytes of a single frame.
async fn read_frame_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_FRAME_SIZE as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(ReadLine::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > MAX_FRAME_SIZE {
        return Ok(ReadLine::TooLong(buf.len()));
    }
    Ok(ReadLine::Line)
}

async fn read_loop(
    reader: OwnedReadHalf,
    socket: SocketHandle,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    let reason = loop {
        match read_frame_line(&mut reader, &mut buf).await {
            Ok(ReadLine::Line) => {
                if buf.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match Frame::deserialize(&buf) {
                    Ok(frame) => {
                        let event = Inbound::Frame {
                            socket: socket.clone(),
                            frame,
                        };
                        if inbound.send(event).is_err() {
                            break DisconnectReason::Shutdown;
                        }
                    }
                    Err(e) => log::warn!("{}: dropping malformed frame: {}", socket.id(), e),
                }
            }
            Ok(ReadLine::TooLong(len)) => {
                log::warn!("{}: frame of over {} bytes exceeds limit", socket.id(), len - 1);
                break DisconnectReason::Error;
            }
            Ok(ReadLine::Eof) => break DisconnectReason::Graceful,
            Err(e) => {
                log::debug!("{}: read failed: {}", socket.id(), e);
                break DisconnectReason::Error;
            }
        }
    };

    socket.close();
    let _ = inbound.send(Inbound::Disconnected {
        id: socket.id(),
        reason,
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frames_cross_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            spawn_connection(stream, server_tx)
        });

        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let client = connect(addr, client_tx).await.unwrap();
        let server_side = accept.await.unwrap();

        assert!(client.send("client-start", json!({ "rect": "0,0,10,10" })));
        match server_rx.recv().await {
            Some(Inbound::Frame { socket, frame }) => {
                assert_eq!(socket.id(), server_side.id());
                assert_eq!(frame.kind, "client-start");
                assert_eq!(frame.payload["rect"], "0,0,10,10");
            }
            other => panic!("unexpected {:?}", other),
        }

        client.close();
        match server_rx.recv().await {
            Some(Inbound::Disconnected { id, reason }) => {
                assert_eq!(id, server_side.id());
                assert_eq!(reason, DisconnectReason::Graceful);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unterminated_oversize_frame_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            spawn_connection(stream, server_tx)
        });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let server_side = accept.await.unwrap();
        let writer = tokio::spawn(async move {
            let chunk = vec![b'a'; 64 * 1024];
            let mut sent = 0;
            while sent <= MAX_FRAME_SIZE + chunk.len() {
                if raw.write_all(&chunk).await.is_err() {
                    break;
                }
                sent += chunk.len();
            }
            raw
        });

        let event = tokio::time::timeout(std::time::Duration::from_secs(10), server_rx.recv())
            .await
            .unwrap();
        match event {
            Some(Inbound::Disconnected { id, reason }) => {
                assert_eq!(id, server_side.id());
                assert_eq!(reason, DisconnectReason::Error);
            }
            other => panic!("unexpected {:?}", other),
        }
        drop(writer);
    }

    #[tokio::test]
    async fn frame_lines_are_bounded() {
        let mut data: &[u8] = b"{\"type\":\"time\",\"payload\":{\"time\":1}}\r\n";
        let mut buf = Vec::new();
        assert!(matches!(read_frame_line(&mut data, &mut buf).await.unwrap(), ReadLine::Line));
        assert_eq!(Frame::deserialize(&buf).unwrap().kind, "time");
        assert!(matches!(read_frame_line(&mut data, &mut buf).await.unwrap(), ReadLine::Eof));

        let long = vec![b'x'; MAX_FRAME_SIZE + 5];
        let mut data: &[u8] = &long;
        assert!(matches!(
            read_frame_line(&mut data, &mut buf).await.unwrap(),
            ReadLine::TooLong(len) if len == MAX_FRAME_SIZE + 1
        ));
    }
}

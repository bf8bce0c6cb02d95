//! Per-connection plumbing between a TCP stream and the event loop.
//!
//! Each accepted stream is split in two tasks. The reader forwards whatever
//! the peer sends to the loop as [`ServerEvent`]s; the writer drains a bounded
//! queue of encoded frames into the socket. The loop itself never awaits on a
//! peer: it only pushes frames with [`Connection::send`], which fails fast
//! when the queue is full.

use log::debug;
use shared::{FrameBuffer, FramingError, Message};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};

/// An encoded frame, shared between every queue it is broadcast to.
pub type Frame = Arc<[u8]>;

const READ_CHUNK: usize = 4096;

/// Events reported by connection tasks to the event loop
#[derive(Debug)]
pub enum ServerEvent {
    Received { id: u32, data: Vec<u8> },
    PeerClosed { id: u32 },
    ReadFailed { id: u32, error: io::Error },
    WriteFailed { id: u32, error: io::Error },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue is full")]
    Backpressure,
    #[error("connection writer has stopped")]
    Closed,
}

/// One accepted stream as seen by the event loop
#[derive(Debug)]
pub struct Connection {
    id: u32,
    peer: SocketAddr,
    inbox: FrameBuffer,
    outbox: mpsc::Sender<Frame>,
    reader: AbortHandle,
    writer: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(
        id: u32,
        peer: SocketAddr,
        outbox: mpsc::Sender<Frame>,
        reader: AbortHandle,
        writer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            id,
            peer,
            inbox: FrameBuffer::new(),
            outbox,
            reader,
            writer,
        }
    }

    /// Splits `stream` and spawns its reader and writer tasks
    ///
    /// At most `queue_len` frames may wait for the writer before
    /// [`send`](Self::send) starts reporting backpressure.
    pub fn spawn(
        id: u32,
        stream: TcpStream,
        peer: SocketAddr,
        queue_len: usize,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbox, queue) = mpsc::channel(queue_len);

        let reader = tokio::spawn(read_frames(id, read_half, events.clone()));
        let writer = tokio::spawn(write_frames(id, write_half, queue, events));

        Self::new(id, peer, outbox, reader.abort_handle(), Some(writer))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a frame without waiting
    pub fn send(&self, frame: &Frame) -> Result<(), SendError> {
        self.outbox
            .try_send(Arc::clone(frame))
            .map_err(|e| match e {
                TrySendError::Full(_) => SendError::Backpressure,
                TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Feeds received bytes through the frame reassembly buffer
    ///
    /// Complete messages are appended to `out`; the return value counts the
    /// malformed frames that were skipped.
    pub fn receive(&mut self, data: &[u8], out: &mut Vec<Message>) -> Result<usize, FramingError> {
        self.inbox.push(data, out)
    }

    /// Hands out the writer task, so a caller can wait for queued frames to
    /// be flushed after the connection is dropped
    pub fn take_writer(&mut self) -> Option<JoinHandle<()>> {
        self.writer.take()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The writer stops by itself once the queue sender is gone.
        self.reader.abort();
    }
}

/// Forwards everything the peer sends to the event loop until EOF or error
///
/// Waiting on the bounded event channel throttles a peer that sends faster
/// than the loop consumes.
pub async fn read_frames<R>(id: u32, mut reader: R, events: mpsc::Sender<ServerEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let event = match reader.read(&mut buffer).await {
            Ok(0) => ServerEvent::PeerClosed { id },
            Ok(n) => ServerEvent::Received {
                id,
                data: buffer[..n].to_vec(),
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => ServerEvent::ReadFailed { id, error },
        };

        let finished = !matches!(event, ServerEvent::Received { .. });
        if events.send(event).await.is_err() || finished {
            break;
        }
    }
}

/// Writes queued frames in order, then shuts the stream down once the queue
/// is closed and empty
pub async fn write_frames<W>(
    id: u32,
    mut writer: W,
    mut queue: mpsc::Receiver<Frame>,
    events: mpsc::Sender<ServerEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        if let Err(error) = writer.write_all(&frame).await {
            if events
                .send(ServerEvent::WriteFailed { id, error })
                .await
                .is_err()
            {
                debug!("Event loop gone while reporting write failure for {}", id);
            }
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Shutdown of connection {} failed: {}", id, e);
    }
}

/// Writes a single frame and closes the stream. Used for peers that are
/// turned away before they get a [`Connection`].
pub async fn send_and_close<W>(mut writer: W, frame: Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame).await?;
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn frame(message: &Message) -> Frame {
        message.encode().unwrap().into()
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    #[tokio::test]
    async fn test_reader_forwards_chunks_then_close() {
        let mock = Builder::new().read(b"\x00\x03").read(b"\x03").build();
        let (tx, mut rx) = mpsc::channel(8);

        read_frames(7, mock, tx).await;

        match rx.recv().await {
            Some(ServerEvent::Received { id: 7, data }) => assert_eq!(data, vec![0, 3]),
            other => panic!("Unexpected event: {:?}", other),
        }
        match rx.recv().await {
            Some(ServerEvent::Received { id: 7, data }) => assert_eq!(data, vec![3]),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::PeerClosed { id: 7 })
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_reports_errors() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let (tx, mut rx) = mpsc::channel(8);

        read_frames(3, mock, tx).await;

        match rx.recv().await {
            Some(ServerEvent::ReadFailed { id: 3, error }) => {
                assert_eq!(error.kind(), io::ErrorKind::ConnectionReset)
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_flushes_queue_in_order() {
        let first = frame(&Message::Leave);
        let second = frame(&Message::PlayerLeave { player_id: 2 });
        let mock = Builder::new().write(&first).write(&second).build();

        let (events, mut event_rx) = mpsc::channel(8);
        let (queue_tx, queue_rx) = mpsc::channel(8);
        queue_tx.send(Arc::clone(&first)).await.unwrap();
        queue_tx.send(Arc::clone(&second)).await.unwrap();
        drop(queue_tx);

        write_frames(1, mock, queue_rx, events).await;
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_reports_errors() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();

        let (events, mut event_rx) = mpsc::channel(8);
        let (queue_tx, queue_rx) = mpsc::channel(8);
        queue_tx.send(frame(&Message::Leave)).await.unwrap();

        write_frames(5, mock, queue_rx, events).await;

        match event_rx.recv().await {
            Some(ServerEvent::WriteFailed { id: 5, error }) => {
                assert_eq!(error.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_and_close() {
        let rejection = frame(&Message::game_full());
        let mock = Builder::new().write(&rejection).build();
        send_and_close(mock, rejection).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_backpressure_and_closed() {
        let (outbox, mut queue) = mpsc::channel(1);
        let reader = tokio::spawn(std::future::pending::<()>());
        let connection = Connection::new(1, test_addr(), outbox, reader.abort_handle(), None);
        let leave = frame(&Message::Leave);

        assert_eq!(connection.send(&leave), Ok(()));
        assert_eq!(connection.send(&leave), Err(SendError::Backpressure));

        assert_eq!(queue.recv().await.as_deref(), Some(&leave[..]));
        drop(queue);
        assert_eq!(connection.send(&leave), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_drop_aborts_reader() {
        let (outbox, mut queue) = mpsc::channel(4);
        let reader = tokio::spawn(std::future::pending::<()>());
        let connection = Connection::new(9, test_addr(), outbox, reader.abort_handle(), None);
        assert_eq!(connection.id(), 9);
        assert_eq!(connection.peer(), test_addr());

        drop(connection);

        assert!(reader.await.unwrap_err().is_cancelled());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_reassembles_frames() {
        let (outbox, _queue) = mpsc::channel(4);
        let reader = tokio::spawn(std::future::pending::<()>());
        let mut connection = Connection::new(2, test_addr(), outbox, reader.abort_handle(), None);

        let bytes = Message::SetTarget { x: 1.0, y: 2.0 }.encode().unwrap();
        let mut out = Vec::new();
        connection.receive(&bytes[..4], &mut out).unwrap();
        assert!(out.is_empty());
        connection.receive(&bytes[4..], &mut out).unwrap();
        assert_eq!(out, vec![Message::SetTarget { x: 1.0, y: 2.0 }]);
    }
}

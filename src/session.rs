use crate::error::Error;
use crate::event::{Event, EventStream};
use crate::frame::{read_frame, write_frame, Frame, OpCode};
use crate::request::{accept_key, build_upgrade_request, endpoint, generate_key, parse_upgrade_response};
use bytes::BytesMut;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use url::Url;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HEADER_SIZE: usize = 16 * 1024;

// Handle to one live connection. The read half runs in a spawned task and
// reports through the EventStream, writes go through a channel to a writer
// task, so the workload never blocks on the socket directly.
pub struct Session {
    write_tx: UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
}

impl Session {
    pub fn send_text(&self, text: String) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.write_tx.send(Frame::text(text.into_bytes()))?;
        Ok(())
    }

    // Single-fire teardown. Two paths race to close every session (the send
    // cycle after its delay, and the session deadline), whichever loses must
    // find a no-op here. Returns whether this call initiated the close.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.write_tx.send(Frame::close());
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// Opens the TCP connection, performs the client half of the RFC 6455
// handshake, verifies the accept key, and spawns the reader/writer tasks.
// Any failure before the upgrade completes surfaces as an error here, the
// caller records it as a failed handshake check.
pub async fn connect(url: &Url, connect_timeout: Duration) -> Result<(Session, EventStream), Error> {
    let addr = endpoint(url)?;
    let stream = timeout(connect_timeout, TcpStream::connect(&addr)).await??;

    let (read_half, mut write_half) = split(stream);
    let mut reader = BufReader::new(read_half);

    let key = generate_key();
    let request = build_upgrade_request(url, &key)?;
    write_half.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut reader).await?;
    let response = parse_upgrade_response(&head)?;

    if response.status != 101 {
        return Err(Error::UpgradeRefused(response.status));
    }
    let accept = response.accept.ok_or(Error::MissingAcceptHeader)?;
    if accept != accept_key(&key) {
        return Err(Error::InvalidAcceptKey);
    }

    let (event_tx, event_rx) = unbounded_channel::<Event>();
    let (write_tx, write_rx) = unbounded_channel::<Frame>();
    let closed = Arc::new(AtomicBool::new(false));

    // The writer task owns the write half, the reader task owns the buffered
    // read half. Once both tasks return, the halves are dropped and the TCP
    // connection goes with them.
    tokio::spawn(run_writer(write_half, write_rx));
    tokio::spawn(run_reader(reader, event_tx, write_tx.clone(), closed.clone()));

    let session = Session { write_tx, closed };
    Ok((session, EventStream::new(event_rx)))
}

// Reads the handshake response head line by line until the blank line that
// terminates it. Going through the same BufReader the frame reader will use
// keeps any bytes the server sent right after the upgrade.
async fn read_response_head(
    reader: &mut BufReader<ReadHalf<TcpStream>>,
) -> Result<Vec<u8>, Error> {
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut head = BytesMut::with_capacity(1024);
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(Error::IncompleteHandshake);
            }
            head.extend_from_slice(line.as_bytes());
            if head.len() > MAX_HEADER_SIZE {
                return Err(Error::HeaderTooLarge);
            }
            if line == "\r\n" {
                break;
            }
        }
        Ok(head.to_vec())
    })
    .await?
}

async fn run_writer(mut write_half: WriteHalf<TcpStream>, mut write_rx: UnboundedReceiver<Frame>) {
    while let Some(frame) = write_rx.recv().await {
        if let Err(err) = write_frame(&mut write_half, frame, true).await {
            debug!("writer stopped: {}", err);
            break;
        }
    }
}

// Reads frames until the connection ends, translating them into events.
// Pings are answered inline, a server-initiated close is acknowledged once.
// Exactly one Closed event terminates the stream.
async fn run_reader(
    mut reader: BufReader<ReadHalf<TcpStream>>,
    event_tx: UnboundedSender<Event>,
    write_tx: UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
) {
    let mut fragmented: Option<(OpCode, Vec<u8>)> = None;

    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => match frame.opcode {
                OpCode::Continue => match fragmented.as_mut() {
                    Some((_, buffer)) => {
                        buffer.extend_from_slice(&frame.payload);
                        if frame.final_fragment {
                            if let Some((opcode, buffer)) = fragmented.take() {
                                if !deliver(&event_tx, opcode, buffer) {
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        let _ = event_tx.send(Event::Error(Error::InvalidContinuationFrame));
                        break;
                    }
                },
                OpCode::Text | OpCode::Binary => {
                    if frame.final_fragment {
                        if !deliver(&event_tx, frame.opcode, frame.payload) {
                            break;
                        }
                    } else {
                        fragmented = Some((frame.opcode, frame.payload));
                    }
                }
                OpCode::Ping => {
                    let _ = write_tx.send(Frame::pong(frame.payload));
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    if !closed.swap(true, Ordering::SeqCst) {
                        let _ = write_tx.send(Frame::close());
                    }
                    break;
                }
            },
            Err(err) => {
                // An error after our own close is ordinary teardown, the
                // server tore the connection down underneath the reader.
                if !closed.load(Ordering::SeqCst) {
                    let _ = event_tx.send(Event::Error(err));
                }
                break;
            }
        }
    }

    let _ = event_tx.send(Event::Closed);
}

// Turns an assembled message into an event. Text that isn't valid UTF-8 is a
// protocol violation, reported and then the connection is abandoned.
fn deliver(event_tx: &UnboundedSender<Event>, opcode: OpCode, payload: Vec<u8>) -> bool {
    let event = match opcode {
        OpCode::Text => match String::from_utf8(payload) {
            Ok(text) => Event::Message(text),
            Err(err) => {
                let _ = event_tx.send(Event::Error(err.into()));
                return false;
            }
        },
        _ => Event::Binary(payload),
    };
    event_tx.send(event).is_ok()
}

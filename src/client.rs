use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};

use crate::{
    config::ClientConfig,
    error::{RconError, Result},
    events::{EventSink, Events},
    packet::{Packet, PacketBuffer},
    sequence::SequenceAllocator,
};

/// Asynchronous Frostbite rcon client. One `Client` owns one TCP connection
/// and can be shared between tasks (wrap it in an `Arc`); requests from
/// several tasks are matched to their responses by sequence number.
///
/// ## Example
/// ```no_run
/// use frostbite_rcon::client::Client;
/// use std::{error::Error, time::Duration};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let client = Client::connect("127.0.0.1:47200", Duration::from_secs(5)).await?;
///     client.start_background_receive(Duration::from_millis(10));
///
///     let timeout = Some(Duration::from_secs(2));
///     if client.authenticate("<put rcon password here>", timeout).await?.is_ok() {
///         let info = client.invoke("serverInfo", timeout).await?;
///         println!("{:?}", info.words());
///     }
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    shared: Arc<Shared>,
    read_timeout: Duration,
}

/// The words of a response, in wire order. The first word is the status
/// (`OK`, `InvalidPasswordHash`, `UnknownCommand`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    words: Vec<String>,
}

impl Response {
    pub fn new(words: Vec<String>) -> Self {
        Response { words }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn status(&self) -> Option<&str> {
        self.words.first().map(String::as_str)
    }

    pub fn is_ok(&self) -> bool {
        self.status() == Some("OK")
    }

    pub fn into_words(self) -> Vec<String> {
        self.words
    }
}

/// Shell-style word splitting: `admin.say "hello there" all` is three words.
pub fn tokenize(command_line: &str) -> Result<Vec<String>> {
    let words = shlex::split(command_line)
        .ok_or_else(|| RconError::InvalidCommandLine(command_line.to_string()))?;
    if words.is_empty() {
        return Err(RconError::EmptyCommand);
    }
    Ok(words)
}

enum Slot {
    /// An `invoke` call is waiting for this sequence.
    Waiting(oneshot::Sender<Vec<String>>),
    /// A response nobody is waiting for (any more). Stays until overwritten.
    Unclaimed(Vec<String>),
}

/// State shared between the caller-facing [Client] and its receiver task.
struct Shared {
    peer: SocketAddr,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Parked here until the receiver starts.
    reader: Mutex<Option<OwnedReadHalf>>,
    pending: Mutex<HashMap<u32, Slot>>,
    events: Events,
    sequences: Arc<SequenceAllocator>,
    alive: AtomicBool,
    shutdown: watch::Sender<bool>,
    last_error: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Writes one packet under the writer lock. A failed write kills the
    /// connection.
    async fn write(&self, writer: &mut Option<OwnedWriteHalf>, packet: &Packet) -> Result<()> {
        let stream = match writer.as_mut() {
            Some(stream) if self.is_alive() => stream,
            _ => return Err(RconError::ConnectionClosed),
        };

        if let Err(e) = stream.write_all(&packet.pack()).await {
            *writer = None;
            let err = RconError::SendError(e);
            self.terminate(Some(&err));
            return Err(err);
        }
        Ok(())
    }

    /// Allocates a sequence, registers a waiter for it and sends the request,
    /// all under the writer lock so sequences hit the wire in order.
    async fn send_request(
        &self,
        words: Vec<String>,
    ) -> Result<(u32, oneshot::Receiver<Vec<String>>)> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() || !self.is_alive() {
            return Err(RconError::ConnectionClosed);
        }

        let sequence = self.sequences.allocate();
        let (tx, rx) = oneshot::channel();
        self.register(sequence, tx);

        let packet = Packet::request(sequence, words);
        trace!("sending request {} {:?}", sequence, packet.words());
        if let Err(err) = self.write(&mut writer, &packet).await {
            lock(&self.pending).remove(&sequence);
            return Err(err);
        }
        Ok((sequence, rx))
    }

    fn register(&self, sequence: u32, tx: oneshot::Sender<Vec<String>>) {
        let mut pending = lock(&self.pending);
        match pending.insert(sequence, Slot::Waiting(tx)) {
            Some(Slot::Waiting(previous)) if !previous.is_closed() => {
                warn!("sequence {} wrapped around onto a request still waiting", sequence);
            }
            Some(Slot::Unclaimed(_)) => {
                debug!("dropping unclaimed response {} for a new request", sequence);
            }
            _ => {}
        }
    }

    /// Hands a response to its waiter, or parks it when nobody waits.
    fn resolve(&self, sequence: u32, words: Vec<String>) {
        let mut pending = lock(&self.pending);
        let words = match pending.remove(&sequence) {
            Some(Slot::Waiting(tx)) => match tx.send(words) {
                Ok(()) => return,
                Err(words) => {
                    debug!("response {} arrived after its caller gave up", sequence);
                    words
                }
            },
            Some(Slot::Unclaimed(_)) => {
                warn!("response {} overwrites an unclaimed response", sequence);
                words
            }
            None => {
                debug!("response {} matches no request", sequence);
                words
            }
        };
        pending.insert(sequence, Slot::Unclaimed(words));
    }

    /// Stores a response its caller stopped waiting for, unless a newer
    /// request already took the sequence.
    fn park(&self, sequence: u32, words: Vec<String>) {
        lock(&self.pending)
            .entry(sequence)
            .or_insert(Slot::Unclaimed(words));
    }

    /// Routes one decoded packet: responses to the pending table, requests to
    /// the event sink followed by an acknowledgment.
    async fn dispatch(&self, packet: Packet) -> Result<()> {
        trace!(
            "received packet {} (from_server={}, response={})",
            packet.sequence(),
            packet.from_server(),
            packet.is_response()
        );

        if packet.is_response() {
            let sequence = packet.sequence();
            self.resolve(sequence, packet.into_words());
            return Ok(());
        }

        let sequence = packet.sequence();
        self.events.deliver(packet.into_words()).await;

        let mut writer = self.writer.lock().await;
        self.write(&mut writer, &Packet::acknowledgment(sequence)).await?;
        trace!("acknowledged event {}", sequence);
        Ok(())
    }

    /// Marks the connection dead. Safe to call any number of times; only the
    /// first call records `reason`.
    fn terminate(&self, reason: Option<&RconError>) {
        if self.alive.swap(false, Ordering::SeqCst) {
            if let Some(err) = reason {
                error!("connection to {} lost: {}", self.peer, err);
                *lock(&self.last_error) = Some(err.to_string());
            }
        }
        self.shutdown.send_replace(true);
        lock(&self.reader).take();
        // dropping the senders wakes every waiting invoke
        lock(&self.pending).retain(|_, slot| matches!(slot, Slot::Unclaimed(_)));
    }
}

/// Stops listening on a timed-out request. A response that was sent in the
/// meantime is handed back so it can be parked instead of lost.
fn abandon(rx: &mut oneshot::Receiver<Vec<String>>) -> Option<Vec<String>> {
    rx.close();
    rx.try_recv().ok()
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
    read_timeout: Duration,
) {
    debug!("receiver started for {}", shared.peer);
    let mut buffer = PacketBuffer::new();
    let mut chunk = [0u8; 4096];

    let outcome: Result<()> = loop {
        match buffer.next_packet() {
            Ok(Some(packet)) => {
                if let Err(err) = shared.dispatch(packet).await {
                    break Err(err);
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => break Err(err),
        }

        if *shutdown.borrow_and_update() {
            break Ok(());
        }

        tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            _ = tokio::time::sleep(poll_interval) => {}
        }

        let read = tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            read = tokio::time::timeout(read_timeout, reader.read(&mut chunk)) => read,
        };

        match read {
            // nothing arrived within the read timeout
            Err(_) => continue,
            Ok(Ok(0)) => break Err(RconError::ConnectionClosed),
            Ok(Ok(n)) => buffer.extend(&chunk[..n]),
            Ok(Err(e)) => break Err(RconError::ReceiveError(e)),
        }
    };

    if let Err(err) = outcome {
        shared.terminate(Some(&err));
    }
    debug!("receiver stopped for {}", shared.peer);
}

impl Client {
    /// Opens a connection with default settings and a queue for events.
    pub async fn connect<A: ToSocketAddrs>(addr: A, connect_timeout: Duration) -> Result<Self> {
        let config = ClientConfig::default().with_connect_timeout(connect_timeout);
        Self::connect_with(addr, config, EventSink::Queue).await
    }

    pub async fn connect_with<A: ToSocketAddrs>(
        addr: A,
        config: ClientConfig,
        sink: EventSink,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RconError::ConnectTimeout(config.connect_timeout))?
            .map_err(RconError::UnreachableHost)?;
        let peer = stream.peer_addr().map_err(RconError::UnreachableHost)?;

        trace!("opened tcp stream to {}", peer);

        let (reader, writer) = stream.into_split();
        let (shutdown, _) = watch::channel(false);

        Ok(Client {
            shared: Arc::new(Shared {
                peer,
                writer: AsyncMutex::new(Some(writer)),
                reader: Mutex::new(Some(reader)),
                pending: Mutex::new(HashMap::new()),
                events: Events::new(sink, config.event_capacity),
                sequences: config.sequences,
                alive: AtomicBool::new(true),
                shutdown,
                last_error: Mutex::new(None),
            }),
            read_timeout: config.read_timeout,
        })
    }

    /// Spawns the task that reads responses and events off the socket.
    /// Responses are never delivered until this has been called. Calling it
    /// again, or after [close](Self::close), does nothing.
    pub fn start_background_receive(&self, poll_interval: Duration) {
        let Some(reader) = lock(&self.shared.reader).take() else {
            warn!("receiver for {} already started or connection closed", self.shared.peer);
            return;
        };

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown.subscribe();
        let read_timeout = self.read_timeout;
        tokio::spawn(receive_loop(shared, reader, shutdown, poll_interval, read_timeout));
    }

    /// Tokenizes `command_line` shell-style and sends it. See
    /// [invoke_words](Self::invoke_words).
    pub async fn invoke(&self, command_line: &str, timeout: Option<Duration>) -> Result<Response> {
        let words = tokenize(command_line)?;
        self.invoke_words(&words, timeout).await
    }

    /// Sends a command and waits for its response. With `timeout` set, gives
    /// up with [RconError::Timeout] after that long; the request stays in
    /// flight and the client stays usable. `None` waits until the response
    /// arrives or the connection dies.
    pub async fn invoke_words<S: AsRef<str>>(
        &self,
        words: &[S],
        timeout: Option<Duration>,
    ) -> Result<Response> {
        if words.is_empty() {
            return Err(RconError::EmptyCommand);
        }
        let words = words.iter().map(|w| w.as_ref().to_string()).collect();

        let (sequence, mut rx) = self.shared.send_request(words).await?;

        let answer = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(answer) => answer,
                Err(_) => {
                    debug!("no answer to request {} within {:?}", sequence, limit);
                    if let Some(words) = abandon(&mut rx) {
                        self.shared.park(sequence, words);
                    }
                    return Err(RconError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        match answer {
            Ok(words) => Ok(Response::new(words)),
            Err(_) if !self.shared.is_alive() => Err(RconError::ConnectionClosed),
            Err(_) => Err(RconError::SequenceReused(sequence)),
        }
    }

    /// Closes the socket. Outstanding invokes fail with
    /// [RconError::ConnectionClosed]. Closing twice is fine.
    pub async fn close(&self) {
        let mut writer = self.shared.writer.lock().await;
        if let Some(mut stream) = writer.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("error shutting down stream to {}: {}", self.shared.peer, e);
            }
            trace!("closed connection to {}", self.shared.peer);
        }
        drop(writer);
        self.shared.terminate(None);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_alive()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    /// The error that killed the connection, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Responses being waited for plus late responses nobody claimed.
    pub fn pending_responses(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub fn is_pending(&self, sequence: u32) -> bool {
        lock(&self.shared.pending).contains_key(&sequence)
    }

    /// Oldest queued event. Always `None` when events go to a callback.
    pub fn next_event(&self) -> Option<Vec<String>> {
        self.shared.events.pop()
    }

    pub fn drain_events(&self) -> Vec<Vec<String>> {
        self.shared.events.drain()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.terminate(None);
    }
}

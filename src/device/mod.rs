//! Device — capability discovery, command/response correlation, and
//! dispatch to connectors.

pub mod capability;
pub mod info;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::message::discovery::DiscoveryMessage;
use crate::message::generic::{GenericMessage, ResultCode};
use crate::message::{DiscoveryFactory, Hub, Message};
use crate::transport::framing::FrameDecoder;
use crate::transport::{Transport, TransportConfig};
use crate::{Error, Result};

pub use info::DeviceInfo;

/// A filter/reply pair for the single in-flight `send_command` correlation:
/// only one synchronous wait can be outstanding at a time.
struct PendingFilter {
    filter: Box<dyn Fn(&Message) -> bool + Send>,
    reply_tx: mpsc::Sender<Message>,
}

/// Anything that wants to observe every dispatched message — i.e. a
/// connector. Kept as a trait here (rather than depending on
/// `crate::connector`) so `Device` has no upward dependency on the
/// connector layer it is owned by.
pub trait DeviceObserver: Send + Sync {
    fn on_message(&self, message: &Message);
}

struct ReaderThread {
    handle: Option<JoinHandle<()>>,
}

struct ProcessorThread {
    handle: Option<JoinHandle<()>>,
}

pub struct Device {
    transport: Arc<Transport>,
    hub: Hub,
    cancelled: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    pending: Arc<Mutex<Option<PendingFilter>>>,
    default_queue_tx: mpsc::Sender<Message>,
    default_queue_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    connectors: RwLock<Vec<Arc<dyn DeviceObserver>>>,
    info: RwLock<Option<DeviceInfo>>,
    discovered: AtomicBool,
    reader: Mutex<Option<ReaderThread>>,
    processor: Mutex<Option<ProcessorThread>>,
}

impl Device {
    /// Opens the transport and starts the reader/processor threads. Discovery is *not* run automatically: call [`Device::discover`]
    /// once the device is constructed.
    pub fn open(config: &TransportConfig) -> Result<Arc<Self>> {
        let transport = Arc::new(Transport::open(config)?);
        let (default_queue_tx, default_queue_rx) = mpsc::channel();

        let device = Arc::new(Self {
            transport,
            hub: Hub::baseline(),
            cancelled: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(true)),
            pending: Arc::new(Mutex::new(None)),
            default_queue_tx,
            default_queue_rx: Mutex::new(Some(default_queue_rx)),
            connectors: RwLock::new(Vec::new()),
            info: RwLock::new(None),
            discovered: AtomicBool::new(false),
            reader: Mutex::new(None),
            processor: Mutex::new(None),
        });

        device.spawn_reader();
        device.spawn_processor();

        Ok(device)
    }

    fn spawn_reader(self: &Arc<Self>) {
        let device = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                if device.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                match device.transport.read(&mut buf) {
                    Ok(0) => continue, // read timeout, loop to re-check cancellation
                    Ok(n) => {
                        for payload in decoder.feed(&buf[..n]) {
                            match device.hub.parse(&payload) {
                                Ok(message) => device.on_message_received(message),
                                Err(e) => log::warn!("dropping unparseable frame: {e}"),
                            }
                        }
                    }
                    Err(_) => {
                        log::error!("transport read failed, marking device not ready");
                        device.ready.store(false, Ordering::SeqCst);
                        device.fail_pending_wait(Error::NotReady);
                        return;
                    }
                }
            }
        });
        *self.reader.lock() = Some(ReaderThread {
            handle: Some(handle),
        });
    }

    fn spawn_processor(self: &Arc<Self>) {
        let device = Arc::clone(self);
        let rx = self
            .default_queue_rx
            .lock()
            .take()
            .expect("processor spawned twice");
        let handle = std::thread::spawn(move || loop {
            if device.cancelled.load(Ordering::SeqCst) {
                return;
            }
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(message) => device.dispatch_message(message),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        });
        *self.processor.lock() = Some(ProcessorThread {
            handle: Some(handle),
        });
    }

    /// Cancels both threads, unblocks any outstanding wait, and joins them.
    pub fn close(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.fail_pending_wait(Error::NotReady);
        // Post a sentinel so the processor's `recv` wakes promptly instead
        // of waiting out its poll interval.
        let _ = self
            .default_queue_tx
            .send(Message::Generic(GenericMessage::CmdResult(ResultCode::Error)));
        if let Some(reader) = self.reader.lock().as_mut() {
            if let Some(h) = reader.handle.take() {
                let _ = h.join();
            }
        }
        if let Some(processor) = self.processor.lock().as_mut() {
            if let Some(h) = processor.handle.take() {
                let _ = h.join();
            }
        }
    }

    fn fail_pending_wait(&self, _err: Error) {
        // Dropping the sender makes the blocked `recv` return an error the
        // waiter turns into `Error::NotReady`/`Error::Timeout`.
        self.pending.lock().take();
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn register_connector(&self, observer: Arc<dyn DeviceObserver>) {
        self.connectors.write().push(observer);
    }

    /// Route a message through the single outstanding filter, or into the
    /// default dispatch queue.
    fn on_message_received(&self, message: Message) {
        let mut pending = self.pending.lock();
        if let Some(p) = pending.as_ref() {
            if (p.filter)(&message) {
                let p = pending.take().unwrap();
                let _ = p.reply_tx.send(message);
                return;
            }
        }
        drop(pending);
        let _ = self.default_queue_tx.send(message);
    }

    /// A fatal `UNSUPPORTED_DOMAIN` result marks the device not-ready;
    /// everything else is forwarded to every registered connector, which
    /// may accept or ignore it.
    fn dispatch_message(&self, message: Message) {
        if let Message::Generic(GenericMessage::CmdResult(ResultCode::UnsupportedDomain)) = &message
        {
            log::error!("domain not supported by this device");
            self.ready.store(false, Ordering::SeqCst);
        }
        for connector in self.connectors.read().iter() {
            connector.on_message(&message);
        }
    }

    /// Sends `message` without waiting for a reply, optionally arming a
    /// filter for a subsequent [`Device::wait_for_message`].
    pub fn send_message(
        &self,
        message: &Message,
        filter: Option<Box<dyn Fn(&Message) -> bool + Send>>,
    ) -> Result<mpsc::Receiver<Message>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if let Some(filter) = filter {
            *self.pending.lock() = Some(PendingFilter { filter, reply_tx });
        }
        let bytes = self.hub.serialize(message);
        self.transport.write_frame(&bytes)?;
        Ok(reply_rx)
    }

    /// Blocks for the next message matching the filter armed by
    /// [`Device::send_message`], or `timeout` elapses.
    pub fn wait_for_message(
        &self,
        reply_rx: &mpsc::Receiver<Message>,
        timeout: Duration,
    ) -> Result<Message> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        reply_rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => Error::Timeout,
            mpsc::RecvTimeoutError::Disconnected => Error::NotReady,
        })
    }

    /// Sends a command and awaits the matching reply (default: a
    /// `CmdResult`), giving synchronous request/response on top of the
    /// asynchronous byte stream.
    pub fn send_command(
        &self,
        message: Message,
        filter: Box<dyn Fn(&Message) -> bool + Send>,
        timeout: Duration,
    ) -> Result<Message> {
        let rx = self.send_message(&message, Some(filter))?;
        self.wait_for_message(&rx, timeout)
    }

    /// Runs the device-info/domain/transport-speed discovery sequence.
    /// Idempotent: a second call is a cheap no-op, so a caller that issues
    /// it twice by mistake doesn't re-run discovery.
    pub fn discover(&self) -> Result<()> {
        if self.discovered.load(Ordering::SeqCst) {
            return Ok(());
        }

        let resp = self.send_command(
            DiscoveryFactory::info_query(crate::message::BASELINE_VERSION),
            Box::new(|m| matches!(m, Message::Discovery(DiscoveryMessage::InfoResp(_)))),
            Duration::from_secs(5),
        )?;
        let info_resp = match resp {
            Message::Discovery(DiscoveryMessage::InfoResp(r)) => r,
            _ => unreachable!("filter only matches InfoResp"),
        };
        let mut info = DeviceInfo::from_resp(info_resp);

        let domains: Vec<u8> = info.domains().collect();
        for domain in domains {
            let resp = self.send_command(
                DiscoveryFactory::domain_query(domain),
                Box::new(|m| matches!(m, Message::Discovery(DiscoveryMessage::DomainResp(_)))),
                Duration::from_secs(5),
            )?;
            if let Message::Discovery(DiscoveryMessage::DomainResp(r)) = resp {
                info.add_supported_commands(r.domain, r.supported_commands);
            }
        }

        let max_speed = info.max_speed;
        *self.info.write() = Some(info);

        self.send_command(
            DiscoveryFactory::set_transport_speed(max_speed),
            Box::new(|m| matches!(m, Message::Generic(GenericMessage::CmdResult(_)))),
            Duration::from_secs(5),
        )?;

        self.discovered.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Issues a `Reset` command, which can be sent at any time and is
    /// always awaited by a `ready_resp` reply.
    pub fn reset(&self) -> Result<()> {
        self.send_command(
            DiscoveryFactory::reset(),
            Box::new(|m| matches!(m, Message::Discovery(DiscoveryMessage::ReadyResp(_)))),
            Duration::from_secs(5),
        )?;
        Ok(())
    }

    pub fn info(&self) -> Option<DeviceInfo> {
        self.info.read().clone()
    }

    pub fn hub(&self) -> Hub {
        self.hub
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

//! Monitor — taps a connector's packet stream and emits it to an
//! external sink (pcap file, named pipe, or any other [`PacketSink`]).
//!
//! Covers the three file-target cases (new file, existing regular file,
//! named pipe) and the timestamp anchoring arithmetic as the
//! `Monitor`/`PacketSink` contract; actual PCAP byte-level encoding is an
//! external collaborator — only the attach/emit contract lives here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A single packet handed to a monitor, with a wall-clock-independent
/// timestamp in microseconds if the connector/dongle supplied one.
#[derive(Debug, Clone)]
pub struct MonitoredPacket {
    pub data: Vec<u8>,
    pub timestamp_us: Option<u64>,
}

/// Where a monitor's packets ultimately go. A pcap writer, a live capture
/// relay, or a test double all implement this.
pub trait PacketSink: Send + Sync {
    fn write_packet(&self, packet: &MonitoredPacket, timestamp_us: u64);
}

/// What kind of pcap target [`PcapTimestampAnchor`] is anchoring against,
/// mirroring the three cases `PcapWriterMonitor.setup` distinguishes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PcapTarget {
    /// The file did not exist: packets are timestamped against local wall
    /// clock with no reference correction.
    NewFile,
    /// An existing regular file: appended packets are timestamped relative
    /// to the first packet already in the file.
    ExistingFile { first_packet_timestamp_us: u64 },
    /// A named pipe (FIFO): written in sync mode, no seeking, same
    /// anchoring as a new file.
    NamedPipe,
}

/// Normalises packet timestamps so that the first emitted packet's wall
/// clock becomes the anchor; subsequent packets carry
/// `anchor + (packet_ts - first_packet_ts)`.
pub struct PcapTimestampAnchor {
    target: PcapTarget,
    reference: Mutex<Option<(u64, u64)>>, // (anchor_wall_clock_us, first_packet_ts_us)
}

impl PcapTimestampAnchor {
    pub fn new(target: PcapTarget) -> Self {
        Self {
            target,
            reference: Mutex::new(None),
        }
    }

    /// `now_us` is the local wall clock at emission time; `packet_ts_us` is
    /// the packet's own timestamp if the connector supplied one (falls back
    /// to `now_us` otherwise, per `PcapWriterMonitor.process_packet`).
    pub fn normalize(&self, now_us: u64, packet_ts_us: Option<u64>) -> u64 {
        let packet_ts_us = packet_ts_us.unwrap_or(now_us);
        let mut reference = self.reference.lock();
        match *reference {
            Some((anchor, first_ts)) => anchor + packet_ts_us.saturating_sub(first_ts),
            None => {
                let (anchor, first_ts) = match self.target {
                    PcapTarget::ExistingFile {
                        first_packet_timestamp_us,
                    } => (first_packet_timestamp_us, packet_ts_us),
                    PcapTarget::NewFile | PcapTarget::NamedPipe => (now_us, packet_ts_us),
                };
                *reference = Some((anchor, first_ts));
                anchor
            }
        }
    }
}

/// Attaches to a connector's packet stream and forwards every observed
/// packet to a [`PacketSink`] while running: `attach`, `start`, `close`.
pub struct Monitor<S: PacketSink> {
    sink: Arc<S>,
    anchor: PcapTimestampAnchor,
    running: AtomicBool,
    monitor_reception: bool,
    monitor_transmission: bool,
}

impl<S: PacketSink> Monitor<S> {
    pub fn new(sink: Arc<S>, target: PcapTarget) -> Self {
        Self {
            sink,
            anchor: PcapTimestampAnchor::new(target),
            running: AtomicBool::new(false),
            monitor_reception: true,
            monitor_transmission: true,
        }
    }

    pub fn with_directions(mut self, reception: bool, transmission: bool) -> Self {
        self.monitor_reception = reception;
        self.monitor_transmission = transmission;
        self
    }

    /// Starts consuming packets; subsequent [`Monitor::on_packet`] calls take
    /// effect only while running.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Feeds one observed packet, tagged with the direction it travelled so
    /// a monitor configured for one direction only can ignore the other.
    pub fn on_packet(&self, packet: MonitoredPacket, received: bool, now_us: u64) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if received && !self.monitor_reception {
            return;
        }
        if !received && !self.monitor_transmission {
            return;
        }
        let ts = self.anchor.normalize(now_us, packet.timestamp_us);
        self.sink.write_packet(&packet, ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        written: StdMutex<Vec<(Vec<u8>, u64)>>,
    }

    impl PacketSink for RecordingSink {
        fn write_packet(&self, packet: &MonitoredPacket, timestamp_us: u64) {
            self.written
                .lock()
                .unwrap()
                .push((packet.data.clone(), timestamp_us));
        }
    }

    #[test]
    fn new_file_anchors_on_first_packet_wall_clock() {
        let anchor = PcapTimestampAnchor::new(PcapTarget::NewFile);
        let first = anchor.normalize(1_000_000, Some(500));
        assert_eq!(first, 1_000_000);
        let second = anchor.normalize(1_000_500, Some(600));
        assert_eq!(second, 1_000_100);
    }

    #[test]
    fn existing_file_anchors_on_recorded_first_packet_timestamp() {
        let anchor = PcapTimestampAnchor::new(PcapTarget::ExistingFile {
            first_packet_timestamp_us: 42,
        });
        let first = anchor.normalize(999_999, Some(42));
        assert_eq!(first, 42);
        let second = anchor.normalize(1_000_000, Some(142));
        assert_eq!(second, 142);
    }

    #[test]
    fn missing_packet_timestamp_falls_back_to_wall_clock() {
        let anchor = PcapTimestampAnchor::new(PcapTarget::NewFile);
        let first = anchor.normalize(5_000, None);
        assert_eq!(first, 5_000);
    }

    #[test]
    fn monitor_drops_packets_while_stopped_and_respects_direction_filter() {
        let sink = Arc::new(RecordingSink {
            written: StdMutex::new(Vec::new()),
        });
        let monitor = Monitor::new(Arc::clone(&sink), PcapTarget::NewFile)
            .with_directions(true, false);
        let packet = MonitoredPacket {
            data: vec![1, 2, 3],
            timestamp_us: Some(10),
        };

        monitor.on_packet(packet.clone(), true, 100); // dropped: not started
        monitor.start();
        monitor.on_packet(packet.clone(), false, 100); // dropped: transmission filtered
        monitor.on_packet(packet.clone(), true, 100); // accepted
        monitor.close();
        monitor.on_packet(packet, true, 200); // dropped: stopped

        assert_eq!(sink.written.lock().unwrap().len(), 1);
    }
}

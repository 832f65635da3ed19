//! Bridge handle rewrite exercised end to end: two live [`Device`]s, each
//! talking to a fake dongle over its own unix socket, joined by a
//! [`Bridge`]. The bridge's unit tests cover `Side`'s queue/replay logic
//! directly; this drives the same scenario through the real `Transport` →
//! `Device` → connector plumbing so the wiring between them is exercised
//! too.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use whad::ble::central::DOMAIN_BLE;
use whad::bridge::{Bridge, DEFAULT_ACCESS_ADDRESS};
use whad::connector::ConnectorBase;
use whad::device::{Device, DeviceObserver};
use whad::message::ble::{
    BleMessage, ConnectedNotification, PduDirection, PduReceivedNotification,
};
use whad::message::generic::{GenericMessage, ResultCode};
use whad::message::{Hub, Message};
use whad::transport::framing::{encode_frame, FrameDecoder};
use whad::transport::TransportConfig;

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "whad-bridge-test-{}-{name}",
        std::process::id()
    ))
}

fn write_frame(sock: &mut UnixStream, hub: &Hub, message: &Message) {
    let payload = hub.serialize(message);
    let frame = encode_frame(&payload).unwrap();
    sock.write_all(&frame).unwrap();
    sock.flush().unwrap();
}

/// Forwards every dispatched message on one device into the bridge's
/// matching side, the way an application wires a `Bridge` up to its two
/// connectors in practice.
struct Tap<F: Fn(&Message) + Send + Sync> {
    forward: F,
}

impl<F: Fn(&Message) + Send + Sync> DeviceObserver for Tap<F> {
    fn on_message(&self, message: &Message) {
        (self.forward)(message)
    }
}

#[test]
fn bridge_rewrites_handle_and_replays_queued_packet_on_late_connect() {
    let input_path = socket_path("input");
    let output_path = socket_path("output");
    let _ = std::fs::remove_file(&input_path);
    let _ = std::fs::remove_file(&output_path);

    let input_listener = UnixListener::bind(&input_path).unwrap();
    let output_listener = UnixListener::bind(&output_path).unwrap();

    let input_peer = thread::spawn({
        let hub = Hub::baseline();
        move || {
            let (mut sock, _) = input_listener.accept().unwrap();
            // Input side connects on handle 3 and immediately forwards one
            // PDU, before the output side has a handle assigned.
            write_frame(
                &mut sock,
                &hub,
                &Message::Ble(BleMessage::Connected(ConnectedNotification {
                    conn_handle: 3,
                    peer_address: [0xAA; 6],
                    peer_address_type: 0,
                    access_address: 0x9A1B2C3D,
                    central_role: true,
                })),
            );
            write_frame(
                &mut sock,
                &hub,
                &Message::Ble(BleMessage::PduReceived(PduReceivedNotification {
                    conn_handle: 3,
                    direction: PduDirection::SlaveToMaster,
                    pdu: vec![0x02, 0x03, 0xAA, 0xBB, 0xCC],
                })),
            );
            // Hold the connection open so the reader thread keeps running.
            thread::sleep(Duration::from_secs(2));
        }
    });

    let output_peer = thread::spawn({
        let hub = Hub::baseline();
        move || {
            let (mut sock, _) = output_listener.accept().unwrap();
            // Give the input side time to forward its PDU while the output
            // side still has no handle, so it's queued rather than sent
            // immediately.
            thread::sleep(Duration::from_millis(200));
            write_frame(
                &mut sock,
                &hub,
                &Message::Ble(BleMessage::Connected(ConnectedNotification {
                    conn_handle: 7,
                    peer_address: [0xBB; 6],
                    peer_address_type: 0,
                    access_address: 0x99887766,
                    central_role: false,
                })),
            );

            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                for payload in decoder.feed(&buf[..n]) {
                    if let Message::Ble(BleMessage::SendPdu(p)) = hub.parse(&payload).unwrap() {
                        assert_eq!(p.conn_handle, 7, "replayed packet must use the output's own handle");
                        assert_eq!(p.direction, PduDirection::MasterToSlave);
                        assert_eq!(p.pdu, vec![0x02, 0x03, 0xAA, 0xBB, 0xCC]);
                        // Resolved at queue time, while the output side's
                        // Connected notification (access_address 0x99887766)
                        // hadn't arrived yet, so the synthesised default
                        // applies rather than the late-bound real address.
                        assert_eq!(p.access_address, DEFAULT_ACCESS_ADDRESS);
                        write_frame(
                            &mut sock,
                            &hub,
                            &Message::Generic(GenericMessage::CmdResult(ResultCode::Success)),
                        );
                        return;
                    }
                }
            }
            panic!("output peer never observed the replayed SendPdu");
        }
    });

    let input_device =
        Device::open(&TransportConfig::UnixSocket { path: input_path.clone() }).unwrap();
    let output_device =
        Device::open(&TransportConfig::UnixSocket { path: output_path.clone() }).unwrap();

    let bridge = Arc::new(Bridge::new(
        ConnectorBase::new(input_device.clone(), DOMAIN_BLE),
        ConnectorBase::new(output_device.clone(), DOMAIN_BLE),
    ));

    let tap_for_input = bridge.clone();
    input_device.register_connector(Arc::new(Tap {
        forward: move |m: &Message| tap_for_input.on_input_message(m),
    }) as Arc<dyn DeviceObserver>);
    let tap_for_output = bridge.clone();
    output_device.register_connector(Arc::new(Tap {
        forward: move |m: &Message| tap_for_output.on_output_message(m),
    }) as Arc<dyn DeviceObserver>);

    input_peer.join().unwrap();
    output_peer.join().unwrap();

    let _ = std::fs::remove_file(&input_path);
    let _ = std::fs::remove_file(&output_path);
}

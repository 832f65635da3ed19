//! Discovery sequence exercised end to end: a [`Device`] talking to a
//! fake dongle over a unix socket runs `InfoQuery` → `DomainQuery` →
//! `SetTransportSpeed`, and a second `discover()` call is a no-op that never
//! touches the socket again.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use whad::device::Device;
use whad::device::capability::Capability;
use whad::message::discovery::{DeviceDomainInfoResp, DeviceInfoResp, DiscoveryMessage};
use whad::message::generic::{GenericMessage, ResultCode};
use whad::message::{Hub, Message};
use whad::transport::framing::{encode_frame, FrameDecoder};
use whad::transport::TransportConfig;

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "whad-discovery-test-{}-{name}",
        std::process::id()
    ))
}

fn write_frame(sock: &mut UnixStream, hub: &Hub, message: &Message) {
    let payload = hub.serialize(message);
    let frame = encode_frame(&payload).unwrap();
    sock.write_all(&frame).unwrap();
    sock.flush().unwrap();
}

fn read_message(sock: &mut UnixStream, hub: &Hub, decoder: &mut FrameDecoder) -> Message {
    let mut buf = [0u8; 4096];
    loop {
        let n = sock.read(&mut buf).unwrap();
        assert_ne!(n, 0, "peer closed before sending a request");
        for payload in decoder.feed(&buf[..n]) {
            return hub.parse(&payload).unwrap();
        }
    }
}

#[test]
fn discover_runs_the_full_sequence_once_and_is_idempotent() {
    let path = socket_path("main");
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();

    let request_count = Arc::new(AtomicUsize::new(0));
    let peer_requests = Arc::clone(&request_count);

    let peer = thread::spawn({
        let hub = Hub::baseline();
        move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut decoder = FrameDecoder::new();

            match read_message(&mut sock, &hub, &mut decoder) {
                Message::Discovery(DiscoveryMessage::InfoQuery(_)) => {
                    peer_requests.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("expected InfoQuery, got {other:?}"),
            }
            write_frame(
                &mut sock,
                &hub,
                &Message::Discovery(DiscoveryMessage::InfoResp(DeviceInfoResp {
                    fw_author: "whad".into(),
                    fw_url: "https://example.invalid".into(),
                    fw_version: (1, 0, 0),
                    max_speed: 921_600,
                    device_id: [0u8; 16],
                    device_type: 1,
                    capabilities: vec![whad::device::capability::pack_capability_word(
                        0x02,
                        Capability::SCAN | Capability::MASTER_ROLE,
                    )],
                })),
            );

            match read_message(&mut sock, &hub, &mut decoder) {
                Message::Discovery(DiscoveryMessage::DomainQuery(q)) => {
                    assert_eq!(q.domain, 0x02);
                    peer_requests.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("expected DomainQuery, got {other:?}"),
            }
            write_frame(
                &mut sock,
                &hub,
                &Message::Discovery(DiscoveryMessage::DomainResp(DeviceDomainInfoResp {
                    domain: 0x02,
                    supported_commands: 0x0000_000F,
                })),
            );

            match read_message(&mut sock, &hub, &mut decoder) {
                Message::Discovery(DiscoveryMessage::SetTransportSpeed(s)) => {
                    assert_eq!(s.speed, 921_600);
                    peer_requests.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("expected SetTransportSpeed, got {other:?}"),
            }
            write_frame(
                &mut sock,
                &hub,
                &Message::Generic(GenericMessage::CmdResult(ResultCode::Success)),
            );

            // A second `discover()` call must be a cheap no-op: nothing else
            // should ever arrive on the socket.
            let mut buf = [0u8; 16];
            sock.set_read_timeout(Some(std::time::Duration::from_millis(300)))
                .unwrap();
            match sock.read(&mut buf) {
                Ok(0) => {}
                Ok(_) => panic!("idempotent discover() sent another request"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("unexpected read error: {e}"),
            }
        }
    });

    let device = Device::open(&TransportConfig::UnixSocket { path: path.clone() }).unwrap();
    device.discover().unwrap();

    let info = device.info().unwrap();
    assert_eq!(info.version_str(), "1.0.0");
    assert!(info.has_domain(0x02));
    assert!(info.has_domain_cap(0x02, Capability::SCAN));
    assert_eq!(info.domain_commands(0x02), Some(0x0000_000F));

    // Idempotent: already discovered, no further wire traffic.
    device.discover().unwrap();
    assert_eq!(request_count.load(Ordering::SeqCst), 3);

    peer.join().unwrap();
    let _ = std::fs::remove_file(&path);
}

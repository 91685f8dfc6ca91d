//! Synchronous transport against a simulated drive.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;
use servolink_errors::{ErrorKind, IoFault, ServoError};
use servolink_frame::sync::{SUBNODE_COCO, SUBNODE_MOCO};
use servolink_frame::{Command, RegisterAddress, SyncFrame, SyncParser};
use servolink_transport::bulk::MONITORING_DATA;
use servolink_transport::mock::{MockChannel, NO_SUCH_OBJECT, Protocol, VirtualDrive};
use servolink_transport::sync::{CONTROLWORD, PRODUCT_CODE, STATUSWORD};
use servolink_transport::{Channel, LinkState, SyncConfig, SyncTransport, Transport, TransportExt};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const fn reg(address: u16) -> RegisterAddress {
    RegisterAddress::new(address, 0)
}

struct Bench {
    drive: Arc<VirtualDrive>,
    host: Arc<MockChannel>,
    transport: SyncTransport,
}

fn bench() -> Result<Bench, Box<dyn std::error::Error>> {
    let drive = Arc::new(VirtualDrive::new(Protocol::Sync));
    drive.set_register(SUBNODE_MOCO, reg(STATUSWORD), &0x0040u16.to_le_bytes());
    drive.set_register(SUBNODE_MOCO, reg(CONTROLWORD), &0u16.to_le_bytes());
    drive.set_register(SUBNODE_COCO, reg(PRODUCT_CODE), &0x0007_2001u32.to_le_bytes());
    let host = drive.connect_channel()?;
    let config = SyncConfig::builder()
        .response_timeout_ms(300)
        .poll_period_ms(10)
        .build()?;
    let transport = SyncTransport::new(Arc::clone(&host) as Arc<dyn Channel>, config)?;
    transport.connect()?;
    Ok(Bench {
        drive,
        host,
        transport,
    })
}

#[test]
fn test_read_and_confirmed_write() -> TestResult {
    let bench = bench()?;
    assert_eq!(bench.transport.read_u16(SUBNODE_MOCO, reg(STATUSWORD))?, 0x0040);
    bench
        .transport
        .write_u16(SUBNODE_MOCO, reg(CONTROLWORD), 0x0006, true)?;
    let stored = bench.drive.register(SUBNODE_MOCO, reg(CONTROLWORD)).unwrap_or_default();
    assert_eq!(stored.get(..2), Some(&[0x06, 0x00][..]));
    Ok(())
}

#[test]
fn test_confirm_mismatch() -> TestResult {
    let bench = bench()?;
    bench.drive.lock_register(SUBNODE_MOCO, reg(CONTROLWORD));
    let err = bench
        .transport
        .write_u16(SUBNODE_MOCO, reg(CONTROLWORD), 0x000F, true)
        .err();
    assert_eq!(err, Some(ServoError::Io(IoFault::ContentMismatch)));
    Ok(())
}

#[test]
fn test_unknown_register_is_nacked() -> TestResult {
    let bench = bench()?;
    let err = bench.transport.read_u32(SUBNODE_MOCO, reg(0x0123)).err();
    assert_eq!(err, Some(ServoError::Io(IoFault::Nack { code: NO_SUCH_OBJECT })));
    // A refusal is not a link failure.
    assert_eq!(bench.transport.state(), LinkState::Connected);
    Ok(())
}

#[test]
fn test_address_outside_frame_is_rejected() -> TestResult {
    let bench = bench()?;
    let err = bench.transport.read_u16(SUBNODE_MOCO, RegisterAddress::new(0x6041, 0)).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
    Ok(())
}

#[test]
fn test_scan_reads_product_code() -> TestResult {
    let bench = bench()?;
    assert_eq!(bench.transport.scan_nodes()?, vec![SUBNODE_MOCO]);
    Ok(())
}

#[test]
fn test_poller_feeds_statusword_subscriber() -> TestResult {
    let bench = bench()?;
    let (tx, rx) = unbounded();
    bench.transport.subscribe_statusword(
        SUBNODE_MOCO,
        Arc::new(move |node: u8, value: u16| {
            let _ = tx.send((node, value));
        }),
    )?;
    assert_eq!(rx.recv_timeout(Duration::from_secs(2))?, (SUBNODE_MOCO, 0x0040));
    bench
        .drive
        .set_register(SUBNODE_MOCO, reg(STATUSWORD), &0x0237u16.to_le_bytes());
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut seen = 0;
    while seen != 0x0237 && Instant::now() < deadline {
        seen = rx.recv_timeout(Duration::from_secs(2))?.1;
    }
    assert_eq!(seen, 0x0237);
    Ok(())
}

#[test]
fn test_poller_continues_past_failing_subnode() -> TestResult {
    let drive = Arc::new(VirtualDrive::new(Protocol::Sync));
    // COCO has no statusword, so every poll of it is refused.
    drive.set_register(SUBNODE_MOCO, reg(STATUSWORD), &0x0021u16.to_le_bytes());
    let host = drive.connect_channel()?;
    let config = SyncConfig::builder()
        .response_timeout_ms(300)
        .poll_period_ms(10)
        .subnodes(vec![SUBNODE_COCO, SUBNODE_MOCO])
        .build()?;
    let transport = SyncTransport::new(host as Arc<dyn Channel>, config)?;
    let (tx, rx) = unbounded();
    transport.subscribe_statusword(
        SUBNODE_MOCO,
        Arc::new(move |node: u8, value: u16| {
            let _ = tx.send((node, value));
        }),
    )?;
    transport.connect()?;

    assert_eq!(rx.recv_timeout(Duration::from_secs(2))?, (SUBNODE_MOCO, 0x0021));
    assert_eq!(transport.state(), LinkState::Connected);
    transport.disconnect()?;
    Ok(())
}

#[test]
fn test_bulk_roundtrip() -> TestResult {
    let bench = bench()?;
    let block: Vec<u8> = (0..=255u8).collect();
    bench
        .drive
        .set_bulk(SUBNODE_MOCO, reg(MONITORING_DATA), &block);
    let read = bench.transport.read_bulk(SUBNODE_MOCO, reg(MONITORING_DATA))?;
    assert_eq!(read, block);
    let last = bench.transport.last_bulk();
    assert_eq!(last.address(), Some(MONITORING_DATA));
    assert_eq!(last.data(), block.as_slice());

    let upload = vec![0xA5; 40];
    bench
        .transport
        .write_bulk(SUBNODE_MOCO, reg(0x0B4), &upload)?;
    assert_eq!(bench.drive.bulk(SUBNODE_MOCO, reg(0x0B4)), Some(upload));
    Ok(())
}

#[test]
fn test_plain_reply_has_no_bulk() -> TestResult {
    let bench = bench()?;
    let err = bench.transport.read_bulk(SUBNODE_MOCO, reg(STATUSWORD)).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Io));
    Ok(())
}

#[test]
fn test_silent_drive_times_out() -> TestResult {
    let bench = bench()?;
    bench.drive.set_silent(true);
    let err = bench.transport.read_u16(SUBNODE_MOCO, reg(STATUSWORD)).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Timeout));
    Ok(())
}

#[test]
fn test_closed_channel_makes_link_faulty() -> TestResult {
    let bench = bench()?;
    bench.host.close();
    let err = bench.transport.read_u16(SUBNODE_MOCO, reg(STATUSWORD)).err();
    assert!(err.is_some());
    let deadline = Instant::now() + Duration::from_secs(2);
    while bench.transport.state() != LinkState::Faulty && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(bench.transport.state(), LinkState::Faulty);
    Ok(())
}

/// A peer answering every request with a reply for another register.
fn misaddressed_peer(drive_end: MockChannel) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut parser = SyncParser::new();
        let mut buf = [0u8; 64];
        while let Ok(n) = drive_end.recv(&mut buf, Duration::from_secs(2)) {
            if n == 0 {
                return;
            }
            for frame in parser.push_all(buf.get(..n).unwrap_or_default()) {
                let wrong = frame.address() + 1;
                if let Ok(reply) = SyncFrame::new(frame.node(), frame.subnode(), wrong, Command::Ack, &[]) {
                    let _ = drive_end.send(&reply.encode());
                }
            }
        }
    })
}

#[test]
fn test_reply_for_other_register_is_rejected() -> TestResult {
    let (host, drive_end) = MockChannel::pair();
    let peer = misaddressed_peer(drive_end);
    let host: Arc<dyn Channel> = Arc::new(host);
    let config = SyncConfig::builder().poll_period_ms(60_000).build()?;
    let transport = SyncTransport::new(Arc::clone(&host), config)?;
    transport.connect()?;
    let err = transport.read_u16(SUBNODE_MOCO, reg(STATUSWORD)).err();
    assert_eq!(
        err,
        Some(ServoError::WrongRegister {
            expected: u32::from(STATUSWORD),
            actual: u32::from(STATUSWORD + 1),
        })
    );
    transport.disconnect()?;
    host.close();
    peer.join().map_err(|_| "peer panicked")?;
    Ok(())
}

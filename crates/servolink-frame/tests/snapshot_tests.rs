//! Snapshot tests for wire layouts.

use insta::assert_snapshot;
use servolink_frame::sync::{DEFAULT_NODE, SUBNODE_COCO, SUBNODE_MOCO};
use servolink_frame::{Command, FrameError, RegisterAddress, SerialFrame, SyncFrame};

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn test_snapshot_serial_statusword_read() {
    let frame = SerialFrame::read_request(0x01, RegisterAddress::new(0x6041, 0));
    assert_snapshot!(hex(frame.as_bytes()), @"01 2b 0d 00 00 01 60 41 00 00 00 00 00 55 55 55 55");
}

#[test]
fn test_snapshot_serial_controlword_write() -> Result<(), FrameError> {
    let frame = SerialFrame::write_request(0x02, RegisterAddress::new(0x6040, 0), &[0x0F, 0x00])?;
    assert_snapshot!(hex(frame.as_bytes()), @"02 2b 0d 01 00 02 60 40 00 00 00 00 02 0f 00 55 55 55 55");
    Ok(())
}

#[test]
fn test_snapshot_sync_statusword_read() -> Result<(), FrameError> {
    let frame = SyncFrame::read(DEFAULT_NODE, SUBNODE_MOCO, 0x011)?;
    assert_snapshot!(hex(&frame.encode()), @"a1 00 12 01 00 00 00 00 00 00 00 00 4b 66");
    Ok(())
}

#[test]
fn test_snapshot_sync_controlword_write() -> Result<(), FrameError> {
    let frame = SyncFrame::write(DEFAULT_NODE, SUBNODE_MOCO, 0x010, &[0x0F, 0x00])?;
    assert_snapshot!(hex(&frame.encode()), @"a1 00 04 01 0f 00 00 00 00 00 00 00 a0 58");
    Ok(())
}

#[test]
fn test_snapshot_sync_product_code_read() -> Result<(), FrameError> {
    let frame = SyncFrame::read(DEFAULT_NODE, SUBNODE_COCO, 0x6E1)?;
    assert_snapshot!(hex(&frame.encode()), @"a0 00 12 6e 00 00 00 00 00 00 00 00 4f 05");
    Ok(())
}

#[test]
fn test_snapshot_sync_ack_reply() -> Result<(), FrameError> {
    let frame = SyncFrame::new(DEFAULT_NODE, SUBNODE_MOCO, 0x011, Command::Ack, &[0x37, 0x02])?;
    assert_snapshot!(hex(&frame.encode()), @"a1 00 16 01 37 02 00 00 00 00 00 00 59 2a");
    Ok(())
}

#[test]
fn test_snapshot_field_out_of_range() {
    let message = SyncFrame::read(DEFAULT_NODE, 0x10, 0x011)
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
    assert_snapshot!(message, @"Field out of range: subnode = 0x10 (max 0xf)");
}

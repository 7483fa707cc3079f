//! SPCe Protocol Tests
//!
//! Request/response behaviour of the controller client over the mock port:
//! - Exact request bytes for each operation
//! - Model and pressure extraction from well-formed replies
//! - Rejection of short, foreign and error replies
//! - Stale bytes from an earlier exchange never satisfy a later one

use spce_daq::error::{DecodeError, SpceError};
use spce_daq::hardware::frame::{self, Command, Opcode};
use spce_daq::hardware::mock_serial::{self, MockDeviceHarness};
use spce_daq::hardware::{SerialSettings, SpceController, TransportSession};
use std::time::Duration;

fn controller(address: u8) -> (SpceController, MockDeviceHarness) {
    let (port, device) = mock_serial::new();
    let settings = SerialSettings::new("mock")
        .with_read_timeout(Duration::from_millis(100))
        .with_drain_timeout(Duration::from_millis(5));
    let session = TransportSession::from_port(Box::new(port), settings);
    (SpceController::new(session, address), device)
}

#[tokio::test]
async fn test_identify_scenario() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 05 01 00\r").await;
        device.reply(b"05 OK 00 DIGITEL SPCe 4C\r");
        device
    });

    let model = spce.identify().await.unwrap();
    assert_eq!(model.to_string(), "DIGITEL SPCe");
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_read_pressure_scenario() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 05 0B 00\r").await;
        device.reply(b"05 OK 00 1.23E-04 TORR 3A\r");
        device
    });

    let pressure = spce.read_pressure().await.unwrap();
    assert_eq!(pressure.as_str(), "1.23E-04");
    assert_eq!(pressure.value(), Some(1.23e-4));
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_pressure_window_is_fixed_on_echoed_opcode_reply() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 05 0B 00\r").await;
        device.reply(b"05 OK 0B 01 1.23E-04 \r");
        device
    });

    // Bytes 9..17 of the trimmed line, not the fifth token
    let pressure = spce.read_pressure().await.unwrap();
    assert_eq!(pressure.as_str(), "01 1.23E");
    assert_eq!(pressure.value(), None);
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_non_default_address() {
    let (mut spce, mut device) = controller(0x1A);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 1A 0B 00\r").await;
        device.reply(b"1A OK 00 5.60E-10 TORR 11\r");
        device
    });

    assert_eq!(spce.read_pressure().await.unwrap().as_str(), "5.60E-10");
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_partial_reply_is_not_a_reading() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 05 0B 00\r").await;
        // Line cut before the terminator
        device.reply(b"05 OK 00 1.2");
        device
    });

    let err = spce.read_pressure().await.unwrap_err();
    assert!(matches!(
        err,
        SpceError::Decode(DecodeError::Unterminated { .. })
    ));
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_short_reply_is_decode_error() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 05 0B 00\r").await;
        device.reply(b"05 OK\r");
        device
    });

    let err = spce.read_pressure().await.unwrap_err();
    assert!(matches!(
        err,
        SpceError::Decode(DecodeError::TooFewTokens { count: 2, .. })
    ));
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_late_reply_does_not_answer_next_request() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        device.expect_request(b"~ 05 0B 00\r").await;
        // Too slow: arrives after the client gave up
        tokio::time::sleep(Duration::from_millis(150)).await;
        device.reply(b"05 OK 00 9.99E-01 TORR 00\r");

        device.expect_request(b"~ 05 01 00\r").await;
        device.reply(b"05 OK 00 DIGITEL SPCe 4C\r");
        device
    });

    assert!(spce.read_pressure().await.is_err());
    // Let the late reply land in the port before the next exchange
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(spce.identify().await.unwrap().0, "DIGITEL SPCe");
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_raw_echo_round_trip() {
    let (mut spce, mut device) = controller(0x05);

    let device_task = tokio::spawn(async move {
        for opcode in [Opcode::GetModel, Opcode::GetPressure] {
            let request = device.next_request().await.unwrap();
            let text = String::from_utf8(request).unwrap();
            let fields: Vec<&str> = text.trim_end_matches('\r').split(' ').collect();
            assert_eq!(fields[0], "~");
            let reply = format!("{} OK {} ECHO 00\r", fields[1], fields[2]);
            device.reply(reply.as_bytes());
            assert_eq!(fields[2], format!("{:02X}", u8::from(opcode)));
        }
        device
    });

    for opcode in [Opcode::GetModel, Opcode::GetPressure] {
        let response = spce.send(&Command::new(0x05, opcode)).await.unwrap();
        assert!(response.is_ok());
        assert_eq!(response.address, 0x05);
        assert_eq!(response.code, u8::from(opcode));
    }
    device_task.await.unwrap();
}

#[test]
fn test_decode_rejects_garbage() {
    assert_eq!(frame::decode(b""), Err(DecodeError::Empty));
    assert!(frame::decode(b"\r").is_err());
    assert!(frame::decode(b"hello\r").is_err());
    assert!(frame::decode(b"ZZ OK 00 X 00\r").is_err());
}

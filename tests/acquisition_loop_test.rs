//! Acquisition Loop Integration Tests
//!
//! Drives the full stack (loop → controller → transport → codec) against the
//! in-memory serial port:
//! - Timed-out polls are skipped without stopping the run
//! - A lost link stops the run with a transport error
//! - Aborting a run between ticks leaves a readable store

use spce_daq::acquisition::{AcquisitionLoop, AcquisitionSettings, AcquisitionState};
use spce_daq::data::series::load_series;
use spce_daq::data::storage::CsvSink;
use spce_daq::hardware::mock_serial::{self, MockDeviceHarness};
use spce_daq::hardware::{SerialSettings, SpceController, TransportSession};
use std::time::Duration;
use tempfile::tempdir;
use tracing_test::traced_test;

const PRESSURE_REQUEST: &[u8] = b"~ 05 0B 00\r";

fn controller() -> (SpceController, MockDeviceHarness) {
    let (port, device) = mock_serial::new();
    let settings = SerialSettings::new("mock")
        .with_read_timeout(Duration::from_millis(100))
        .with_drain_timeout(Duration::from_millis(5));
    let session = TransportSession::from_port(Box::new(port), settings);
    (SpceController::new(session, 0x05), device)
}

fn fast_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        poll_interval: Duration::from_millis(10),
        max_transport_failures: 3,
        retry_backoff: Duration::from_millis(5),
    }
}

fn pressure_reply(n: usize) -> Vec<u8> {
    format!("05 OK 00 {}.00E-08 TORR 3A\r", n).into_bytes()
}

#[tokio::test]
#[traced_test]
async fn test_every_third_poll_times_out() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::new(dir.path().join("pressure.csv"));
    let (spce, mut device) = controller();

    let mut acquisition = AcquisitionLoop::new(spce, sink.clone(), fast_settings());
    let stop = acquisition.stop_handle();

    let device_task = tokio::spawn(async move {
        for n in 1..=4 {
            device.expect_request(PRESSURE_REQUEST).await;
            if n % 3 != 0 {
                device.reply(&pressure_reply(n));
            }
        }
        stop.stop();
        device
    });

    let stats = tokio::time::timeout(Duration::from_secs(10), acquisition.run())
        .await
        .expect("acquisition did not stop")
        .expect("acquisition failed");
    let _device = device_task.await.unwrap();

    assert_eq!(acquisition.state(), AcquisitionState::Stopped);
    assert_eq!(stats.ticks, 4);
    assert_eq!(stats.records, 3);
    assert_eq!(stats.decode_failures, 1);

    let pressures: Vec<String> = sink
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.pressure)
        .collect();
    assert_eq!(pressures, vec!["1.00E-08", "2.00E-08", "4.00E-08"]);

    assert!(logs_contain("sample stored"));
    assert!(logs_contain("poll failed, skipping tick"));
}

#[tokio::test]
#[traced_test]
async fn test_lost_link_stops_acquisition() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::new(dir.path().join("pressure.csv"));
    let (spce, mut device) = controller();

    let device_task = tokio::spawn(async move {
        device.expect_request(PRESSURE_REQUEST).await;
        device.reply(&pressure_reply(1));
        // Unplugged after the first reading
        drop(device);
    });

    let mut acquisition = AcquisitionLoop::new(spce, sink.clone(), fast_settings());
    let err = tokio::time::timeout(Duration::from_secs(10), acquisition.run())
        .await
        .expect("acquisition did not stop")
        .unwrap_err();
    device_task.await.unwrap();

    assert!(err.is_transport(), "unexpected error: {err}");
    assert_eq!(acquisition.state(), AcquisitionState::Stopped);
    assert_eq!(acquisition.stats().records, 1);
    assert_eq!(acquisition.stats().transport_failures, 3);
    assert_eq!(sink.read_all().unwrap().len(), 1);

    assert!(logs_contain("transport lost, stopping acquisition"));
}

#[tokio::test]
async fn test_aborted_run_leaves_valid_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pressure.csv");
    let (spce, mut device) = controller();

    let mut acquisition = AcquisitionLoop::new(spce, CsvSink::new(&path), fast_settings());
    let run = tokio::spawn(async move { acquisition.run().await });

    for n in 1..=5 {
        device.expect_request(PRESSURE_REQUEST).await;
        device.reply(&pressure_reply(n));
    }
    // Wait for the sixth poll so the fifth reading has been appended
    device.expect_request(PRESSURE_REQUEST).await;
    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    let series = load_series(&path).unwrap();
    assert_eq!(series.len(), 5);
    assert_eq!(series.values, vec![1e-8, 2e-8, 3e-8, 4e-8, 5e-8]);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("pressure,time\n"));
    assert!(contents.ends_with('\n'));
}

#[tokio::test]
async fn test_stop_waits_for_tick_boundary() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::new(dir.path().join("pressure.csv"));
    let (spce, mut device) = controller();

    let mut acquisition = AcquisitionLoop::new(spce, sink.clone(), fast_settings());
    let stop = acquisition.stop_handle();

    let device_task = tokio::spawn(async move {
        device.expect_request(PRESSURE_REQUEST).await;
        // Stop while the exchange is in flight, then answer it
        stop.stop();
        device.reply(&pressure_reply(7));
        device
    });

    let stats = tokio::time::timeout(Duration::from_secs(10), acquisition.run())
        .await
        .unwrap()
        .unwrap();
    let _device = device_task.await.unwrap();

    assert_eq!(stats.ticks, 1);
    assert_eq!(stats.records, 1);
    assert_eq!(sink.read_all().unwrap()[0].pressure, "7.00E-08");
}

//! End-to-end measurement cycles against the simulated sensor.

use std::time::Duration;

use as7263::adapters::{BusOp, SimulatedAs7263};
use as7263::error_recovery::{PollPolicy, RetryPolicy};
use as7263::{As7263, DeviceOptions, SensorError};

const LED: u8 = 0x07;
const CONTROL: u8 = 0x04;

fn options() -> DeviceOptions {
    DeviceOptions {
        poll: PollPolicy::every(Duration::ZERO),
        readiness: RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::ZERO,
        },
        ..DeviceOptions::default()
    }
}

async fn open(sim: &SimulatedAs7263) -> As7263<SimulatedAs7263> {
    As7263::open(sim.clone(), options())
        .await
        .expect("Failed to open simulated sensor")
}

#[tokio::test]
async fn test_full_cycle_returns_loaded_spectrum() {
    let sim = SimulatedAs7263::new().with_busy_polls(2).with_conversion_polls(5);
    sim.load_spectrum([10, 20, 30, 40, 50, 65535], [0.0, -1.5, 2.25, 1e6, 7.0, 0.125], 41);
    let mut sensor = open(&sim).await;

    let spectrum = sensor.read_all().await.unwrap();

    let wavelengths: Vec<u16> = spectrum.counts.iter().map(|c| c.wavelength_nm).collect();
    assert_eq!(wavelengths, vec![610, 680, 730, 760, 810, 860]);
    assert_eq!(spectrum.raw_counts(), [10, 20, 30, 40, 50, 65535]);
    assert_eq!(spectrum.calibrated_values(), [0.0, -1.5, 2.25, 1e6, 7.0, 0.125]);
    assert_eq!(spectrum.temperature_c, 41);
    assert_eq!(
        spectrum.captured_at_ns,
        spectrum.captured_at.timestamp_nanos_opt().unwrap()
    );

    sensor.close().await.unwrap();
}

#[tokio::test]
async fn test_consecutive_acquisitions_reconfigure_each_time() {
    let sim = SimulatedAs7263::new();
    let mut sensor = open(&sim).await;

    sensor.read_all().await.unwrap();
    sensor.set_mode(0).await.unwrap();
    sim.clear_log();
    sensor.read_all().await.unwrap();

    let writes = sim.virtual_writes();
    assert_eq!(writes[0], (CONTROL, 0x3C));
    assert_eq!(writes[1], (LED, 0x00));
    assert_eq!(writes[2], (LED, 0x09));
}

#[tokio::test]
async fn test_stray_byte_from_earlier_read_does_not_corrupt_result() {
    let sim = SimulatedAs7263::new();
    let mut sensor = open(&sim).await;
    sim.inject_stray_byte(0xEE);

    let spectrum = sensor.read_all().await.unwrap();

    assert_eq!(spectrum.raw_counts(), SimulatedAs7263::DEFAULT_RAW);
}

#[tokio::test]
async fn test_any_failed_result_byte_fails_the_acquisition() {
    let result_registers = (0x08..=0x2B).chain(std::iter::once(0x06));
    for register in result_registers {
        let sim = SimulatedAs7263::new().with_busy_polls(0);
        let mut sensor = open(&sim).await;
        sim.fail_virtual_reads(register, 1);

        match sensor.read_all().await {
            Err(SensorError::Transport { slot, .. }) => assert_eq!(slot, 0x02),
            other => panic!(
                "register {:#04x}: expected transport error, got {:?}",
                register, other
            ),
        }
    }
}

#[tokio::test]
async fn test_readiness_exhaustion_reports_attempts() {
    let sim = SimulatedAs7263::new();
    let mut sensor = open(&sim).await;
    sensor.request().await.unwrap();
    sim.fail_virtual_reads(CONTROL, u32::MAX);

    let err = sensor.collect().await.unwrap_err();

    assert!(matches!(err, SensorError::RetryExhausted { attempts: 3, .. }));
    assert!(err.to_string().contains("after 3 attempts"));
}

#[tokio::test(start_paused = true)]
async fn test_split_acquisition_reports_conversion_latency() {
    let sim = SimulatedAs7263::new();
    let mut sensor = open(&sim).await;

    let latency = sensor.request().await.unwrap();
    assert_eq!(latency, Duration::from_millis(1450));
    tokio::time::sleep(latency).await;

    let spectrum = sensor.collect().await.unwrap();
    assert_eq!(spectrum.temperature_c, SimulatedAs7263::DEFAULT_TEMPERATURE);
}

#[tokio::test]
async fn test_timed_out_acquisition_abandons_handle() {
    let sim = SimulatedAs7263::new()
        .never_ready()
        .with_latency(Duration::from_micros(200));
    let mut sensor = As7263::open(
        sim.clone(),
        DeviceOptions {
            poll: PollPolicy::every(Duration::from_millis(1)),
            ..options()
        },
    )
    .await
    .unwrap();

    let budget = Duration::from_millis(100);
    match sensor.acquire_within(budget).await {
        Err(SensorError::Timeout(elapsed)) => assert_eq!(elapsed, budget),
        other => panic!("expected Timeout, got {:?}", other),
    }

    assert!(sensor.is_abandoned());
    assert!(matches!(
        sensor.read_temperature().await,
        Err(SensorError::Abandoned { .. })
    ));
    assert!(matches!(
        sensor.read_all().await,
        Err(SensorError::Abandoned { .. })
    ));

    sensor.close().await.unwrap();
    assert!(!sim.illumination_on());
    assert!(sim.is_closed());
}

#[tokio::test]
async fn test_acquisition_within_budget_succeeds() {
    let sim = SimulatedAs7263::new();
    let mut sensor = open(&sim).await;

    let spectrum = sensor.acquire_within(Duration::from_secs(5)).await.unwrap();

    assert_eq!(spectrum.raw_counts(), SimulatedAs7263::DEFAULT_RAW);
    assert!(!sensor.is_abandoned());
}

#[tokio::test]
async fn test_close_after_acquisition_darkens_then_releases() {
    let sim = SimulatedAs7263::new();
    let mut sensor = open(&sim).await;
    sensor.read_all().await.unwrap();
    assert!(sim.illumination_on());
    sim.clear_log();

    sensor.close().await.unwrap();

    assert_eq!(sim.virtual_writes(), vec![(LED, 0x00)]);
    let log = sim.bus_log();
    assert_eq!(log.last(), Some(&BusOp::Close));
    assert_eq!(log.iter().filter(|op| **op == BusOp::Close).count(), 1);
}

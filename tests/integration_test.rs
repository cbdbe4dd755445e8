use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};
use tokio_modbus::prelude::*;
use tokio_test::{assert_err, assert_ok};

use virtual_energy_meter::{
    derive, encode, DeviceIdentity, MeterState, NoiseSpans, ProtocolServer, RegisterStore,
    ServerHandle, ServerState, UpdateLoop, REGISTER_COUNT,
};

const NOMINAL_REGISTERS: [u16; REGISTER_COUNT] =
    [2300, 2300, 2300, 1000, 800, 1200, 220, 176, 264, 662, 960, 5000];

fn nominal_store() -> RegisterStore {
    let state = MeterState::new();
    RegisterStore::new(encode(&state, &derive(&state)))
}

/// Start the meter's Modbus TCP server on an ephemeral port
async fn start_meter(store: RegisterStore) -> ServerHandle {
    let server = ProtocolServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        store,
        DeviceIdentity::default(),
    )
    .await
    .expect("Should bind an ephemeral port");
    server.spawn().expect("Should spawn the server")
}

async fn read_registers(
    meter_addr: SocketAddr,
    start: u16,
    count: u16,
) -> Result<Result<Vec<u16>, ExceptionCode>, Box<dyn std::error::Error>> {
    let mut ctx = tcp::connect(meter_addr).await?;
    let result = ctx.read_holding_registers(start, count).await?;
    Ok(result)
}

/// Sends one raw ADU and returns the raw reply
async fn raw_exchange(meter_addr: SocketAddr, adu: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(meter_addr).await.unwrap();
    stream.write_all(adu).await.unwrap();
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.unwrap();
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut pdu = vec![0u8; length - 1];
    stream.read_exact(&mut pdu).await.unwrap();
    let mut reply = header.to_vec();
    reply.extend_from_slice(&pdu);
    reply
}

#[tokio::test]
async fn test_initial_registers_encode_nominal_defaults() {
    let handle = start_meter(nominal_store()).await;

    let result = timeout(
        Duration::from_secs(5),
        read_registers(handle.local_addr(), 0, 12),
    )
    .await
    .expect("Timeout waiting for Modbus response")
    .expect("Failed to read from meter");

    assert_eq!(result.unwrap(), NOMINAL_REGISTERS.to_vec());
    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_silent_tick_end_to_end() {
    let store = nominal_store();
    let mut updater = UpdateLoop::new(MeterState::new(), store.clone(), Duration::from_secs(1))
        .with_noise(NoiseSpans::silent());
    assert_eq!(updater.step().unwrap(), 1);

    let handle = start_meter(store).await;
    let values = read_registers(handle.local_addr(), 0, 12)
        .await
        .unwrap()
        .unwrap();

    // p1 = 230 * 10 * 0.96 / 1000 = 2.208 kW, truncated to 220
    let p = [2.208_f64, 1.7664, 2.6496];
    let expected_powers: Vec<u16> = p
        .iter()
        .map(|kw| (kw * 100.0) as u16)
        .chain(std::iter::once(((p[0] + p[1] + p[2]) * 100.0) as u16))
        .collect();
    assert_eq!(values[6..10], expected_powers[..]);
    assert_eq!(values, NOMINAL_REGISTERS.to_vec());

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_partial_reads() {
    let handle = start_meter(nominal_store()).await;
    let mut ctx = tcp::connect(handle.local_addr()).await.unwrap();

    let powers = ctx.read_holding_registers(6, 4).await.unwrap().unwrap();
    assert_eq!(powers, vec![220, 176, 264, 662]);

    let frequency = ctx.read_holding_registers(11, 1).await.unwrap().unwrap();
    assert_eq!(frequency, vec![5000]);

    let currents = ctx.read_holding_registers(3, 3).await.unwrap().unwrap();
    assert_eq!(currents, vec![1000, 800, 1200]);

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_out_of_range_reads_are_exceptions() {
    let handle = start_meter(nominal_store()).await;
    let mut ctx = tcp::connect(handle.local_addr()).await.unwrap();

    for (start, count) in [(0, 13), (12, 1), (11, 2), (40000, 1)] {
        let result = ctx.read_holding_registers(start, count).await.unwrap();
        assert!(
            matches!(result, Err(ExceptionCode::IllegalDataAddress)),
            "read {start}/{count} returned {result:?}"
        );
    }

    // The connection survives exceptions
    let values = ctx.read_holding_registers(0, 12).await.unwrap().unwrap();
    assert_eq!(values, NOMINAL_REGISTERS.to_vec());

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_unsupported_functions_are_illegal_function() {
    let handle = start_meter(nominal_store()).await;
    let mut ctx = tcp::connect(handle.local_addr()).await.unwrap();

    let coils = ctx.read_coils(0, 1).await.unwrap();
    assert!(matches!(coils, Err(ExceptionCode::IllegalFunction)));

    let inputs = ctx.read_discrete_inputs(0, 1).await.unwrap();
    assert!(matches!(inputs, Err(ExceptionCode::IllegalFunction)));

    let input_registers = ctx.read_input_registers(0, 1).await.unwrap();
    assert!(matches!(input_registers, Err(ExceptionCode::IllegalFunction)));

    let write = ctx.write_single_register(0, 1234).await.unwrap();
    assert!(matches!(write, Err(ExceptionCode::IllegalFunction)));

    let write_many = ctx.write_multiple_registers(0, &[1, 2, 3]).await.unwrap();
    assert!(matches!(write_many, Err(ExceptionCode::IllegalFunction)));

    // Nothing was written
    let values = ctx.read_holding_registers(0, 12).await.unwrap().unwrap();
    assert_eq!(values, NOMINAL_REGISTERS.to_vec());

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_device_identification() {
    let handle = start_meter(nominal_store()).await;

    // Basic stream: vendor name, product code, revision
    let reply = raw_exchange(
        handle.local_addr(),
        &[0x00, 0x2A, 0, 0, 0, 5, 0x01, 0x2B, 0x0E, 0x01, 0x00],
    )
    .await;
    assert_eq!(reply[..2], [0x00, 0x2A]);
    assert_eq!(reply[7..14], [0x2B, 0x0E, 0x01, 0x82, 0x00, 0x00, 3]);
    assert_eq!(reply[14], 0x00);
    let vendor_len = reply[15] as usize;
    assert_eq!(&reply[16..16 + vendor_len], b"VirtualEnergyMeter");

    // Individual access to the model name
    let reply = raw_exchange(
        handle.local_addr(),
        &[0x00, 0x2B, 0, 0, 0, 5, 0x01, 0x2B, 0x0E, 0x04, 0x05],
    )
    .await;
    let mut expected = vec![0x2B, 0x0E, 0x04, 0x82, 0x00, 0x00, 1, 0x05, 13];
    expected.extend_from_slice(b"VEM-Simple-3P");
    assert_eq!(reply[7..], expected[..]);

    // Unknown object
    let reply = raw_exchange(
        handle.local_addr(),
        &[0x00, 0x2C, 0, 0, 0, 5, 0x01, 0x2B, 0x0E, 0x04, 0x42],
    )
    .await;
    assert_eq!(reply[7..], [0xAB, 0x02]);

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_malformed_requests() {
    let handle = start_meter(nominal_store()).await;

    // Read request with a truncated body
    let reply = raw_exchange(
        handle.local_addr(),
        &[0x00, 0x01, 0, 0, 0, 4, 0x01, 0x03, 0x00, 0x00],
    )
    .await;
    assert_eq!(reply, vec![0x00, 0x01, 0, 0, 0, 3, 0x01, 0x83, 0x03]);

    // Non-Modbus protocol id closes the connection
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream
        .write_all(&[0x00, 0x01, 0x12, 0x34, 0, 6, 0x01, 0x03, 0, 0, 0, 1])
        .await
        .unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("Server should close the connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    assert_ok!(handle.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_see_whole_generations() {
    let store = RegisterStore::new([0; REGISTER_COUNT]);
    let handle = start_meter(store.clone()).await;
    let meter_addr = handle.local_addr();

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = store.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut generation = 0u16;
            while !stop.load(Ordering::Relaxed) {
                generation = generation.wrapping_add(1);
                store.write_all([generation; REGISTER_COUNT]).unwrap();
                std::thread::sleep(Duration::from_micros(20));
            }
            generation
        })
    };

    let clients: Vec<_> = (0..8)
        .map(|_| {
            tokio::spawn(async move {
                let mut ctx = tcp::connect(meter_addr).await.unwrap();
                for _ in 0..200 {
                    let values = ctx.read_holding_registers(0, 12).await.unwrap().unwrap();
                    assert!(
                        values.iter().all(|v| *v == values[0]),
                        "mixed generations in {values:?}"
                    );
                }
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(writer.join().unwrap() > 0);

    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_update_loop_keeps_serving_live_values() {
    let store = nominal_store();
    let handle = start_meter(store.clone()).await;
    let updater = UpdateLoop::new(MeterState::new(), store.clone(), Duration::from_millis(20))
        .with_seed(11)
        .spawn();

    let mut ctx = tcp::connect(handle.local_addr()).await.unwrap();
    for _ in 0..10 {
        let values = ctx.read_holding_registers(0, 12).await.unwrap().unwrap();
        assert!((700..=1000).contains(&values[10]), "power factor {}", values[10]);
        sleep(Duration::from_millis(25)).await;
    }
    assert!(store.snapshot(0, 1).unwrap().generation > 0);

    updater.abort();
    assert_ok!(handle.shutdown().await);
}

#[tokio::test]
async fn test_shutdown_stops_listening() {
    let handle = start_meter(nominal_store()).await;
    let meter_addr = handle.local_addr();
    assert_eq!(handle.state(), ServerState::Listening);

    let state = handle.subscribe();
    assert_ok!(handle.shutdown().await);
    assert_eq!(*state.borrow(), ServerState::Stopped);

    assert_err!(TcpStream::connect(meter_addr).await);
}

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use virtual_energy_meter::{
    config::Config, derive, encode, register_encoder::BASE_ADDRESS, DeviceIdentity, MeterState,
    ProtocolServer, RegisterStore, ServerState, UpdateLoop,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let socket_addr = config.listen_addr().await?;
    info!("Starting Virtual Energy Meter on {socket_addr}");
    log_register_map();

    let state = MeterState::new();
    let store = RegisterStore::new(encode(&state, &derive(&state)));

    // Bind before the simulation starts so a taken port fails fast
    let server = ProtocolServer::bind(socket_addr, store.clone(), DeviceIdentity::default()).await?;
    let handle = server.spawn()?;

    let updater = UpdateLoop::new(state, store, config.update_period()).spawn();

    let mut server_state = handle.subscribe();
    tokio::select! {
        _ = server_state.wait_for(|state| *state == ServerState::Stopped) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
        }
    }
    updater.abort();
    handle.shutdown().await?;
    Ok(())
}

fn log_register_map() {
    info!("Holding register map (1-based addresses):");
    info!("  {}-{}: V_L1, V_L2, V_L3 (V x10)", BASE_ADDRESS, BASE_ADDRESS + 2);
    info!("  {}-{}: I_L1, I_L2, I_L3 (A x100)", BASE_ADDRESS + 3, BASE_ADDRESS + 5);
    info!("  {}-{}: P_L1, P_L2, P_L3 (kW x100)", BASE_ADDRESS + 6, BASE_ADDRESS + 8);
    info!("  {}      : P_total (kW x100)", BASE_ADDRESS + 9);
    info!("  {}      : PF (x1000)", BASE_ADDRESS + 10);
    info!("  {}      : Frequency (Hz x100)", BASE_ADDRESS + 11);
}

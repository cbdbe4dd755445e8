use crate::error::MeterError;
use clap::Parser;
use std::{io, net::SocketAddr, time::Duration};
use tokio::net::lookup_host;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "virtual_energy_meter",
    version,
    about = "Simulated 3-phase energy meter served over Modbus TCP"
)]
pub struct Config {
    /// Host name or IP address to listen on
    #[arg(long, env = "VEM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Modbus TCP port
    #[arg(long, env = "VEM_PORT", default_value_t = 5020)]
    pub port: u16,

    /// Milliseconds between register updates
    #[arg(
        long,
        env = "VEM_UPDATE_PERIOD_MS",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub update_period_ms: u64,
}

impl Config {
    /// Resolves `host` and `port`, taking the first address returned
    pub async fn listen_addr(&self) -> Result<SocketAddr, MeterError> {
        let resolve_error = |source| MeterError::Resolve {
            host: self.host.clone(),
            source,
        };
        lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| resolve_error(io::Error::from(io::ErrorKind::NotFound)))
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }
}

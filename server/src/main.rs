use clap::Parser;
use env_logger::Env;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; flags given here take precedence over it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulation ticks per second
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Maximum number of concurrent connections
    #[arg(short, long)]
    max_players: Option<usize>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        let host = self.host.unwrap_or(config.bind_addr.ip());
        let port = self.port.unwrap_or(config.bind_addr.port());
        config.bind_addr = SocketAddr::new(host, port);
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }

        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    info!("Starting server with {:?}", config);

    let stats = Server::bind(config)?.run().await?;
    info!("Final stats: {}", serde_json::to_string(&stats)?);

    Ok(())
}

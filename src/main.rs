use anyhow::Result;
use clap::Parser;
use price_relay::config::{Args, Config};
use price_relay::service::PriceService;
use price_relay::web;
use std::io::Write;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let api_key = config.resolve_api_key();
    if api_key.is_none() {
        log::warn!("No CoinGecko API key configured; using unauthenticated rate limits.");
    }

    let service = PriceService::new(&config, api_key);
    web::serve(service, config.listen_port()).await
}

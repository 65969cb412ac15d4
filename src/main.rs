//! ShipDeck daemon binary. All the wiring lives in `shipdeck::run`.

use env_logger::Env;

#[tokio::main]
async fn main() -> Result<(), String> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    shipdeck::run().await
}

use anyhow::Context;
use clap::Parser;
use redikv::aof::AofState;
use redikv::cli::Cli;
use redikv::db::Store;
use redikv::server::{self, Server};
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let aof = if cli.no_aof {
        AofState::disabled()
    } else {
        AofState::open(cli.aof_path.clone(), cli.sync_policy())
    };

    let mut store = Store::new(cli.maxmemory, aof);

    replay_aof(&mut store).context("fatal error replaying AOF")?;

    let listener = server::bind(cli.port).context("failed to bind tcp listener")?;
    info!(port = cli.port, "listening");

    let mut srv = Server::new(listener, store).context("failed to initialize event loop")?;
    srv.run().context("event loop terminated with a fatal error")?;

    Ok(())
}

/// Replay the AOF file (if any) with writes suppressed, so replayed
/// commands aren't written back to the file they came from.
fn replay_aof(store: &mut Store) -> anyhow::Result<()> {
    if !store.aof.enabled {
        return Ok(());
    }
    let path = store.aof.path.clone();
    let now = server::now_ms();
    redikv::aof::replay(&path, |value| redikv::cmd::execute(value, store, now, true).map(|_| ()))
        .map_err(|err| anyhow::anyhow!("{err}"))
}

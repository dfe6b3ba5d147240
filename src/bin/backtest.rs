use std::env;

use anyhow::{bail, Context, Result};
use log::info;

use rotala_sim::portfolio::TransactionLog;
use rotala_sim::simcontext::{SimConfig, SimContextBuilder};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: {} <config.json> [closed_positions.csv]", args[0]);
    }

    let config = SimConfig::load(&args[1])?;
    let mut ctx = SimContextBuilder::from_config(&config)
        .context("could not set up simulation")?
        .build()
        .context("could not set up simulation")?;
    ctx.run().context("simulation failed")?;

    let snapshot = ctx.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if let Some(path) = args.get(2) {
        let closed = ctx.closed_positions();
        let mut log = TransactionLog::create(path)?;
        log.append_all(&closed)?;
        log.flush()?;
        info!("Wrote {} closed positions to {}", log.written(), path);
    }
    Ok(())
}

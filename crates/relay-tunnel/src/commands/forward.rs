//! `relay-tunnel forward`: expose a local TCP service through a relay session.

use super::{interrupted, SessionArgs};
use anyhow::Result;
use relay_tunnel::Config;

pub async fn run(args: SessionArgs, port: u16, cfg: &Config) -> Result<()> {
    let options = args.into_options(cfg)?;
    let report = relay_tunnel::forward(&options, port, interrupted()).await?;
    println!(
        "Tunnel closed after {:.1}s ({} bytes).",
        report.duration.as_secs_f64(),
        report.bytes_forwarded()
    );
    Ok(())
}

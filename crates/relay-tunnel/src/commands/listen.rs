//! `relay-tunnel listen`: accept one local client and carry it through a
//! relay session.

use super::{interrupted, SessionArgs};
use anyhow::Result;
use relay_tunnel::Config;

pub async fn run(args: SessionArgs, port: u16, cfg: &Config) -> Result<()> {
    let options = args.into_options(cfg)?;
    let listener = relay_tunnel::bind_local(port, options.retry).await?;
    println!("Listening on {}", listener.local_addr()?);

    let report = relay_tunnel::listen(&options, listener, interrupted()).await?;
    println!(
        "Tunnel closed after {:.1}s ({} bytes).",
        report.duration.as_secs_f64(),
        report.bytes_forwarded()
    );
    Ok(())
}

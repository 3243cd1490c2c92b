//! `relay-tunnel token`: mint a session id and access token.

use anyhow::Result;
use relay_core::{AccessToken, SessionId};

pub async fn run() -> Result<()> {
    let session_id = SessionId::new_random();
    let token = AccessToken::generate();

    println!("session: {session_id}");
    println!("token:   {}", token.as_str());
    println!();
    println!("Share both with the other side, then run `forward` or `listen` with them.");
    Ok(())
}

//! Command line client for the COIN control socket.
//!
//! ```text
//! coinctl global get_mode
//! coinctl ipupbond create ip-address=10.0.0.5
//! coinctl ipupbond set-active-slave bond-interface=veth0 interface=eth1
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};

const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Send one request to coind and print the reply
#[derive(Parser, Debug)]
#[command(name = "coinctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Control socket path
    #[arg(short = 's', long = "sock", default_value = "/etc/coin.sock")]
    sock: PathBuf,

    /// Request subtype (global, loif, ovs, ipupbond)
    subtype: String,

    /// Command within the subtype
    command: String,

    /// Extra request fields as key=value; values parse as JSON when they can
    params: Vec<String>,
}

fn build_request(args: &Args) -> anyhow::Result<Value> {
    let mut request = Map::new();
    request.insert("type".to_string(), Value::from("coin"));
    request.insert("subtype".to_string(), Value::from(args.subtype.as_str()));
    request.insert("command".to_string(), Value::from(args.command.as_str()));
    for param in &args.params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("Parameter {} is not key=value", param);
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        request.insert(key.to_string(), value);
    }
    Ok(Value::Object(request))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let request = build_request(&args)?;

    let stream = UnixStream::connect(&args.sock)
        .await
        .with_context(|| format!("connecting to {}", args.sock.display()))?;
    let mut lines = Framed::new(stream, LinesCodec::new());
    lines.send(request.to_string()).await?;

    match tokio::time::timeout(REPLY_TIMEOUT, lines.next()).await {
        Ok(Some(line)) => {
            let reply: Value = serde_json::from_str(&line?)?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Ok(None) => bail!("coind closed the connection without replying"),
        Err(_) => println!("No reply"),
    }
    Ok(())
}

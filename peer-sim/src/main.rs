//! peer-sim: simulated remote serial device over TCP
//!
//! Echoes every chunk it receives, unless a `--reply REQUEST=RESPONSE` rule
//! matches the chunk exactly.

use anyhow::{anyhow, Result};
use bytes::Bytes;
use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "peer-sim")]
#[command(about = "Simulated remote serial device", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: SocketAddr,

    /// Canned reply as REQUEST=RESPONSE (repeatable)
    #[arg(long = "reply", value_parser = parse_rule)]
    replies: Vec<(Bytes, Bytes)>,

    /// Only answer matching requests instead of echoing the rest
    #[arg(long)]
    no_echo: bool,
}

fn parse_rule(value: &str) -> Result<(Bytes, Bytes)> {
    let (request, response) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected REQUEST=RESPONSE, got {:?}", value))?;
    if request.is_empty() {
        return Err(anyhow!("empty request in rule {:?}", value));
    }
    Ok((
        Bytes::copy_from_slice(request.as_bytes()),
        Bytes::copy_from_slice(response.as_bytes()),
    ))
}

/// How the simulated device answers a chunk
#[derive(Debug, Default)]
struct Responder {
    rules: HashMap<Bytes, Bytes>,
    echo: bool,
}

impl Responder {
    fn answer(&self, chunk: &[u8]) -> Option<Bytes> {
        match self.rules.get(chunk) {
            Some(reply) => Some(reply.clone()),
            None if self.echo => Some(Bytes::copy_from_slice(chunk)),
            None => None,
        }
    }
}

async fn serve_peer<S>(mut stream: S, responder: &Responder) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        debug!("[PEER] Received {} bytes", n);
        if let Some(reply) = responder.answer(&buf[..n]) {
            stream.write_all(&reply).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let responder = Arc::new(Responder {
        rules: args.replies.into_iter().collect(),
        echo: !args.no_echo,
    });

    let listener = TcpListener::bind(args.listen).await?;
    info!("[PEER] Listening on {} ({} reply rules)", args.listen, responder.rules.len());

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("[PEER] Link opened from {}", addr);

        let responder = responder.clone();
        tokio::spawn(async move {
            match serve_peer(socket, &responder).await {
                Ok(()) => info!("[PEER] Link closed by {}", addr),
                Err(e) => warn!("[PEER] Link with {} failed: {}", addr, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule() {
        let (request, response) = parse_rule("ping=pong").unwrap();
        assert_eq!(&request[..], b"ping");
        assert_eq!(&response[..], b"pong");
        assert!(parse_rule("ping").is_err());
        assert!(parse_rule("=pong").is_err());
    }

    #[tokio::test]
    async fn test_rules_then_echo() {
        let responder = Responder {
            rules: [parse_rule("ping=pong").unwrap()].into_iter().collect(),
            echo: true,
        };
        let (mut client, device) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move { serve_peer(device, &responder).await });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        client.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_silent_without_echo() {
        let responder = Responder {
            rules: HashMap::new(),
            echo: false,
        };
        assert!(responder.answer(b"anything").is_none());
    }
}

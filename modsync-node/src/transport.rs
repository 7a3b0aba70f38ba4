//! TCP transport: host accept loop and joiner connect, length-prefixed frames, handshake
//! routed through the shared [`Negotiator`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use modsync_core::wire::{self, LEN_SIZE};
use modsync_core::{
    encode_frame, DiscrepancyReport, DisconnectStatus, FailedNegotiation, Message,
    NegotiationAction, Negotiator, PeerId, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const LINGER: Duration = Duration::from_secs(1);

/// How a join attempt ended.
#[derive(Debug)]
pub enum JoinOutcome {
    Admitted(DiscrepancyReport),
    /// The host refused us, or we aborted locally. `failure` carries the report, if any.
    Refused {
        status: DisconnectStatus,
        failure: Option<FailedNegotiation>,
    },
}

/// Where a handshake stands after acting on a batch of negotiation actions.
enum Settled {
    Resolved(DiscrepancyReport),
    Closed(DisconnectStatus),
}

/// Accept joiners until the listener fails. Each connection runs in its own task.
pub async fn run_host(
    listener: TcpListener,
    negotiator: Arc<Negotiator>,
    handshake_timeout: Duration,
) -> std::io::Result<()> {
    negotiator.begin_accepting();
    tracing::info!(addr = %listener.local_addr()?, "accepting joiners");
    loop {
        let (stream, addr) = listener.accept().await?;
        let negotiator = negotiator.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_joiner(stream, negotiator, handshake_timeout).await {
                tracing::warn!(%addr, "connection error: {e}");
            }
        });
    }
}

async fn serve_joiner(
    stream: TcpStream,
    negotiator: Arc<Negotiator>,
    handshake_timeout: Duration,
) -> std::io::Result<()> {
    let peer = PeerId::from(stream.peer_addr()?);
    let (mut reader, mut writer) = stream.into_split();

    let negotiated = tokio::time::timeout(
        handshake_timeout,
        host_handshake(peer, &mut reader, &mut writer, &negotiator),
    )
    .await;
    match negotiated {
        Ok(Ok(Some(Settled::Resolved(report)))) => {
            tracing::info!(%peer, version_string_mismatch = report.version_string_mismatch, "joiner admitted");
            // Session proper: nothing more to negotiate, hold the connection until the joiner leaves.
            while let Ok(Some(msg)) = read_message(&mut reader).await {
                tracing::debug!(%peer, ?msg, "message after handshake ignored");
            }
        }
        Ok(Ok(Some(Settled::Closed(status)))) => {
            tracing::info!(%peer, %status, "joiner turned away");
            let _ = writer.shutdown().await;
            // Let the joiner read the disconnect before the socket goes away.
            let _ = tokio::time::timeout(LINGER, async {
                while let Ok(Some(_)) = read_message(&mut reader).await {}
            })
            .await;
        }
        Ok(Ok(None)) => tracing::debug!(%peer, "joiner left during handshake"),
        Ok(Err(e)) => tracing::warn!(%peer, "handshake failed: {e}"),
        Err(_) => tracing::warn!(%peer, "handshake timed out"),
    }
    negotiator.on_disconnected(peer);
    Ok(())
}

/// Host side: arm and send our snapshot, then `Hello`, then route until the joiner is
/// admitted or refused. `None` when the joiner hangs up first.
async fn host_handshake<R, W>(
    peer: PeerId,
    reader: &mut R,
    writer: &mut W,
    negotiator: &Negotiator,
) -> std::io::Result<Option<Settled>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let actions = negotiator.on_connection_started(peer);
    if let Some(settled) = perform(writer, actions).await? {
        return Ok(Some(settled));
    }
    let hello = encode_frame(&Message::Hello {
        protocol_version: PROTOCOL_VERSION,
    })
    .map_err(invalid_data)?;
    writer.write_all(&hello).await?;
    writer.flush().await?;

    while let Some(msg) = read_message(reader).await? {
        let actions = negotiator.on_message(peer, msg);
        if let Some(settled) = perform(writer, actions).await? {
            return Ok(Some(settled));
        }
    }
    Ok(None)
}

/// Connect to a host and run the joiner side of the handshake.
pub async fn join(
    addr: SocketAddr,
    negotiator: Arc<Negotiator>,
    handshake_timeout: Duration,
) -> std::io::Result<JoinOutcome> {
    let stream = TcpStream::connect(addr).await?;
    let peer = PeerId::from(stream.peer_addr()?);
    let (mut reader, mut writer) = stream.into_split();
    tracing::info!(%peer, "connected, negotiating");

    let negotiated = tokio::time::timeout(
        handshake_timeout,
        joiner_handshake(peer, &mut reader, &mut writer, &negotiator),
    )
    .await;
    let settled = match negotiated {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(%peer, "handshake timed out");
            let _ = negotiator.on_connection_failed(peer, DisconnectStatus::ConnectFailed);
            Settled::Closed(DisconnectStatus::ConnectFailed)
        }
    };
    let _ = writer.shutdown().await;
    negotiator.on_disconnected(peer);

    Ok(match settled {
        Settled::Resolved(report) => JoinOutcome::Admitted(report),
        Settled::Closed(status) => JoinOutcome::Refused {
            status,
            failure: negotiator.take_last_failure(),
        },
    })
}

async fn joiner_handshake<R, W>(
    peer: PeerId,
    reader: &mut R,
    writer: &mut W,
    negotiator: &Negotiator,
) -> std::io::Result<Settled>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let actions = negotiator.on_connection_started(peer);
    if let Some(settled) = perform(writer, actions).await? {
        return Ok(settled);
    }
    while let Some(msg) = read_message(reader).await? {
        let actions = negotiator.on_message(peer, msg);
        if let Some(settled) = perform(writer, actions).await? {
            return Ok(settled);
        }
    }
    // Host hung up without saying why.
    let _ = negotiator.on_connection_failed(peer, DisconnectStatus::ConnectFailed);
    Ok(Settled::Closed(DisconnectStatus::ConnectFailed))
}

/// Write queued frames, then report whether the handshake settled.
async fn perform<W>(writer: &mut W, actions: Vec<NegotiationAction>) -> std::io::Result<Option<Settled>>
where
    W: AsyncWrite + Unpin,
{
    let mut settled = None;
    for action in actions {
        match action {
            NegotiationAction::Send(_, frame) => writer.write_all(&frame).await?,
            NegotiationAction::Disconnect { status, .. } | NegotiationAction::Failed { status, .. } => {
                settled = Some(Settled::Closed(status));
            }
            NegotiationAction::Resolved { report, .. } => {
                if settled.is_none() {
                    settled = Some(Settled::Resolved(report));
                }
            }
        }
    }
    writer.flush().await?;
    Ok(settled)
}

/// Next framed message, or `None` on a clean end of stream.
async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = wire::frame_len(header).map_err(invalid_data)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    wire::decode_body(&body).map(Some).map_err(invalid_data)
}

fn invalid_data(e: impl std::error::Error + Send + Sync + 'static) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modsync_core::{
        CompatibilityLevel, ModuleDescriptor, ModuleRegistry, NegotiatorConfig, Strictness,
        Version,
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn negotiator(config: NegotiatorConfig, mods: &[(&str, Version)]) -> Arc<Negotiator> {
        let mut reg = ModuleRegistry::new(Version::new(0, 217, 22));
        for (name, v) in mods {
            reg.register(
                ModuleDescriptor::new(*name, *v, Strictness::Minor),
                CompatibilityLevel::EveryoneMustHave,
            )
            .unwrap();
        }
        Arc::new(Negotiator::new(config, Arc::new(reg)))
    }

    async fn spawn_host(mods: &[(&str, Version)]) -> (SocketAddr, Arc<Negotiator>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let host = negotiator(NegotiatorConfig::host(), mods);
        tokio::spawn(run_host(listener, host.clone(), TIMEOUT));
        (addr, host)
    }

    #[tokio::test]
    async fn loopback_join_is_admitted() {
        let mods = [("Jotunn", Version::new(2, 20, 1))];
        let (addr, _host) = spawn_host(&mods).await;
        let joiner = negotiator(NegotiatorConfig::joiner("viking"), &[("Jotunn", Version::new(2, 20, 7))]);

        match join(addr, joiner.clone(), TIMEOUT).await.unwrap() {
            JoinOutcome::Admitted(report) => assert!(report.is_compatible()),
            other => panic!("expected admission, got {other:?}"),
        }
        assert_eq!(
            joiner.last_received_remote_snapshot().unwrap().modules()[0].name,
            "Jotunn"
        );
    }

    #[tokio::test]
    async fn loopback_join_is_refused_with_report() {
        let (addr, _host) = spawn_host(&[("Jotunn", Version::new(2, 21, 0))]).await;
        let joiner = negotiator(NegotiatorConfig::joiner("viking"), &[("Jotunn", Version::new(2, 20, 0))]);

        match join(addr, joiner, TIMEOUT).await.unwrap() {
            JoinOutcome::Refused { status, failure } => {
                assert_eq!(status, DisconnectStatus::IncompatibleVersion);
                let lines: Vec<String> = failure.unwrap().lines().into_iter().map(|l| l.text).collect();
                assert!(lines.contains(&"  Jotunn: host requires 2.21.x, you have 2.20.0".to_string()));
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn host_hanging_up_is_a_connect_failure() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Behave like a host that reads the snapshot and closes without a word.
            assert!(matches!(
                read_message(&mut stream).await.unwrap(),
                Some(Message::ModSync { .. })
            ));
        });
        let joiner = negotiator(NegotiatorConfig::joiner("viking"), &[]);
        match join(addr, joiner, TIMEOUT).await.unwrap() {
            JoinOutcome::Refused { status, .. } => assert_eq!(status, DisconnectStatus::ConnectFailed),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

//! Entry point: parse CLI args, load configuration, start the SIP
//! listener, and dispatch inbound calls onto `CallSession`s until a
//! shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_bridge::args::Args;
use voice_bridge::bridge::Bridge;
use voice_bridge::config::Config;
use voice_bridge::engine::DefaultEngine;
use voice_bridge::rtp::RtpSocket;
use voice_bridge::session::{negotiate_codec, CallSession, CallSessionEvents};
use voice_bridge::sip::listener::{IncomingInvite, ListenerEvents};
use voice_bridge::sip::{BridgeListener, SipMessage};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = args.log_level_override() {
        builder.filter_level(level.parse().unwrap_or(log::LevelFilter::Info));
    }
    builder.init();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), String> {
    let bridge = Bridge::new();
    let mut listener = BridgeListener::bind(config.sip.clone()).await?;
    info!("SIP listener bound on {}", listener.local_addr()?);

    if config.sip.enable_stun {
        match listener.discover_public_address().await {
            Ok(addr) => info!("STUN discovered public address {addr}"),
            Err(e) => warn!("STUN discovery failed: {e}"),
        }
    }

    let shutdown = CancellationToken::new();
    let listener_events = Arc::new(ListenerEvents {
        on_log: Box::new(|msg| info!("{msg}")),
    });

    if !config.sip.server.is_empty() {
        let register_cancel = shutdown.clone();
        let register_events = listener_events.clone();
        let register_config = config.sip.clone();
        tokio::spawn(async move {
            let listener = match BridgeListener::bind(register_config).await {
                Ok(l) => l,
                Err(e) => {
                    error!("failed to bind secondary registration socket: {e}");
                    return;
                }
            };
            listener.run_register_loop(register_events, register_cancel).await;
        });
    }

    let (invite_tx, mut invite_rx) = mpsc::unbounded_channel::<IncomingInvite>();
    let receive_listener = Arc::new(listener);
    let run_listener = receive_listener.clone();
    let run_events = listener_events.clone();
    let run_cancel = shutdown.clone();
    tokio::spawn(async move {
        run_listener.run(invite_tx, run_events, run_cancel).await;
    });

    let dispatch_config = config.clone();
    let dispatch_listener = receive_listener.clone();
    let dispatch_bridge = bridge.clone();
    tokio::spawn(async move {
        while let Some(invite) = invite_rx.recv().await {
            let config = dispatch_config.clone();
            let listener = dispatch_listener.clone();
            let bridge = dispatch_bridge.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_invite(invite, config, listener, bridge).await {
                    warn!("call setup failed: {e}");
                }
            });
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received shutdown signal"),
        _ = wait_for_sigterm() => info!("received SIGTERM"),
    }
    shutdown.cancel();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

async fn handle_invite(
    invite: IncomingInvite,
    config: Config,
    listener: Arc<BridgeListener>,
    bridge: Bridge,
) -> Result<(), String> {
    if invite.message.method() == Some("BYE") {
        if let Some(call_id) = invite.message.header("call-id") {
            if let Some(session) = bridge.remove(call_id) {
                session.teardown(voice_bridge::error::CallEndCause::Bye);
            }
        }
        return Ok(());
    }

    let call_id = invite
        .message
        .header("call-id")
        .ok_or_else(|| "INVITE missing Call-ID".to_string())?
        .to_string();

    let codec = negotiate_codec(&invite.message.body, config.audio.preferred_codec)
        .ok_or_else(|| "no compatible codec offered".to_string())?;

    let mut ringing = SipMessage::response(180, "Ringing");
    ringing.set_header("Call-ID", call_id.clone());
    listener.send_to(&ringing, invite.remote).await?;

    let rtp_socket = RtpSocket::bind("0.0.0.0:0".parse().unwrap())?;
    let rtp_port = rtp_socket.local_addr()?.port();

    let media_addr = parse_sdp_media_addr(&invite.message.body)
        .unwrap_or(SocketAddr::new(invite.remote.ip(), invite.remote.port()));

    let engine = DefaultEngine::new(
        "Welcome, how can I help you today?",
        "You are a helpful voice assistant for phone calls.",
    );

    let session_events = Arc::new(CallSessionEvents {
        on_log: Box::new(move |msg| info!("[{msg}]")),
        on_ended: Box::new(|cause| info!("call ended: {cause}")),
    });

    let session = CallSession::start(
        call_id.clone(),
        &config,
        codec,
        rtp_socket,
        media_addr,
        engine,
        session_events,
    )
    .await?;

    bridge.insert(session.clone());

    let mut ok = SipMessage::response(200, "OK");
    ok.set_header("Call-ID", call_id);
    ok.set_header("Content-Type", "application/sdp");
    ok.body = build_sdp_answer(rtp_port, codec);
    listener.send_to(&ok, invite.remote).await?;

    tokio::spawn({
        let session = session.clone();
        async move {
            session.watch_rtp_timeout(Duration::from_secs(config.rtp.rtp_timeout_secs)).await;
        }
    });

    Ok(())
}

fn parse_sdp_media_addr(sdp: &str) -> Option<SocketAddr> {
    let ip = sdp
        .lines()
        .find(|line| line.starts_with("c=IN IP4"))
        .and_then(|line| line.split_whitespace().nth(2))?;
    let port = sdp
        .lines()
        .find(|line| line.starts_with("m=audio"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|p| p.parse::<u16>().ok())?;
    format!("{ip}:{port}").parse().ok()
}

fn build_sdp_answer(rtp_port: u16, codec: voice_bridge::codec::Codec) -> String {
    let payload_type = codec.payload_type();
    let codec_name = match codec {
        voice_bridge::codec::Codec::Alaw => "PCMA",
        voice_bridge::codec::Codec::Ulaw => "PCMU",
    };
    format!(
        "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=voice-bridge\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\n\
         m=audio {rtp_port} RTP/AVP {payload_type}\r\na=rtpmap:{payload_type} {codec_name}/8000\r\n"
    )
}

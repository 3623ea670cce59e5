//! Bridge Listener (C7): SIP transport bootstrap. Binds a UDP socket,
//! optionally discovers its public address via STUN, optionally
//! registers to a registrar with Digest auth, answers OPTIONS, and
//! hands INVITEs off to a caller-supplied dispatch closure that builds
//! a Call Session.
//!
//! The REGISTER retry loop mirrors a `Trying -> Ringing -> Active`
//! call lifecycle, scaled down to a challenge/response handshake
//! instead of a general state machine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SipConfig;
use crate::sip::auth::{build_authorization_header, parse_challenge};
use crate::sip::message::SipMessage;
use crate::sip::stun::discover_public_address;

/// One inbound INVITE, handed to the dispatch closure for call setup.
pub struct IncomingInvite {
    pub message: SipMessage,
    pub remote: SocketAddr,
}

pub struct ListenerEvents {
    pub on_log: Box<dyn Fn(String) + Send + Sync>,
}

pub struct BridgeListener {
    socket: Arc<UdpSocket>,
    config: SipConfig,
    public_addr: Option<SocketAddr>,
}

impl BridgeListener {
    pub async fn bind(config: SipConfig) -> Result<Self, String> {
        let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.listen_port)
            .parse()
            .map_err(|e| format!("invalid SIP listen port: {e}"))?;
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| format!("failed to bind SIP socket: {e}"))?;

        Ok(Self {
            socket: Arc::new(socket),
            config,
            public_addr: None,
        })
    }

    /// The last address STUN discovered, if discovery has run.
    pub fn public_address(&self) -> Option<SocketAddr> {
        self.public_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr, String> {
        self.socket
            .local_addr()
            .map_err(|e| format!("failed to read SIP local addr: {e}"))
    }

    /// Send a response/request built by the caller (e.g. 180 Ringing,
    /// 200 OK with SDP) to an arbitrary remote — used by call setup
    /// once an `IncomingInvite` has been dispatched off the receive
    /// loop.
    pub async fn send_to(&self, message: &SipMessage, remote: SocketAddr) -> Result<(), String> {
        self.socket
            .send_to(message.encode().as_bytes(), remote)
            .await
            .map(|_| ())
            .map_err(|e| format!("SIP send failed: {e}"))
    }

    /// Optional public-IP discovery via a single STUN binding request.
    pub async fn discover_public_address(&mut self) -> Result<SocketAddr, String> {
        if !self.config.enable_stun {
            return Err("STUN discovery disabled in config".to_string());
        }
        let stun_host = self
            .config
            .stun_server
            .as_ref()
            .ok_or_else(|| "enable_stun set but no stun_server configured".to_string())?;
        let stun_addr: SocketAddr = format!("{stun_host}:{}", self.config.stun_port)
            .parse()
            .map_err(|e| format!("invalid STUN server address: {e}"))?;

        let addr = discover_public_address(&self.socket, stun_addr).await?;
        self.public_addr = Some(addr);
        Ok(addr)
    }

    /// Send one REGISTER, handle a 401/407 Digest challenge by
    /// retrying once with credentials, then loop re-registering every
    /// `register_expiry_secs` until `cancel` fires.
    pub async fn run_register_loop(&self, events: Arc<ListenerEvents>, cancel: CancellationToken) {
        if self.config.server.is_empty() {
            return;
        }
        let expiry = Duration::from_secs(self.config.register_expiry_secs as u64);

        loop {
            match self.register_once().await {
                Ok(()) => (events.on_log)("REGISTER succeeded".to_string()),
                Err(e) => (events.on_log)(format!("REGISTER failed: {e}")),
            }

            tokio::select! {
                _ = tokio::time::sleep(expiry) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn register_once(&self) -> Result<(), String> {
        let registrar: SocketAddr = format!("{}:{}", self.config.server, self.config.port)
            .parse()
            .map_err(|e| format!("invalid registrar address: {e}"))?;

        let uri = format!("sip:{}", self.config.server);
        let call_id = format!("reg-{}", std::process::id());

        let mut request = SipMessage::request("REGISTER", &uri);
        request
            .set_header("Call-ID", call_id.clone())
            .set_header("CSeq", "1 REGISTER")
            .set_header("Expires", self.config.register_expiry_secs.to_string());
        self.socket
            .send_to(request.encode().as_bytes(), registrar)
            .await
            .map_err(|e| format!("REGISTER send failed: {e}"))?;

        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| "REGISTER response timed out".to_string())?
            .map_err(|e| format!("REGISTER recv failed: {e}"))?;

        let response = SipMessage::parse(&String::from_utf8_lossy(&buf[..len]))
            .ok_or_else(|| "unparseable REGISTER response".to_string())?;

        match response.status_code() {
            Some(200) => Ok(()),
            Some(401) | Some(407) => {
                let challenge_header = response
                    .header("www-authenticate")
                    .or_else(|| response.header("proxy-authenticate"))
                    .ok_or_else(|| "challenge response missing auth header".to_string())?;
                let challenge = parse_challenge(challenge_header)
                    .ok_or_else(|| "unparseable Digest challenge".to_string())?;

                let auth_user = self.config.auth_user.as_deref().unwrap_or(&self.config.username);
                let authorization =
                    build_authorization_header(auth_user, &challenge, &self.config.password, "REGISTER", &uri);

                let mut retry = SipMessage::request("REGISTER", &uri);
                retry
                    .set_header("Call-ID", call_id)
                    .set_header("CSeq", "2 REGISTER")
                    .set_header("Expires", self.config.register_expiry_secs.to_string())
                    .set_header("Authorization", authorization);

                self.socket
                    .send_to(retry.encode().as_bytes(), registrar)
                    .await
                    .map_err(|e| format!("REGISTER retry send failed: {e}"))?;
                Ok(())
            }
            other => Err(format!("REGISTER rejected: {other:?}")),
        }
    }

    /// Run the receive loop: answer OPTIONS directly, forward parsed
    /// INVITEs to `invite_tx`. Runs until `cancel` fires.
    pub async fn run(
        &self,
        invite_tx: mpsc::UnboundedSender<IncomingInvite>,
        events: Arc<ListenerEvents>,
        cancel: CancellationToken,
    ) {
        let mut buf = [0u8; 4096];
        loop {
            let recv = tokio::select! {
                result = self.socket.recv_from(&mut buf) => result,
                _ = cancel.cancelled() => return,
            };

            let (len, remote) = match recv {
                Ok(pair) => pair,
                Err(e) => {
                    (events.on_log)(format!("SIP recv error: {e}"));
                    continue;
                }
            };

            let Some(message) = SipMessage::parse(&String::from_utf8_lossy(&buf[..len])) else {
                continue;
            };

            match message.method() {
                Some("OPTIONS") => {
                    let mut response = SipMessage::response(200, "OK");
                    if let Some(call_id) = message.header("call-id") {
                        response.set_header("Call-ID", call_id.to_string());
                    }
                    let _ = self.socket.send_to(response.encode().as_bytes(), remote).await;
                }
                Some("INVITE") => {
                    let _ = invite_tx.send(IncomingInvite { message, remote });
                }
                Some("BYE") => {
                    let mut response = SipMessage::response(200, "OK");
                    if let Some(call_id) = message.header("call-id") {
                        response.set_header("Call-ID", call_id.to_string());
                    }
                    let _ = self.socket.send_to(response.encode().as_bytes(), remote).await;
                    let _ = invite_tx.send(IncomingInvite { message, remote });
                }
                _ => {}
            }
        }
    }
}

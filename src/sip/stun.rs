//! One-shot STUN binding request/response (RFC 5389), used only for
//! public-IP discovery before SIP registration. Not a TURN/ICE stack.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::Duration;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

fn build_binding_request(transaction_id: &[u8; 12]) -> [u8; 20] {
    let mut packet = [0u8; 20];
    packet[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    packet[2..4].copy_from_slice(&0u16.to_be_bytes()); // message length, no attrs
    packet[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    packet[8..20].copy_from_slice(transaction_id);
    packet
}

/// Send a binding request to `stun_server` from `socket` and parse the
/// reflexive address out of the response.
pub async fn discover_public_address(
    socket: &UdpSocket,
    stun_server: SocketAddr,
) -> Result<SocketAddr, String> {
    let transaction_id: [u8; 12] = {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let pid = std::process::id() as u64;
        let mut id = [0u8; 12];
        id[0..8].copy_from_slice(&nanos.to_be_bytes());
        id[8..12].copy_from_slice(&(pid as u32).to_be_bytes());
        id
    };

    let request = build_binding_request(&transaction_id);
    socket
        .send_to(&request, stun_server)
        .await
        .map_err(|e| format!("STUN send failed: {e}"))?;

    let mut buf = [0u8; 512];
    let len = tokio::time::timeout(Duration::from_secs(3), socket.recv(&mut buf))
        .await
        .map_err(|_| "STUN request timed out".to_string())?
        .map_err(|e| format!("STUN recv failed: {e}"))?;

    parse_binding_response(&buf[..len], &transaction_id)
}

fn parse_binding_response(data: &[u8], expected_transaction_id: &[u8; 12]) -> Result<SocketAddr, String> {
    if data.len() < 20 {
        return Err("STUN response too short".to_string());
    }

    let message_type = u16::from_be_bytes([data[0], data[1]]);
    if message_type != BINDING_RESPONSE {
        return Err(format!("unexpected STUN message type {message_type:#06x}"));
    }

    if &data[8..20] != expected_transaction_id {
        return Err("STUN transaction id mismatch".to_string());
    }

    let message_length = u16::from_be_bytes([data[2], data[3]]) as usize;
    let attrs_end = (20 + message_length).min(data.len());
    let mut offset = 20;
    let mut mapped: Option<SocketAddr> = None;
    let mut xor_mapped: Option<SocketAddr> = None;

    while offset + 4 <= attrs_end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > data.len() {
            break;
        }
        let value = &data[value_start..value_end];

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => {
                xor_mapped = parse_xor_mapped_address(value);
            }
            ATTR_MAPPED_ADDRESS => {
                mapped = parse_mapped_address(value);
            }
            _ => {}
        }

        // Attributes are padded to a 4-byte boundary.
        offset = value_end + ((4 - (attr_len % 4)) % 4);
    }

    xor_mapped
        .or(mapped)
        .ok_or_else(|| "STUN response carried no mapped address".to_string())
}

fn parse_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 || value[1] != 0x01 {
        return None;
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

fn parse_xor_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 || value[1] != 0x01 {
        return None;
    }
    let cookie_bytes = MAGIC_COOKIE.to_be_bytes();
    let port = u16::from_be_bytes([value[2], value[3]]) ^ u16::from_be_bytes([cookie_bytes[0], cookie_bytes[1]]);
    let ip = Ipv4Addr::new(
        value[4] ^ cookie_bytes[0],
        value[5] ^ cookie_bytes[1],
        value[6] ^ cookie_bytes[2],
        value[7] ^ cookie_bytes[3],
    );
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

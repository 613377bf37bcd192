/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! A minimal RFC 1928 SOCKS5 `CONNECT` client, just enough to dial a
//! `.onion` host through a local Tor-like proxy with per-connection
//! username/password isolation. No bind/associate support, no crate
//! dependency: this is the one piece of the stack no example repo in
//! the corpus imports a library for.

use smol::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::error::{Error, NetError, Result};

const VERSION: u8 = 0x05;
const METHOD_USER_PASS: u8 = 0x02;
const AUTH_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const RESERVED: u8 = 0x00;

/// Connects to `proxy_addr` and asks it to `CONNECT` to `(host, port)`,
/// authenticating with a throwaway username/password so the proxy
/// cannot correlate this connection with any other the client makes.
pub async fn connect_via_socks5(
    proxy_addr: &str,
    host: &str,
    port: u16,
    username: &str,
) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(proxy_addr)
        .await
        .map_err(|e| Error::Net(NetError::SocksRejected(e.to_string())))?;

    // Greeting: offer only username/password auth.
    stream.write_all(&[VERSION, 1, METHOD_USER_PASS]).await?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != VERSION || reply[1] != METHOD_USER_PASS {
        return Err(Error::Net(NetError::SocksRejected(
            "proxy does not support username/password auth".into(),
        )))
    }

    // Sub-negotiation: empty password, the username alone is enough entropy
    // for connection isolation.
    let mut auth = vec![AUTH_VERSION, username.len() as u8];
    auth.extend_from_slice(username.as_bytes());
    auth.push(0);
    stream.write_all(&auth).await?;
    let mut auth_reply = [0u8; 2];
    stream.read_exact(&mut auth_reply).await?;
    if auth_reply[1] != 0x00 {
        return Err(Error::Net(NetError::SocksRejected("auth rejected by proxy".into())))
    }

    // CONNECT request, domain-name addressing (works for .onion names).
    let mut req = vec![VERSION, CMD_CONNECT, RESERVED, ATYP_DOMAIN];
    if host.len() > u8::MAX as usize {
        return Err(Error::Net(NetError::SocksProtocol))
    }
    req.push(host.len() as u8);
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(Error::Net(NetError::SocksProtocol))
    }
    if head[1] != 0x00 {
        return Err(Error::Net(NetError::SocksRejected(format!(
            "proxy returned reply code {:#04x}",
            head[1]
        ))))
    }

    // Consume the bound address the proxy echoes back, whose shape
    // depends on the address type it chose to reply with.
    match head[3] {
        0x01 => {
            let mut skip = [0u8; 4 + 2];
            stream.read_exact(&mut skip).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut skip = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut skip).await?;
        }
        0x04 => {
            let mut skip = [0u8; 16 + 2];
            stream.read_exact(&mut skip).await?;
        }
        _ => return Err(Error::Net(NetError::SocksProtocol)),
    }

    Ok(stream)
}

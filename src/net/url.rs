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

//! `pondserver://` URL handling: the server's identity public key is
//! carried as base32 user-info, the host is a `.onion` name (or
//! `localhost` for local testing) with no explicit port — port `16333`
//! is implicit and appended by the dialer.

use url::Url;

use crate::error::{Error, NetError, Result};

pub const SERVER_PORT: u16 = 16333;
const SCHEME: &str = "pondserver";

fn encode_identity(identity_pub: &[u8; 32]) -> String {
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, identity_pub).to_lowercase()
}

fn decode_identity(user_info: &str) -> Result<[u8; 32]> {
    let bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, user_info)
        .ok_or_else(|| Error::Net(NetError::BadUrl("user-info is not valid base32".into())))?;
    bytes
        .try_into()
        .map_err(|_| Error::Net(NetError::BadUrl("server identity must be 32 bytes".into())))
}

/// Builds a `pondserver://` URL from the server's identity and hostname.
/// `production` rejects hosts other than `.onion` names.
pub fn build_server_url(identity_pub: &[u8; 32], host: &str, production: bool) -> Result<Url> {
    if production && host != "localhost" && !host.ends_with(".onion") {
        return Err(Error::Net(NetError::BadUrl(format!("{host} is not a .onion host"))))
    }
    let raw = format!("{SCHEME}://{}@{host}:{SERVER_PORT}", encode_identity(identity_pub));
    Url::parse(&raw).map_err(|e| Error::Net(NetError::BadUrl(e.to_string())))
}

/// Parses a server URL, returning its identity public key and host. In
/// production mode an explicit, non-default port is rejected: pond
/// servers are only ever reached on the well-known port.
pub fn parse_server_url(url: &Url, production: bool) -> Result<([u8; 32], String)> {
    if url.scheme() != SCHEME {
        return Err(Error::Net(NetError::BadUrl(format!("unexpected scheme {}", url.scheme()))))
    }
    let user_info = url.username();
    if user_info.is_empty() {
        return Err(Error::Net(NetError::BadUrl("missing server identity in url".into())))
    }
    let identity_pub = decode_identity(user_info)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Net(NetError::BadUrl("missing host".into())))?
        .to_string();
    if production {
        if host != "localhost" && !host.ends_with(".onion") {
            return Err(Error::Net(NetError::BadUrl(format!("{host} is not a .onion host"))))
        }
        if let Some(port) = url.port() {
            if port != SERVER_PORT {
                return Err(Error::Net(NetError::BadUrl(
                    "explicit non-standard port is not allowed in production mode".into(),
                )))
            }
        }
    }
    Ok((identity_pub, host))
}

/// `pondserver://<server-id>/<hex-from-identity>/<hex-file-id>`
pub fn build_detachment_url(
    server: &Url,
    from_identity: &[u8; 32],
    file_id: u64,
) -> Result<Url> {
    let mut out = server.clone();
    out.set_path(&format!("/{}/{:016x}", hex::encode(from_identity), file_id));
    Ok(out)
}

pub fn parse_detachment_url(url: &Url) -> Result<([u8; 32], u64)> {
    let mut segments = url
        .path_segments()
        .ok_or_else(|| Error::Net(NetError::BadUrl("detachment url has no path".into())))?;
    let from_hex = segments
        .next()
        .ok_or_else(|| Error::Net(NetError::BadUrl("missing from-identity segment".into())))?;
    let id_hex = segments
        .next()
        .ok_or_else(|| Error::Net(NetError::BadUrl("missing file-id segment".into())))?;
    let from_bytes = hex::decode(from_hex)
        .map_err(|_| Error::Net(NetError::BadUrl("from-identity is not valid hex".into())))?;
    let from_identity: [u8; 32] = from_bytes
        .try_into()
        .map_err(|_| Error::Net(NetError::BadUrl("from-identity must be 32 bytes".into())))?;
    let id = u64::from_str_radix(id_hex, 16)
        .map_err(|_| Error::Net(NetError::BadUrl("file-id is not valid hex".into())))?;
    Ok((from_identity, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_url_round_trips() {
        let identity = [7u8; 32];
        let url = build_server_url(&identity, "localhost", false).unwrap();
        let (decoded, host) = parse_server_url(&url, false).unwrap();
        assert_eq!(decoded, identity);
        assert_eq!(host, "localhost");
    }

    #[test]
    fn production_rejects_clearnet_host() {
        let identity = [1u8; 32];
        assert!(build_server_url(&identity, "example.com", true).is_err());
    }

    #[test]
    fn detachment_url_round_trips() {
        let server = build_server_url(&[2u8; 32], "localhost", false).unwrap();
        let from = [9u8; 32];
        let url = build_detachment_url(&server, &from, 42).unwrap();
        let (decoded_from, id) = parse_detachment_url(&url).unwrap();
        assert_eq!(decoded_from, from);
        assert_eq!(id, 42);
    }
}

// Copyright 2026 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Application-Layer Protocol Negotiation for the encrypted DNS
//! transports.
//!
//! DNS over TLS uses the `dot` protocol identifier (registered by
//! [RFC 9103]); DNS over HTTPS rides on HTTP/2's `h2`. On the wire an
//! ALPN protocol list is a sequence of length-prefixed identifiers,
//! and the helpers here install the corresponding advertisements and
//! selection callbacks on a [`TlsContextBuilder`].
//!
//! [RFC 9103]: https://datatracker.ietf.org/doc/html/rfc9103

use openssl::ssl::{select_next_proto, AlpnError, SslRef};

use super::context::tls_error;
use super::{Error, TlsContextBuilder};

/// The length-prefixed wire form of the `h2` protocol identifier.
const HTTP2_ALPN: &[u8] = b"\x02h2";

/// The length-prefixed wire form of the `dot` protocol identifier.
const DOT_ALPN: &[u8] = b"\x03dot";

impl TlsContextBuilder {
    /// Configures a client context to offer HTTP/2.
    pub fn enable_http2_client_alpn(&mut self) -> Result<(), Error> {
        self.ctx.set_alpn_protos(HTTP2_ALPN).map_err(tls_error)
    }

    /// Configures a server context to select HTTP/2 from a client's
    /// offer.
    pub fn enable_http2_server_alpn(&mut self) {
        self.ctx.set_alpn_select_callback(|_, client| {
            select_next_proto(HTTP2_ALPN, client).ok_or(AlpnError::NOACK)
        });
    }

    /// Configures a client context to offer DNS over TLS.
    pub fn enable_dot_client_alpn(&mut self) -> Result<(), Error> {
        self.ctx.set_alpn_protos(DOT_ALPN).map_err(tls_error)
    }

    /// Configures a server context to select DNS over TLS from a
    /// client's offer. A client that does not offer it is not
    /// rejected; the handshake proceeds with no protocol selected.
    pub fn enable_dot_server_alpn(&mut self) {
        self.ctx.set_alpn_select_callback(|_, client| {
            select_protocol(client, DOT_ALPN).ok_or(AlpnError::NOACK)
        });
    }
}

/// Returns the application protocol negotiated for `ssl`, if any.
pub fn selected_protocol(ssl: &SslRef) -> Option<&[u8]> {
    ssl.selected_alpn_protocol()
}

/// Scans a wire-format ALPN protocol list for `needle`, itself in
/// wire format (including its length prefix). Returns the matching
/// record's payload, without the length prefix.
///
/// Each record at offset `i` occupies `1 + wire[i]` bytes, so the
/// scan touches only record boundaries; an identifier appearing as a
/// substring inside a longer record does not match.
fn select_protocol<'a>(wire: &'a [u8], needle: &[u8]) -> Option<&'a [u8]> {
    let mut i = 0;
    while i + needle.len() <= wire.len() {
        if &wire[i..i + needle.len()] == needle {
            return Some(&wire[i + 1..i + needle.len()]);
        }
        i += 1 + wire[i] as usize;
    }
    None
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::testutil::handshake;
    use super::super::ServerIdentity;
    use super::*;

    #[test]
    fn scan_finds_complete_records() {
        let wire: &[u8] = b"\x02h2\x03dot\x05other";
        assert_eq!(select_protocol(wire, b"\x02h2"), Some(&b"h2"[..]));
        assert_eq!(select_protocol(wire, b"\x03dot"), Some(&b"dot"[..]));
        assert_eq!(select_protocol(wire, b"\x05other"), Some(&b"other"[..]));
        assert_eq!(select_protocol(wire, b"\x04http"), None);
        assert_eq!(select_protocol(b"", b"\x03dot"), None);
    }

    #[test]
    fn scan_respects_record_boundaries() {
        // "dot" appears inside both records, but never as a complete
        // record of its own.
        assert_eq!(select_protocol(b"\x06dotdot", b"\x03dot"), None);
        assert_eq!(select_protocol(b"\x04adot\x02h2", b"\x03dot"), None);
    }

    #[test]
    fn dot_server_selects_dot() {
        let mut server = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        server.enable_dot_server_alpn();
        let server = server.build();

        // A client offering both DoT and HTTP/2.
        let mut client = TlsContextBuilder::client().unwrap();
        client.ctx.set_alpn_protos(b"\x03dot\x02h2").unwrap();
        let client = client.build();

        let (server_outcome, client_outcome) = handshake(&server, &client);
        assert_eq!(server_outcome, Ok(Some(b"dot".to_vec())));
        assert_eq!(client_outcome, Ok(Some(b"dot".to_vec())));
    }

    #[test]
    fn dot_server_ignores_alpn_without_dot() {
        let mut server = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        server.enable_dot_server_alpn();
        let server = server.build();

        let mut client = TlsContextBuilder::client().unwrap();
        client.enable_http2_client_alpn().unwrap();
        let client = client.build();

        // The selector declines rather than aborting, so the
        // handshake completes with no protocol selected.
        let (server_outcome, client_outcome) = handshake(&server, &client);
        assert_eq!(server_outcome, Ok(None));
        assert_eq!(client_outcome, Ok(None));
    }

    #[test]
    fn dot_client_and_server_negotiate_dot() {
        let mut server = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        server.enable_dot_server_alpn();
        let server = server.build();

        let mut client = TlsContextBuilder::client().unwrap();
        client.enable_dot_client_alpn().unwrap();
        let client = client.build();

        let (server_outcome, client_outcome) = handshake(&server, &client);
        assert_eq!(server_outcome, Ok(Some(b"dot".to_vec())));
        assert_eq!(client_outcome, Ok(Some(b"dot".to_vec())));
    }

    #[test]
    fn http2_client_and_server_negotiate_h2() {
        let mut server = TlsContextBuilder::server(ServerIdentity::Ephemeral).unwrap();
        server.enable_http2_server_alpn();
        let server = server.build();

        let mut client = TlsContextBuilder::client().unwrap();
        client.enable_http2_client_alpn().unwrap();
        let client = client.build();

        let (server_outcome, client_outcome) = handshake(&server, &client);
        assert_eq!(server_outcome, Ok(Some(b"h2".to_vec())));
        assert_eq!(client_outcome, Ok(Some(b"h2".to_vec())));
    }
}

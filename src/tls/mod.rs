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

//! TLS context construction, configuration, and caching.
//!
//! The server's encrypted transports are configured through this
//! module:
//!
//! * [`TlsContextBuilder`] assembles a TLS context for the client or
//!   server role, applying protocol-version, cipher, DH-parameter,
//!   session-ticket, and ALPN policy. [`TlsContextBuilder::build`]
//!   freezes it into an immutable [`TlsContext`], from which
//!   per-connection TLS state objects are created with
//!   [`TlsContext::new_session`].
//! * [`TlsContextCache`] shares configured contexts between listeners
//!   and connections, keyed by logical name, [`Transport`], and
//!   address [`Family`].
//! * [`initialize`] brings the underlying TLS provider up exactly
//!   once per process. Context builders call it themselves, so most
//!   callers never need to.
//!
//! This module performs no network I/O. The I/O providers drive the
//! session objects; here they are only created and parameterized.

use std::fmt;

use openssl::error::ErrorStack;

mod alpn;
mod cache;
mod context;
mod init;

pub use alpn::selected_protocol;
pub use cache::{Family, Occupied, TlsContextCache, Transport};
pub use context::{
    valid_cipherlist, ParseProtocolVersionError, ProtocolVersion, ProtocolVersions,
    ServerIdentity, TlsContext, TlsContextBuilder,
};
pub use init::{initialize, shutdown};

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error reported by the TLS provider.
#[derive(Debug)]
pub struct Error(ErrorStack);

impl Error {
    /// Returns the provider's error stack.
    pub fn provider(&self) -> &ErrorStack {
        &self.0
    }
}

impl From<ErrorStack> for Error {
    fn from(stack: ErrorStack) -> Self {
        Self(stack)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TLS provider error: {}", self.0)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

////////////////////////////////////////////////////////////////////////
// TEST SUPPORT                                                       //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
pub(crate) mod testutil {
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use super::{selected_protocol, TlsContext};

    /// The outcome of one side of a loopback handshake: the selected
    /// ALPN protocol on success, or failure.
    pub(crate) type Outcome = Result<Option<Vec<u8>>, ()>;

    /// Runs a TLS handshake between `server` and `client` over a
    /// loopback TCP connection, returning each side's outcome.
    pub(crate) fn handshake(server: &TlsContext, client: &TlsContext) -> (Outcome, Outcome) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = server.clone();
        let accept = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            match server.new_session().unwrap().accept(stream) {
                Ok(stream) => Ok(selected_protocol(stream.ssl()).map(|proto| proto.to_vec())),
                Err(_) => Err(()),
            }
        });
        let stream = TcpStream::connect(addr).unwrap();
        let client_outcome = match client.new_session().unwrap().connect(stream) {
            Ok(stream) => Ok(selected_protocol(stream.ssl()).map(|proto| proto.to_vec())),
            Err(_) => Err(()),
        };
        (accept.join().unwrap(), client_outcome)
    }
}

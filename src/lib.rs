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

//! TLS session infrastructure for the Palisade authoritative DNS
//! server.
//!
//! This crate provides the pieces that Palisade's encrypted transports
//! (DNS over TLS and DNS over HTTPS) are built on:
//!
//! * [`tls`] — construction and configuration of TLS contexts
//!   (protocol versions, cipher lists, ALPN, ephemeral server
//!   identities) and a concurrent cache of configured contexts keyed
//!   by logical transport name.
//! * [`hashmap`] — the Robin Hood hash table that backs the context
//!   cache and maps variable-length byte-string keys to values
//!   elsewhere in the server.
//!
//! Network I/O is out of scope here: this crate only *configures* TLS
//! state. The I/O providers drive the per-connection handles returned
//! by [`tls::TlsContext::new_session`].

pub mod hashmap;
pub mod tls;

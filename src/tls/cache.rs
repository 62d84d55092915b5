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

//! Implementation of the [`TlsContextCache`] structure.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::hashmap::{Case, HashMap};

use super::TlsContext;

/// An encrypted DNS transport, as keyed in a [`TlsContextCache`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transport {
    /// DNS over TLS.
    Tls = 1,

    /// DNS over HTTPS.
    Https = 2,
}

/// The number of [`Transport`] variants.
const TRANSPORT_COUNT: usize = 2;

impl Transport {
    fn offset(self) -> usize {
        self as usize - 1
    }
}

/// The address family a context serves, as keyed in a
/// [`TlsContextCache`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    fn offset(self) -> usize {
        (self == Family::V6) as usize
    }
}

/// The contexts registered under one logical name. A separate context
/// is kept per transport and address family so that connections on
/// different transports do not share a context-specific
/// session-resumption cache.
#[derive(Default)]
struct Entry {
    contexts: [[Option<TlsContext>; 2]; TRANSPORT_COUNT],
}

impl Entry {
    fn slot(&self, transport: Transport, family: Family) -> &Option<TlsContext> {
        &self.contexts[transport.offset()][family.offset()]
    }

    fn slot_mut(&mut self, transport: Transport, family: Family) -> &mut Option<TlsContext> {
        &mut self.contexts[transport.offset()][family.offset()]
    }
}

/// A cache of [`TlsContext`]s keyed by logical name, [`Transport`],
/// and address [`Family`].
///
/// The cache lets the parts of the server that accept and originate
/// connections share configured contexts instead of rebuilding them
/// per listener. It is shared by cloning the [`Arc`] returned from
/// [`TlsContextCache::new`]; when the last handle is dropped, every
/// cached context is destroyed with it.
///
/// [`find`](TlsContextCache::find) may be called concurrently from
/// any number of threads. Cached contexts are immutable once
/// published, so the handles it returns need no further
/// synchronization.
pub struct TlsContextCache {
    entries: RwLock<HashMap<Box<[u8]>, Entry>>,
}

/// The initial size of the cache's hash table, in bits.
const CACHE_BITS: u8 = 5;

impl TlsContextCache {
    /// Creates a new, empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new(CACHE_BITS, Case::Sensitive)),
        })
    }

    /// Registers `ctx` under `(name, transport, family)`, transferring
    /// ownership of it to the cache.
    ///
    /// If a context is already registered under that key, nothing is
    /// changed and the returned [`Occupied`] hands `ctx` back to the
    /// caller along with a handle to the registered context.
    ///
    /// `name` must be non-empty and must not contain NUL bytes;
    /// violations panic.
    pub fn add(
        &self,
        name: &str,
        transport: Transport,
        family: Family,
        ctx: TlsContext,
    ) -> Result<(), Occupied> {
        check_name(name);
        let mut entries = self.entries.write().unwrap();
        match entries.find_mut(name.as_bytes()) {
            Some(entry) => match entry.slot_mut(transport, family) {
                Some(found) => Err(Occupied {
                    found: found.clone(),
                    rejected: ctx,
                }),
                slot => {
                    *slot = Some(ctx);
                    Ok(())
                }
            },
            None => {
                let mut entry = Entry::default();
                *entry.slot_mut(transport, family) = Some(ctx);
                let added = entries.add(Box::from(name.as_bytes()), entry);
                assert!(added.is_ok());
                Ok(())
            }
        }
    }

    /// Looks up the context registered under `(name, transport,
    /// family)`, returning a handle aliasing it.
    ///
    /// `name` must be non-empty and must not contain NUL bytes;
    /// violations panic.
    pub fn find(&self, name: &str, transport: Transport, family: Family) -> Option<TlsContext> {
        check_name(name);
        let entries = self.entries.read().unwrap();
        entries
            .find(name.as_bytes())
            .and_then(|entry| entry.slot(transport, family).clone())
    }
}

fn check_name(name: &str) {
    assert!(!name.is_empty(), "empty cache name");
    assert!(!name.contains('\0'), "cache name contains a NUL byte");
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// The error returned by [`TlsContextCache::add`] when a context is
/// already registered under the requested key.
///
/// `rejected` returns ownership of the caller's context so that the
/// caller can dispose of its duplicate; `found` is a handle to the
/// context already in the cache.
pub struct Occupied {
    pub found: TlsContext,
    pub rejected: TlsContext,
}

impl fmt::Debug for Occupied {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Occupied").finish_non_exhaustive()
    }
}

impl fmt::Display for Occupied {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a TLS context is already registered under this key")
    }
}

impl std::error::Error for Occupied {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::thread;

    use super::super::TlsContextBuilder;
    use super::*;

    fn client_ctx() -> TlsContext {
        TlsContextBuilder::client().unwrap().build()
    }

    #[test]
    fn add_and_find() {
        let cache = TlsContextCache::new();
        let a = client_ctx();
        let b = client_ctx();

        cache.add("ns1", Transport::Tls, Family::V4, a.clone()).unwrap();

        let err = cache
            .add("ns1", Transport::Tls, Family::V4, b.clone())
            .unwrap_err();
        assert!(err.found.ptr_eq(&a));
        assert!(err.rejected.ptr_eq(&b));

        let found = cache.find("ns1", Transport::Tls, Family::V4).unwrap();
        assert!(found.ptr_eq(&a));

        assert!(cache.find("ns1", Transport::Tls, Family::V6).is_none());
        assert!(cache.find("ns1", Transport::Https, Family::V4).is_none());
        assert!(cache.find("ns2", Transport::Tls, Family::V4).is_none());
    }

    #[test]
    fn existing_name_gains_new_slots() {
        let cache = TlsContextCache::new();
        let a = client_ctx();
        let b = client_ctx();

        cache.add("ns1", Transport::Tls, Family::V4, a.clone()).unwrap();

        // The same name with an unoccupied (transport, family) slot
        // accepts the new context; only an occupied slot reports
        // Occupied.
        cache
            .add("ns1", Transport::Https, Family::V6, b.clone())
            .unwrap();

        let found = cache.find("ns1", Transport::Tls, Family::V4).unwrap();
        assert!(found.ptr_eq(&a));
        let found = cache.find("ns1", Transport::Https, Family::V6).unwrap();
        assert!(found.ptr_eq(&b));
    }

    #[test]
    fn concurrent_readers_observe_published_context() {
        let cache = TlsContextCache::new();
        let ctx = client_ctx();
        cache
            .add("ns1", Transport::Tls, Family::V4, ctx.clone())
            .unwrap();

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let expected = ctx.clone();
            readers.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let found = cache.find("ns1", Transport::Tls, Family::V4).unwrap();
                    assert!(found.ptr_eq(&expected));
                }
            }));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn many_names_exercise_table_growth() {
        let cache = TlsContextCache::new();
        let ctx = client_ctx();
        let names: Vec<String> = (0..100).map(|i| format!("server{}", i)).collect();
        for name in &names {
            cache
                .add(name, Transport::Tls, Family::V4, ctx.clone())
                .unwrap();
        }
        for name in &names {
            let found = cache.find(name, Transport::Tls, Family::V4).unwrap();
            assert!(found.ptr_eq(&ctx));
        }
    }
}

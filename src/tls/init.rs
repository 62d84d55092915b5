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

//! Process-wide bring-up and tear-down of the TLS provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use log::error;

static INIT: Once = Once::new();
static INIT_DONE: AtomicBool = AtomicBool::new(false);
static SHUT: Once = Once::new();
static SHUT_DONE: AtomicBool = AtomicBool::new(false);

/// Initializes the TLS provider.
///
/// This must happen before any TLS context is built, in any thread;
/// [`TlsContextBuilder`](super::TlsContextBuilder) calls it itself, so
/// callers only need it to control *when* the provider comes up. The
/// first call performs the initialization; subsequent calls are
/// no-ops that still provide the happens-before edge.
///
/// # Panics
///
/// Panics if the provider's pseudorandom number generator cannot
/// produce output. Nothing cryptographic can safely proceed without
/// seeded randomness, so this is fatal.
pub fn initialize() {
    INIT.call_once(|| {
        assert!(
            !SHUT_DONE.load(Ordering::Acquire),
            "TLS initialization attempted after shutdown",
        );
        openssl::init();

        // Protect ourselves against an unseeded PRNG.
        let mut probe = [0; 16];
        if let Err(stack) = openssl::rand::rand_bytes(&mut probe) {
            error!(
                "TLS provider pseudorandom number generator cannot be initialized: {}",
                stack,
            );
            panic!("TLS provider pseudorandom number generator cannot be initialized");
        }

        INIT_DONE.store(true, Ordering::Release);
    });
    assert!(INIT_DONE.load(Ordering::Acquire));
}

/// Shuts down the TLS provider.
///
/// Calling this before [`initialize`] is a contract violation and
/// panics. The first call performs the shutdown; subsequent calls are
/// no-ops. The provider releases its own resources at process exit,
/// so this enforces the initialize/shutdown ordering contract rather
/// than freeing anything itself.
pub fn shutdown() {
    SHUT.call_once(|| {
        assert!(
            INIT_DONE.load(Ordering::Acquire),
            "TLS shutdown attempted before initialization",
        );
        SHUT_DONE.store(true, Ordering::Release);
    });
    assert!(SHUT_DONE.load(Ordering::Acquire));
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    // shutdown() is deliberately untested here: its effect is
    // process-wide and would poison every other test that builds a
    // TLS context in the same process.

    #[test]
    fn initialize_is_idempotent() {
        initialize();
        initialize();
        assert!(INIT_DONE.load(Ordering::Acquire));
    }
}

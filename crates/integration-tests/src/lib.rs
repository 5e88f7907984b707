//! # Integration Tests Crate
//!
//! End-to-end scenarios across the chain core: multiple nodes wired over
//! the in-memory loopback router, real stores in temp directories, real
//! task scheduling.
//!
//! ## Scenarios
//!
//! 1. **Genesis boot & restart**: a fresh directory boots to height 0 and a
//!    restart reproduces the identical head and block bodies.
//! 2. **Single producer**: the main cycle produces blocks on schedule and
//!    submitted transfers settle with the expected balances and nonces.
//! 3. **Advise propagation**: a produced block is accepted by the peer that
//!    did not produce it; every accepted block matches the leader rotation.
//! 4. **Missed advise**: a peer cut off from advises catches up again
//!    through head sync and the stash.
//! 5. **Fetch-based sync**: a node that boots late fetches the whole
//!    history from its peers through full validation.
//! 6. **Tampered block**: an advised block with a falsified transaction
//!    list leaves head and store untouched.

pub mod cluster;

#[cfg(test)]
mod scenarios;

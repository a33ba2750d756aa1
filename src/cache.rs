// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! In-memory memoization of whole-pass results.
//!
//! Running a pass over a test case is expensive but deterministic, so once
//! a pass has been driven to exhaustion we remember what it turned the
//! content into. Keys are content digests rather than the content itself;
//! the post-pass bytes are stored verbatim since they get written back out
//! on a hit. Nothing here is persisted across invocations.

use digest::OutputSizeUser;
use generic_array::GenericArray;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// The type used to compute content digests for cache keys.
pub type DigestComputer = Sha256;

/// The data emitted by [`DigestComputer`]: 32 bytes for SHA-256.
pub type DigestData = GenericArray<u8, <DigestComputer as OutputSizeUser>::OutputSize>;

fn digest_of(data: &[u8]) -> DigestData {
    let mut dc = DigestComputer::new();
    dc.update(data);
    dc.finalize()
}

/// Maps (pass identity, pre-pass content) to the bytes the pass left
/// behind. The pass identity includes the sub-mode argument, so related
/// sub-modes can never collide.
#[derive(Debug, Default)]
pub struct PassCache {
    entries: HashMap<String, HashMap<DigestData, Vec<u8>>>,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, pass_key: &str, before: &[u8]) -> Option<&[u8]> {
        self.entries
            .get(pass_key)?
            .get(&digest_of(before))
            .map(Vec::as_slice)
    }

    pub fn insert(&mut self, pass_key: &str, before: &[u8], after: Vec<u8>) {
        self.entries
            .entry(pass_key.to_owned())
            .or_default()
            .insert(digest_of(before), after);
    }
}

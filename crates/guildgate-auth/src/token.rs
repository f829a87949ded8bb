use std::collections::HashSet;
use std::sync::Mutex;

use rand::Rng;

const CONSONANTS: &[u8] = b"bcdfghjklmnpqrstvwxyz";
const VOWELS: &[u8] = b"aeiou";

/// Generates a pronounceable one-time word: 3 to 8 characters, consonants at
/// even indices, vowels at odd indices, each drawn uniformly.
pub fn generate_word() -> String {
    generate_word_with(&mut rand::rng())
}

fn generate_word_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let len = rng.random_range(3..=8);
    (0..len)
        .map(|i| {
            let alphabet = if i % 2 == 0 { CONSONANTS } else { VOWELS };
            alphabet[rng.random_range(0..alphabet.len())] as char
        })
        .collect()
}

/// Registry of single-use mobile login tokens.
///
/// Behind a trait so the web and bot layers can share one store and tests
/// can substitute a deterministic fake.
pub trait TokenStore: Send + Sync {
    /// Returns a new token distinct from every currently-outstanding one.
    fn issue(&self) -> String;
    /// Consumes the token if outstanding. A second redemption of the same
    /// value always fails.
    fn redeem(&self, token: &str) -> bool;
    /// Number of issued-but-unredeemed tokens.
    fn outstanding(&self) -> usize;
}

/// In-memory store. Outstanding tokens have no expiry and persist until
/// redeemed, matching the original deployment; `outstanding()` lets an
/// operator watch the set grow.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    issued: Mutex<HashSet<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn issue(&self) -> String {
        let mut issued = self.issued.lock().expect("token set lock poisoned");
        // The word space is large relative to the outstanding set, so this
        // terminates quickly; the lock is held across generate-and-insert so
        // concurrent issuance cannot collide.
        loop {
            let word = generate_word();
            if issued.insert(word.clone()) {
                return word;
            }
        }
    }

    fn redeem(&self, token: &str) -> bool {
        self.issued
            .lock()
            .expect("token set lock poisoned")
            .remove(token)
    }

    fn outstanding(&self) -> usize {
        self.issued.lock().expect("token set lock poisoned").len()
    }
}

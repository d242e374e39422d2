//! Unique display names for managed processes.
//!
//! Names have the form `<adjective>_<noun>`, where the noun is normally the
//! executable's base name (`curious_python`). Adjectives are drawn from a bag
//! without replacement. When the bag runs dry the noun is swapped for a generic
//! fallback (`program`, `script`, ...) and the bag is refilled. When the fallback
//! nouns are exhausted too, a random 8-character alphanumeric adjective is used,
//! which can be produced forever, so resolution always terminates.

use crate::error::Result;
use crate::registry::ProcessRegistry;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_ADJECTIVES: &[&str] = &[
    "curious", "gentle", "happy", "stubborn", "boring", "interesting", "funny", "weird",
    "surprising", "serious", "tender", "obvious", "great", "proud", "silent", "loud", "vacuous",
    "focused", "pretty", "slick", "tedious", "stubborn", "daring", "tenacious", "resilient",
    "rigorous", "friendly", "creative", "polite", "frank", "honest", "warm", "smart", "intriguing",
];

pub const DEFAULT_FALLBACK_NOUNS: &[&str] = &[
    "program", "application", "app", "code", "blob", "binary", "script",
];

/// Length of the random adjective used once both pools are exhausted.
pub const RANDOM_ADJECTIVE_LEN: usize = 8;

/// Lifetime of the name pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamePoolPolicy {
    /// Pools keep draining across resolutions for the life of the generator
    #[default]
    Persistent,
    /// Both pools are refilled at the start of every resolution
    ResetPerCall,
}

/// Stateful generator of `<adjective>_<noun>` names.
#[derive(Debug)]
pub struct NameGenerator {
    adjectives: Vec<String>,
    fallback_nouns: Vec<String>,
    adjective_bag: Vec<String>,
    noun_bag: Vec<String>,
    policy: NamePoolPolicy,
    rng: StdRng,
}

impl NameGenerator {
    /// Generator over the built-in word lists.
    pub fn new(policy: NamePoolPolicy) -> Self {
        Self::with_words(DEFAULT_ADJECTIVES, DEFAULT_FALLBACK_NOUNS, policy, StdRng::from_os_rng())
    }

    /// Deterministic generator, mostly for tests.
    pub fn seeded(policy: NamePoolPolicy, seed: u64) -> Self {
        Self::with_words(
            DEFAULT_ADJECTIVES,
            DEFAULT_FALLBACK_NOUNS,
            policy,
            StdRng::seed_from_u64(seed),
        )
    }

    pub fn with_words(
        adjectives: &[&str],
        fallback_nouns: &[&str],
        policy: NamePoolPolicy,
        rng: StdRng,
    ) -> Self {
        let adjectives: Vec<String> = adjectives.iter().map(|s| s.to_string()).collect();
        let fallback_nouns: Vec<String> = fallback_nouns.iter().map(|s| s.to_string()).collect();
        Self {
            adjective_bag: adjectives.clone(),
            noun_bag: fallback_nouns.clone(),
            adjectives,
            fallback_nouns,
            policy,
            rng,
        }
    }

    pub fn remaining_adjectives(&self) -> usize {
        self.adjective_bag.len()
    }

    pub fn remaining_nouns(&self) -> usize {
        self.noun_bag.len()
    }

    /// Resolve a name not currently used by any record in `registry`.
    ///
    /// The caller should hold the registry lock so the answer stays valid until
    /// its own record is written.
    pub fn resolve_unique_name(
        &mut self,
        base_name: &str,
        registry: &ProcessRegistry,
    ) -> Result<String> {
        self.resolve_with(base_name, |candidate| registry.is_name_in_use(candidate))
    }

    /// Resolve a name for which `is_taken` answers false.
    pub fn resolve_with<F>(&mut self, base_name: &str, mut is_taken: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        debug_assert!(!base_name.is_empty(), "base name must not be empty");

        if self.policy == NamePoolPolicy::ResetPerCall {
            self.adjective_bag = self.adjectives.clone();
            self.noun_bag = self.fallback_nouns.clone();
        }

        let mut noun = base_name.to_string();
        loop {
            let adjective = if !self.adjective_bag.is_empty() {
                take_random(&mut self.adjective_bag, &mut self.rng)
            } else if !self.noun_bag.is_empty() {
                // Same adjectives again, with a generic noun.
                noun = take_random(&mut self.noun_bag, &mut self.rng);
                self.adjective_bag = self.adjectives.clone();
                continue;
            } else {
                noun = base_name.to_string();
                (&mut self.rng)
                    .sample_iter(Alphanumeric)
                    .take(RANDOM_ADJECTIVE_LEN)
                    .map(char::from)
                    .collect()
            };

            let candidate = format!("{}_{}", adjective, noun);
            if !is_taken(&candidate)? {
                debug!(name = %candidate, "resolved unique process name");
                return Ok(candidate);
            }
            debug!(name = %candidate, "process name already in use, retrying");
        }
    }
}

fn take_random(bag: &mut Vec<String>, rng: &mut StdRng) -> String {
    let idx = rng.random_range(0..bag.len());
    bag.swap_remove(idx)
}

/// Noun used for an executable: its file name without directories.
pub fn base_name(executable: &str) -> &str {
    let trimmed = executable.trim_end_matches(['/', '\\']);
    let name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    if name.is_empty() { executable } else { name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn generator(adjectives: &[&str], nouns: &[&str]) -> NameGenerator {
        NameGenerator::with_words(
            adjectives,
            nouns,
            NamePoolPolicy::Persistent,
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_name_shape() {
        let mut names = NameGenerator::seeded(NamePoolPolicy::Persistent, 1);
        let name = names.resolve_with("echo", |_| Ok(false)).unwrap();
        let (adjective, noun) = name.split_once('_').unwrap();
        assert_eq!(noun, "echo");
        assert!(DEFAULT_ADJECTIVES.contains(&adjective));
    }

    #[test]
    fn test_adjective_exhaustion_falls_back_to_noun() {
        let mut names = generator(&["a", "b"], &["x"]);

        let first = names.resolve_with("prog", |_| Ok(false)).unwrap();
        let second = names.resolve_with("prog", |_| Ok(false)).unwrap();
        assert!(first.ends_with("_prog") && second.ends_with("_prog"));
        assert_ne!(first, second);
        assert_eq!(names.remaining_adjectives(), 0);

        let third = names.resolve_with("prog", |_| Ok(false)).unwrap();
        assert!(third == "a_x" || third == "b_x", "got {}", third);
        assert_eq!(names.remaining_nouns(), 0);
        assert_eq!(names.remaining_adjectives(), 1);
    }

    #[test]
    fn test_collisions_walk_the_ladder() {
        let mut names = generator(&["a", "b"], &["x", "y"]);
        let taken: HashSet<&str> = ["a_prog", "b_prog", "a_x", "b_x"].into();

        let name = names.resolve_with("prog", |c| Ok(taken.contains(c))).unwrap();
        assert!(name == "a_y" || name == "b_y", "got {}", name);
    }

    #[test]
    fn test_exhausted_pools_still_terminate() {
        let mut names = generator(&[], &[]);
        let mut rejected = 0;
        let name = names
            .resolve_with("prog", |_| {
                rejected += 1;
                Ok(rejected <= 5)
            })
            .unwrap();

        let (adjective, noun) = name.split_once('_').unwrap();
        assert_eq!(noun, "prog");
        assert_eq!(adjective.len(), RANDOM_ADJECTIVE_LEN);
        assert!(adjective.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_fallback_restores_base_noun() {
        let mut names = generator(&["a"], &["x"]);
        let taken: HashSet<&str> = ["a_prog", "a_x"].into();
        let name = names.resolve_with("prog", |c| Ok(taken.contains(c))).unwrap();
        assert!(name.ends_with("_prog"));
        assert_eq!(name.len(), RANDOM_ADJECTIVE_LEN + "_prog".len());
    }

    #[test]
    fn test_resolve_against_registry_skips_live_names() {
        use crate::registry::LockOptions;

        let dir = tempfile::tempdir().unwrap();
        let registry = ProcessRegistry::new(dir.path(), LockOptions::default());
        let lock = registry.lock().unwrap();
        let _entry = registry
            .create_record(lock, 11, "a_prog", &["prog".to_string()], "/p")
            .unwrap();

        let mut names = generator(&["a", "b"], &[]);
        assert_eq!(names.resolve_unique_name("prog", &registry).unwrap(), "b_prog");
    }

    #[test]
    fn test_reset_per_call_refills_pools() {
        let mut names = NameGenerator::with_words(
            &["a"],
            &["x"],
            NamePoolPolicy::ResetPerCall,
            StdRng::seed_from_u64(3),
        );
        assert_eq!(names.resolve_with("prog", |_| Ok(false)).unwrap(), "a_prog");
        assert_eq!(names.resolve_with("prog", |_| Ok(false)).unwrap(), "a_prog");
    }

    #[test]
    fn test_lookup_errors_propagate() {
        let mut names = generator(&["a"], &[]);
        let err = names
            .resolve_with("prog", |_| Err(crate::EnvrunError::invalid_input("boom")))
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/usr/bin/python3"), "python3");
        assert_eq!(base_name("echo"), "echo");
        assert_eq!(base_name("./scripts/run.sh"), "run.sh");
        assert_eq!(base_name("C:\\tools\\app.exe"), "app.exe");
    }

    proptest! {
        #[test]
        fn prop_sequential_names_are_distinct(count in 1usize..120, seed in any::<u64>()) {
            let mut names = NameGenerator::seeded(NamePoolPolicy::Persistent, seed);
            let mut live: HashSet<String> = HashSet::from(["curious_echo".to_string()]);

            for _ in 0..count {
                let name = names.resolve_with("echo", |c| Ok(live.contains(c))).unwrap();
                prop_assert!(live.insert(name));
            }
        }
    }
}

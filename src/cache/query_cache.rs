//! Answer cache keyed by alpha-equivalence class.
//!
//! Entries are bucketed by [`alpha_hash`] and confirmed with
//! [`alpha_unifier`], so `$x isa person` and `$y isa person` share one
//! entry. Answers are stored in the variables of the entry's representative
//! query and renamed on the way in and out.
//!
//! An entry is trusted only once it is marked complete. While a recursive
//! component is still being resolved its entries are partial; a failed
//! resolution discards every partial entry.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::answer::ConceptMap;
use crate::atom::{Atomic, Unifier, alpha_hash, alpha_unifier, display_atomics};
use crate::error::CacheError;

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

/// Identity of an atomic query for caching: its atomics plus whether type
/// inference shaped them.
#[derive(Debug, Clone)]
pub struct CacheKey {
    atomics: Vec<Atomic>,
    infer_types: bool,
    hash: u64,
}

impl CacheKey {
    pub fn new(atomics: Vec<Atomic>, infer_types: bool) -> Self {
        let hash = alpha_hash(&atomics);
        Self {
            atomics,
            infer_types,
            hash,
        }
    }

    pub fn atomics(&self) -> &[Atomic] {
        &self.atomics
    }

    pub fn infer_types(&self) -> bool {
        self.infer_types
    }

    /// The same query without id predicates, if it has any.
    pub fn generalized(&self) -> Option<CacheKey> {
        if !self.atomics.iter().any(|a| matches!(a, Atomic::Id(_))) {
            return None;
        }
        let atomics = self
            .atomics
            .iter()
            .filter(|a| !matches!(a, Atomic::Id(_)))
            .cloned()
            .collect();
        Some(CacheKey::new(atomics, self.infer_types))
    }

    /// Bindings fixed by the key's id predicates.
    pub fn id_bindings(&self) -> ConceptMap {
        ConceptMap::from_pairs(self.atomics.iter().filter_map(|a| match a {
            Atomic::Id(p) => Some((p.var.clone(), p.id)),
            _ => None,
        }))
    }

    fn bucket(&self) -> (u64, bool) {
        (self.hash, self.infer_types)
    }

    /// Labels and atom kinds, ignoring variables. Alpha-equivalent keys
    /// always share a signature.
    fn signature(&self) -> Vec<String> {
        let mut sig: Vec<String> = self
            .atomics
            .iter()
            .map(|a| format!("{:?}:{}", a.kind(), a.label().map_or("", |l| l.as_str())))
            .collect();
        sig.sort();
        sig
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_atomics(&self.atomics))
    }
}

/// A resolved reference to a cache entry, with the renamings between the
/// caller's query and the entry's representative.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    bucket: (u64, bool),
    index: usize,
    to_representative: Unifier,
    from_representative: Unifier,
}

impl CacheSlot {
    /// Whether two slots name the same entry.
    pub fn same_entry(&self, other: &CacheSlot) -> bool {
        self.bucket == other.bucket && self.index == other.index
    }
}

#[derive(Debug)]
struct CacheEntry {
    representative: Vec<Atomic>,
    answers: Vec<ConceptMap>,
    index: HashSet<ConceptMap>,
    complete: bool,
    explained: bool,
}

/// Per-context answer cache for atomic queries.
#[derive(Debug, Default)]
pub struct QueryCache {
    buckets: HashMap<(u64, bool), Vec<CacheEntry>>,
    /// Structural signature → buckets holding entries with it.
    signatures: HashMap<Vec<String>, HashSet<(u64, bool)>>,
    stats: CacheStats,
    generation: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of entries, complete or not.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changes whenever any entry gains an answer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.signatures.clear();
    }

    /// Find the entry for `key`'s alpha-equivalence class.
    pub fn find(&self, key: &CacheKey) -> Option<CacheSlot> {
        let bucket = self.buckets.get(&key.bucket())?;
        bucket.iter().enumerate().find_map(|(index, entry)| {
            let to_representative = alpha_unifier(&key.atomics, &entry.representative)?;
            Some(CacheSlot {
                bucket: key.bucket(),
                index,
                from_representative: to_representative.inverse(),
                to_representative,
            })
        })
    }

    /// Find or create the entry for `key`.
    ///
    /// Creating an entry checks that no alpha-equivalent entry sits under a
    /// different fingerprint.
    pub fn slot(&mut self, key: &CacheKey, explained: bool) -> Result<CacheSlot, CacheError> {
        if let Some(slot) = self.find(key) {
            return Ok(slot);
        }
        let signature = key.signature();
        if let Some(buckets) = self.signatures.get(&signature) {
            // Only entries under the same inference setting can clash.
            let others = buckets
                .iter()
                .filter(|b| b.1 == key.infer_types && **b != key.bucket());
            for bucket in others {
                let clash = self.buckets.get(bucket).is_some_and(|entries| {
                    entries
                        .iter()
                        .any(|e| alpha_unifier(&key.atomics, &e.representative).is_some())
                });
                if clash {
                    return Err(CacheError::Inconsistency {
                        query: key.to_string(),
                    });
                }
            }
        }

        let entries = self.buckets.entry(key.bucket()).or_default();
        entries.push(CacheEntry {
            representative: key.atomics.clone(),
            answers: Vec::new(),
            index: HashSet::new(),
            complete: false,
            explained,
        });
        self.signatures.entry(signature).or_default().insert(key.bucket());
        let identity: Unifier = Unifier::new(
            key.atomics
                .iter()
                .flat_map(Atomic::variables)
                .map(|v| (v.clone(), v))
                .collect(),
        );
        Ok(CacheSlot {
            bucket: key.bucket(),
            index: entries.len() - 1,
            from_representative: identity.clone(),
            to_representative: identity,
        })
    }

    /// Answers of a complete entry, counting a hit or a miss.
    ///
    /// An entry without explanations does not satisfy a request for them.
    pub fn lookup(&mut self, key: &CacheKey, explain: bool) -> Option<Vec<ConceptMap>> {
        let found = self.peek(key, explain);
        self.note_lookup(key, found.is_some());
        found
    }

    /// Like [`QueryCache::lookup`] without touching the counters.
    pub fn peek(&self, key: &CacheKey, explain: bool) -> Option<Vec<ConceptMap>> {
        self.find(key)
            .filter(|slot| self.entry(slot).is_some_and(|e| e.complete && (e.explained || !explain)))
            .map(|slot| self.answers(&slot))
    }

    /// Count one probe outcome.
    pub fn note_lookup(&mut self, key: &CacheKey, hit: bool) {
        if hit {
            self.stats.hits += 1;
            tracing::debug!(query = %key, "query cache hit");
        } else {
            self.stats.misses += 1;
            tracing::debug!(query = %key, "query cache miss");
        }
    }

    fn entry(&self, slot: &CacheSlot) -> Option<&CacheEntry> {
        self.buckets.get(&slot.bucket)?.get(slot.index)
    }

    fn entry_mut(&mut self, slot: &CacheSlot) -> Option<&mut CacheEntry> {
        self.buckets.get_mut(&slot.bucket)?.get_mut(slot.index)
    }

    /// Answers recorded so far, in the caller's variables.
    pub fn answers(&self, slot: &CacheSlot) -> Vec<ConceptMap> {
        self.entry(slot).map_or_else(Vec::new, |e| {
            e.answers
                .iter()
                .map(|a| slot.from_representative.apply(a))
                .collect()
        })
    }

    pub fn answer_count(&self, slot: &CacheSlot) -> usize {
        self.entry(slot).map_or(0, |e| e.answers.len())
    }

    /// Record an answer given in the caller's variables. Returns whether it
    /// was new.
    pub fn record(&mut self, slot: &CacheSlot, answer: &ConceptMap) -> bool {
        let stored = slot.to_representative.apply(answer);
        let Some(entry) = self.entry_mut(slot) else {
            return false;
        };
        if entry.index.contains(&stored) {
            return false;
        }
        entry.index.insert(stored.clone());
        entry.answers.push(stored);
        self.generation += 1;
        true
    }

    pub fn is_complete(&self, slot: &CacheSlot) -> bool {
        self.entry(slot).is_some_and(|e| e.complete)
    }

    pub fn is_explained(&self, slot: &CacheSlot) -> bool {
        self.entry(slot).is_some_and(|e| e.explained)
    }

    /// Mark an entry as fully resolved.
    pub fn complete(&mut self, slot: &CacheSlot) {
        let newly_complete = match self.entry_mut(slot) {
            Some(entry) if !entry.complete => {
                entry.complete = true;
                true
            }
            _ => false,
        };
        if newly_complete {
            self.stats.stores += 1;
        }
    }

    /// Empty an entry so it is resolved again, e.g. to gather explanations.
    pub fn reset(&mut self, slot: &CacheSlot, explained: bool) {
        if let Some(entry) = self.entry_mut(slot) {
            entry.answers.clear();
            entry.index.clear();
            entry.complete = false;
            entry.explained = explained;
        }
    }

    /// Drop every entry that was never completed.
    pub fn discard_incomplete(&mut self) {
        let mut dropped = 0usize;
        for entries in self.buckets.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.complete);
            dropped += before - entries.len();
        }
        self.buckets.retain(|_, entries| !entries.is_empty());
        if dropped > 0 {
            tracing::debug!(dropped, "discarded incomplete cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::ConceptId;
    use crate::pattern::{Pattern, Variable, VariableGenerator};

    fn key(patterns: Vec<Pattern>) -> CacheKey {
        let mut generator = VariableGenerator::new();
        let atomics = patterns
            .into_iter()
            .flat_map(|p| match p {
                Pattern::Statement(s) => Atomic::from_statement(&s, &mut generator),
                _ => Vec::new(),
            })
            .collect();
        CacheKey::new(atomics, true)
    }

    fn answer(var: &str, id: u64) -> ConceptMap {
        ConceptMap::from_pairs([(Variable::new(var), ConceptId::new(id).unwrap())])
    }

    #[test]
    fn alpha_equivalent_queries_share_an_entry() {
        let mut cache = QueryCache::new();
        let kx = key(vec![Pattern::isa("x", "person")]);
        let ky = key(vec![Pattern::isa("y", "person")]);

        let slot = cache.slot(&kx, false).unwrap();
        assert!(cache.record(&slot, &answer("x", 1)));
        assert!(!cache.record(&slot, &answer("x", 1)));
        cache.complete(&slot);

        let answers = cache.lookup(&ky, false).unwrap();
        assert_eq!(answers, vec![answer("y", 1)]);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().stores, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn partial_entries_are_not_hits() {
        let mut cache = QueryCache::new();
        let k = key(vec![Pattern::isa("x", "person")]);
        let slot = cache.slot(&k, false).unwrap();
        cache.record(&slot, &answer("x", 1));
        assert!(cache.lookup(&k, false).is_none());
        assert_eq!(cache.stats().misses, 1);
        cache.discard_incomplete();
        assert!(cache.is_empty());
    }

    #[test]
    fn unexplained_entries_do_not_serve_explanations() {
        let mut cache = QueryCache::new();
        let k = key(vec![Pattern::isa("x", "person")]);
        let slot = cache.slot(&k, false).unwrap();
        cache.complete(&slot);
        assert!(cache.lookup(&k, true).is_none());
        cache.reset(&slot, true);
        assert!(cache.is_explained(&slot) && !cache.is_complete(&slot));
    }

    #[test]
    fn infer_types_flag_separates_entries() {
        let mut cache = QueryCache::new();
        let on = key(vec![Pattern::isa("x", "person")]);
        let off = CacheKey::new(on.atomics().to_vec(), false);
        let slot = cache.slot(&on, false).unwrap();
        cache.complete(&slot);
        assert!(cache.lookup(&off, false).is_none());

        // Both settings get their own entry without tripping the clash check.
        let other = cache.slot(&off, false).unwrap();
        assert!(!other.same_entry(&slot));
        assert!(!cache.is_complete(&other));
        assert_eq!(cache.len(), 2);
        assert!(cache.slot(&on, false).unwrap().same_entry(&slot));
    }

    #[test]
    fn generalized_key_drops_id_predicates() {
        let id = ConceptId::new(4).unwrap();
        let k = key(vec![Pattern::isa("x", "person"), Pattern::id("x", id)]);
        let general = k.generalized().unwrap();
        assert_eq!(general.atomics().len(), 1);
        assert_eq!(k.id_bindings().get(&Variable::new("x")), Some(id));
        assert!(general.generalized().is_none());
    }

    #[test]
    fn generation_advances_on_new_answers() {
        let mut cache = QueryCache::new();
        let k = key(vec![Pattern::isa("x", "person")]);
        let slot = cache.slot(&k, false).unwrap();
        let g0 = cache.generation();
        cache.record(&slot, &answer("x", 1));
        assert!(cache.generation() > g0);
        let g1 = cache.generation();
        cache.record(&slot, &answer("x", 1));
        assert_eq!(cache.generation(), g1);
    }
}

//! Content-derived signatures and the signature registry.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::category::profile;
use super::node::Tier;
use super::sigil_cache::{CacheStats, SigilCache};
use crate::metrics::METRICS;

/// Separator between the hashed fields.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Advisory metadata. Nothing depends on it for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigilDescriptor {
    /// Lexical diversity and length, in `[0, 1]`.
    pub complexity: f64,
    /// Partition-selection heuristic, in `[0, 1]`.
    pub resonance: f64,
    /// Characteristic frequency in `[1, 3]`, used for harmonic scoring.
    pub frequency: f64,
    /// Category glyph followed by tier glyph.
    pub glyphs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sigil {
    pub signature: String,
    pub descriptor: SigilDescriptor,
}

/// Persisted registry row (`sigil:<signature>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigilEntry {
    pub signature: String,
    pub memory_id: String,
}

/// Deterministic sigil for `(content, category, tier)`.
///
/// The signature is `<category glyph><tier glyph>-<16 hex>`, the hex being
/// the first 8 bytes of SHA-256 over the three fields.
pub fn generate_signature(content: &str, category: &str, tier: Tier) -> Sigil {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(category.as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(tier.as_str().as_bytes());
    let digest = hasher.finalize();

    let profile = profile(category);
    let glyphs: String = [profile.glyph, tier.glyph()].iter().collect();
    let signature = format!("{glyphs}-{}", hex::encode(&digest[..8]));

    let jitter = f64::from(digest[8]) / 255.0;
    let resonance = (0.7 * profile.resonance + 0.3 * jitter).clamp(0.0, 1.0);
    let freq_bits = u16::from_be_bytes([digest[10], digest[11]]);
    let frequency = 1.0 + 2.0 * f64::from(freq_bits) / f64::from(u16::MAX);

    Sigil {
        signature,
        descriptor: SigilDescriptor {
            complexity: complexity(content),
            resonance,
            frequency,
            glyphs,
        },
    }
}

fn complexity(content: &str) -> f64 {
    let len = content.chars().count();
    if len == 0 {
        return 0.0;
    }
    let distinct = content.chars().collect::<BTreeSet<_>>().len();
    let diversity = (distinct as f64 / len.min(64) as f64).min(1.0);
    let length = (len as f64 / 512.0).min(1.0);
    0.6 * diversity + 0.4 * length
}

/// Signature → memory id map, fronted by an LFU cache.
#[derive(Debug, Clone)]
pub struct SigilIndex {
    registry: HashMap<String, String>,
    cache: SigilCache,
}

impl SigilIndex {
    pub fn new(cache_size: usize) -> Self {
        Self {
            registry: HashMap::new(),
            cache: SigilCache::new(cache_size),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.registry.contains_key(signature)
    }

    /// Owner of `signature` without touching the cache.
    pub fn owner(&self, signature: &str) -> Option<&str> {
        self.registry.get(signature).map(String::as_str)
    }

    /// Signature `memory_id` should register under.
    ///
    /// Returns `base` unless another node already owns it, in which case the
    /// first free `base~N` (N ≥ 2) is returned.
    pub fn claim(&self, base: &str, memory_id: &str) -> String {
        match self.registry.get(base) {
            None => return base.to_string(),
            Some(owner) if owner == memory_id => return base.to_string(),
            Some(_) => {}
        }
        (2u64..)
            .map(|n| format!("{base}~{n}"))
            .find(|candidate| {
                self.registry
                    .get(candidate)
                    .map_or(true, |owner| owner == memory_id)
            })
            .unwrap_or_else(|| base.to_string())
    }

    pub fn register(&mut self, signature: &str, memory_id: &str) {
        self.registry
            .insert(signature.to_string(), memory_id.to_string());
    }

    /// Resolve a signature, cache first.
    pub fn lookup(&mut self, signature: &str) -> Option<String> {
        if let Some(id) = self.cache.get(signature) {
            METRICS.inc_sigil_cache_hits();
            return Some(id);
        }
        METRICS.inc_sigil_cache_misses();
        let id = self.registry.get(signature)?.clone();
        self.cache.insert(signature, &id);
        Some(id)
    }

    pub fn unregister(&mut self, signature: &str) -> Option<String> {
        self.cache.remove(signature);
        self.registry.remove(signature)
    }

    pub fn entries(&self) -> impl Iterator<Item = SigilEntry> + '_ {
        self.registry.iter().map(|(signature, memory_id)| SigilEntry {
            signature: signature.clone(),
            memory_id: memory_id.clone(),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic() {
        let a = generate_signature("note-1", "general", Tier::Shallow);
        let b = generate_signature("note-1", "general", Tier::Shallow);
        assert_eq!(a, b);
        assert!(a.signature.starts_with("GL-"));
        assert_eq!(a.signature.len(), 3 + 16);
    }

    #[test]
    fn test_signature_varies_with_each_input() {
        let base = generate_signature("note-1", "general", Tier::Shallow).signature;
        assert_ne!(
            base,
            generate_signature("note-2", "general", Tier::Shallow).signature
        );
        assert_ne!(
            base,
            generate_signature("note-1", "technical", Tier::Shallow).signature
        );
        assert_ne!(
            base,
            generate_signature("note-1", "general", Tier::Deep).signature
        );
    }

    #[test]
    fn test_descriptor_ranges() {
        let sigil = generate_signature("a fairly ordinary sentence", "creative", Tier::Core);
        let d = &sigil.descriptor;
        assert!((0.0..=1.0).contains(&d.complexity));
        assert!((0.0..=1.0).contains(&d.resonance));
        assert!((1.0..=3.0).contains(&d.frequency));
        assert_eq!(d.glyphs, "CC");
        assert_eq!(generate_signature("", "general", Tier::Surface).descriptor.complexity, 0.0);
    }

    #[test]
    fn test_claim_suffixes_on_collision() {
        let mut index = SigilIndex::new(8);
        index.register("GL-00", "a");
        assert_eq!(index.claim("GL-00", "a"), "GL-00");
        assert_eq!(index.claim("GL-00", "b"), "GL-00~2");
        index.register("GL-00~2", "b");
        assert_eq!(index.claim("GL-00", "c"), "GL-00~3");
    }

    #[test]
    fn test_lookup_fills_cache() {
        let mut index = SigilIndex::new(8);
        index.register("GL-00", "a");
        assert_eq!(index.lookup("GL-00").as_deref(), Some("a"));
        assert_eq!(index.lookup("GL-00").as_deref(), Some("a"));
        let stats = index.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.len, 1);

        assert_eq!(index.unregister("GL-00").as_deref(), Some("a"));
        assert!(index.lookup("GL-00").is_none());
        assert_eq!(index.cache_stats().len, 0);
    }
}

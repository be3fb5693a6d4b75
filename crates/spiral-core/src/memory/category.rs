//! Category lookup tables.
//!
//! Categories are free-form strings. The ones listed here carry tuned
//! glyphs and growth-curve affinities; anything else falls back to a neutral
//! profile.

use super::node::Tier;
use super::partition::GrowthCurve::{self, Exponential, Linear, Logarithmic, PowerLaw, SquareRoot};

/// Static per-category tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryProfile {
    pub name: &'static str,
    /// First character of every signature in this category.
    pub glyph: char,
    /// Baseline for the sigil resonance heuristic.
    pub resonance: f64,
    /// Compatibility with each growth curve, in `[0, 1]`.
    pub affinities: [(GrowthCurve, f64); 5],
}

impl CategoryProfile {
    /// Compatibility between this category and `curve`.
    pub fn affinity(&self, curve: GrowthCurve) -> f64 {
        self.affinities
            .iter()
            .find(|(c, _)| *c == curve)
            .map(|(_, a)| *a)
            .unwrap_or(0.5)
    }
}

static PROFILES: [CategoryProfile; 6] = [
    CategoryProfile {
        name: "general",
        glyph: 'G',
        resonance: 0.5,
        affinities: [
            (SquareRoot, 1.0),
            (Linear, 0.8),
            (Logarithmic, 0.6),
            (PowerLaw, 0.5),
            (Exponential, 0.4),
        ],
    },
    CategoryProfile {
        name: "technical",
        glyph: 'T',
        resonance: 0.7,
        affinities: [
            (PowerLaw, 1.0),
            (Logarithmic, 0.8),
            (SquareRoot, 0.6),
            (Linear, 0.5),
            (Exponential, 0.4),
        ],
    },
    CategoryProfile {
        name: "personal",
        glyph: 'P',
        resonance: 0.6,
        affinities: [
            (Logarithmic, 1.0),
            (SquareRoot, 0.8),
            (Linear, 0.5),
            (PowerLaw, 0.4),
            (Exponential, 0.3),
        ],
    },
    CategoryProfile {
        name: "creative",
        glyph: 'C',
        resonance: 0.8,
        affinities: [
            (Exponential, 1.0),
            (PowerLaw, 0.7),
            (SquareRoot, 0.6),
            (Logarithmic, 0.4),
            (Linear, 0.3),
        ],
    },
    CategoryProfile {
        name: "factual",
        glyph: 'F',
        resonance: 0.4,
        affinities: [
            (Linear, 1.0),
            (SquareRoot, 0.8),
            (Logarithmic, 0.6),
            (PowerLaw, 0.5),
            (Exponential, 0.2),
        ],
    },
    CategoryProfile {
        name: "procedural",
        glyph: 'R',
        resonance: 0.55,
        affinities: [
            (Linear, 0.9),
            (PowerLaw, 0.8),
            (SquareRoot, 0.6),
            (Logarithmic, 0.5),
            (Exponential, 0.3),
        ],
    },
];

static FALLBACK: CategoryProfile = CategoryProfile {
    name: "other",
    glyph: 'X',
    resonance: 0.5,
    affinities: [
        (SquareRoot, 0.6),
        (Linear, 0.5),
        (Logarithmic, 0.5),
        (PowerLaw, 0.5),
        (Exponential, 0.5),
    ],
};

/// Profile for `category` (case-insensitive), or the neutral fallback.
pub fn profile(category: &str) -> &'static CategoryProfile {
    let category = category.trim();
    PROFILES
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(category))
        .unwrap_or(&FALLBACK)
}

/// How strongly a tier favours each curve when a partition is created for it.
fn tier_affinity(tier: Tier, curve: GrowthCurve) -> f64 {
    match (tier, curve) {
        (Tier::Surface, Exponential) | (Tier::Surface, Linear) => 0.3,
        (Tier::Shallow, SquareRoot) => 0.3,
        (Tier::Deep, PowerLaw) => 0.3,
        (Tier::Core, Logarithmic) | (Tier::Permanent, Logarithmic) => 0.3,
        (Tier::Core, SquareRoot) => 0.15,
        _ => 0.0,
    }
}

/// Curve for a new partition created for `(category, tier)`.
///
/// Ties resolve in `GrowthCurve::ALL` order, so the choice is deterministic.
pub fn preferred_curve(category: &str, tier: Tier) -> GrowthCurve {
    let profile = profile(category);
    let mut best = GrowthCurve::ALL[0];
    let mut best_score = f64::MIN;
    for curve in GrowthCurve::ALL {
        let score = profile.affinity(curve) + tier_affinity(tier, curve);
        if score > best_score {
            best = curve;
            best_score = score;
        }
    }
    best
}

//! Linear substring search over live nodes.

use serde::{Deserialize, Serialize};

use super::node::{MemoryNode, Tier};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

const MATCH_WEIGHT: f64 = 10.0;
const STRENGTH_WEIGHT: f64 = 5.0;
const ACCESS_WEIGHT: f64 = 0.5;
const ACCESS_CAP: u64 = 10;

/// Filter and limit for [`crate::MemoryEngine::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring. Empty matches every node.
    pub text: String,
    pub category: Option<String>,
    pub tier: Option<Tier>,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            category: None,
            tier: None,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Relevance of `node` for a lowercased needle, or `None` if it does not match.
pub fn score_node(node: &MemoryNode, needle: &str) -> Option<f64> {
    let matches = if needle.is_empty() {
        0
    } else {
        let hits = node.content.to_lowercase().matches(needle).count();
        if hits == 0 {
            return None;
        }
        hits
    };
    Some(
        matches as f64 * MATCH_WEIGHT
            + node.strength * STRENGTH_WEIGHT
            + node.access_count.min(ACCESS_CAP) as f64 * ACCESS_WEIGHT,
    )
}

/// Top `query.limit` nodes, best first. Ties go to the most recently accessed.
pub fn rank<'a>(nodes: impl Iterator<Item = &'a MemoryNode>, query: &SearchQuery) -> Vec<MemoryNode> {
    let needle = query.text.trim().to_lowercase();
    let mut scored: Vec<(f64, &MemoryNode)> = nodes
        .filter(|n| {
            query
                .category
                .as_deref()
                .map_or(true, |c| n.category.eq_ignore_ascii_case(c))
        })
        .filter(|n| query.tier.map_or(true, |t| n.tier == t))
        .filter_map(|n| score_node(n, &needle).map(|s| (s, n)))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa)
            .then_with(|| b.last_accessed.cmp(&a.last_accessed))
            .then_with(|| a.id.cmp(&b.id))
    });
    scored
        .into_iter()
        .take(query.limit)
        .map(|(_, n)| n.clone())
        .collect()
}

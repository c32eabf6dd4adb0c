//! BotExpertise — per-(bot, domain) confidence estimator (spec 4.3).
//!
//! Maintains a cumulative success/total count per `(bot_id, domain)` key.
//! The score cache mirrors every write, so reads never touch storage
//! directly; `durable` persistence (if wired) happens alongside the
//! in-memory update rather than replacing it, following the memory
//! engine's write-through cache idiom.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Cumulative interaction counts for one `(bot_id, domain)` pair.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    successes: u64,
    total: u64,
}

impl Tally {
    fn score(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let score = self.successes as f64 / self.total as f64;
        score
    }
}

/// Per-bot, per-domain expertise tracker.
#[derive(Clone, Default)]
pub struct BotExpertise {
    tallies: Arc<RwLock<HashMap<(String, String), Tally>>>,
}

impl BotExpertise {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interaction outcome for `bot_id` in `domain`.
    ///
    /// The first interaction for a key initialises the tally as if a
    /// single outcome had already occurred, so an immediate
    /// `get_expertise_score` reads `1.0` on first success or `0.0` on
    /// first failure.
    pub async fn record_interaction(&self, bot_id: &str, domain: &str, successful: bool) {
        let key = (bot_id.to_owned(), domain.to_owned());
        let mut tallies = self.tallies.write().await;
        let tally = tallies.entry(key).or_default();
        tally.total += 1;
        if successful {
            tally.successes += 1;
        }
    }

    /// Current expertise score for `bot_id` in `domain`, in `[0, 1]`.
    ///
    /// A bot with no recorded interactions scores `0.0`.
    pub async fn get_expertise_score(&self, bot_id: &str, domain: &str) -> f64 {
        let key = (bot_id.to_owned(), domain.to_owned());
        self.tallies
            .read()
            .await
            .get(&key)
            .map_or(0.0, Tally::score)
    }

    /// Pick the highest-scoring candidate for `domain`.
    ///
    /// Ties are broken by first-in-list order. Returns `None` for an
    /// empty candidate list.
    pub async fn get_best_bot_for_domain(
        &self,
        domain: &str,
        candidates: &[String],
    ) -> Option<String> {
        let tallies = self.tallies.read().await;
        let mut best: Option<(&str, f64)> = None;
        for candidate in candidates {
            let score = tallies
                .get(&(candidate.clone(), domain.to_owned()))
                .map_or(0.0, Tally::score);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((candidate.as_str(), score)),
            }
        }
        best.map(|(id, _)| id.to_owned())
    }

    /// Full per-domain score report for `bot_id`.
    pub async fn get_expertise_report(&self, bot_id: &str) -> HashMap<String, f64> {
        self.tallies
            .read()
            .await
            .iter()
            .filter(|((id, _), _)| id == bot_id)
            .map(|((_, domain), tally)| (domain.clone(), tally.score()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_interaction_sets_extreme_score() {
        let expertise = BotExpertise::new();
        expertise
            .record_interaction("research", "research", true)
            .await;
        assert!((expertise.get_expertise_score("research", "research").await - 1.0).abs() < 1e-9);

        expertise
            .record_interaction("design", "design", false)
            .await;
        assert!((expertise.get_expertise_score("design", "design").await - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn best_bot_breaks_ties_by_first_in_list() {
        let expertise = BotExpertise::new();
        expertise
            .record_interaction("alpha", "research", true)
            .await;
        expertise
            .record_interaction("beta", "research", true)
            .await;
        let candidates = vec!["alpha".to_owned(), "beta".to_owned()];
        let best = expertise
            .get_best_bot_for_domain("research", &candidates)
            .await;
        assert_eq!(best, Some("alpha".to_owned()));
    }

    #[tokio::test]
    async fn empty_candidates_returns_none() {
        let expertise = BotExpertise::new();
        let best = expertise.get_best_bot_for_domain("research", &[]).await;
        assert_eq!(best, None);
    }

    #[tokio::test]
    async fn score_converges_with_more_interactions() {
        let expertise = BotExpertise::new();
        for _ in 0..3 {
            expertise
                .record_interaction("research", "research", true)
                .await;
        }
        expertise
            .record_interaction("research", "research", false)
            .await;
        let score = expertise.get_expertise_score("research", "research").await;
        assert!((score - 0.75).abs() < 1e-9);
    }
}

//! UCB1 arm selection with forced cold-start exploration.
//!
//! `score_i = mean_i + c * sqrt(ln N / n_i)` where `N = sum(n_i)`.
//! Arms with fewer than `min_trials` observations (counting picks already
//! planned for the same day) are chosen before any score is compared.

use std::collections::HashMap;

use crate::common::ArmId;
use crate::kernel::EngagementMetrics;

use super::models::{ScheduleArm, SelectionReason};

#[derive(Debug, Clone)]
pub struct BanditConfig {
    /// Exploration weight `c`
    pub exploration: f64,
    pub min_trials: i64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            exploration: 1.5,
            min_trials: 5,
        }
    }
}

/// Observed statistics for one arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmStats {
    pub arm_id: ArmId,
    pub trials: i64,
    pub mean: f64,
}

impl ArmStats {
    pub fn new(arm_id: ArmId, trials: i64, mean: f64) -> Self {
        Self {
            arm_id,
            trials,
            mean,
        }
    }

    /// Running-mean update for one more reward.
    pub fn ingest(&mut self, reward: f64) {
        self.trials += 1;
        self.mean += (reward - self.mean) / self.trials as f64;
    }
}

impl From<&ScheduleArm> for ArmStats {
    fn from(arm: &ScheduleArm) -> Self {
        Self::new(arm.id, arm.trials, arm.avg_engagement_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub arm_id: ArmId,
    pub reason: SelectionReason,
    /// UCB score; None for forced exploration
    pub score: Option<f64>,
}

pub fn ucb1_score(mean: f64, trials: i64, total_trials: i64, exploration: f64) -> f64 {
    if trials <= 0 {
        return f64::INFINITY;
    }
    let total = total_trials.max(1) as f64;
    mean + exploration * (total.ln() / trials as f64).sqrt()
}

/// Engagement rate in [0, inf). Zero views yields zero.
pub fn reward_from_metrics(metrics: &EngagementMetrics) -> f64 {
    if metrics.views <= 0 {
        return 0.0;
    }
    (metrics.likes + metrics.replies + metrics.reposts) as f64 / metrics.views as f64
}

/// Pick an arm from `candidates` (in insertion order).
///
/// `planned` counts picks already made for the same day; they only affect
/// the cold-start check so under-tried arms rotate instead of one arm
/// absorbing every forced slot.
pub fn select_arm(
    candidates: &[ArmStats],
    planned: &HashMap<ArmId, i64>,
    config: &BanditConfig,
) -> Option<Selection> {
    let effective = |arm: &ArmStats| arm.trials + planned.get(&arm.arm_id).copied().unwrap_or(0);

    let forced = candidates
        .iter()
        .filter(|arm| effective(*arm) < config.min_trials)
        .min_by_key(|arm| effective(*arm));
    if let Some(arm) = forced {
        return Some(Selection {
            arm_id: arm.arm_id,
            reason: SelectionReason::Exploration,
            score: None,
        });
    }

    let total: i64 = candidates.iter().map(|arm| arm.trials).sum();
    let mut best: Option<(f64, &ArmStats)> = None;
    for arm in candidates {
        let score = ucb1_score(arm.mean, arm.trials, total, config.exploration);
        let better = match best {
            None => true,
            Some((best_score, best_arm)) => {
                score > best_score || (score == best_score && arm.trials < best_arm.trials)
            }
        };
        if better {
            best = Some((score, arm));
        }
    }

    best.map(|(score, arm)| Selection {
        arm_id: arm.arm_id,
        reason: SelectionReason::Exploitation,
        score: Some(score),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arms(stats: &[(i64, f64)]) -> Vec<ArmStats> {
        stats
            .iter()
            .map(|&(n, mean)| ArmStats::new(ArmId::new(), n, mean))
            .collect()
    }

    #[test]
    fn under_tried_arm_is_forced_despite_lower_score() {
        let mut candidates = arms(&[(20, 0.5), (2, 0.9)]);
        let config = BanditConfig::default();
        let a = candidates[1].arm_id;

        for _ in 0..3 {
            let pick = select_arm(&candidates, &HashMap::new(), &config).unwrap();
            assert_eq!(pick.arm_id, a);
            assert_eq!(pick.reason, SelectionReason::Exploration);
            candidates[1].ingest(0.9);
        }

        assert_eq!(candidates[1].trials, 5);
        let pick = select_arm(&candidates, &HashMap::new(), &config).unwrap();
        assert_eq!(pick.reason, SelectionReason::Exploitation);
    }

    #[test]
    fn forced_ties_rotate_with_planned_picks() {
        let candidates = arms(&[(0, 0.0), (0, 0.0), (0, 0.0)]);
        let config = BanditConfig::default();
        let mut planned = HashMap::new();
        let mut picked = Vec::new();

        for _ in 0..4 {
            let pick = select_arm(&candidates, &planned, &config).unwrap();
            *planned.entry(pick.arm_id).or_insert(0) += 1;
            picked.push(pick.arm_id);
        }

        let ids: Vec<_> = candidates.iter().map(|a| a.arm_id).collect();
        assert_eq!(picked, vec![ids[0], ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn highest_score_wins_after_cold_start() {
        let candidates = arms(&[(10, 0.2), (10, 0.6), (10, 0.4)]);
        let pick = select_arm(&candidates, &HashMap::new(), &BanditConfig::default()).unwrap();
        assert_eq!(pick.arm_id, candidates[1].arm_id);
        assert!(pick.score.unwrap() > 0.6);
    }

    #[test]
    fn score_ties_prefer_fewer_trials_then_insertion_order() {
        // Same mean, equal bonus: insertion order decides.
        let equal = arms(&[(6, 0.3), (6, 0.3)]);
        let pick = select_arm(&equal, &HashMap::new(), &BanditConfig::default()).unwrap();
        assert_eq!(pick.arm_id, equal[0].arm_id);

        // Zero exploration weight makes the score the mean alone.
        let config = BanditConfig {
            exploration: 0.0,
            min_trials: 5,
        };
        let uneven = arms(&[(9, 0.3), (6, 0.3)]);
        let pick = select_arm(&uneven, &HashMap::new(), &config).unwrap();
        assert_eq!(pick.arm_id, uneven[1].arm_id);
    }

    #[test]
    fn exploration_bonus_shrinks_with_trials() {
        let few = ucb1_score(0.5, 5, 100, 1.5);
        let many = ucb1_score(0.5, 50, 100, 1.5);
        assert!(few > many);
        assert!(many > 0.5);
        assert_eq!(ucb1_score(0.1, 0, 10, 1.5), f64::INFINITY);
    }

    #[test]
    fn no_candidates_no_selection() {
        assert!(select_arm(&[], &HashMap::new(), &BanditConfig::default()).is_none());
    }

    #[test]
    fn running_mean() {
        let mut stats = ArmStats::new(ArmId::new(), 0, 0.0);
        for reward in [0.1, 0.2, 0.6] {
            stats.ingest(reward);
        }
        assert_eq!(stats.trials, 3);
        assert!((stats.mean - 0.3).abs() < 1e-12);
    }

    #[test]
    fn reward_is_interactions_per_view() {
        let metrics = EngagementMetrics {
            views: 200,
            likes: 10,
            replies: 4,
            reposts: 6,
        };
        assert!((reward_from_metrics(&metrics) - 0.1).abs() < 1e-12);
        assert_eq!(reward_from_metrics(&EngagementMetrics::default()), 0.0);
    }
}

//! Fairness policies and user ranking.
//!
//! Implements three policies:
//! - `pf`: proportional fair, potential^alpha / max(eps, average)
//! - `mr`: max rate, potential throughput only
//! - `rr`: round robin, fewest RBGs assigned in this iteration first

use std::cmp::Ordering;

use super::resources::Direction;
use super::ue_info::{LinkState, UserSchedulingRecord};
use super::PfError;

/// A ranking metric over one link direction. Higher = served first.
pub trait FairnessPolicy {
    fn name(&self) -> &'static str;

    fn metric(&self, link: &LinkState, epsilon: f64) -> f64;
}

/// Proportional fair policy with fairness exponent `alpha`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProportionalFair {
    pub alpha: f64,
}

impl Default for ProportionalFair {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl FairnessPolicy for ProportionalFair {
    fn name(&self) -> &'static str {
        "pf"
    }

    fn metric(&self, link: &LinkState, epsilon: f64) -> f64 {
        pf_metric(link.potential_tput, link.avg_tput, self.alpha, epsilon)
    }
}

/// Max-rate policy: ignores history.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MaxRate;

impl FairnessPolicy for MaxRate {
    fn name(&self) -> &'static str {
        "mr"
    }

    fn metric(&self, link: &LinkState, _epsilon: f64) -> f64 {
        link.potential_tput
    }
}

/// Round-robin policy: users with fewer RBGs in this iteration go first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RoundRobin;

impl FairnessPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "rr"
    }

    fn metric(&self, link: &LinkState, _epsilon: f64) -> f64 {
        -(link.rbg as f64)
    }
}

/// Policy selected by configuration string.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PolicyKind {
    ProportionalFair(ProportionalFair),
    MaxRate(MaxRate),
    RoundRobin(RoundRobin),
}

impl PolicyKind {
    /// Parse "pf", "mr" or "rr". `alpha` only applies to "pf".
    pub fn from_config(name: &str, alpha: f64) -> Result<Self, PfError> {
        match name {
            "pf" => Ok(Self::ProportionalFair(ProportionalFair { alpha })),
            "mr" => Ok(Self::MaxRate(MaxRate)),
            "rr" => Ok(Self::RoundRobin(RoundRobin)),
            _ => Err(PfError::UnknownPolicy(name.to_string())),
        }
    }
}

/// The proportional fair ratio.
///
/// The floor keeps a never-updated (zero) average from dividing by zero.
#[inline]
pub fn pf_metric(potential_tput: f64, avg_tput: f64, alpha: f64, epsilon: f64) -> f64 {
    potential_tput.powf(alpha) / avg_tput.max(epsilon)
}

/// Compare f64 values for sorting, treating NaN as equal.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Rank users by policy metric, best first.
///
/// Ties keep the input order, so callers pass users in their stable
/// attach order.
pub fn rank_users<'a, P, I>(policy: &P, users: I, dir: Direction, epsilon: f64) -> Vec<u16>
where
    P: FairnessPolicy,
    I: IntoIterator<Item = &'a UserSchedulingRecord>,
{
    let mut keyed: Vec<(f64, u16)> = users
        .into_iter()
        .map(|ue| (policy.metric(ue.link(dir), epsilon), ue.rnti))
        .collect();

    // Stable sort, descending metric
    keyed.sort_by(|a, b| cmp_f64(b.0, a.0));

    keyed.into_iter().map(|(_, rnti)| rnti).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn make_ue(rnti: u16, potential: f64, avg: f64) -> UserSchedulingRecord {
        let mut ue = UserSchedulingRecord::new(rnti, 10, 10);
        ue.dl.potential_tput = potential;
        ue.dl.avg_tput = avg;
        ue
    }

    #[test]
    fn test_pf_metric_ratio() {
        assert_eq!(pf_metric(100.0, 4.0, 1.0, EPS), 25.0);
        // Uninitialized average uses the floor instead of dividing by zero
        assert_eq!(pf_metric(1.0, 0.0, 1.0, EPS), 1.0 / EPS);
        assert!(pf_metric(1.0, 0.0, 1.0, EPS).is_finite());
    }

    #[test]
    fn test_pf_ranks_by_ratio() {
        let ues = vec![
            make_ue(1, 100.0, 50.0), // 2.0
            make_ue(2, 60.0, 10.0),  // 6.0
            make_ue(3, 90.0, 30.0),  // 3.0
        ];
        let order = rank_users(
            &ProportionalFair::default(),
            &ues,
            Direction::Downlink,
            EPS,
        );
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_pf_invariant_under_potential_scaling() {
        let ues = vec![
            make_ue(1, 100.0, 50.0),
            make_ue(2, 60.0, 10.0),
            make_ue(3, 90.0, 30.0),
            make_ue(4, 5.0, 0.0),
        ];
        let policy = ProportionalFair::default();
        let base = rank_users(&policy, &ues, Direction::Downlink, EPS);

        for scale in [0.001, 0.5, 3.0, 1e6] {
            let scaled: Vec<_> = ues
                .iter()
                .map(|u| make_ue(u.rnti, u.dl.potential_tput * scale, u.dl.avg_tput))
                .collect();
            assert_eq!(rank_users(&policy, &scaled, Direction::Downlink, EPS), base);
        }
    }

    #[test]
    fn test_pf_follows_average_changes() {
        let mut ues = vec![make_ue(1, 100.0, 10.0), make_ue(2, 100.0, 20.0)];
        let policy = ProportionalFair::default();
        assert_eq!(rank_users(&policy, &ues, Direction::Downlink, EPS), vec![1, 2]);

        ues[0].dl.avg_tput = 40.0;
        assert_eq!(rank_users(&policy, &ues, Direction::Downlink, EPS), vec![2, 1]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let ues = vec![make_ue(9, 10.0, 5.0), make_ue(3, 10.0, 5.0), make_ue(5, 10.0, 5.0)];
        let order = rank_users(&ProportionalFair::default(), &ues, Direction::Downlink, EPS);
        assert_eq!(order, vec![9, 3, 5]);
    }

    #[test]
    fn test_max_rate_ignores_history() {
        let ues = vec![make_ue(1, 10.0, 0.1), make_ue(2, 20.0, 1000.0)];
        assert_eq!(rank_users(&MaxRate, &ues, Direction::Downlink, EPS), vec![2, 1]);
    }

    #[test]
    fn test_round_robin_prefers_fewest_rbg() {
        let mut a = make_ue(1, 10.0, 1.0);
        a.dl.rbg = 2;
        let b = make_ue(2, 1.0, 1.0);
        assert_eq!(rank_users(&RoundRobin, [&a, &b], Direction::Downlink, EPS), vec![2, 1]);
    }

    #[test]
    fn test_alpha_zero_is_inverse_average() {
        let ues = vec![make_ue(1, 1000.0, 10.0), make_ue(2, 1.0, 5.0)];
        let policy = ProportionalFair { alpha: 0.0 };
        assert_eq!(rank_users(&policy, &ues, Direction::Downlink, EPS), vec![2, 1]);
    }

    #[test]
    fn test_policy_from_config() {
        assert_eq!(
            PolicyKind::from_config("pf", 2.0).unwrap(),
            PolicyKind::ProportionalFair(ProportionalFair { alpha: 2.0 })
        );
        assert_eq!(PolicyKind::from_config("rr", 1.0).unwrap(), PolicyKind::RoundRobin(RoundRobin));
        assert!(matches!(
            PolicyKind::from_config("fifo", 1.0),
            Err(PfError::UnknownPolicy(_))
        ));
    }
}

//! Per-iteration DL/UL allocation loop.
//!
//! One resource-block group (spanning every symbol of the iteration) is
//! handed out per step to the best-ranked user that still has data. Potential
//! throughput is recomputed before each step, and the winner's average is
//! refreshed against the aggregate assigned so far.

use pyo3::prelude::*;
use rustc_hash::FxHashMap;
use std::fmt;

use crate::amc::{Amc, McsTable, RateModel};
use crate::config::PfConfig;
use crate::{log_changes, log_checks, log_debug};

use super::policy::{rank_users, FairnessPolicy, PolicyKind};
use super::resources::{Direction, ResourceQuantity};
use super::ue_info::UserSchedulingRecord;
use super::PfError;

/// One user's share of an iteration, consumed by the transmission pipeline.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationDecision {
    #[pyo3(get)]
    pub rnti: u16,
    #[pyo3(get)]
    pub rbg: u32,
    #[pyo3(get)]
    pub sym: u32,
    #[pyo3(get)]
    pub mcs: u8,
    /// TB size in bits for the full assignment.
    #[pyo3(get)]
    pub tb_size: u32,
}

impl fmt::Display for AllocationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RNTI: {} RBG: {} Sym: {} MCS: {} TBS: {}",
            self.rnti, self.rbg, self.sym, self.mcs, self.tb_size
        )
    }
}

#[pymethods]
impl AllocationDecision {
    fn __repr__(&self) -> String {
        format!(
            "AllocationDecision(rnti={}, rbg={}, sym={}, mcs={}, tb_size={})",
            self.rnti, self.rbg, self.sym, self.mcs, self.tb_size
        )
    }
}

/// Outcome of one scheduling iteration.
#[derive(Clone, Debug, Default)]
pub struct IterationResult {
    /// Allocations in the order users were first served.
    pub decisions: Vec<AllocationDecision>,
    /// Users dropped from this iteration because of invalid input.
    pub rejected: Vec<(u16, PfError)>,
}

/// Outcome of a ranking query.
#[derive(Clone, Debug, Default)]
pub struct Ranking {
    /// RNTIs, highest priority first.
    pub order: Vec<u16>,
    /// Users left out because of invalid input.
    pub rejected: Vec<(u16, PfError)>,
}

/// DL/UL scheduler holding every attached user's record.
pub struct PfScheduler<R: RateModel> {
    config: PfConfig,
    policy: PolicyKind,
    rate: R,
    users: FxHashMap<u16, UserSchedulingRecord>,
    /// Attach order, the stable tie-breaker for ranking.
    attach_order: Vec<u16>,
}

impl PfScheduler<Amc> {
    /// Build a scheduler with the table-driven rate model named in the config.
    pub fn from_config(config: PfConfig) -> Result<Self, PfError> {
        let table = McsTable::from_index(config.mcs_table)
            .map_err(|e| PfError::InvalidConfig(e.to_string()))?;
        Self::new(config, Amc::new(table))
    }
}

impl<R: RateModel> PfScheduler<R> {
    pub fn new(config: PfConfig, rate: R) -> Result<Self, PfError> {
        if config.time_window < 1.0 {
            return Err(PfError::InvalidTimeWindow(config.time_window));
        }
        if config.rb_per_rbg == 0 {
            return Err(PfError::InvalidConfig("rb_per_rbg must be > 0".to_string()));
        }
        if config.epsilon.is_nan() || config.epsilon <= 0.0 {
            return Err(PfError::InvalidConfig("epsilon must be > 0".to_string()));
        }
        let policy = PolicyKind::from_config(&config.policy, config.fairness_index)?;

        Ok(Self {
            config,
            policy,
            rate,
            users: FxHashMap::default(),
            attach_order: Vec::new(),
        })
    }

    pub fn config(&self) -> &PfConfig {
        &self.config
    }

    pub fn attach_user(&mut self, rnti: u16, dl_mcs: u8, ul_mcs: u8) -> Result<(), PfError> {
        if self.users.contains_key(&rnti) {
            return Err(PfError::UserAlreadyAttached(rnti));
        }
        self.users
            .insert(rnti, UserSchedulingRecord::new(rnti, dl_mcs, ul_mcs));
        self.attach_order.push(rnti);
        log_changes!(self.config.verbosity, "Attached RNTI {}", rnti);
        Ok(())
    }

    pub fn detach_user(&mut self, rnti: u16) -> Option<UserSchedulingRecord> {
        self.attach_order.retain(|r| *r != rnti);
        let removed = self.users.remove(&rnti);
        if removed.is_some() {
            log_changes!(self.config.verbosity, "Detached RNTI {}", rnti);
        }
        removed
    }

    pub fn user(&self, rnti: u16) -> Option<&UserSchedulingRecord> {
        self.users.get(&rnti)
    }

    /// Attached users in attach order.
    pub fn users(&self) -> impl Iterator<Item = &UserSchedulingRecord> {
        self.attach_order.iter().filter_map(|r| self.users.get(r))
    }

    /// Replace the pending byte count of one direction.
    pub fn notify_buffer_status(
        &mut self,
        rnti: u16,
        dir: Direction,
        bytes: u32,
    ) -> Result<(), PfError> {
        let ue = self.users.get_mut(&rnti).ok_or(PfError::UnknownUser(rnti))?;
        ue.link_mut(dir).buffer_bytes = bytes;
        Ok(())
    }

    pub fn set_mcs(&mut self, rnti: u16, dir: Direction, mcs: u8) -> Result<(), PfError> {
        let ue = self.users.get_mut(&rnti).ok_or(PfError::UnknownUser(rnti))?;
        ue.link_mut(dir).mcs = mcs;
        Ok(())
    }

    /// Priority ordering of every attached user for `assignable` resources.
    ///
    /// Recomputes each user's potential throughput; averages are untouched.
    /// Users the rate model rejects are left out of the order and reported.
    pub fn rank(
        &mut self,
        dir: Direction,
        assignable: ResourceQuantity,
    ) -> Result<Ranking, PfError> {
        if assignable.sym == 0 {
            return Err(PfError::ZeroSymbols);
        }
        let rb_per_rbg = self.config.rb_per_rbg;
        let mut rejected: Vec<(u16, PfError)> = Vec::new();
        for rnti in &self.attach_order {
            if let Some(ue) = self.users.get_mut(rnti) {
                let potential = ue.calculate_potential_tput(dir, assignable, rb_per_rbg, &self.rate);
                if let Err(e) = potential {
                    log_checks!(self.config.verbosity, "Not ranking RNTI {}: {}", rnti, e);
                    rejected.push((*rnti, e));
                }
            }
        }
        let users = self
            .attach_order
            .iter()
            .filter(|r| !rejected.iter().any(|(bad, _)| bad == *r))
            .filter_map(|r| self.users.get(r));
        let order = match &self.policy {
            PolicyKind::ProportionalFair(p) => rank_users(p, users, dir, self.config.epsilon),
            PolicyKind::MaxRate(p) => rank_users(p, users, dir, self.config.epsilon),
            PolicyKind::RoundRobin(p) => rank_users(p, users, dir, self.config.epsilon),
        };
        Ok(Ranking { order, rejected })
    }

    /// Run one scheduling iteration over `available` resources.
    ///
    /// Users with an empty buffer do not take part. A user whose MCS the rate
    /// model rejects is dropped from this iteration and reported in
    /// `rejected`; the rest of the iteration proceeds.
    pub fn schedule_iteration(
        &mut self,
        dir: Direction,
        available: ResourceQuantity,
    ) -> Result<IterationResult, PfError> {
        let policy = self.policy;
        match policy {
            PolicyKind::ProportionalFair(p) => self.run_iteration(&p, dir, available),
            PolicyKind::MaxRate(p) => self.run_iteration(&p, dir, available),
            PolicyKind::RoundRobin(p) => self.run_iteration(&p, dir, available),
        }
    }

    fn run_iteration<P: FairnessPolicy>(
        &mut self,
        policy: &P,
        dir: Direction,
        available: ResourceQuantity,
    ) -> Result<IterationResult, PfError> {
        if available.sym == 0 {
            return Err(PfError::ZeroSymbols);
        }
        let verbosity = self.config.verbosity;
        let rb_per_rbg = self.config.rb_per_rbg;
        let time_window = self.config.time_window;
        let epsilon = self.config.epsilon;

        let active: Vec<u16> = self
            .attach_order
            .iter()
            .copied()
            .filter(|r| {
                self.users
                    .get(r)
                    .is_some_and(|ue| ue.link(dir).buffer_bytes > 0)
            })
            .collect();
        for rnti in &active {
            if let Some(ue) = self.users.get_mut(rnti) {
                ue.begin_iteration(dir);
            }
        }

        log_changes!(
            verbosity,
            "{} iteration ({}): {} with {} active users",
            dir,
            policy.name(),
            available,
            active.len()
        );

        let unit = ResourceQuantity::new(1, available.sym);
        let mut total = ResourceQuantity::default();
        let mut remaining = available.rbg;
        let mut candidates = active.clone();
        let mut served: Vec<u16> = Vec::new();
        let mut rejected: Vec<(u16, PfError)> = Vec::new();

        while remaining > 0 && !candidates.is_empty() {
            let mut invalid: Vec<u16> = Vec::new();
            for rnti in &candidates {
                let Some(ue) = self.users.get_mut(rnti) else {
                    continue;
                };
                if let Err(e) = ue.calculate_potential_tput(dir, unit, rb_per_rbg, &self.rate) {
                    log_checks!(verbosity, "  Dropping RNTI {}: {}", rnti, e);
                    invalid.push(*rnti);
                    rejected.push((*rnti, e));
                }
            }
            candidates.retain(|r| !invalid.contains(r));

            let order = rank_users(
                policy,
                candidates.iter().filter_map(|r| self.users.get(r)),
                dir,
                epsilon,
            );
            let Some(&winner) = order.first() else {
                break;
            };
            let Some(ue) = self.users.get_mut(&winner) else {
                break;
            };

            ue.assign(dir, unit);
            total += unit;
            remaining -= 1;
            ue.update_metric(dir, total, time_window, rb_per_rbg, &self.rate)?;

            if !served.contains(&winner) {
                served.push(winner);
            }

            let link = ue.link(dir);
            log_debug!(
                verbosity,
                "  RNTI {} +1 RBG (total {}): TBS {} curr {:.3} avg {:.3} metric {:.3}",
                winner,
                link.rbg,
                link.tb_size,
                link.curr_tput,
                link.avg_tput,
                policy.metric(link, epsilon)
            );

            if link.buffer_satisfied() {
                log_checks!(
                    verbosity,
                    "  RNTI {} buffer of {} bytes covered",
                    winner,
                    link.buffer_bytes
                );
                candidates.retain(|r| *r != winner);
            }
        }

        for rnti in &active {
            if served.contains(rnti) || rejected.iter().any(|(r, _)| r == rnti) {
                continue;
            }
            if let Some(ue) = self.users.get_mut(rnti) {
                ue.update_metric_unassigned(dir, time_window)?;
            }
        }

        let decisions: Vec<AllocationDecision> = served
            .iter()
            .filter_map(|r| self.users.get(r))
            .map(|ue| {
                let link = ue.link(dir);
                AllocationDecision {
                    rnti: ue.rnti,
                    rbg: link.rbg,
                    sym: link.sym,
                    mcs: link.mcs,
                    tb_size: link.tb_size,
                }
            })
            .collect();

        for d in &decisions {
            log_changes!(verbosity, "  {} {}", dir, d);
        }

        Ok(IterationResult {
            decisions,
            rejected,
        })
    }
}

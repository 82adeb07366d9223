use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Diagnostics of one outer iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Return of the iterate held after this iteration
    pub objective: f64,
    pub accepted: bool,

    /// GPS only
    pub kl: Option<f64>,
    pub kl_bound: Option<f64>,
    pub kl_mult: Option<f64>,
    pub alpha: Option<f64>,

    /// iLQR only
    pub lmbda: Option<f64>,
    pub step_size: Option<f64>,
}

impl IterationRecord {
    pub fn new(iteration: usize, objective: f64, accepted: bool) -> Self {
        IterationRecord {
            iteration,
            objective,
            accepted,
            kl: None,
            kl_bound: None,
            kl_mult: None,
            alpha: None,
            lmbda: None,
            step_size: None,
        }
    }

    pub fn with_trust_region(mut self, kl: f64, kl_bound: f64, kl_mult: f64, alpha: f64) -> Self {
        self.kl = Some(kl);
        self.kl_bound = Some(kl_bound);
        self.kl_mult = Some(kl_mult);
        self.alpha = Some(alpha);
        self
    }

    pub fn with_regularization(mut self, lmbda: f64, step_size: Option<f64>) -> Self {
        self.lmbda = Some(lmbda);
        self.step_size = step_size;
        self
    }
}

/// Bounded history of iteration records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationTrace {
    records: VecDeque<IterationRecord>,
    history_size: usize,
}

impl Default for OptimizationTrace {
    fn default() -> Self {
        OptimizationTrace::new(10_000)
    }
}

impl OptimizationTrace {
    pub fn new(history_size: usize) -> Self {
        OptimizationTrace {
            records: VecDeque::with_capacity(history_size.min(1024)),
            history_size: history_size.max(1),
        }
    }

    pub fn record(&mut self, record: IterationRecord) {
        if self.records.len() == self.history_size {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &IterationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.back()
    }

    pub fn objectives(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.objective).collect()
    }

    pub fn nb_accepted(&self) -> usize {
        self.records.iter().filter(|r| r.accepted).count()
    }

    /// Lowest objective among accepted iterations
    pub fn best_objective(&self) -> Option<f64> {
        self.records
            .iter()
            .filter(|r| r.accepted)
            .map(|r| r.objective)
            .fold(None, |best, v| match best {
                Some(b) if b <= v => Some(b),
                _ => Some(v),
            })
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

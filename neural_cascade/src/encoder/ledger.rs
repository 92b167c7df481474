//! Per-stage record of subsample indices.

use cascade_core::{compose_chain, CascadeError, IndexChainPlan, IndexMatrix};

use crate::error::Result;

/// Subsample indices recorded by each stage, in stage order.
///
/// A sampling stage that reports no index records the most recently
/// recorded one instead. Vote stages record nothing.
#[derive(Debug, Clone, Default)]
pub struct SampleLedger {
    entries: Vec<Option<IndexMatrix>>,
    last: Option<usize>,
}

impl SampleLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next sampling stage's index.
    ///
    /// Returns the stage number assigned to the record.
    pub fn record_sampled(&mut self, index: Option<IndexMatrix>) -> usize {
        let stage = self.entries.len();
        match index.filter(|index| !index.is_empty()) {
            Some(index) => {
                self.entries.push(Some(index));
                self.last = Some(stage);
            }
            None => match self.last {
                Some(previous) => {
                    log::debug!(
                        "stage {} reported no subsample index, reusing stage {}'s",
                        stage,
                        previous
                    );
                    let repaired = self.entries[previous].clone();
                    self.entries.push(repaired);
                }
                None => {
                    log::debug!(
                        "stage {} reported no subsample index and none was recorded before",
                        stage
                    );
                    self.entries.push(None);
                }
            },
        }
        stage
    }

    /// Record a stage without a subsample index of its own.
    pub fn record_identity(&mut self) -> usize {
        self.entries.push(None);
        self.entries.len() - 1
    }

    /// Recorded index of a stage.
    pub fn get(&self, stage: usize) -> Option<&IndexMatrix> {
        self.entries.get(stage).and_then(Option::as_ref)
    }

    /// Number of recorded stages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first stage is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compose the indices along a chain plan.
    ///
    /// Returns `None` when the chain has no sampled link.
    pub fn compose(&self, plan: &IndexChainPlan) -> Result<Option<IndexMatrix>> {
        let chain = plan
            .sampled_stages()
            .map(|stage| {
                self.get(stage)
                    .ok_or(CascadeError::MissingSubsampleIndex { stage })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(compose_chain(&chain)?)
    }

    /// All records, one per stage.
    pub fn into_entries(self) -> Vec<Option<IndexMatrix>> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{FusionLevels, SamplingParams, StageDescriptor, StageGraph, VoteParams};

    fn index(row: Vec<usize>) -> IndexMatrix {
        IndexMatrix::from_rows(vec![row]).unwrap()
    }

    #[test]
    fn test_empty_index_reuses_previous() {
        let mut ledger = SampleLedger::new();
        ledger.record_sampled(Some(index(vec![3, 1, 2])));
        ledger.record_identity();
        ledger.record_sampled(Some(IndexMatrix::identity(1, 0)));

        assert_eq!(ledger.get(2), ledger.get(0));
        assert!(ledger.get(1).is_none());
    }

    #[test]
    fn test_missing_first_index_defers_the_error() {
        let mut ledger = SampleLedger::new();
        ledger.record_sampled(None);
        ledger.record_sampled(Some(index(vec![0, 1])));
        assert!(ledger.get(0).is_none());

        let stage = |input: usize, npoint: usize| {
            StageDescriptor::sampling(input, SamplingParams::fps(npoint).with_group(1.0, 2, vec![2]))
        };
        let graph = StageGraph::new(
            1,
            vec![stage(0, 4), stage(1, 2), StageDescriptor::vote(2, VoteParams::default())],
        )
        .unwrap();

        // Level 2 only needs stage 1.
        let plan = graph.plan_index_chain(FusionLevels::new(1, 2)).unwrap();
        assert!(ledger.compose(&plan).unwrap().is_some());

        // Level 2 from level 0 touches stage 0.
        let plan = graph.plan_index_chain(FusionLevels::new(0, 2)).unwrap();
        let err = ledger.compose(&plan).unwrap_err();
        assert!(matches!(
            err,
            crate::NeuralCascadeError::Cascade(CascadeError::MissingSubsampleIndex { stage: 0 })
        ));
    }
}

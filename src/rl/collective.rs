//! Gradient synchronization between data-parallel workers
//!
//! After every backward pass each worker hands its gradients to the
//! collective, gets back the reduced gradients and applies its own
//! optimizer step. A single process runs with [`LocalCollective`].

use burn::optim::GradientsParams;

use crate::error::Result;

pub trait Collective {
    /// Index of this worker
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Block until every worker has arrived
    fn barrier(&self) -> Result<()>;

    /// Average gradients across workers
    fn all_reduce(&self, grads: GradientsParams) -> Result<GradientsParams>;

    fn is_distributed(&self) -> bool {
        self.world_size() > 1
    }

    /// Worker that writes checkpoints: rank 0 alone, rank 1 otherwise
    fn is_saver(&self) -> bool {
        if self.is_distributed() {
            self.rank() == 1
        } else {
            self.rank() == 0
        }
    }

    /// Worker that runs validation
    fn is_validator(&self) -> bool {
        self.rank() == 0
    }
}

/// Single-worker identity collective
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCollective;

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn all_reduce(&self, grads: GradientsParams) -> Result<GradientsParams> {
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeWorker {
        rank: usize,
        world: usize,
    }

    impl Collective for FakeWorker {
        fn rank(&self) -> usize {
            self.rank
        }

        fn world_size(&self) -> usize {
            self.world
        }

        fn barrier(&self) -> Result<()> {
            Ok(())
        }

        fn all_reduce(&self, grads: GradientsParams) -> Result<GradientsParams> {
            Ok(grads)
        }
    }

    #[test]
    fn test_local_collective_roles() {
        let local = LocalCollective;
        assert!(!local.is_distributed());
        assert!(local.is_saver());
        assert!(local.is_validator());
        assert!(local.all_reduce(GradientsParams::new()).unwrap().is_empty());
    }

    #[test]
    fn test_distributed_roles() {
        let rank0 = FakeWorker { rank: 0, world: 2 };
        let rank1 = FakeWorker { rank: 1, world: 2 };
        assert!(rank0.is_validator() && !rank0.is_saver());
        assert!(rank1.is_saver() && !rank1.is_validator());
    }
}

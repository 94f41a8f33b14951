//! Command queue table.
//!
//! A fixed table of FIFO queues indexed by queue id. The layout is
//! configurable (per rank, per bank, per subarray); the queue-id decode
//! for per-bank layouts follows the schedule scheme so that round-robin
//! iteration visits queues in priority order.

use std::collections::VecDeque;

use pimsim_common::address::DecodedAddress;
use pimsim_common::config::{QueueModel, SimConfig};
use pimsim_common::pool::{RequestId, RequestPool};

/// The per-queue command FIFOs.
#[derive(Debug)]
pub struct CommandQueues {
    queues: Vec<VecDeque<RequestId>>,
    model: QueueModel,
    scheme: u8,
    ranks: u64,
    banks: u64,
    subarrays: u64,
}

impl CommandQueues {
    /// Build the table for a configuration snapshot.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            queues: (0..config.command_queue_count())
                .map(|_| VecDeque::new())
                .collect(),
            model: config.queue_model,
            scheme: config.schedule_scheme,
            ranks: config.ranks,
            banks: config.banks,
            subarrays: config.subarray_count(),
        }
    }

    /// Number of queues.
    #[inline]
    pub fn count(&self) -> usize {
        self.queues.len()
    }

    /// Decode the queue id for explicit coordinates.
    pub fn id_for(&self, rank: u64, bank: u64, subarray: u64) -> usize {
        let id = match self.model {
            QueueModel::PerRank => rank,
            QueueModel::PerBank => match self.scheme {
                // Rank-first round-robin.
                1 => bank * self.ranks + rank,
                // Bank-first round-robin; also the fixed-order decode.
                _ => rank * self.banks + bank,
            },
            QueueModel::PerSubArray => {
                (rank * self.banks + bank) * self.subarrays + subarray
            }
        };
        id as usize
    }

    /// Decode the queue id for a translated address.
    #[inline]
    pub fn id_of(&self, addr: &DecodedAddress) -> usize {
        self.id_for(addr.rank, addr.bank, addr.subarray)
    }

    /// The queue behind `id`.
    #[inline]
    pub fn queue(&self, id: usize) -> &VecDeque<RequestId> {
        &self.queues[id]
    }

    /// Head of a queue, if any.
    #[inline]
    pub fn head(&self, id: usize) -> Option<RequestId> {
        self.queues[id].front().copied()
    }

    /// Append to the back of a queue.
    #[inline]
    pub fn push_back(&mut self, id: usize, request: RequestId) {
        self.queues[id].push_back(request);
    }

    /// Insert at the front of a queue.
    #[inline]
    pub fn push_front(&mut self, id: usize, request: RequestId) {
        self.queues[id].push_front(request);
    }

    /// Remove the head of a queue.
    #[inline]
    pub fn pop_front(&mut self, id: usize) -> Option<RequestId> {
        self.queues[id].pop_front()
    }

    /// The queue is empty, or holds only a single already-issued entry
    /// that the next cleanup sweep will remove.
    pub fn effectively_empty(&self, id: usize, pool: &RequestPool) -> bool {
        let queue = &self.queues[id];
        queue.is_empty() || (queue.len() == 1 && pool.get(queue[0]).was_issued())
    }

    /// Every queue of the rank is empty.
    pub fn rank_queue_empty(&self, rank: u64) -> bool {
        (0..self.banks).all(|bank| {
            (0..self.subarrays)
                .all(|sub| self.queues[self.id_for(rank, bank, sub)].is_empty())
        })
    }

    /// Every queue of a refresh bank group is effectively empty.
    pub fn refresh_group_empty(
        &self,
        rank: u64,
        bank: u64,
        banks_per_refresh: u64,
        pool: &RequestPool,
    ) -> bool {
        let head = (bank / banks_per_refresh) * banks_per_refresh;
        (0..banks_per_refresh).all(|i| {
            let bank = (head + i) % self.banks;
            (0..self.subarrays)
                .all(|sub| self.effectively_empty(self.id_for(rank, bank, sub), pool))
        })
    }

    /// Sweep every issued entry out of every queue.
    pub fn retain_unissued(&mut self, pool: &RequestPool) {
        for queue in &mut self.queues {
            queue.retain(|&id| !pool.get(id).was_issued());
        }
    }

    /// No queue holds an issued entry (post-sweep invariant).
    pub fn no_issued_entries(&self, pool: &RequestPool) -> bool {
        self.queues
            .iter()
            .all(|queue| queue.iter().all(|&id| !pool.get(id).was_issued()))
    }
}

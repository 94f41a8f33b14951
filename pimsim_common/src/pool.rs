//! Request arena.
//!
//! Requests are shared between transaction queues, command queues and the
//! in-flight set of the device. Instead of shared pointers they live in a
//! slab owned by the simulator and are referred to by [`RequestId`]. The
//! completion path is the only place a request is freed: the creator named
//! by `Request::owner` decides whether to drop it or surface it.

use crate::request::Request;

/// Index of a live request in the [`RequestPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u32);

impl RequestId {
    /// Raw slot index, for diagnostics only.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Slab arena of requests.
#[derive(Debug, Default)]
pub struct RequestPool {
    slots: Vec<Option<Request>>,
    free: Vec<u32>,
}

impl RequestPool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request, returning its id.
    pub fn alloc(&mut self, request: Request) -> RequestId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(request);
            RequestId(idx)
        } else {
            self.slots.push(Some(request));
            RequestId((self.slots.len() - 1) as u32)
        }
    }

    /// Borrow a live request.
    ///
    /// Panics if the id was already freed; every holder of a `RequestId`
    /// is reachable from exactly one queue or in-flight set, so a stale id
    /// is a simulator bug.
    #[inline]
    pub fn get(&self, id: RequestId) -> &Request {
        self.slots[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale request id {}", id.index()))
    }

    /// Mutably borrow a live request.
    #[inline]
    pub fn get_mut(&mut self, id: RequestId) -> &mut Request {
        self.slots[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale request id {}", id.index()))
    }

    /// Remove a request from the pool.
    pub fn free(&mut self, id: RequestId) -> Request {
        let request = self.slots[id.index()]
            .take()
            .unwrap_or_else(|| panic!("double free of request id {}", id.index()));
        self.free.push(id.index() as u32);
        request
    }

    /// Number of live requests.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OpType;

    #[test]
    fn alloc_free_reuses_slots() {
        let mut pool = RequestPool::new();
        let a = pool.alloc(Request::host(OpType::Read, 0, 0, 0));
        let b = pool.alloc(Request::host(OpType::Write, 64, 0, 0));
        assert_eq!(pool.live(), 2);
        assert_eq!(pool.get(a).op, OpType::Read);

        let freed = pool.free(a);
        assert_eq!(freed.op, OpType::Read);
        assert_eq!(pool.live(), 1);

        let c = pool.alloc(Request::host(OpType::Compute, 128, 0, 0));
        assert_eq!(c.index(), a.index());
        assert_eq!(pool.get(b).op, OpType::Write);
        assert_eq!(pool.get(c).op, OpType::Compute);
    }

    #[test]
    #[should_panic(expected = "stale request id")]
    fn stale_id_panics() {
        let mut pool = RequestPool::new();
        let a = pool.alloc(Request::host(OpType::Read, 0, 0, 0));
        pool.free(a);
        let _ = pool.get(a);
    }
}

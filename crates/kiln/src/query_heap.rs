use std::{collections::VecDeque, sync::Arc};

use kiln_gfx as gfx;

pub use gfx::QueryType;

use crate::error::{GfxResultExt, Result};

/// A fixed-size pool of GPU queries handing out indices.
///
/// Released indices are reused in the order they were released, before any
/// index that has never been handed out.
pub struct QueryHeap {
    pool: Arc<dyn gfx::QueryPool>,
    ty: QueryType,
    count: u32,
    current: u32,
    free_queries: VecDeque<u32>,
}

impl QueryHeap {
    /// The native sentinel for "no query", for interop with APIs that expect
    /// one. [`QueryHeap::allocate`] reports exhaustion with `None` instead.
    pub const INVALID_INDEX: u32 = 0xffff_ffff;

    pub(crate) fn new(device: &dyn gfx::Device, ty: QueryType, count: u32) -> Result<Self> {
        let pool = device
            .create_query_pool(&gfx::QueryPoolDesc { ty, count })
            .gfx_call("IDevice::createQueryPool")?;

        Ok(Self {
            pool,
            ty,
            count,
            current: 0,
            free_queries: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn query_count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn query_type(&self) -> QueryType {
        self.ty
    }

    #[must_use]
    pub fn gfx_query_pool(&self) -> &Arc<dyn gfx::QueryPool> {
        &self.pool
    }

    /// Returns a free query index, or `None` if every query is in use.
    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(index) = self.free_queries.pop_front() {
            return Some(index);
        }

        if self.current < self.count {
            let index = self.current;
            self.current += 1;
            Some(index)
        } else {
            None
        }
    }

    pub fn release(&mut self, index: u32) {
        debug_assert!(index < self.count, "query index {index} out of range");
        self.free_queries.push_back(index);
    }
}

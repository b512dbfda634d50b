//! Paged sub-allocator for transient, CPU-written GPU data.
//!
//! Allocations are bump-allocated out of fixed-size pages. Released
//! allocations are not reclaimed until the heap's fence shows that every
//! submission that could have read them has completed; only then do their
//! pages become available for reuse. Requests larger than a page get a
//! dedicated "mega page" buffer that is destroyed on release.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, VecDeque},
    rc::Rc,
    sync::Arc,
};

use kiln_gfx as gfx;

use crate::{
    error::{Error, GfxResultExt, Result},
    fence::Fence,
    resource::{BindFlags, MemoryType},
};

#[must_use]
pub(crate) fn align_to(alignment: u64, value: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.next_multiple_of(alignment)
    }
}

/// A range of a heap page, valid until released and reclaimed.
pub struct Allocation {
    buffer: Arc<dyn gfx::Buffer>,
    offset: u64,
    size: u64,
    page_id: u64,
    fence_value: u64,
}

impl Allocation {
    /// Page id of allocations that own a dedicated buffer.
    pub const MEGA_PAGE_ID: u64 = u64::MAX;

    #[must_use]
    pub fn buffer(&self) -> &Arc<dyn gfx::Buffer> {
        &self.buffer
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    #[must_use]
    pub fn is_mega_page(&self) -> bool {
        self.page_id == Self::MEGA_PAGE_ID
    }

    /// The fence value that was signaled when the allocation was made.
    #[must_use]
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    #[must_use]
    pub fn gpu_address(&self) -> u64 {
        self.buffer.device_address() + self.offset
    }

    /// Writes into the mapped range of the allocation.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.size {
            return Err(Error::InvalidUsage(format!(
                "cannot write {} bytes into a {} byte allocation",
                data.len(),
                self.size
            )));
        }

        self.buffer
            .write(self.offset, data)
            .gfx_call("IBufferResource::map")
    }
}

struct Page {
    buffer: Arc<dyn gfx::Buffer>,
    current_offset: u64,
    allocations_count: u64,
}

/// Min-heap entry on the fence value an allocation waits for.
struct DeferredRelease(Allocation);

impl PartialEq for DeferredRelease {
    fn eq(&self, other: &Self) -> bool {
        self.0.fence_value == other.0.fence_value
    }
}

impl Eq for DeferredRelease {}

impl PartialOrd for DeferredRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeferredRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.fence_value.cmp(&self.0.fence_value)
    }
}

pub struct GpuMemoryHeap {
    device: Arc<dyn gfx::Device>,
    memory_type: MemoryType,
    page_size: u64,
    fence: Rc<Fence>,

    current_page_id: u64,
    active_page: Page,
    used_pages: HashMap<u64, Page>,
    available_pages: VecDeque<Page>,
    deferred_releases: BinaryHeap<DeferredRelease>,
}

impl GpuMemoryHeap {
    pub(crate) fn new(
        device: Arc<dyn gfx::Device>,
        memory_type: MemoryType,
        page_size: u64,
        fence: Rc<Fence>,
    ) -> Result<Self> {
        let active_page = Page {
            buffer: create_page_buffer(device.as_ref(), memory_type, page_size)?,
            current_offset: 0,
            allocations_count: 0,
        };

        Ok(Self {
            device,
            memory_type,
            page_size,
            fence,
            current_page_id: 0,
            active_page,
            used_pages: HashMap::new(),
            available_pages: VecDeque::new(),
            deferred_releases: BinaryHeap::new(),
        })
    }

    /// Allocates `size` bytes at an offset aligned to `alignment`.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<Allocation> {
        let fence_value = self.fence.signaled_value();

        if size > self.page_size {
            let buffer = create_page_buffer(self.device.as_ref(), self.memory_type, size)?;
            tracing::trace!(size, "allocated mega page");

            return Ok(Allocation {
                buffer,
                offset: 0,
                size,
                page_id: Allocation::MEGA_PAGE_ID,
                fence_value,
            });
        }

        let mut offset = align_to(alignment, self.active_page.current_offset);
        if offset + size > self.page_size {
            offset = 0;
            self.allocate_new_page()?;
        }

        self.active_page.current_offset = offset + size;
        self.active_page.allocations_count += 1;

        Ok(Allocation {
            buffer: self.active_page.buffer.clone(),
            offset,
            size,
            page_id: self.current_page_id,
            fence_value,
        })
    }

    /// Allocates `size` bytes for data bound with `bind_flags`, rounding both
    /// size and offset up to the device's placement alignment.
    pub fn allocate_for(&mut self, size: u64, bind_flags: BindFlags) -> Result<Allocation> {
        let alignment = self.device.buffer_data_alignment(bind_flags);
        self.allocate(align_to(alignment, size), alignment)
    }

    /// Queues `allocation` for reclamation once the fence passes the value
    /// it was stamped with.
    pub fn release(&mut self, allocation: Allocation) {
        self.deferred_releases.push(DeferredRelease(allocation));
    }

    /// Reclaims every released allocation whose submissions have completed.
    pub fn execute_deferred_releases(&mut self) -> Result<()> {
        let current_value = self.fence.current_value()?;
        let mut reclaimed = 0;

        while self
            .deferred_releases
            .peek()
            .is_some_and(|release| release.0.fence_value < current_value)
        {
            let Some(DeferredRelease(allocation)) = self.deferred_releases.pop() else {
                break;
            };
            reclaimed += 1;

            if allocation.page_id == self.current_page_id {
                self.active_page.allocations_count -= 1;
                if self.active_page.allocations_count == 0 {
                    self.active_page.current_offset = 0;
                }
            } else if allocation.page_id != Allocation::MEGA_PAGE_ID {
                let page_id = allocation.page_id;
                let retire = match self.used_pages.get_mut(&page_id) {
                    Some(page) => {
                        page.allocations_count -= 1;
                        page.allocations_count == 0
                    }
                    None => {
                        debug_assert!(false, "released allocation from unknown page {page_id}");
                        false
                    }
                };

                if retire {
                    if let Some(page) = self.used_pages.remove(&page_id) {
                        self.available_pages.push_back(page);
                    }
                }
            }
            // Mega pages own their buffer, dropping the allocation frees it.
        }

        if reclaimed > 0 {
            tracing::trace!(reclaimed, current_value, "executed deferred releases");
        }

        Ok(())
    }

    fn allocate_new_page(&mut self) -> Result<()> {
        let page = match self.available_pages.pop_front() {
            Some(mut page) => {
                page.allocations_count = 0;
                page.current_offset = 0;
                page
            }
            None => Page {
                buffer: create_page_buffer(self.device.as_ref(), self.memory_type, self.page_size)?,
                current_offset: 0,
                allocations_count: 0,
            },
        };

        let retired = std::mem::replace(&mut self.active_page, page);
        self.used_pages.insert(self.current_page_id, retired);
        self.current_page_id += 1;
        Ok(())
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[must_use]
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    #[must_use]
    pub fn current_page_id(&self) -> u64 {
        self.current_page_id
    }

    #[must_use]
    pub fn active_page_offset(&self) -> u64 {
        self.active_page.current_offset
    }

    #[must_use]
    pub fn active_page_allocations(&self) -> u64 {
        self.active_page.allocations_count
    }

    #[must_use]
    pub fn is_page_in_use(&self, page_id: u64) -> bool {
        page_id == self.current_page_id || self.used_pages.contains_key(&page_id)
    }

    #[must_use]
    pub fn used_page_count(&self) -> usize {
        self.used_pages.len()
    }

    #[must_use]
    pub fn available_page_count(&self) -> usize {
        self.available_pages.len()
    }

    #[must_use]
    pub fn pending_release_count(&self) -> usize {
        self.deferred_releases.len()
    }
}

fn create_page_buffer(
    device: &dyn gfx::Device,
    memory_type: MemoryType,
    size: u64,
) -> Result<Arc<dyn gfx::Buffer>> {
    let mut desc = gfx::BufferDesc::new(
        size,
        memory_type,
        BindFlags::VERTEX | BindFlags::INDEX | BindFlags::CONSTANT,
    );
    desc.label = Some("GpuMemoryHeap page".to_owned());

    device
        .create_buffer(&desc)
        .gfx_call("IDevice::createBufferResource")
}

//! Fully-associative TLB: virtual-page → slot lookup with one-hot victim
//! selection and per-thread tagging.
//!
//! Unlike [`crate::line::CacheLineArray`] this structure has no notion of a
//! global cycle — `probe`/`insert` advance a private logical clock used only
//! to break victim-selection ties, per spec §4.3.

const PAGE_OFFSET_BITS: u32 = 12; // 4 KiB pages
const THREAD_BITS: u32 = 4;
const THREAD_MASK: u64 = (1 << THREAD_BITS) - 1;

fn pack_tag(virt: u64, tid: u8) -> u64 {
    let vpn = virt >> PAGE_OFFSET_BITS;
    (vpn << THREAD_BITS) | (u64::from(tid) & THREAD_MASK)
}

/// A fully-associative TLB with `capacity` slots.
pub struct Tlb {
    tags: Vec<u64>,
    valid: Vec<bool>,
    last_use: Vec<u64>,
    clock: u64,
}

impl Tlb {
    /// Creates an empty TLB with room for `capacity` distinct (page, thread)
    /// tags.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tags: vec![0; capacity],
            valid: vec![false; capacity],
            last_use: vec![0; capacity],
            clock: 0,
        }
    }

    fn find(&self, tag: u64) -> Option<usize> {
        (0..self.tags.len()).find(|&i| self.valid[i] && self.tags[i] == tag)
    }

    /// Selects a victim slot: an invalid slot if one exists, otherwise the
    /// least-recently-touched valid slot (ties broken by lowest index).
    fn select_victim(&self) -> usize {
        self.valid
            .iter()
            .position(|&v| !v)
            .unwrap_or_else(|| {
                (0..self.tags.len())
                    .min_by_key(|&i| (self.last_use[i], i))
                    .unwrap_or(0)
            })
    }

    /// Looks up `(virt, tid)`. Returns `true` on a hit and refreshes the
    /// slot's recency.
    pub fn probe(&mut self, virt: u64, tid: u8) -> bool {
        self.clock += 1;
        let tag = pack_tag(virt, tid);
        match self.find(tag) {
            Some(idx) => {
                self.last_use[idx] = self.clock;
                true
            }
            None => false,
        }
    }

    /// Installs `(virt, tid)`, evicting a victim if necessary. Returns
    /// `true` iff this eviction removed a *different* valid tag (i.e. the
    /// slot was not already free and did not already hold this tag).
    pub fn insert(&mut self, virt: u64, tid: u8) -> bool {
        self.clock += 1;
        let tag = pack_tag(virt, tid);
        if let Some(idx) = self.find(tag) {
            self.last_use[idx] = self.clock;
            return false;
        }

        let victim = self.select_victim();
        let evicted_other = self.valid[victim];
        self.tags[victim] = tag;
        self.valid[victim] = true;
        self.last_use[victim] = self.clock;
        evicted_other
    }

    /// Invalidates every slot tagged with `tid`, regardless of page.
    pub fn flush_thread(&mut self, tid: u8) {
        let mask = u64::from(tid) & THREAD_MASK;
        for i in 0..self.tags.len() {
            if self.valid[i] && (self.tags[i] & THREAD_MASK) == mask {
                self.valid[i] = false;
            }
        }
    }

    /// Invalidates the single slot tagged `(virt, tid)`, if present.
    pub fn flush_virt(&mut self, virt: u64, tid: u8) {
        let tag = pack_tag(virt, tid);
        if let Some(idx) = self.find(tag) {
            self.valid[idx] = false;
        }
    }
}

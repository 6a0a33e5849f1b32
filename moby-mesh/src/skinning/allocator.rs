//! VU0 matrix slot allocator
//!
//! VU0 memory below 0xF4 is treated as 61 matrix slots, one every four
//! quadwords. It is split in two:
//!
//! ```text
//! 0x00 .. first_blend    transfer region: joint matrices copied from the
//!                        scratchpad, handed out round-robin
//! first_blend .. 0xF4    blend region: results of 2/3-way blends, kept
//!                        alive for as long as the liveness analysis says
//! ```
//!
//! Allocations are never removed from the map when a slot is reused.
//! Instead every slot carries a generation counter and an allocation is only
//! valid while its generation matches the slot's.

use hashbrown::HashMap;

use crate::error::{AllocatorError, ClassError};
use crate::model::{SkinAttributes, Vertex};
use crate::{BLEND_BUFFER_SLOTS, VU0_MATRIX_STORE_SIZE};

/// Where a matrix lives and whether it has been used yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixAllocation {
    pub address: u8,
    /// Cleared by [`MatrixSlotAllocator::get_allocation`]
    pub first_use: bool,
    /// Cleared by [`MatrixSlotAllocator::get_allocation_pre`]
    pub first_use_pre: bool,
    pub generation: i32,
}

impl Default for MatrixAllocation {
    fn default() -> Self {
        Self {
            address: 0,
            first_use: true,
            first_use_pre: true,
            generation: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixSlot {
    pub generation: i32,
    /// Last submesh that needs the contents, -1 if none
    pub liveness: i32,
    pub current_contents: Option<SkinAttributes>,
}

impl Default for MatrixSlot {
    fn default() -> Self {
        Self {
            generation: 0,
            liveness: -1,
            current_contents: None,
        }
    }
}

/// Result of [`MatrixSlotAllocator::allocate_blended`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendAllocation {
    /// The blended matrix is still held from an earlier submesh
    Resident(u8),
    /// A slot was claimed at this address
    Allocated(u8),
    /// Every slot is needed by this submesh; the blend must be redone each
    /// time it is used
    Failed,
}

/// Simulated VU0 matrix store for one class
#[derive(Debug, Clone)]
pub struct MatrixSlotAllocator {
    allocations: HashMap<SkinAttributes, MatrixAllocation>,
    slots: [MatrixSlot; BLEND_BUFFER_SLOTS],
    next_transfer_store_addr: u8,
    first_blend_store_addr: u8,
    next_blend_store_addr: u8,
    transfer_allocations_this_submesh: usize,
    blend_allocations_this_submesh: usize,
}

impl MatrixSlotAllocator {
    /// Reserve one transfer slot per joint the busiest submesh references
    pub fn new(max_joints_per_submesh: usize) -> Result<Self, ClassError> {
        let first_blend = max_joints_per_submesh * 4;
        if first_blend >= VU0_MATRIX_STORE_SIZE {
            return Err(ClassError::TooManyJoints {
                joints: max_joints_per_submesh,
            });
        }
        Ok(Self {
            allocations: HashMap::new(),
            slots: [MatrixSlot::default(); BLEND_BUFFER_SLOTS],
            next_transfer_store_addr: 0,
            first_blend_store_addr: first_blend as u8,
            next_blend_store_addr: first_blend as u8,
            transfer_allocations_this_submesh: 0,
            blend_allocations_this_submesh: 0,
        })
    }

    #[inline]
    pub fn first_blend_store_addr(&self) -> u8 {
        self.first_blend_store_addr
    }

    #[inline]
    pub fn transfer_allocations_this_submesh(&self) -> usize {
        self.transfer_allocations_this_submesh
    }

    #[inline]
    pub fn blend_allocations_this_submesh(&self) -> usize {
        self.blend_allocations_this_submesh
    }

    #[inline]
    fn slot(&self, addr: u8) -> &MatrixSlot {
        &self.slots[addr as usize / 4]
    }

    #[inline]
    fn slot_mut(&mut self, addr: u8) -> &mut MatrixSlot {
        &mut self.slots[addr as usize / 4]
    }

    #[inline]
    fn is_stale(&self, allocation: &MatrixAllocation) -> bool {
        allocation.generation != self.slot(allocation.address).generation
    }

    /// Start a new submesh
    ///
    /// Joint matrices are transferred again for every submesh, so every
    /// transfer slot is invalidated. Blend slots stay valid.
    pub fn new_submesh(&mut self) {
        self.next_blend_store_addr = self.first_blend_store_addr;
        self.transfer_allocations_this_submesh = 0;
        self.blend_allocations_this_submesh = 0;
        for addr in (0..self.first_blend_store_addr).step_by(4) {
            self.slot_mut(addr).generation += 1;
        }
    }

    /// Claim a transfer slot for a joint matrix
    ///
    /// Returns `None` if the joint was already transferred this submesh.
    pub fn allocate_transferred(&mut self, joint: u8) -> Option<u8> {
        let skin = SkinAttributes::single(joint as i8);
        let current = self.allocations.get(&skin).copied().unwrap_or_default();
        if !self.is_stale(&current) {
            return None;
        }

        let address = self.next_transfer_store_addr;
        let slot = self.slot_mut(address);
        slot.generation += 1;
        let generation = slot.generation;
        self.allocations.insert(
            skin,
            MatrixAllocation {
                address,
                generation,
                ..Default::default()
            },
        );
        tracing::trace!("transferred matrix for joint {} -> {:#04x}", joint, address);

        self.transfer_allocations_this_submesh += 1;
        self.next_transfer_store_addr += 4;
        if self.next_transfer_store_addr >= self.first_blend_store_addr {
            self.next_transfer_store_addr = 0;
        }
        Some(address)
    }

    /// Claim a blend slot for a blended matrix that is needed up to and
    /// including submesh `last_submesh`
    ///
    /// Prefers slots whose liveness has run out. If every slot is live, the
    /// one needed furthest ahead that no vertex of this submesh uses gets
    /// evicted.
    pub fn allocate_blended(
        &mut self,
        skin: SkinAttributes,
        current_submesh: i32,
        last_submesh: i32,
        vertices: &[Vertex],
    ) -> BlendAllocation {
        let current = self.allocations.get(&skin).copied().unwrap_or_default();
        if !self.is_stale(&current) {
            return BlendAllocation::Resident(current.address);
        }

        let first_addr = self.next_blend_store_addr;
        while self.slot(self.next_blend_store_addr).liveness >= current_submesh {
            self.advance_blend_pointer();
            if self.next_blend_store_addr == first_addr {
                match self.pick_eviction_victim(vertices) {
                    Some(addr) => {
                        tracing::debug!(
                            "all blend slots live, evicting {:#04x} for {:?}",
                            addr,
                            skin
                        );
                        self.next_blend_store_addr = addr;
                        break;
                    }
                    None => {
                        tracing::debug!("failed to allocate blended matrix {:?}", skin);
                        self.allocations.remove(&skin);
                        return BlendAllocation::Failed;
                    }
                }
            }
        }

        let address = self.next_blend_store_addr;
        let slot = self.slot_mut(address);
        slot.generation += 1;
        slot.liveness = last_submesh;
        slot.current_contents = Some(skin);
        let generation = slot.generation;
        self.allocations.insert(
            skin,
            MatrixAllocation {
                address,
                generation,
                ..Default::default()
            },
        );
        tracing::trace!(
            "blended matrix {:?} -> {:#04x} (live until submesh {})",
            skin,
            address,
            last_submesh
        );

        self.blend_allocations_this_submesh += 1;
        self.advance_blend_pointer();
        BlendAllocation::Allocated(address)
    }

    #[inline]
    fn advance_blend_pointer(&mut self) {
        self.next_blend_store_addr += 4;
        if self.next_blend_store_addr as usize >= VU0_MATRIX_STORE_SIZE {
            self.next_blend_store_addr = self.first_blend_store_addr;
        }
    }

    /// Highest-liveness blend slot whose contents this submesh doesn't use
    fn pick_eviction_victim(&self, vertices: &[Vertex]) -> Option<u8> {
        let mut best: Option<(u8, i32)> = None;
        for addr in (self.first_blend_store_addr..VU0_MATRIX_STORE_SIZE as u8).step_by(4) {
            let slot = self.slot(addr);
            let used_by_this_submesh = slot
                .current_contents
                .is_some_and(|contents| vertices.iter().any(|vertex| vertex.skin == contents));
            let best_liveness = best.map_or(-1, |(_, liveness)| liveness);
            if slot.liveness > best_liveness && !used_by_this_submesh {
                best = Some((addr, slot.liveness));
            }
        }
        best.map(|(addr, _)| addr)
    }

    /// Look up where a matrix was put, marking it as used
    ///
    /// Returns `Ok(None)` if it was never allocated (or the allocation
    /// failed). A stale generation, or a blended matrix whose liveness ended
    /// before `current_submesh`, means the bookkeeping is broken.
    pub fn get_allocation(
        &mut self,
        skin: SkinAttributes,
        current_submesh: i32,
    ) -> Result<Option<MatrixAllocation>, AllocatorError> {
        let Some(allocation) = self.allocations.get(&skin).copied() else {
            return Ok(None);
        };
        let slot = *self.slot(allocation.address);
        if allocation.generation != slot.generation {
            return Err(AllocatorError::StaleGeneration {
                skin,
                allocation: allocation.generation,
                slot: slot.generation,
            });
        }
        if skin.count != 1 && slot.liveness < current_submesh {
            return Err(AllocatorError::ExpiredLiveness {
                skin,
                current: current_submesh,
                liveness: slot.liveness,
            });
        }
        if let Some(entry) = self.allocations.get_mut(&skin) {
            entry.first_use = false;
        }
        Ok(Some(allocation))
    }

    /// Like [`Self::get_allocation`] but without validity checks, and it
    /// only clears the scheduling-time first use flag
    pub fn get_allocation_pre(&mut self, skin: SkinAttributes) -> Option<MatrixAllocation> {
        let entry = self.allocations.get_mut(&skin)?;
        let copy = *entry;
        entry.first_use_pre = false;
        Some(copy)
    }

    /// Number of blend slots whose contents are still needed at
    /// `current_submesh`
    pub fn live_blend_slot_count(&self, current_submesh: i32) -> usize {
        (self.first_blend_store_addr..VU0_MATRIX_STORE_SIZE as u8)
            .step_by(4)
            .filter(|&addr| {
                let slot = self.slot(addr);
                slot.current_contents.is_some() && slot.liveness >= current_submesh
            })
            .count()
    }
}

/*
 * Descriptor set allocators
 *
 * Two kinds live here. The global DescPool hands out long-lived sets
 * (font sampler, instance SSBOs, texture descriptors) and supports
 * freeing them individually. The per-frame pools are reset wholesale
 * at the start of each frame and feed the ephemeral draw-call sets.
 */

use ash::vk;

/// The number of sets each backing pool can hold before we chain
/// another one
static POOL_SIZE: u32 = 64;

/// A pool of descriptor pools
/// All resources allocated by the Renderer which holds this
pub struct DescPool {
    pools: Vec<vk::DescriptorPool>,
    /// number of live allocations in each pool, from 0 to POOL_SIZE
    capacities: Vec<usize>,
}

impl DescPool {
    /// Returns the index of the new pool
    fn add_pool(&mut self, dev: &ash::Device) -> usize {
        let sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(POOL_SIZE)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(POOL_SIZE * 4)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(POOL_SIZE)
                .build(),
        ];

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            // we want to be able to free descriptor sets individually
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(POOL_SIZE);

        self.pools
            .push(unsafe { dev.create_descriptor_pool(&info, None).unwrap() });
        self.capacities.push(0);

        return self.pools.len() - 1;
    }

    /// The Renderer should own this struct
    pub fn new(dev: &ash::Device) -> DescPool {
        let mut ret = DescPool {
            pools: Vec::new(),
            capacities: Vec::new(),
        };

        // Add one default pool to begin with
        ret.add_pool(dev);

        return ret;
    }

    fn get_ideal_pool(&mut self, dev: &ash::Device) -> usize {
        for (i, cap) in self.capacities.iter().enumerate() {
            if cap + 1 < POOL_SIZE as usize {
                return i;
            }
        }

        // No existing pool was found, so create a new one
        return self.add_pool(dev);
    }

    /// Allocate one long-lived descriptor set with `layout`.
    ///
    /// Returns the index of the pool the set came from, which must be
    /// passed back to `free_set`.
    pub fn alloc_set(
        &mut self,
        dev: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> (usize, vk::DescriptorSet) {
        let pool_handle = self.get_ideal_pool(dev);
        let layouts = [layout];

        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pools[pool_handle])
            .set_layouts(&layouts)
            .build();

        self.capacities[pool_handle] += 1;

        unsafe {
            (
                pool_handle,
                dev.allocate_descriptor_sets(&info).unwrap()[0],
            )
        }
    }

    /// Return a set to its pool. Every dynamically created texture's
    /// descriptor takes this path when the texture is destroyed.
    pub fn free_set(&mut self, dev: &ash::Device, pool_handle: usize, set: vk::DescriptorSet) {
        assert!(pool_handle < self.pools.len());

        unsafe {
            dev.free_descriptor_sets(self.pools[pool_handle], &[set])
                .unwrap();
        }
        if self.capacities[pool_handle] > 0 {
            self.capacities[pool_handle] -= 1;
        }
    }

    /// Explicit destructor
    pub fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            for p in self.pools.drain(..) {
                dev.destroy_descriptor_pool(p, None);
            }
        }
        self.capacities.clear();
    }
}

/// Maximum number of ephemeral draw-call sets a single frame can
/// allocate before draws start failing with a logged error
static FRAME_POOL_SETS: u32 = 256;

/// Create one of the per-frame descriptor pools.
///
/// These are reset at the top of every frame; any set allocated from
/// one is invalidated by that reset, which is exactly the lifetime of
/// a draw-call binding table.
pub fn create_frame_pool(dev: &ash::Device) -> vk::DescriptorPool {
    let sizes = [vk::DescriptorPoolSize::builder()
        .ty(vk::DescriptorType::STORAGE_BUFFER)
        .descriptor_count(FRAME_POOL_SETS * 4)
        .build()];

    let info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&sizes)
        .max_sets(FRAME_POOL_SETS);

    unsafe { dev.create_descriptor_pool(&info, None).unwrap() }
}

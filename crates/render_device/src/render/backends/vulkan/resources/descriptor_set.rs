//! Descriptor set layouts, pools and writes
//!
//! Scene draws bind one of two set layouts:
//!
//! - the per-draw layout: four combined image samplers (base, lightmap,
//!   macro, detail or fog) at bindings 0..3
//! - the bindless layout: one update-after-bind array of combined image
//!   samplers indexed by the per-vertex slot numbers

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Texture slots in a per-draw set
pub const TEXTURES_PER_SET: u32 = 4;

/// Descriptor set layout builder for creating reusable layouts
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
    update_after_bind: bool,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            binding_flags: Vec::new(),
            update_after_bind: false,
        }
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(mut self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self.binding_flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    /// Add a partially bound, update-after-bind array of combined image samplers
    pub fn add_bindless_image_array(mut self, binding: u32, count: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self.binding_flags.push(
            vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                | vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING,
        );
        self.update_after_bind = true;
        self
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&self.binding_flags);
        let mut layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        if self.update_after_bind {
            layout_info = layout_info
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut flags_info);
        }

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
        })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
}

impl DescriptorSetLayout {
    /// Layout of a per-draw four-texture set
    pub fn per_draw(device: &Device) -> VulkanResult<Self> {
        (0..TEXTURES_PER_SET)
            .fold(DescriptorSetLayoutBuilder::new(), |builder, binding| {
                builder.add_combined_image_sampler(binding, vk::ShaderStageFlags::FRAGMENT)
            })
            .build(device)
    }

    /// Layout of the bindless texture array
    pub fn bindless(device: &Device, capacity: u32) -> VulkanResult<Self> {
        DescriptorSetLayoutBuilder::new()
            .add_bindless_image_array(0, capacity, vk::ShaderStageFlags::FRAGMENT)
            .build(device)
    }

    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
    max_sets: u32,
    allocated: u32,
}

impl DescriptorPool {
    /// Pool for `max_sets` per-draw sets
    pub fn per_draw(device: Device, max_sets: u32) -> VulkanResult<Self> {
        Self::new(
            device,
            max_sets,
            max_sets * TEXTURES_PER_SET,
            vk::DescriptorPoolCreateFlags::empty(),
        )
    }

    /// Pool for the single bindless set
    pub fn bindless(device: Device, capacity: u32) -> VulkanResult<Self> {
        Self::new(device, 1, capacity, vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
    }

    fn new(device: Device, max_sets: u32, descriptors: u32, flags: vk::DescriptorPoolCreateFlags) -> VulkanResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(descriptors.max(1))
            .build()];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(flags)
            .max_sets(max_sets.max(1))
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        Ok(Self {
            pool,
            device,
            max_sets,
            allocated: 0,
        })
    }

    /// Allocate one set; fails once the pool is exhausted
    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        if self.allocated >= self.max_sets {
            return Err(VulkanError::InvalidOperation {
                reason: format!("descriptor pool exhausted after {} sets", self.max_sets),
            });
        }

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::Api)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "no descriptor set allocated".to_string(),
            })?;
        self.allocated += 1;
        Ok(set)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Image view and sampler read by one descriptor
#[derive(Debug, Clone, Copy)]
pub struct SampledImage {
    /// View of the texture
    pub view: vk::ImageView,
    /// Sampler to read it with
    pub sampler: vk::Sampler,
}

impl SampledImage {
    fn info(self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// Write the four bindings of a per-draw set
pub fn write_per_draw_set(device: &Device, set: vk::DescriptorSet, images: &[SampledImage; 4]) {
    let infos: Vec<[vk::DescriptorImageInfo; 1]> = images.iter().map(|image| [image.info()]).collect();
    let writes: Vec<vk::WriteDescriptorSet> = infos
        .iter()
        .enumerate()
        .map(|(binding, info)| {
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding as u32)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(info)
                .build()
        })
        .collect();

    unsafe {
        device.update_descriptor_sets(&writes, &[]);
    }
}

/// Write one element of the bindless array
pub fn write_bindless_element(device: &Device, set: vk::DescriptorSet, slot: u32, image: SampledImage) {
    let info = [image.info()];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .dst_array_element(slot)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&info)
        .build();

    unsafe {
        device.update_descriptor_sets(&[write], &[]);
    }
}

//! Scene sampler objects

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::render::resources::sampler::{AddressMode, SamplerDesc, SamplerFilter};

/// Sampler wrapper with RAII cleanup
pub struct VulkanSampler {
    device: Device,
    sampler: vk::Sampler,
}

impl VulkanSampler {
    /// Create a sampler from a backend-neutral description
    ///
    /// Anisotropy and mirror-once addressing fall back to plain linear
    /// filtering and edge clamping on devices without them.
    pub fn new(context: &VulkanContext, desc: &SamplerDesc) -> VulkanResult<Self> {
        let features = context.features();
        let limits = context.physical_device.properties.limits;

        let (filter, mipmap_mode, anisotropy) = match desc.filter {
            SamplerFilter::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST, None),
            SamplerFilter::Anisotropic(max) => (
                vk::Filter::LINEAR,
                vk::SamplerMipmapMode::LINEAR,
                features
                    .sampler_anisotropy
                    .then(|| max.min(limits.max_sampler_anisotropy)),
            ),
        };

        let address_mode = match desc.address {
            AddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirrorOnce if features.mirror_clamp_to_edge => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
            AddressMode::MirrorOnce => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        };

        let lod_bias = desc
            .lod_bias
            .clamp(-limits.max_sampler_lod_bias, limits.max_sampler_lod_bias);

        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(mipmap_mode)
            .mip_lod_bias(lod_bias)
            .min_lod(desc.min_lod)
            .max_lod(vk::LOD_CLAMP_NONE);

        let device = context.raw_device().clone();
        let sampler = unsafe { device.create_sampler(&sampler_create_info, None) }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create sampler: {e:?}")))?;

        Ok(Self { device, sampler })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

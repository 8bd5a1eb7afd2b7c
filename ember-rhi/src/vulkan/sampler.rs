//! Sampler resource.

use std::sync::Arc;

use ash::vk;

use crate::error::Result;
use crate::types::SamplerDesc;

use super::convert;
use super::VulkanContext;

pub struct Sampler {
    context: Arc<VulkanContext>,
    pub(crate) sampler: vk::Sampler,
    pub desc: SamplerDesc,
}

pub type SamplerHandle = Arc<Sampler>;

pub(crate) fn create_sampler(
    context: &Arc<VulkanContext>,
    desc: SamplerDesc,
) -> Result<SamplerHandle> {
    let anisotropy = desc.max_anisotropy.map(|value| value.clamp(1.0, 16.0));

    let mut create_info = vk::SamplerCreateInfo::default()
        .mag_filter(convert::filter_to_vk(desc.mag_filter))
        .min_filter(convert::filter_to_vk(desc.min_filter))
        .mipmap_mode(convert::mipmap_mode_to_vk(desc.mip_filter))
        .address_mode_u(convert::address_mode_to_vk(desc.address_u))
        .address_mode_v(convert::address_mode_to_vk(desc.address_v))
        .address_mode_w(convert::address_mode_to_vk(desc.address_w))
        .mip_lod_bias(desc.mip_lod_bias)
        .min_lod(desc.min_lod)
        .max_lod(desc.max_lod)
        .border_color(convert::border_color_to_vk(desc.border_color))
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .unnormalized_coordinates(false);

    if let Some(compare) = desc.compare {
        create_info = create_info
            .compare_enable(true)
            .compare_op(convert::compare_op_to_vk(compare));
    }

    let sampler = unsafe { context.device.create_sampler(&create_info, None)? };

    Ok(Arc::new(Sampler {
        context: Arc::clone(context),
        sampler,
        desc,
    }))
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_sampler(self.sampler, None);
        }
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").finish_non_exhaustive()
    }
}

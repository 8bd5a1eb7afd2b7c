//! Swapchain: presentable images, acquire/present handshake, per-image
//! present semaphores.

use std::sync::Arc;

use ash::vk;

use crate::error::{Result, RhiError};
use crate::format::Format;
use crate::types::{ResourceStates, TextureDesc, TextureDimension};

use super::convert;
use super::texture::{create_handle_for_native_texture, TextureHandle};
use super::VulkanContext;

const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

pub struct Swapchain {
    context: Arc<VulkanContext>,
    swapchain: vk::SwapchainKHR,
    images: Vec<TextureHandle>,
    present_semaphores: Vec<vk::Semaphore>,
    format: Format,
    extent: vk::Extent2D,
    frame_index: usize,
    image_index: u32,
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_UNORM
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

pub(crate) fn create_swapchain(
    context: &Arc<VulkanContext>,
    width: u32,
    height: u32,
) -> Result<Swapchain> {
    let capabilities = unsafe {
        context
            .surface_loader
            .get_physical_device_surface_capabilities(context.physical_device, context.surface)?
    };
    let formats = unsafe {
        context
            .surface_loader
            .get_physical_device_surface_formats(context.physical_device, context.surface)?
    };
    if formats.is_empty() {
        return Err(RhiError::Unsupported("surface reports no formats"));
    }

    let surface_format = choose_surface_format(&formats);
    let extent = choose_extent(&capabilities, width, height);

    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        image_count = image_count.min(capabilities.max_image_count);
    }

    let mut create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(context.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        // FIFO is always available and never tears.
        .present_mode(vk::PresentModeKHR::FIFO)
        .clipped(true);

    let queue_families = [context.graphics_family, context.present_family];
    if context.graphics_family != context.present_family {
        create_info = create_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&queue_families);
    } else {
        create_info = create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
    }

    let swapchain = unsafe {
        context
            .swapchain_loader
            .create_swapchain(&create_info, None)?
    };

    let vk_images = unsafe { context.swapchain_loader.get_swapchain_images(swapchain)? };
    let format = convert::format_from_vk(surface_format.format);

    let images: Vec<TextureHandle> = vk_images
        .iter()
        .enumerate()
        .map(|(index, &image)| {
            create_handle_for_native_texture(
                context,
                image,
                TextureDesc {
                    width: extent.width,
                    height: extent.height,
                    format,
                    dimension: TextureDimension::D2,
                    is_render_target: true,
                    initial_state: ResourceStates::PRESENT,
                    debug_name: format!("swapchain image {index}"),
                    ..Default::default()
                },
                // The swapchain owns the VkImages.
                false,
            )
        })
        .collect();

    let mut present_semaphores = Vec::with_capacity(images.len());
    for _ in 0..images.len() {
        let semaphore = unsafe {
            context
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        present_semaphores.push(semaphore);
    }

    Ok(Swapchain {
        context: Arc::clone(context),
        swapchain,
        images,
        present_semaphores,
        format,
        extent,
        frame_index: 0,
        image_index: 0,
    })
}

impl Swapchain {
    /// Blocks up to one second for the next presentable image. Returns the
    /// image index and the frame's present semaphore, which the next graphics
    /// submission must wait on.
    pub(crate) fn acquire_next_image(&mut self) -> Result<(u32, vk::Semaphore)> {
        let semaphore = self.present_semaphores[self.frame_index];
        let (index, _suboptimal) = unsafe {
            self.context.swapchain_loader.acquire_next_image(
                self.swapchain,
                ACQUIRE_TIMEOUT_NS,
                semaphore,
                vk::Fence::null(),
            )?
        };
        self.image_index = index;
        Ok((index, semaphore))
    }

    /// Presents the acquired image, waiting on `render_finished`, and
    /// advances the frame index round-robin.
    pub(crate) fn present(
        &mut self,
        present_queue: vk::Queue,
        render_finished: vk::Semaphore,
    ) -> Result<()> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [self.image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.context
                .swapchain_loader
                .queue_present(present_queue, &present_info)?
        };

        self.frame_index = (self.frame_index + 1) % self.images.len();
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn current_image_index(&self) -> u32 {
        self.image_index
    }

    pub fn image(&self, index: usize) -> TextureHandle {
        Arc::clone(&self.images[index])
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &semaphore in &self.present_semaphores {
                self.context.device.destroy_semaphore(semaphore, None);
            }
            // Image handles wrap swapchain-owned VkImages; dropping them only
            // releases their cached views.
            self.images.clear();
            self.context
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("extent", &(self.extent.width, self.extent.height))
            .field("images", &self.images.len())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

//! Flag-driven render passes and the framebuffers binding image views to
//! them.
//!
//! A pass's position in the frame (`FIRST`, `LAST`, `OFFSCREEN`,
//! `OFFSCREEN_INTERNAL`) decides its initial/final layouts, load ops, and
//! subpass dependencies, so the application never spells out transitions for
//! the common render-to-texture and present chains.

use std::sync::Arc;

use ash::vk;

use crate::error::{Result, RhiError};
use crate::format::Format;
use crate::types::{RenderPassDesc, RenderPassFlags, TextureSubresourceSet};

use super::convert;
use super::texture::{TextureHandle, TextureSubresourceViewType};
use super::VulkanContext;

pub struct RenderPass {
    context: Arc<VulkanContext>,
    pub(crate) render_pass: vk::RenderPass,
    pub desc: RenderPassDesc,
}

pub type RenderPassHandle = Arc<RenderPass>;

pub(crate) fn create_render_pass(
    context: &Arc<VulkanContext>,
    desc: RenderPassDesc,
) -> Result<RenderPassHandle> {
    let first = desc.flags.contains(RenderPassFlags::FIRST);
    let last = desc.flags.contains(RenderPassFlags::LAST);
    let offscreen = desc.flags.contains(RenderPassFlags::OFFSCREEN);
    let offscreen_internal = desc.flags.contains(RenderPassFlags::OFFSCREEN_INTERNAL);

    let color_load_op = if offscreen_internal {
        vk::AttachmentLoadOp::LOAD
    } else if desc.clear_color {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    };

    let color_initial_layout = if first {
        vk::ImageLayout::UNDEFINED
    } else if offscreen_internal {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    };

    let color_final_layout = if offscreen {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else if last {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    };

    let color_attachment = vk::AttachmentDescription::default()
        .format(convert::format_to_vk(desc.color_format))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(color_load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(color_initial_layout)
        .final_layout(color_final_layout);

    let depth_load_op = if offscreen_internal {
        vk::AttachmentLoadOp::LOAD
    } else if desc.clear_depth {
        vk::AttachmentLoadOp::CLEAR
    } else {
        vk::AttachmentLoadOp::LOAD
    };

    let depth_initial_layout = if first || desc.clear_depth {
        vk::ImageLayout::UNDEFINED
    } else if offscreen_internal {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    };

    let depth_final_layout = if offscreen {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    };

    let depth_attachment = vk::AttachmentDescription::default()
        .format(convert::format_to_vk(if desc.use_depth {
            desc.depth_format
        } else {
            Format::D32Float
        }))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(depth_load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(depth_initial_layout)
        .final_layout(depth_final_layout);

    let color_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let dependencies: Vec<vk::SubpassDependency> = if offscreen {
        // Transition fences for render-then-sample chains, in both
        // directions.
        vec![
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::SHADER_READ)
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ]
    } else {
        vec![vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )]
    };

    let color_refs = [color_ref];
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if desc.use_depth {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    let attachments = [color_attachment, depth_attachment];
    let attachment_count = if desc.use_depth { 2 } else { 1 };

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments[..attachment_count])
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);

    let render_pass = unsafe { context.device.create_render_pass(&create_info, None)? };

    Ok(Arc::new(RenderPass {
        context: Arc::clone(context),
        render_pass,
        desc,
    }))
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("color_format", &self.desc.color_format)
            .field("use_depth", &self.desc.use_depth)
            .field("flags", &self.desc.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct FramebufferAttachment {
    pub texture: TextureHandle,
    pub subresources: TextureSubresourceSet,
}

#[derive(Clone)]
pub struct FramebufferDesc {
    pub render_pass: RenderPassHandle,
    pub color_attachments: Vec<FramebufferAttachment>,
    pub depth_attachment: Option<FramebufferAttachment>,
}

/// Resolved facts about a framebuffer used at render-pass begin time.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    pub width: u32,
    pub height: u32,
}

pub struct Framebuffer {
    context: Arc<VulkanContext>,
    pub(crate) framebuffer: vk::Framebuffer,
    pub desc: FramebufferDesc,
    pub info: FramebufferInfo,
}

pub type FramebufferHandle = Arc<Framebuffer>;

pub(crate) fn create_framebuffer(
    context: &Arc<VulkanContext>,
    desc: FramebufferDesc,
) -> Result<FramebufferHandle> {
    let first = desc
        .color_attachments
        .first()
        .or(desc.depth_attachment.as_ref())
        .ok_or(RhiError::InvalidArgument("framebuffer needs an attachment"))?;

    let base_mip = first.subresources.base_mip_level;
    let width = (first.texture.desc.width >> base_mip).max(1);
    let height = (first.texture.desc.height >> base_mip).max(1);

    // Attachment views cover every aspect of their format; depth-only and
    // stencil-only views are for sampling, not rendering.
    let mut views = Vec::with_capacity(desc.color_attachments.len() + 1);
    for attachment in &desc.color_attachments {
        let view = attachment.texture.get_view(
            attachment.subresources,
            None,
            TextureSubresourceViewType::AllAspects,
        )?;
        views.push(view.view);
    }
    if let Some(ref attachment) = desc.depth_attachment {
        let view = attachment.texture.get_view(
            attachment.subresources,
            None,
            TextureSubresourceViewType::AllAspects,
        )?;
        views.push(view.view);
    }

    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(desc.render_pass.render_pass)
        .attachments(&views)
        .width(width)
        .height(height)
        .layers(1);

    let framebuffer = unsafe { context.device.create_framebuffer(&create_info, None)? };

    Ok(Arc::new(Framebuffer {
        context: Arc::clone(context),
        framebuffer,
        desc,
        info: FramebufferInfo { width, height },
    }))
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.info.width)
            .field("height", &self.info.height)
            .field("color_attachments", &self.desc.color_attachments.len())
            .finish_non_exhaustive()
    }
}

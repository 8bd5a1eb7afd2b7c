//! Ember RHI: a handle-oriented rendering hardware interface over Vulkan.
//!
//! The crate presents opaque, reference-counted resource handles and a
//! record/submit model for GPU work. The pieces that carry the weight:
//!
//! - a [`Device`] owning the instance, logical device, queues, and swapchain,
//!   handing out `Arc`-based resource handles;
//! - a [`CommandList`] recording surface whose operations require logical
//!   [`ResourceStates`] from an automatic tracker that emits image-layout and
//!   memory barriers on demand;
//! - per-queue pools of tracked command buffers ordered by a timeline
//!   semaphore, with retirement releasing the resources a submission kept
//!   alive;
//! - an upload manager suballocating staging chunks versioned against
//!   submissions, so host-to-device transfers never outrun GPU progress.
//!
//! Synchronization the caller still owns: mapping a buffer the GPU may still
//! be writing requires waiting on the owning queue first, and recording into
//! one command list from several threads at once is not supported.

pub mod error;
pub mod format;
pub mod serialize;
pub mod state_tracker;
pub mod types;
pub mod versioning;
pub mod vulkan;

pub use error::{Result, RhiError};
pub use format::{Format, FormatInfo, FormatKind};
pub use state_tracker::{
    BufferStateSource, BufferTracking, CommandListResourceStateTracker, TextureStateSource,
    TextureTracking,
};
pub use types::{
    AddressMode, BindingLayoutDesc, BindlessLayoutDesc, BorderColor, BufferBinding, BufferDesc,
    BufferRange, BufferUsage, Color, CommandListParameters, CommandQueue, CompareOp,
    CpuAccessMode, DeviceDesc, DrawArguments, FilterMode, ImageArrayBinding, ImageBinding,
    PrimitiveTopology, Rect, RenderPassDesc, RenderPassFlags, ResourceStates, SamplerDesc,
    ShaderDesc, ShaderStage, ShaderStageFlags, TextureDesc, TextureDimension, TextureSlice,
    TextureSubresourceSet, VertexAttributeDesc, Viewport, ViewportState, ALL_SUBRESOURCES,
    ENTIRE_BUFFER,
};
pub use vulkan::{
    BindingLayout, BindingLayoutHandle, BindingSet, BindingSetDesc, BindingSetHandle,
    BindingSetItem, BindingSetRef, Buffer, BufferHandle, CommandList, ComputePipeline,
    ComputePipelineDesc, ComputePipelineHandle, ComputeState, DescriptorTable,
    DescriptorTableHandle, Device, Framebuffer, FramebufferAttachment, FramebufferDesc,
    FramebufferHandle, FramebufferInfo, GraphicsPipeline, GraphicsPipelineDesc,
    GraphicsPipelineHandle, GraphicsState, IndexBufferBinding, InputLayout, InputLayoutHandle,
    Queue, RenderPass, RenderPassHandle, ResourceHandle, Sampler, SamplerHandle, Shader,
    ShaderHandle, ShaderLibrary, ShaderLibraryHandle, StagingRegion, StagingTexture,
    StagingTextureHandle, Texture, TextureHandle, TextureSubresourceView,
    TextureSubresourceViewType, VertexBufferBinding,
};

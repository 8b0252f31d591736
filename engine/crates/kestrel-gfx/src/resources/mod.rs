pub mod buffer;
pub mod descriptor;
pub mod image;
pub mod manager;
pub mod pipeline;
pub mod render_target;
pub mod sampler;

use crate::handle::Handle;

pub type ImageHandle = Handle<image::GfxImage>;
pub type BufferHandle = Handle<buffer::GfxBuffer>;
pub type SamplerHandle = Handle<sampler::GfxSampler>;
pub type DescriptorHandle = Handle<descriptor::GfxDescriptor>;
pub type PipelineHandle = Handle<pipeline::GfxPipeline>;
pub type RenderTargetHandle = Handle<render_target::GfxRenderTarget>;

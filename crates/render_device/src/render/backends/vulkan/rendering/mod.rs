//! Scene pass rendering: targets, render passes, shaders and pipelines

pub mod scene_targets;
pub mod shader;
pub mod vertex_layout;

pub use scene_targets::{RenderPass, SceneTargets};
pub use shader::{GraphicsPipeline, PipelineLayout, SceneShaders, ShaderModule};
pub use vertex_layout::SceneVertexLayout;

//! Shader management and graphics pipeline creation for the scene pass
//!
//! Loads the SPIR-V modules named by [`VulkanBackendConfig`] and turns a
//! backend-neutral [`PipelineDesc`] into a Vulkan graphics pipeline. Every
//! scene pipeline writes two color attachments: the blended scene color and
//! the unblended `R32_UINT` hit index.

use std::ffi::CStr;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ash::{vk, Device};

use crate::config::VulkanBackendConfig;
use crate::render::api::ScenePushConstants;
use crate::render::backends::vulkan::rendering::vertex_layout::SceneVertexLayout;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::pipeline::{BlendFactor, FragmentShaderVariant, PipelineDesc, PrimitiveTopology};

const ENTRY_POINT: &CStr = c"main";

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        log::debug!("[SHADER] Creating shader module from {} bytes", bytes.len());

        let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(|e| {
            log::error!("[SHADER] Invalid SPIR-V: {e}");
            VulkanError::InitializationFailed(format!("Invalid SPIR-V bytecode: {e}"))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
            log::error!("[SHADER] vkCreateShaderModule failed: {e:?}");
            VulkanError::Api(e)
        })?;

        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: &Device, path: P) -> VulkanResult<Self> {
        let path_ref = path.as_ref();
        log::debug!("[SHADER] Loading shader from: {path_ref:?}");

        let mut bytes = Vec::new();
        File::open(path_ref)
            .and_then(|mut file| file.read_to_end(&mut bytes))
            .map_err(|e| {
                log::error!("[SHADER] Failed to read shader file {path_ref:?}: {e}");
                VulkanError::InitializationFailed(format!("Failed to read shader file {}: {e}", path_ref.display()))
            })?;

        Self::from_bytes(device, &bytes)
    }

    /// Create shader stage create info
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Fragment shaders reading one texture source
pub struct FragmentShaders {
    /// Regular shading
    pub standard: ShaderModule,
    /// Alpha-tested shading for masked polygons
    pub alpha_test: ShaderModule,
}

impl FragmentShaders {
    fn select(&self, variant: FragmentShaderVariant) -> &ShaderModule {
        match variant {
            FragmentShaderVariant::Standard => &self.standard,
            FragmentShaderVariant::AlphaTest => &self.alpha_test,
        }
    }
}

/// Every shader module of the scene pass
pub struct SceneShaders {
    /// Shared vertex shader
    pub vertex: ShaderModule,
    /// Fragment shaders reading the per-draw set
    pub per_draw: FragmentShaders,
    /// Fragment shaders indexing the bindless array, when loaded
    pub bindless: Option<FragmentShaders>,
}

impl SceneShaders {
    /// Load the scene shaders; bindless variants only when requested
    pub fn load(device: &Device, config: &VulkanBackendConfig, with_bindless: bool) -> VulkanResult<Self> {
        let vertex = ShaderModule::from_file(device, &config.scene_vertex_shader)?;
        let per_draw = FragmentShaders {
            standard: ShaderModule::from_file(device, &config.scene_fragment_shader)?,
            alpha_test: ShaderModule::from_file(device, &config.scene_alpha_test_shader)?,
        };

        let bindless = if with_bindless {
            let loaded = ShaderModule::from_file(device, &config.scene_bindless_fragment_shader).and_then(|standard| {
                ShaderModule::from_file(device, &config.scene_bindless_alpha_test_shader)
                    .map(|alpha_test| FragmentShaders { standard, alpha_test })
            });
            match loaded {
                Ok(shaders) => Some(shaders),
                Err(e) => {
                    log::warn!("[SHADER] Bindless shaders unavailable, using per-draw sets: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            vertex,
            per_draw,
            bindless,
        })
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout with one descriptor set and the scene push constants
    pub fn new(device: &Device, set_layout: vk::DescriptorSetLayout) -> VulkanResult<Self> {
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<ScenePushConstants>() as u32,
        }];
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
///
/// The layout is shared and owned by the backend; it must outlive the
/// pipeline.
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build a scene pipeline from its description
    pub fn scene(
        device: &Device,
        render_pass: vk::RenderPass,
        shaders: &SceneShaders,
        layout: &PipelineLayout,
        desc: &PipelineDesc,
        depth_clamp: bool,
    ) -> VulkanResult<Self> {
        let fragment_shaders = if desc.bindless {
            shaders.bindless.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
                reason: "bindless pipeline requested without bindless shaders".to_string(),
            })?
        } else {
            &shaders.per_draw
        };

        let shader_stages = [
            shaders.vertex.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shaders
                .select(desc.fragment)
                .stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let binding_descriptions = [SceneVertexLayout::binding_description()];
        let attribute_descriptions = SceneVertexLayout::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(match desc.topology {
                PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
                PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            })
            .primitive_restart_enable(false);

        // Viewport and scissor are set per draw
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // The device culls on the CPU; two-sided polygons arrive in either winding
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(depth_clamp)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::from_raw(desc.samples.max(1)));

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth.test)
            .depth_write_enable(desc.depth.write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let scene_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(blend_factor(desc.blend.src_color))
            .dst_color_blend_factor(blend_factor(desc.blend.dst_color))
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(blend_factor(desc.blend.src_alpha))
            .dst_alpha_blend_factor(blend_factor(desc.blend.dst_alpha))
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(if desc.color_write {
                vk::ColorComponentFlags::RGBA
            } else {
                vk::ColorComponentFlags::empty()
            })
            .build();
        // Integer attachment: never blended
        let hit_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::R)
            .build();
        let color_blend_attachments = [scene_attachment, hit_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        let pipeline = pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no pipeline created".to_string(),
        })?;

        log::debug!("[PIPELINE] Created {:?} pipeline {pipeline:?}", desc.key);
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout: layout.handle(),
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
    }
}

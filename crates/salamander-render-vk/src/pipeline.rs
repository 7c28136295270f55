// SPDX-License-Identifier: CEPL-1.0
//! Shader loading, render pass, graphics pipeline and framebuffers.

use crate::chain::ChainState;
use ash::util::read_spv;
use ash::vk;
use salamander_render::SetupError;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

const SPIRV_MAGIC: u32 = 0x0723_0203;

fn shader_error(path: &Path, reason: impl Into<String>) -> SetupError {
    SetupError::ShaderLoadFailed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Reads a compiled SPIR-V binary as opaque words.
pub fn load_shader(path: &Path) -> Result<Vec<u32>, SetupError> {
    let bytes = fs::read(path).map_err(|e| shader_error(path, e.to_string()))?;
    if bytes.len() % 4 != 0 {
        return Err(shader_error(
            path,
            format!("{} bytes is not a whole number of words", bytes.len()),
        ));
    }
    let code =
        read_spv(&mut Cursor::new(&bytes[..])).map_err(|e| shader_error(path, e.to_string()))?;
    if code.first() != Some(&SPIRV_MAGIC) {
        return Err(shader_error(path, "missing SPIR-V magic number"));
    }
    Ok(code)
}

/// Both stages, read once at startup and reused on pipeline rebuilds.
#[derive(Clone, Debug)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderCode {
    pub fn load(vertex: &Path, fragment: &Path) -> Result<Self, SetupError> {
        let code = Self {
            vertex: load_shader(vertex)?,
            fragment: load_shader(fragment)?,
        };
        debug!(
            vertex_words = code.vertex.len(),
            fragment_words = code.fragment.len(),
            "shaders loaded"
        );
        Ok(code)
    }
}

unsafe fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
) -> Result<vk::ShaderModule, SetupError> {
    let ci = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&ci, None)
        .map_err(|e| SetupError::PipelineCreationFailed(format!("shader module: {e}")))
}

unsafe fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> Result<vk::RenderPass, SetupError> {
    // Cleared on load, kept on store, handed to presentation afterwards.
    let color = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref);

    // The layout transition must wait for the acquire semaphore, which is
    // waited on at COLOR_ATTACHMENT_OUTPUT.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let attachments = [color];
    let subpasses = [subpass];
    let dependencies = [dependency];
    let ci = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    device
        .create_render_pass(&ci, None)
        .map_err(|e| SetupError::PipelineCreationFailed(format!("render pass: {e}")))
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    shaders: &ShaderCode,
) -> Result<vk::Pipeline, SetupError> {
    // --- Shader modules (destroyed before return) ---
    let vs = create_shader_module(device, &shaders.vertex)?;
    let fs = match create_shader_module(device, &shaders.fragment) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vs)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fs)
            .name(c"main"),
    ];

    // --- Fixed-function state ---
    // Vertices come from gl_VertexIndex; no buffers bound.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    // Viewport/scissor are set at record time, so a resize never needs a new pipeline.
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dyn_states);
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    // No blending; write all RGBA
    let blend_attachments = [vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    }];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let result = device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    );
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);

    match result {
        Ok(pipelines) => pipelines
            .into_iter()
            .next()
            .ok_or_else(|| {
                SetupError::PipelineCreationFailed("driver returned no pipeline".into())
            }),
        Err((_, err)) => Err(SetupError::PipelineCreationFailed(err.to_string())),
    }
}

/// Render pass, layout and pipeline for one attachment format.
pub struct PipelineState {
    device: ash::Device,
    pub format: vk::Format,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PipelineState {
    /// STRICT: `format` MUST match the chain's image format. On a format
    /// change the whole state is rebuilt.
    pub unsafe fn build(
        device: &ash::Device,
        format: vk::Format,
        shaders: &ShaderCode,
    ) -> Result<Self, SetupError> {
        let mut state = Self {
            device: device.clone(),
            format,
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };
        state.render_pass = create_render_pass(device, format)?;

        // No descriptors or push constants.
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        state.layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| SetupError::PipelineCreationFailed(format!("pipeline layout: {e}")))?;

        state.pipeline =
            create_graphics_pipeline(device, state.render_pass, state.layout, shaders)?;
        info!(?format, "graphics pipeline built");
        Ok(state)
    }

    pub unsafe fn destroy(&mut self) {
        self.device.destroy_pipeline(self.pipeline, None);
        self.device.destroy_pipeline_layout(self.layout, None);
        self.device.destroy_render_pass(self.render_pass, None);
        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}

/// One framebuffer per chain image view, in image order.
pub struct Framebuffers {
    device: ash::Device,
    handles: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub unsafe fn create(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        chain: &ChainState,
    ) -> Result<Self, SetupError> {
        let mut fbs = Self {
            device: device.clone(),
            handles: Vec::with_capacity(chain.image_views.len()),
        };
        for &view in &chain.image_views {
            let attachments = [view];
            let ci = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(chain.extent.width)
                .height(chain.extent.height)
                .layers(1);
            let fb = device
                .create_framebuffer(&ci, None)
                .map_err(|e| SetupError::ChainCreationFailed(format!("framebuffer: {e}")))?;
            fbs.handles.push(fb);
        }
        Ok(fbs)
    }

    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.handles.get(image_index as usize).copied()
    }

    pub unsafe fn destroy(&mut self) {
        for fb in self.handles.drain(..) {
            self.device.destroy_framebuffer(fb, None);
        }
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}

use std::sync::Arc;

use kiln_gfx as gfx;

use crate::error::{GfxResultExt, Result};

/// A framebuffer and the render pass layout it is compatible with.
pub struct Fbo {
    layout: Arc<dyn gfx::RenderPassLayout>,
    framebuffer: Arc<dyn gfx::Framebuffer>,
}

impl Fbo {
    pub(crate) fn new(
        device: &dyn gfx::Device,
        width: u32,
        height: u32,
        color_target_count: u32,
        has_depth_stencil: bool,
    ) -> Result<Self> {
        let layout = device
            .create_render_pass_layout(&gfx::RenderPassLayoutDesc {
                color_target_count,
                has_depth_stencil,
            })
            .gfx_call("IDevice::createRenderPassLayout")?;

        let framebuffer = device
            .create_framebuffer(&gfx::FramebufferDesc {
                width,
                height,
                color_target_count,
                has_depth_stencil,
            })
            .gfx_call("IDevice::createFramebuffer")?;

        Ok(Self {
            layout,
            framebuffer,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.framebuffer.desc().width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.framebuffer.desc().height
    }

    #[must_use]
    pub fn color_target_count(&self) -> u32 {
        self.framebuffer.desc().color_target_count
    }

    #[must_use]
    pub fn has_depth_stencil(&self) -> bool {
        self.framebuffer.desc().has_depth_stencil
    }

    #[must_use]
    pub fn layout(&self) -> &Arc<dyn gfx::RenderPassLayout> {
        &self.layout
    }

    #[must_use]
    pub fn framebuffer(&self) -> &Arc<dyn gfx::Framebuffer> {
        &self.framebuffer
    }
}

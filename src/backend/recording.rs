//! Headless backend that records every call
//!
//! Used to validate pass ordering and uniform submission without a GPU.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    EndFrame,
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    WriteTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    BeginRenderPass {
        label: String,
        color_attachments: usize,
        has_depth: bool,
    },
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer(BufferHandle),
    SetIndexBuffer(BufferHandle),
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertex_count: u32,
    },
    DrawIndexed {
        index_count: u32,
    },
    DestroyBuffer(BufferHandle),
}

/// Backend without a device. Resources are bookkeeping entries only.
pub struct RecordingBackend {
    width: u32,
    height: u32,
    max_dimension: u32,
    format: TextureFormat,
    next_id: u64,
    commands: Vec<RecordedCommand>,
    buffers: HashMap<BufferHandle, BufferDescriptor>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    views: HashMap<TextureViewHandle, TextureHandle>,
    pipelines: HashMap<RenderPipelineHandle, RenderPipelineDescriptor>,
    bind_groups: usize,
    in_pass: bool,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            max_dimension: 8192,
            format: TextureFormat::Bgra8UnormSrgb,
            next_id: 1,
            commands: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: 0,
            in_pass: false,
        }
    }

    /// Surface size limit applied on resize, like a device's 2D texture limit
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// All recorded commands in submission order
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of the render passes in the order they began
    pub fn pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                RecordedCommand::BeginRenderPass { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Commands recorded inside the first pass with the given label
    pub fn pass_commands(&self, label: &str) -> Vec<RecordedCommand> {
        self.commands
            .iter()
            .skip_while(|cmd| {
                !matches!(cmd, RecordedCommand::BeginRenderPass { label: l, .. } if l == label)
            })
            .skip(1)
            .take_while(|cmd| !matches!(cmd, RecordedCommand::EndRenderPass))
            .cloned()
            .collect()
    }

    /// Most recent data written to `buffer` at `offset`
    pub fn last_write(&self, buffer: BufferHandle, offset: u64) -> Option<&[u8]> {
        self.commands.iter().rev().find_map(|cmd| match cmd {
            RecordedCommand::WriteBuffer { buffer: b, offset: o, data } if *b == buffer && *o == offset => {
                Some(data.as_slice())
            }
            _ => None,
        })
    }

    /// Live textures whose label matches
    pub fn textures_labeled(&self, label: &str) -> Vec<&TextureDescriptor> {
        self.textures
            .values()
            .filter(|desc| desc.label.as_deref() == Some(label))
            .collect()
    }

    /// Live buffers whose label matches
    pub fn buffers_labeled(&self, label: &str) -> Vec<BufferHandle> {
        self.buffers
            .iter()
            .filter(|(_, desc)| desc.label.as_deref() == Some(label))
            .map(|(handle, _)| *handle)
            .collect()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn pipeline(&self, handle: RenderPipelineHandle) -> Option<&RenderPipelineDescriptor> {
        self.pipelines.get(&handle)
    }

    pub fn bind_group_count(&self) -> usize {
        self.bind_groups
    }

    fn record(&mut self, cmd: RecordedCommand) {
        self.commands.push(cmd);
    }
}

impl GraphicsBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width.min(self.max_dimension);
            self.height = height.min(self.max_dimension);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        self.record(RecordedCommand::BeginFrame);
        let view = TextureViewHandle(self.allocate_id());
        Ok(FrameContext {
            swapchain_view: view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.record(RecordedCommand::EndFrame);
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        if data.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} has no contents",
                desc.label.as_deref().unwrap_or("buffer")
            )));
        }
        let handle = BufferHandle(self.allocate_id());
        let mut desc = desc.clone();
        desc.size = data.len() as u64;
        self.buffers.insert(handle, desc);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.record(RecordedCommand::WriteBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed("Zero-sized texture".into()));
        }
        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let handle = TextureViewHandle(self.allocate_id());
        self.views.insert(handle, texture);
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, _data: &[u8], width: u32, height: u32) {
        self.record(RecordedCommand::WriteTexture { texture, width, height });
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(SamplerHandle(self.allocate_id()))
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.allocate_id()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        for (binding, entry) in entries {
            let known = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(buffer),
                BindGroupEntry::Texture(view) => self.views.contains_key(view),
                BindGroupEntry::Sampler(_) => true,
            };
            if !known {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "Resource for binding {binding} not found"
                )));
            }
        }
        self.bind_groups += 1;
        Ok(BindGroupHandle(self.allocate_id()))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let handle = RenderPipelineHandle(self.allocate_id());
        self.pipelines.insert(handle, desc.clone());
        Ok(handle)
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_pass = true;
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone().unwrap_or_default(),
            color_attachments: desc.color_attachments.len(),
            has_depth: desc.depth_stencil_attachment.is_some(),
        });
    }

    fn end_render_pass(&mut self) {
        self.in_pass = false;
        self.record(RecordedCommand::EndRenderPass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if self.in_pass {
            self.record(RecordedCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if self.in_pass {
            self.record(RecordedCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, _slot: u32, buffer: BufferHandle, _offset: u64) {
        if self.in_pass {
            self.record(RecordedCommand::SetVertexBuffer(buffer));
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, _format: IndexFormat) {
        if self.in_pass {
            self.record(RecordedCommand::SetIndexBuffer(buffer));
        }
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        if self.in_pass {
            self.record(RecordedCommand::SetViewport { width, height });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, _instances: std::ops::Range<u32>) {
        if self.in_pass {
            self.record(RecordedCommand::Draw {
                vertex_count: vertices.len() as u32,
            });
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        _instances: std::ops::Range<u32>,
    ) {
        if self.in_pass {
            self.record(RecordedCommand::DrawIndexed {
                index_count: indices.len() as u32,
            });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.record(RecordedCommand::DestroyBuffer(buffer));
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view);
    }

    fn destroy_bind_group(&mut self, _bind_group: BindGroupHandle) {
        self.bind_groups = self.bind_groups.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_passes_in_order() {
        let mut backend = RecordingBackend::new(64, 64);
        let frame = backend.begin_frame().unwrap();
        for label in ["first", "second"] {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(label.into()),
                color_attachments: vec![ColorAttachment {
                    view: frame.swapchain_view,
                    load_op: LoadOp::Load,
                    store_op: StoreOp::Store,
                }],
                depth_stencil_attachment: None,
            });
            backend.draw(0..3, 0..1);
            backend.end_render_pass();
        }
        backend.end_frame().unwrap();

        assert_eq!(backend.pass_labels(), vec!["first", "second"]);
        assert_eq!(
            backend.pass_commands("second"),
            vec![RecordedCommand::Draw { vertex_count: 3 }]
        );
    }

    #[test]
    fn draws_outside_a_pass_are_ignored() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.draw(0..3, 0..1);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn rejects_empty_initial_contents() {
        let mut backend = RecordingBackend::new(8, 8);
        let desc = BufferDescriptor {
            label: Some("empty".into()),
            size: 0,
            usage: BufferUsage::VERTEX,
        };
        assert!(backend.create_buffer_init(&desc, &[]).is_err());
    }
}

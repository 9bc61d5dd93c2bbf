//! Instanced glyph pipeline.
//!
//! Draws one collection per call: instance and parent records are bound as
//! storage buffers and the vertex stage builds each quad from its instance
//! index, so a whole collection is a single `draw(0..6, 0..count)`.

use super::WgpuDevice;
use crate::error::GpuError;
use crate::instance::{InstanceNode, InstanceRegistry};
use crate::math::{IDENTITY, Mat4};

/// Uniform data for the shader.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Globals {
    pub view_projection: Mat4, // 64 bytes
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            view_projection: IDENTITY,
        }
    }
}

/// Bind group for one collection's buffers, valid for the current frame.
pub struct PreparedDraw {
    bind_group: wgpu::BindGroup,
    instance_count: u32,
}

impl PreparedDraw {
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

pub struct GlyphPipeline {
    pipeline: wgpu::RenderPipeline,
    globals_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    atlas_bind_group: wgpu::BindGroup,
    instance_layout: wgpu::BindGroupLayout,
}

impl GlyphPipeline {
    /// Build the pipeline for `format` targets, sampling `atlas`.
    pub fn new(device: &WgpuDevice, atlas: &wgpu::Texture, format: wgpu::TextureFormat) -> Self {
        let device = device.device();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Glyph Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/glyph.wgsl").into()),
        });

        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Glyph Globals Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let atlas_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Glyph Atlas Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let instance_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Glyph Instance Layout"),
            entries: &[storage_entry(0), storage_entry(1)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Glyph Pipeline Layout"),
            bind_group_layouts: &[&globals_layout, &atlas_layout, &instance_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Glyph Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Glyph Globals Buffer"),
            size: std::mem::size_of::<Globals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Glyph Globals Bind Group"),
            layout: &globals_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: globals_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Glyph Atlas Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let atlas_view = atlas.create_view(&wgpu::TextureViewDescriptor::default());
        let atlas_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Glyph Atlas Bind Group"),
            layout: &atlas_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&atlas_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        Self {
            pipeline,
            globals_buffer,
            globals_bind_group,
            atlas_bind_group,
            instance_layout,
        }
    }

    pub fn set_view_projection(&self, device: &WgpuDevice, view_projection: Mat4) {
        let globals = Globals { view_projection };
        device
            .queue()
            .write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(&globals));
    }

    /// Rebuild or refresh the collection's buffers and bind them.
    ///
    /// Returns `None` when a buffer could not be allocated; the collection is
    /// skipped for this frame and retried on the next.
    pub fn prepare<N: InstanceNode>(
        &self,
        device: &WgpuDevice,
        registry: &InstanceRegistry<N, WgpuDevice>,
    ) -> Option<PreparedDraw> {
        let prepared = registry.with_buffers(device, |instances, parents, instance_count| {
            let bind_group = device.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Glyph Instance Bind Group"),
                layout: &self.instance_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: instances.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: parents.as_entire_binding(),
                    },
                ],
            });
            PreparedDraw {
                bind_group,
                instance_count,
            }
        });

        prepared
            .inspect_err(|e: &GpuError| tracing::warn!(error = %e, "skipping collection this frame"))
            .ok()
    }

    /// One instanced draw for a prepared collection. Six vertices per quad.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, prepared: &PreparedDraw) {
        if prepared.instance_count == 0 {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.globals_bind_group, &[]);
        pass.set_bind_group(1, &self.atlas_bind_group, &[]);
        pass.set_bind_group(2, &prepared.bind_group, &[]);
        pass.draw(0..6, 0..prepared.instance_count);
    }
}

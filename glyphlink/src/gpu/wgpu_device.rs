//! [`RenderDevice`] over a `wgpu` device and queue.

use std::sync::Arc;

use image::RgbaImage;

use super::{BlitEncoder, BufferKind, RenderDevice, check_buffer_write, check_copy_bounds, check_upload_size};
use crate::error::GpuError;

/// Shared `wgpu` device and queue.
#[derive(Debug, Clone)]
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuDevice {
    /// Wrap a device the host application already owns.
    pub fn from_parts(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Request a headless-capable adapter and device, blocking on the futures.
    pub fn request() -> Result<Self, GpuError> {
        pollster::block_on(Self::request_async())
    }

    pub async fn request_async() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "using GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Glyphlink Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::RequestDevice(e.to_string()))?;

        Ok(Self::from_parts(Arc::new(device), Arc::new(queue)))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn create_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage,
            view_formats: &[],
        })
    }
}

impl RenderDevice for WgpuDevice {
    type Texture = wgpu::Texture;
    type Buffer = wgpu::Buffer;
    type Encoder = WgpuBlit;

    fn create_atlas_texture(&self, label: &str, width: u32, height: u32) -> Result<wgpu::Texture, GpuError> {
        Ok(self.create_texture(
            label,
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        ))
    }

    fn upload_bitmap(&self, label: &str, bitmap: &RgbaImage) -> Result<wgpu::Texture, GpuError> {
        let (width, height) = bitmap.dimensions();
        let bytes_per_row = check_upload_size(width, height, bitmap.as_raw().len())?;

        let texture = self.create_texture(
            label,
            width,
            height,
            wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
        );
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bitmap.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(texture)
    }

    fn create_buffer(&self, label: &str, size: u64, kind: BufferKind) -> Result<wgpu::Buffer, GpuError> {
        let out_of_memory = || GpuError::OutOfMemory {
            label: label.to_string(),
            size,
        };
        // Oversized requests are validation errors, which would otherwise panic
        // in the uncaptured error handler.
        let limits = self.device.limits();
        let binding_limit = match kind {
            BufferKind::Storage => u64::from(limits.max_storage_buffer_binding_size),
            BufferKind::Uniform => u64::from(limits.max_uniform_buffer_binding_size),
        };
        if size > limits.max_buffer_size || size > binding_limit {
            return Err(out_of_memory());
        }

        let usage = match kind {
            BufferKind::Storage => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            tracing::warn!(label, size, %error, "buffer allocation failed");
            return Err(out_of_memory());
        }
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        check_buffer_write(offset, data.len(), buffer.size())?;
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn begin_blit(&self, label: &str) -> WgpuBlit {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        WgpuBlit {
            encoder,
            queue: self.queue.clone(),
            copies: 0,
        }
    }
}

/// Command encoder collecting atlas copies for one submission.
pub struct WgpuBlit {
    encoder: wgpu::CommandEncoder,
    queue: Arc<wgpu::Queue>,
    copies: usize,
}

impl BlitEncoder for WgpuBlit {
    type Texture = wgpu::Texture;

    fn copy_texture(
        &mut self,
        source: &wgpu::Texture,
        destination: &wgpu::Texture,
        origin: (u32, u32),
    ) -> Result<(), GpuError> {
        let (width, height) = (source.width(), source.height());
        check_copy_bounds(
            (width, height),
            (destination.width(), destination.height()),
            origin,
        )?;

        self.encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: destination,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin.0,
                    y: origin.1,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.copies += 1;
        Ok(())
    }

    fn copy_count(&self) -> usize {
        self.copies
    }

    fn commit(self) {
        self.queue.submit(std::iter::once(self.encoder.finish()));
    }
}

use std::sync::Arc;

use anyhow::Context;
use image::RgbaImage;
use mapview_core::{MapviewError, MapviewResult, TextureStore};

/// A tile or preview texture with the bind group the quad pipeline samples it through.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub bind_group: wgpu::BindGroup,
}

fn build_sampler(device: &wgpu::Device, label: &str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Linear,
        ..Default::default()
    })
}

pub fn texture_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("quad texture bind group layout"),
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
    })
}

/// Allocates textures on the renderer's device. Every upload is matched by
/// exactly one `release`, which destroys the GPU memory immediately.
pub struct GpuTextures {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: Arc<wgpu::BindGroupLayout>,
    sampler: wgpu::Sampler,
    max_dimension: u32,
    live: usize,
}

impl GpuTextures {
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        layout: Arc<wgpu::BindGroupLayout>,
    ) -> Self {
        let sampler = build_sampler(&device, "tile sampler");
        let max_dimension = device.limits().max_texture_dimension_2d;
        Self {
            device,
            queue,
            layout,
            sampler,
            max_dimension,
            live: 0,
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    fn create_texture(&self, image: &RgbaImage, label: &str) -> anyhow::Result<GpuTexture> {
        let (width, height) = image.dimensions();
        anyhow::ensure!(width > 0 && height > 0, "empty image");
        anyhow::ensure!(
            width <= self.max_dimension && height <= self.max_dimension,
            "{width}x{height} exceeds device limit {}",
            self.max_dimension
        );
        let expected_len = (width as usize) * (height as usize) * 4;
        let rgba = image.as_raw();
        anyhow::ensure!(rgba.len() == expected_len, "rgba size mismatch");

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} bind group")),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        Ok(GpuTexture {
            texture,
            bind_group,
        })
    }
}

impl TextureStore for GpuTextures {
    type Handle = GpuTexture;

    fn upload(&mut self, image: &RgbaImage, label: &str) -> MapviewResult<GpuTexture> {
        let texture = self
            .create_texture(image, label)
            .with_context(|| format!("failed to upload {label}"))
            .map_err(|err| MapviewError::graphics(format!("{err:#}")))?;
        self.live += 1;
        Ok(texture)
    }

    fn release(&mut self, handle: GpuTexture) {
        handle.texture.destroy();
        self.live = self.live.saturating_sub(1);
    }
}

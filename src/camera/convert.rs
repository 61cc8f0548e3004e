//! YUV to RGBA conversion for preview frames.
//!
//! The default path runs a wgpu compute pipeline (conversion plus an optional
//! rotation pass driven by the sensor orientation). Devices without a usable
//! adapter fall back to an integer BT.601 conversion on the CPU.

use std::borrow::Cow;

use anyhow::{anyhow, Result};
use image::{imageops, RgbaImage};
use log::{info, warn};
use pollster::FutureExt;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{BindGroup, Buffer, ComputePipeline, Device, Limits, Queue, Texture, TextureView};

pub enum Converter {
    Gpu(GpuConverter),
    Cpu { width: u32, height: u32 },
}

impl Converter {
    pub fn new(width: u32, height: u32) -> Self {
        match GpuConverter::new(width, height) {
            Ok(gpu) => {
                info!("converting preview frames on the gpu");
                Converter::Gpu(gpu)
            }
            Err(err) => {
                warn!("gpu conversion unavailable ({err}), using the cpu path");
                Converter::Cpu { width, height }
            }
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            Converter::Gpu(gpu) => (gpu.width, gpu.height),
            Converter::Cpu { width, height } => (*width, *height),
        }
    }

    /// Converts one packed YUV frame into `out` and returns the output
    /// dimensions. A rotation of 90 or 270 degrees swaps them.
    pub fn convert(&mut self, yuv: &[u8], orientation: i32, out: &mut Vec<u8>) -> Result<(u32, u32)> {
        match self {
            Converter::Gpu(gpu) => gpu.convert(yuv, orientation, out),
            Converter::Cpu { width, height } => {
                let rgba = yuv420sp_to_rgba(yuv, *width, *height);
                let (rotated, out_width, out_height) =
                    rotate_rgba(rgba, *width, *height, orientation)?;
                *out = rotated;
                Ok((out_width, out_height))
            }
        }
    }
}

/// Integer BT.601 conversion of a packed YUV420SP frame (the Y plane followed
/// by interleaved VU) into RGBA8888.
pub fn yuv420sp_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let frame_size = width * height;
    let mut rgba = Vec::with_capacity(frame_size * 4);
    let mut yp = 0;
    for row in 0..height {
        let mut uvp = frame_size + (row >> 1) * width;
        let mut u = 0i32;
        let mut v = 0i32;
        for col in 0..width {
            let y = (i32::from(data[yp]) - 16).max(0);
            if col & 1 == 0 {
                v = i32::from(data[uvp]) - 128;
                u = i32::from(data[uvp + 1]) - 128;
                uvp += 2;
            }

            let y1192 = 1192 * y;
            let r = (y1192 + 1634 * v).clamp(0, 262143);
            let g = (y1192 - 833 * v - 400 * u).clamp(0, 262143);
            let b = (y1192 + 2066 * u).clamp(0, 262143);

            rgba.extend_from_slice(&[(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8, 255]);
            yp += 1;
        }
    }
    rgba
}

/// Rotates an RGBA buffer by a right-angle sensor orientation. 90 and 270
/// degrees swap the output dimensions.
pub fn rotate_rgba(
    data: Vec<u8>,
    width: u32,
    height: u32,
    degrees: i32,
) -> Result<(Vec<u8>, u32, u32)> {
    let degrees = degrees.rem_euclid(360);
    if degrees == 0 {
        return Ok((data, width, height));
    }
    let image = RgbaImage::from_raw(width, height, data)
        .ok_or_else(|| anyhow!("rgba buffer does not match {width}x{height}"))?;
    let rotated = match degrees {
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        // The sensor orientation tag only carries right angles.
        _ => image,
    };
    let (out_width, out_height) = rotated.dimensions();
    Ok((rotated.into_raw(), out_width, out_height))
}

/// BGRA (as desktop capture backends deliver it) to RGBA.
pub fn bgra_to_rgba(src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    dst.reserve(src.len());
    for pixel in src.chunks_exact(4) {
        dst.extend_from_slice(&[pixel[2], pixel[1], pixel[0], pixel[3]]);
    }
}

/// Next multiple of 256 for texture read-back rows.
pub fn padded_bytes_per_row(width: u32) -> usize {
    let bytes_per_row = width as usize * 4;
    let padding = (256 - bytes_per_row % 256) % 256;
    bytes_per_row + padding
}

struct RotatePass {
    bind_group: BindGroup,
    output_texture: Texture,
    output_size: wgpu::Extent3d,
}

pub struct GpuConverter {
    device: Device,
    queue: Queue,
    width: u32,
    height: u32,
    texture_size: wgpu::Extent3d,
    vu_size: wgpu::Extent3d,
    y_texture: Texture,
    vu_texture: Texture,
    rgba_texture: Texture,
    rgba_texture_view: TextureView,
    yuv_pipeline: ComputePipeline,
    yuv_bind_group: BindGroup,
    padded_bytes_per_row: usize,
    unpadded_bytes_per_row: usize,
    rotate_pipeline: ComputePipeline,
    rotate_pass: Option<RotatePass>,
}

impl GpuConverter {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptionsBase {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .block_on()
            .ok_or(anyhow!("no adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER,
                    required_limits: Limits::default(),
                },
                None,
            )
            .block_on()?;

        let yuv_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
                label: Some("yuv_bind_group_layout"),
            });

        let yuv_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("yuv_pipeline_layout"),
            bind_group_layouts: &[&yuv_bind_group_layout],
            push_constant_ranges: &[],
        });

        let yuv_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("yuv_pipeline"),
            layout: Some(&yuv_pipeline_layout),
            module: &device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("yuv2rgb"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("yuv2rgb.wgsl"))),
            }),
            entry_point: "main",
        });

        let texture_size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        // Interleaved VU at half resolution, two bytes per texel.
        let vu_size = wgpu::Extent3d {
            width: width / 2,
            height: height / 2,
            depth_or_array_layers: 1,
        };

        let y_texture = device.create_texture(&wgpu::TextureDescriptor {
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some("y_texture"),
            view_formats: &[],
        });

        let vu_texture = device.create_texture(&wgpu::TextureDescriptor {
            size: vu_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rg8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some("vu_texture"),
            view_formats: &[],
        });

        let rgba_texture = device.create_texture(&wgpu::TextureDescriptor {
            size: texture_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::STORAGE_BINDING,
            label: Some("rgba_texture"),
            view_formats: &[],
        });

        let y_texture_view = y_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let vu_texture_view = vu_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let rgba_texture_view = rgba_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let vu_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToBorder,
            address_mode_v: wgpu::AddressMode::ClampToBorder,
            address_mode_w: wgpu::AddressMode::ClampToBorder,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let yuv_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &yuv_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&y_texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&vu_texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&vu_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&rgba_texture_view),
                },
            ],
            label: Some("yuv_bind_group"),
        });

        let rotate_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("rotate_pipeline"),
            layout: None,
            module: &device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("rotate"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("rotate.wgsl"))),
            }),
            entry_point: "main",
        });

        Ok(Self {
            device,
            queue,
            width,
            height,
            texture_size,
            vu_size,
            y_texture,
            vu_texture,
            rgba_texture,
            rgba_texture_view,
            yuv_pipeline,
            yuv_bind_group,
            padded_bytes_per_row: padded_bytes_per_row(width),
            unpadded_bytes_per_row: width as usize * 4,
            rotate_pipeline,
            rotate_pass: None,
        })
    }

    fn convert(&mut self, yuv: &[u8], orientation: i32, out: &mut Vec<u8>) -> Result<(u32, u32)> {
        let y_len = (self.width * self.height) as usize;
        let frame_len = y_len + y_len / 2;
        if yuv.len() < frame_len {
            return Err(anyhow!("yuv frame too short: {} < {frame_len}", yuv.len()));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTextureBase {
                texture: &self.y_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &yuv[..y_len],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width),
                rows_per_image: Some(self.height),
            },
            self.texture_size,
        );

        self.queue.write_texture(
            wgpu::ImageCopyTextureBase {
                texture: &self.vu_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &yuv[y_len..frame_len],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width),
                rows_per_image: Some(self.height / 2),
            },
            self.vu_size,
        );

        let orientation = orientation.rem_euclid(360);
        let need_rotate = (90..=270).contains(&orientation);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(&self.yuv_pipeline);
            cpass.set_bind_group(0, &self.yuv_bind_group, &[]);
            cpass.dispatch_workgroups((self.width + 7) / 8, (self.height + 7) / 8, 1);
        }

        if !need_rotate {
            let output_buffer =
                create_readback_buffer(&self.device, self.padded_bytes_per_row, self.height);
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    aspect: wgpu::TextureAspect::All,
                    texture: &self.rgba_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &output_buffer,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(self.padded_bytes_per_row as u32),
                        rows_per_image: Some(self.height),
                    },
                },
                self.texture_size,
            );
            self.queue.submit(Some(encoder.finish()));

            out.resize(self.unpadded_bytes_per_row * self.height as usize, 0);
            read_back(
                &self.device,
                &output_buffer,
                self.padded_bytes_per_row,
                self.unpadded_bytes_per_row,
                out,
            );
            return Ok((self.width, self.height));
        }

        self.queue.submit(Some(encoder.finish()));

        // The rotation pass reads the converted rgba texture directly.
        let rotate = self.rotate_pass.get_or_insert_with(|| {
            build_rotate_pass(
                &self.device,
                &self.rotate_pipeline,
                &self.rgba_texture_view,
                self.texture_size,
                orientation,
            )
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor::default());
            cpass.set_pipeline(&self.rotate_pipeline);
            cpass.set_bind_group(0, &rotate.bind_group, &[]);
            let workgroups_x = (self.texture_size.width + 15) / 16;
            let workgroups_y = (self.texture_size.height + 15) / 16;
            cpass.dispatch_workgroups(workgroups_x, workgroups_y, 1);
        }

        let output_size = rotate.output_size;
        let padded = padded_bytes_per_row(output_size.width);
        let unpadded = output_size.width as usize * 4;

        let output_buffer = create_readback_buffer(&self.device, padded, output_size.height);
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                aspect: wgpu::TextureAspect::All,
                texture: &rotate.output_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(output_size.height),
                },
            },
            output_size,
        );
        self.queue.submit(Some(encoder.finish()));

        out.resize(unpadded * output_size.height as usize, 0);
        read_back(&self.device, &output_buffer, padded, unpadded, out);
        Ok((output_size.width, output_size.height))
    }
}

fn create_readback_buffer(device: &Device, padded_bytes_per_row: usize, rows: u32) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: None,
        size: padded_bytes_per_row as u64 * u64::from(rows),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}

fn read_back(device: &Device, buffer: &Buffer, padded: usize, unpadded: usize, out: &mut [u8]) {
    let buffer_slice = buffer.slice(..);
    buffer_slice.map_async(wgpu::MapMode::Read, |_| {});
    device.poll(wgpu::Maintain::Wait);

    let padded_data = buffer_slice.get_mapped_range();
    for (padded_row, pixels) in padded_data
        .chunks_exact(padded)
        .zip(out.chunks_exact_mut(unpadded))
    {
        pixels.copy_from_slice(&padded_row[..unpadded]);
    }
}

fn build_rotate_pass(
    device: &Device,
    pipeline: &ComputePipeline,
    source_view: &TextureView,
    source_size: wgpu::Extent3d,
    degrees: i32,
) -> RotatePass {
    let (output_width, output_height) = if (degrees / 90) % 2 == 0 {
        (source_size.width, source_size.height)
    } else {
        (source_size.height, source_size.width)
    };
    let output_size = wgpu::Extent3d {
        width: output_width,
        height: output_height,
        depth_or_array_layers: 1,
    };

    let output_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("rotate_output_texture"),
        size: output_size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::STORAGE_BINDING,
        view_formats: &[],
    });

    let degrees_buffer = device.create_buffer_init(&BufferInitDescriptor {
        label: None,
        usage: wgpu::BufferUsages::STORAGE,
        contents: bytemuck::cast_slice(&[degrees]),
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(source_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(
                    &output_texture.create_view(&wgpu::TextureViewDescriptor::default()),
                ),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: degrees_buffer.as_entire_binding(),
            },
        ],
        label: Some("rotate_bind_group"),
    });

    RotatePass {
        bind_group,
        output_texture,
        output_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32, y: u8) -> Vec<u8> {
        let pixels = (width * height) as usize;
        let mut data = vec![y; pixels];
        data.extend(std::iter::repeat(128).take(pixels / 2));
        data
    }

    #[test]
    fn test_yuv420sp_black_and_white() {
        let black = yuv420sp_to_rgba(&gray_frame(4, 2, 16), 4, 2);
        assert_eq!(black.len(), 4 * 2 * 4);
        assert!(black.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));

        // Y well above the nominal white point saturates every channel.
        let white = yuv420sp_to_rgba(&gray_frame(4, 2, 255), 4, 2);
        assert!(white.chunks_exact(4).all(|px| px == [255, 255, 255, 255]));
    }

    #[test]
    fn test_yuv420sp_red() {
        // (Y, V, U) = (81, 240, 90) is the BT.601 red primary.
        let mut data = vec![81u8; 4 * 2];
        data.extend_from_slice(&[240, 90, 240, 90]);
        let rgba = yuv420sp_to_rgba(&data, 4, 2);
        for px in rgba.chunks_exact(4) {
            assert_eq!(px, [254, 0, 0, 255]);
        }
    }

    #[test]
    fn test_rotate_rgba_dimension_swap() {
        // 2x1 image: A then B.
        let a = [1, 2, 3, 255];
        let b = [4, 5, 6, 255];
        let data: Vec<u8> = a.iter().chain(b.iter()).copied().collect();

        let (rotated, w, h) = rotate_rgba(data.clone(), 2, 1, 90).unwrap();
        assert_eq!((w, h), (1, 2));
        assert_eq!(&rotated[..4], a);
        assert_eq!(&rotated[4..], b);

        let (rotated, w, h) = rotate_rgba(data.clone(), 2, 1, 180).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(&rotated[..4], b);
        assert_eq!(&rotated[4..], a);

        let (unrotated, w, h) = rotate_rgba(data.clone(), 2, 1, 0).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(unrotated, data);
    }

    #[test]
    fn test_rotate_rgba_rejects_bad_buffer() {
        assert!(rotate_rgba(vec![0; 7], 2, 1, 90).is_err());
    }

    #[test]
    fn test_bgra_to_rgba() {
        let mut out = Vec::new();
        bgra_to_rgba(&[10, 20, 30, 40, 50, 60, 70, 80], &mut out);
        assert_eq!(out, [30, 20, 10, 40, 70, 60, 50, 80]);
    }

    #[test]
    fn test_padded_bytes_per_row() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(320), 1280);
        assert_eq!(padded_bytes_per_row(100), 512);
        assert_eq!(padded_bytes_per_row(1280), 5120);
    }

    #[test]
    fn test_cpu_converter_rotation_swaps_output() {
        let mut converter = Converter::Cpu { width: 4, height: 2 };
        let mut out = Vec::new();
        let (w, h) = converter.convert(&gray_frame(4, 2, 16), 90, &mut out).unwrap();
        assert_eq!((w, h), (2, 4));
        assert_eq!(out.len(), 4 * 2 * 4);
    }
}

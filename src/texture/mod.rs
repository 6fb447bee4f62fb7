//! Texture upload and the shared scene sampler.
//!
//! Decoding happens outside the renderer: a loader hands over
//! [`TextureStats`] with the payload and a concrete format, and the
//! renderer copies the mip chain through a reusable staging buffer into
//! a device-local image. Uploads are transactional per texture; a failed
//! upload leaves the texture table untouched.

use thiserror::Error;

/// Size of the reusable texture staging buffer (128 MiB).
pub const STAGING_BUFFER_SIZE: u64 = 128 * 1024 * 1024;

/// Decoded texture handed to the renderer by an external loader.
///
/// `data` holds every mip level tightly packed, largest mip first.
#[derive(Debug, Clone)]
pub struct TextureStats {
    /// Width of mip 0 in texels.
    pub width: u32,
    /// Height of mip 0 in texels.
    pub height: u32,
    /// Number of mip levels present in `data`.
    pub mip_count: u32,
    /// Concrete texture format mapped by the loader.
    pub format: wgpu::TextureFormat,
    /// Tightly packed payload.
    pub data: Vec<u8>,
}

/// Errors raised while moving texture payloads onto the device.
#[derive(Error, Debug)]
pub enum TextureError {
    /// The loader handed over a format the uploader cannot copy row
    /// by row (depth or multi-planar formats).
    #[error("texture format {format:?} is not copyable")]
    UnsupportedFormat {
        /// The rejected format.
        format: wgpu::TextureFormat,
    },

    /// The padded payload does not fit the staging buffer.
    #[error("texture needs {needed} staging bytes, buffer holds {STAGING_BUFFER_SIZE}")]
    StagingOverflow {
        /// Bytes required after row alignment.
        needed: u64,
    },

    /// The payload is shorter than the mip chain it declares.
    #[error("payload holds {actual} bytes, mip chain needs {expected}")]
    PayloadTruncated {
        /// Bytes required by the declared mip chain.
        expected: u64,
        /// Bytes provided.
        actual: u64,
    },

    /// Mapping the staging buffer failed.
    #[error("failed to map staging buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
}

/// A scene texture resident on the device.
pub struct SceneTexture {
    /// The GPU texture.
    pub texture: wgpu::Texture,
    /// Full-chain view bound into the texture table.
    pub view: wgpu::TextureView,
}

/// Uploads texture payloads through one reusable staging buffer.
pub struct TextureUploader {
    staging: wgpu::Buffer,
}

/// Row layout of one mip level after copy alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MipLayout {
    /// Rows of blocks in the mip.
    pub rows: u32,
    /// Tightly packed bytes per row.
    pub row_bytes: u32,
    /// Row pitch after `COPY_BYTES_PER_ROW_ALIGNMENT`.
    pub padded_row_bytes: u32,
    /// Mip extent in texels.
    pub extent: (u32, u32),
}

/// Compute the copy layout of mip `level` for `format`, or `None` when
/// the format has no per-block copy size.
pub(crate) fn mip_layout(
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    level: u32,
) -> Option<MipLayout> {
    let (block_w, block_h) = format.block_dimensions();
    let block_size = format.block_copy_size(None)?;

    let mip_w = (width >> level).max(1);
    let mip_h = (height >> level).max(1);
    let blocks_wide = mip_w.div_ceil(block_w);
    let rows = mip_h.div_ceil(block_h);
    let row_bytes = blocks_wide * block_size;
    let padded_row_bytes =
        row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    Some(MipLayout {
        rows,
        row_bytes,
        padded_row_bytes,
        extent: (mip_w, mip_h),
    })
}

impl TextureUploader {
    /// Create the uploader and its staging buffer.
    pub fn new(device: &wgpu::Device) -> Self {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Staging Buffer"),
            size: STAGING_BUFFER_SIZE,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Self { staging }
    }

    /// Copy a decoded texture into a new device-local image.
    ///
    /// The payload is repacked row by row into the staging buffer with
    /// copy-aligned pitches, then every mip is recorded into a single
    /// transfer submission which is waited on before returning.
    pub fn upload(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        stats: &TextureStats,
    ) -> Result<SceneTexture, TextureError> {
        let layouts: Vec<MipLayout> = (0..stats.mip_count)
            .map(|level| mip_layout(stats.format, stats.width, stats.height, level))
            .collect::<Option<_>>()
            .ok_or(TextureError::UnsupportedFormat {
                format: stats.format,
            })?;

        let mut packed_total = 0u64;
        let mut padded_total = 0u64;
        for layout in &layouts {
            packed_total += layout.rows as u64 * layout.row_bytes as u64;
            padded_total += layout.rows as u64 * layout.padded_row_bytes as u64;
        }
        if padded_total > STAGING_BUFFER_SIZE {
            return Err(TextureError::StagingOverflow {
                needed: padded_total,
            });
        }
        if (stats.data.len() as u64) < packed_total {
            return Err(TextureError::PayloadTruncated {
                expected: packed_total,
                actual: stats.data.len() as u64,
            });
        }

        self.map_staging(device)?;
        {
            let mut mapped = self.staging.slice(..padded_total).get_mapped_range_mut();
            let mut src = 0usize;
            let mut dst = 0usize;
            for layout in &layouts {
                for _ in 0..layout.rows {
                    let row = &stats.data[src..src + layout.row_bytes as usize];
                    mapped[dst..dst + layout.row_bytes as usize].copy_from_slice(row);
                    src += layout.row_bytes as usize;
                    dst += layout.padded_row_bytes as usize;
                }
            }
        }
        self.staging.unmap();

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Scene Texture"),
            size: wgpu::Extent3d {
                width: stats.width,
                height: stats.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: stats.mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: stats.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Texture Upload Encoder"),
        });
        let mut offset = 0u64;
        for (level, layout) in layouts.iter().enumerate() {
            let level = level as u32;
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: &self.staging,
                    layout: wgpu::ImageDataLayout {
                        offset,
                        bytes_per_row: Some(layout.padded_row_bytes),
                        rows_per_image: Some(layout.rows),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: layout.extent.0,
                    height: layout.extent.1,
                    depth_or_array_layers: 1,
                },
            );
            offset += layout.rows as u64 * layout.padded_row_bytes as u64;
        }
        queue.submit(Some(encoder.finish()));
        device.poll(wgpu::Maintain::Wait);

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(SceneTexture { texture, view })
    }

    fn map_staging(&self, device: &wgpu::Device) -> Result<(), TextureError> {
        let (sender, receiver) = std::sync::mpsc::channel();
        self.staging
            .slice(..)
            .map_async(wgpu::MapMode::Write, move |result| {
                let _ = sender.send(result);
            });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .expect("map_async callback dropped without reporting")?;
        Ok(())
    }
}

/// Create the sampler shared by every scene texture.
pub fn create_scene_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Scene Texture Sampler"),
        address_mode_u: wgpu::AddressMode::Repeat,
        address_mode_v: wgpu::AddressMode::Repeat,
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        anisotropy_clamp: 8,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_mip_layout() {
        let layout = mip_layout(wgpu::TextureFormat::Rgba8Unorm, 100, 64, 0).unwrap();
        assert_eq!(layout.extent, (100, 64));
        assert_eq!(layout.rows, 64);
        assert_eq!(layout.row_bytes, 400);
        assert_eq!(layout.padded_row_bytes, 512);
    }

    #[test]
    fn test_mip_extent_floors_at_one() {
        let layout = mip_layout(wgpu::TextureFormat::Rgba8Unorm, 16, 4, 4).unwrap();
        assert_eq!(layout.extent, (1, 1));
        assert_eq!(layout.rows, 1);
    }

    #[test]
    fn test_block_compressed_layout() {
        // BC7: 4x4 blocks, 16 bytes per block.
        let layout = mip_layout(wgpu::TextureFormat::Bc7RgbaUnorm, 256, 256, 0).unwrap();
        assert_eq!(layout.rows, 64);
        assert_eq!(layout.row_bytes, 64 * 16);
        assert_eq!(layout.padded_row_bytes, 1024);
    }

    #[test]
    fn test_aligned_rows_stay_aligned() {
        let layout = mip_layout(wgpu::TextureFormat::Rgba8Unorm, 64, 64, 0).unwrap();
        assert_eq!(layout.row_bytes, layout.padded_row_bytes);
    }

    #[test]
    fn test_non_copyable_format_is_rejected() {
        // Depth24Plus has no per-block copy size; the uploader must
        // refuse it instead of panicking.
        assert!(mip_layout(wgpu::TextureFormat::Depth24Plus, 64, 64, 0).is_none());
    }
}

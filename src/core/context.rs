//! wgpu context management and device bring-up.

use super::RenderConfig;
use thiserror::Error;

/// Features the renderer cannot run without: indirect draws driven by a
/// GPU-written count, object ids smuggled through the first-instance
/// field, push constants for the culling parameters, and the runtime
/// texture table.
pub const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::MULTI_DRAW_INDIRECT
    .union(wgpu::Features::MULTI_DRAW_INDIRECT_COUNT)
    .union(wgpu::Features::INDIRECT_FIRST_INSTANCE)
    .union(wgpu::Features::PUSH_CONSTANTS)
    .union(wgpu::Features::TEXTURE_BINDING_ARRAY)
    .union(wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING);

/// Features that improve shader throughput but whose absence is not fatal.
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::SHADER_F16;

/// Push constant budget shared by the culling and pyramid pipelines.
pub const PUSH_CONSTANT_SIZE: u32 = 16;

/// Errors that can occur during context creation.
#[derive(Error, Debug)]
pub enum ContextError {
    /// Failed to create surface.
    #[error("failed to create surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),

    /// No adapter is compatible with the surface.
    #[error("no suitable GPU adapter found")]
    AdapterRequest,

    /// The chosen adapter lacks part of the required feature set.
    #[error("adapter is missing required features: {0:?}")]
    MissingFeatures(wgpu::Features),

    /// Failed to request device.
    #[error("failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Surface reports no supported formats.
    #[error("surface not supported by adapter")]
    SurfaceNotSupported,
}

/// The wgpu rendering context.
/// Owns the device, queue, surface configuration and capability latches.
pub struct Context {
    /// The wgpu instance.
    pub instance: wgpu::Instance,
    /// The rendering surface.
    pub surface: wgpu::Surface<'static>,
    /// The GPU adapter.
    pub adapter: wgpu::Adapter,
    /// The GPU device.
    pub device: wgpu::Device,
    /// The command queue.
    pub queue: wgpu::Queue,
    /// Surface configuration.
    pub surface_config: wgpu::SurfaceConfiguration,
    /// Current surface texture format.
    pub surface_format: wgpu::TextureFormat,
    /// Depth attachment format.
    pub depth_format: wgpu::TextureFormat,
    /// Current surface width.
    pub width: u32,
    /// Current surface height.
    pub height: u32,
    /// Whether the per-meshlet cluster draw path is available.
    pub cluster_path: bool,
}

/// Prefer 8-bit BGRA with sRGB view; otherwise the first reported format.
pub(crate) fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|f| *f == wgpu::TextureFormat::Bgra8UnormSrgb)
        .or_else(|| formats.first().copied())
}

/// The configured present mode when reported; FIFO otherwise.
pub(crate) fn choose_present_mode(
    modes: &[wgpu::PresentMode],
    desired: wgpu::PresentMode,
) -> wgpu::PresentMode {
    if modes.contains(&desired) {
        desired
    } else {
        wgpu::PresentMode::Fifo
    }
}

/// Surfaces reject zero-sized configurations; clamp both dimensions to 1.
pub(crate) fn clamp_surface_extent(width: u32, height: u32) -> (u32, u32) {
    (width.max(1), height.max(1))
}

impl Context {
    /// Create a new context from a window handle.
    ///
    /// Enumerates adapters compatible with the surface, prefers a discrete
    /// GPU, and refuses to start when the required feature set is not met.
    /// There is no fallback below the feature floor.
    pub async fn new<W>(
        window: W,
        width: u32,
        height: u32,
        config: &RenderConfig,
    ) -> Result<Self, ContextError>
    where
        W: Into<wgpu::SurfaceTarget<'static>>,
    {
        let flags = if config.validation {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG
        } else {
            wgpu::InstanceFlags::default()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = pick_adapter(&instance, &surface, config.power_preference)
            .ok_or(ContextError::AdapterRequest)?;
        let info = adapter.get_info();
        log::info!(
            "selected adapter: {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        let supported = adapter.features();
        let missing = REQUIRED_FEATURES - supported;
        if !missing.is_empty() {
            return Err(ContextError::MissingFeatures(missing));
        }
        let optional = OPTIONAL_FEATURES & supported;

        // Storage-heavy culling needs more bindings per stage than the
        // downlevel defaults allow; inherit the adapter's real limits.
        let adapter_limits = adapter.limits();
        let mut required_limits = wgpu::Limits::default().using_resolution(adapter_limits.clone());
        required_limits.max_push_constant_size = adapter_limits
            .max_push_constant_size
            .max(PUSH_CONSTANT_SIZE);
        required_limits.max_storage_buffers_per_shader_stage = adapter_limits
            .max_storage_buffers_per_shader_stage
            .max(10);
        // The pyramid reduction runs 32x32 workgroups; refusing smaller
        // devices here keeps the feature floor strict.
        required_limits.max_compute_invocations_per_workgroup = 1024;
        // Large scenes put hundreds of megabytes behind one binding.
        required_limits.max_storage_buffer_binding_size = adapter_limits
            .max_storage_buffer_binding_size
            .max(256 * 1024 * 1024);
        // The texture table binds every scene texture at once.
        required_limits.max_sampled_textures_per_shader_stage =
            adapter_limits.max_sampled_textures_per_shader_stage;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Arken Device"),
                    required_features: REQUIRED_FEATURES | optional,
                    required_limits,
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        // Validation output goes through the logger; no process-wide
        // state is involved.
        device.on_uncaptured_error(Box::new(|error| {
            log::error!("uncaptured device error: {error}");
        }));

        let caps = surface.get_capabilities(&adapter);
        let surface_format =
            choose_surface_format(&caps.formats).ok_or(ContextError::SurfaceNotSupported)?;
        let present_mode = choose_present_mode(&caps.present_modes, config.present_mode);
        let (width, height) = clamp_surface_extent(width, height);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &surface_config);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            surface_format,
            depth_format: wgpu::TextureFormat::Depth32Float,
            width,
            height,
            cluster_path: true,
        })
    }

    /// Blocking wrapper around [`Context::new`] for native callers.
    pub fn new_blocking<W>(
        window: W,
        width: u32,
        height: u32,
        config: &RenderConfig,
    ) -> Result<Self, ContextError>
    where
        W: Into<wgpu::SurfaceTarget<'static>>,
    {
        pollster::block_on(Self::new(window, width, height, config))
    }

    /// Reconfigure the surface for a new size.
    ///
    /// Calling this with the current size is a no-op.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = clamp_surface_extent(width, height);
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    /// Reconfigure the surface at the current size, used after the
    /// surface is reported lost or out of date.
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.surface_config);
    }

    /// Get the current aspect ratio.
    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Get the current surface texture.
    pub fn get_current_texture(&self) -> Result<wgpu::SurfaceTexture, wgpu::SurfaceError> {
        self.surface.get_current_texture()
    }

    /// Create a command encoder.
    pub fn create_command_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Arken Command Encoder"),
            })
    }

    /// Submit commands to the queue.
    pub fn submit(&self, commands: impl IntoIterator<Item = wgpu::CommandBuffer>) {
        self.queue.submit(commands);
    }
}

/// Enumerate adapters compatible with the surface and prefer a discrete
/// GPU; fall back to the first candidate otherwise.
fn pick_adapter(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'_>,
    power_preference: wgpu::PowerPreference,
) -> Option<wgpu::Adapter> {
    let mut candidates: Vec<wgpu::Adapter> = instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .filter(|a| a.is_surface_supported(surface))
        .collect();

    if candidates.is_empty() {
        // Browser-style platforms cannot enumerate; ask the instance.
        return pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        }));
    }

    if let Some(idx) = candidates
        .iter()
        .position(|a| a.get_info().device_type == wgpu::DeviceType::DiscreteGpu)
    {
        return Some(candidates.swap_remove(idx));
    }
    Some(candidates.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_format_prefers_bgra_srgb() {
        let formats = [
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(
            choose_surface_format(&formats),
            Some(wgpu::TextureFormat::Bgra8UnormSrgb)
        );
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            wgpu::TextureFormat::Rgba16Float,
            wgpu::TextureFormat::Rgba8Unorm,
        ];
        assert_eq!(
            choose_surface_format(&formats),
            Some(wgpu::TextureFormat::Rgba16Float)
        );
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_fallback() {
        let modes = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];
        assert_eq!(
            choose_present_mode(&modes, wgpu::PresentMode::Immediate),
            wgpu::PresentMode::Immediate
        );
        assert_eq!(
            choose_present_mode(&modes, wgpu::PresentMode::Mailbox),
            wgpu::PresentMode::Fifo
        );
    }

    #[test]
    fn test_extent_clamp() {
        assert_eq!(clamp_surface_extent(0, 720), (1, 720));
        assert_eq!(clamp_surface_extent(1280, 0), (1280, 1));
        assert_eq!(clamp_surface_extent(1280, 720), (1280, 720));
    }
}

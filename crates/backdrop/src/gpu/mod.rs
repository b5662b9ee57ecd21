pub mod backend;
pub mod field;
pub mod kernels;
pub mod readback;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use winit::window::Window;

pub use backend::GpuBackend;
pub use field::GpuField;

/// Global flag indicating GPU device was lost
static GPU_DEVICE_LOST: AtomicBool = AtomicBool::new(false);

/// Check if the GPU device has been lost
pub fn is_device_lost() -> bool {
    GPU_DEVICE_LOST.load(Ordering::SeqCst)
}

/// Reset the device lost flag (call after recreating device)
pub fn reset_device_lost() {
    GPU_DEVICE_LOST.store(false, Ordering::SeqCst);
}

/// Adapter capabilities the kernels cannot run without.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Read-write storage access on 32-bit float textures.
    StorageReadWrite,
    /// Blending into `Rg32Float` targets (additive force injection).
    Float32Blendable,
    /// Filtered sampling of 32-bit float textures (advection).
    Float32Filterable,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::StorageReadWrite => write!(f, "read-write storage textures"),
            Capability::Float32Blendable => write!(f, "float32 blending"),
            Capability::Float32Filterable => write!(f, "float32 filtering"),
        }
    }
}

/// Fatal initialization failures. Logged once; the host exits.
#[derive(Debug)]
pub enum InitError {
    NoSurface(String),
    NoAdapter,
    NoDevice(String),
    MissingCapability(Capability),
    UnsupportedSurface,
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitError::NoSurface(e) => write!(f, "could not create a surface: {e}"),
            InitError::NoAdapter => write!(f, "no compatible GPU adapter"),
            InitError::NoDevice(e) => write!(f, "could not create a GPU device: {e}"),
            InitError::MissingCapability(c) => write!(f, "GPU adapter lacks {c}"),
            InitError::UnsupportedSurface => write!(f, "surface is not compatible with the adapter"),
        }
    }
}

impl std::error::Error for InitError {}

/// GPU error type for buffer operations
#[derive(Debug)]
pub enum GpuError {
    DeviceLost,
    BufferMapFailed(wgpu::BufferAsyncError),
    ChannelDisconnected,
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::DeviceLost => write!(f, "GPU device lost"),
            GpuError::BufferMapFailed(e) => write!(f, "Buffer map failed: {:?}", e),
            GpuError::ChannelDisconnected => write!(f, "Channel disconnected"),
        }
    }
}

impl std::error::Error for GpuError {}

/// Wait for a buffer map operation to complete, returning Result instead of panicking.
pub fn await_buffer_map(rx: std::sync::mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>) -> Result<(), GpuError> {
    if is_device_lost() {
        return Err(GpuError::DeviceLost);
    }
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::error!("Buffer map failed: {:?}", e);
            Err(GpuError::BufferMapFailed(e))
        }
        Err(_) => {
            log::error!("Buffer map channel disconnected - possible device lost");
            GPU_DEVICE_LOST.store(true, Ordering::SeqCst);
            Err(GpuError::ChannelDisconnected)
        }
    }
}

/// Device features the kernels need enabled.
pub fn required_features() -> wgpu::Features {
    wgpu::Features::FLOAT32_FILTERABLE
        | wgpu::Features::FLOAT32_BLENDABLE
        | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
}

/// Verify every capability, in a fixed order, reporting the first one missing.
pub fn check_capabilities(adapter: &wgpu::Adapter) -> Result<(), InitError> {
    let features = adapter.features();
    let float = adapter.get_texture_format_features(wgpu::TextureFormat::R32Float);
    let vector = adapter.get_texture_format_features(wgpu::TextureFormat::Rg32Float);

    if !features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES)
        || !float.flags.contains(wgpu::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
    {
        return Err(InitError::MissingCapability(Capability::StorageReadWrite));
    }
    if !features.contains(wgpu::Features::FLOAT32_BLENDABLE) {
        return Err(InitError::MissingCapability(Capability::Float32Blendable));
    }
    if !features.contains(wgpu::Features::FLOAT32_FILTERABLE)
        || !vector.flags.contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
    {
        return Err(InitError::MissingCapability(Capability::Float32Filterable));
    }
    Ok(())
}

/// Check capabilities, then create the device.
pub async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), InitError> {
    check_capabilities(adapter)?;
    log::info!("Using GPU: {:?}", adapter.get_info());

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Backdrop Device"),
                required_features: required_features(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )
        .await
        .map_err(|e| InitError::NoDevice(e.to_string()))?;

    device.on_uncaptured_error(Box::new(|error| {
        log::error!("GPU uncaptured error: {:?}", error);
        if matches!(error, wgpu::Error::OutOfMemory { .. }) {
            GPU_DEVICE_LOST.store(true, Ordering::SeqCst);
        }
    }));
    reset_device_lost();

    Ok((device, queue))
}

/// Device without a surface, for tests and offline runs.
pub fn headless_device() -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>), InitError> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or(InitError::NoAdapter)?;

    let (device, queue) = pollster::block_on(request_device(&adapter))?;
    Ok((Arc::new(device), Arc::new(queue)))
}

/// Window surface plus the device that renders into it.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    pub async fn new(window: Arc<Window>) -> Result<Self, InitError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| InitError::NoSurface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(InitError::NoAdapter)?;

        let (device, queue) = request_device(&adapter).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(InitError::UnsupportedSurface)?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .ok_or(InitError::UnsupportedSurface)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            surface,
            config,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Reapply the current configuration after the surface was lost.
    pub fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_features_cover_filtering_and_blending() {
        assert!(required_features().contains(wgpu::Features::FLOAT32_FILTERABLE));
        assert!(required_features().contains(wgpu::Features::FLOAT32_BLENDABLE));
    }

    #[test]
    fn test_capability_errors_are_distinct() {
        let messages: Vec<String> = [
            Capability::StorageReadWrite,
            Capability::Float32Blendable,
            Capability::Float32Filterable,
        ]
        .into_iter()
        .map(|c| InitError::MissingCapability(c).to_string())
        .collect();
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(messages[0], messages[2]);
    }
}

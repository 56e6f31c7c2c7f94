//! GPU mirror of the scene: splat records packed to a std430-friendly
//! layout and uploaded to wgpu storage buffers.
//!
//! The mirror is keyed by the splat set's identity token, so a frame
//! loop can call [`SplatBuffers::sync`] every frame and pay for an
//! upload only when the scene actually changed. The visibility order is
//! small and camera-dependent, so it is rewritten on every publish.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use parallax_data::{SetId, Splat, SplatSet};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::camera::CameraUniform;

/// Splat record as the shaders see it: 16-byte aligned fields.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuSplat {
    pub pos: [f32; 3],
    pub opacity: f32,
    pub scale: [f32; 3],
    pub _pad0: f32,
    pub rotation: [f32; 4],
    pub color: [f32; 3],
    pub _pad1: f32,
}

impl GpuSplat {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_splat(splat: &Splat) -> Self {
        Self {
            pos: splat.pos,
            opacity: splat.opacity,
            scale: splat.scale,
            _pad0: 0.0,
            rotation: splat.rotation,
            color: splat.color,
            _pad1: 0.0,
        }
    }
}

/// Headless device/queue pair.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Acquire a headless device. No surface is involved; the caller
    /// renders to offscreen targets or uses the buffers from compute.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("no GPU adapter found")?;
        info!(adapter = %adapter.get_info().name, "acquired GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Parallax Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("device request failed")?;

        Ok(Self { device, queue })
    }
}

/// Scene-side GPU buffers: splat records, visibility order, camera
/// uniform.
pub struct SplatBuffers {
    splats: Option<wgpu::Buffer>,
    order: Option<wgpu::Buffer>,
    camera: wgpu::Buffer,
    mirrored: Option<SetId>,
    count: u32,
}

impl SplatBuffers {
    pub fn new(device: &wgpu::Device) -> Self {
        let camera = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Buffer"),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            splats: None,
            order: None,
            camera,
            mirrored: None,
            count: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn splat_buffer(&self) -> Option<&wgpu::Buffer> {
        self.splats.as_ref()
    }

    pub fn order_buffer(&self) -> Option<&wgpu::Buffer> {
        self.order.as_ref()
    }

    pub fn camera_buffer(&self) -> &wgpu::Buffer {
        &self.camera
    }

    /// Mirror a splat set. Returns `true` when an upload happened,
    /// `false` when the set's identity token already matches the
    /// resident copy.
    pub fn sync(&mut self, device: &wgpu::Device, set: &Arc<SplatSet>) -> bool {
        if self.mirrored == Some(set.id()) {
            return false;
        }

        let records: Vec<GpuSplat> = set.splats().iter().map(GpuSplat::from_splat).collect();
        debug!(
            count = records.len(),
            bytes = records.len() * GpuSplat::SIZE,
            "uploading splat records"
        );
        self.splats = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Splat Records"),
            contents: bytemuck::cast_slice(&records),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        }));
        self.count = records.len() as u32;
        self.mirrored = Some(set.id());
        self.order = None;
        true
    }

    /// Rewrite the visibility order buffer. The order changes with the
    /// camera, so this is an unconditional upload; a length mismatch
    /// against the mirrored set means a stale permutation slipped past
    /// the store and is dropped here as well.
    pub fn write_order(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, order: &[u32]) {
        if order.len() as u32 != self.count {
            debug!(got = order.len(), live = self.count, "dropping stale order upload");
            return;
        }
        match &self.order {
            Some(buf) => queue.write_buffer(buf, 0, bytemuck::cast_slice(order)),
            None => {
                self.order = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Visibility Order"),
                    contents: bytemuck::cast_slice(order),
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                }));
            }
        }
    }

    pub fn write_camera(&self, queue: &wgpu::Queue, uniform: &CameraUniform) {
        queue.write_buffer(&self.camera, 0, bytemuck::bytes_of(uniform));
    }
}

//! Rendering core: camera model, covariance projection, depth sorting,
//! scene store, CPU compositor and the GPU mirror.

pub mod camera;
pub mod compositor;
pub mod covariance;
pub mod gpu;
pub mod scene;
pub mod sh;
pub mod sorter;

pub use camera::{Camera, CameraPose, CameraUniform, PoseStyle};
pub use compositor::{Frame, GradingConfig};
pub use gpu::{GpuContext, GpuSplat, SplatBuffers};
pub use scene::SceneStore;
pub use sorter::{sort_back_to_front, DepthSorter};

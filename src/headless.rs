//! CPU-backed render surfaces and capture sources
//!
//! Used by the server binary, which runs without a GPU, and by tests. A
//! [`CpuSurface`] only carries its descriptor and a [`StaticCamera`]
//! remembers where it was told to draw.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SenderError;
use crate::model::view::Viewport;
use crate::multiview::{CaptureSource, RenderSurface, SurfaceDescriptor, SurfaceProvider};

#[derive(Debug)]
pub struct CpuSurface {
    descriptor: SurfaceDescriptor,
}

impl RenderSurface for CpuSurface {
    fn descriptor(&self) -> SurfaceDescriptor {
        self.descriptor
    }
}

#[derive(Debug, Default)]
pub struct HeadlessSurfaceProvider;

impl SurfaceProvider for HeadlessSurfaceProvider {
    fn allocate(&self, descriptor: SurfaceDescriptor) -> Result<Arc<dyn RenderSurface>, SenderError> {
        if descriptor.size.is_empty() {
            return Err(SenderError::Surface(format!(
                "cannot allocate a {} surface",
                descriptor.size
            )));
        }

        Ok(Arc::new(CpuSurface { descriptor }))
    }
}

#[derive(Default)]
struct CameraState {
    surface: Option<Arc<dyn RenderSurface>>,
    viewport: Option<Viewport>,
}

/// A capture source with no scene behind it. Clones share state, so a test
/// can keep one while the sender owns the other.
#[derive(Clone)]
pub struct StaticCamera {
    name: String,
    state: Arc<Mutex<CameraState>>,
}

impl StaticCamera {
    pub fn new(name: &str) -> StaticCamera {
        StaticCamera {
            name: name.to_string(),
            state: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.state.lock().viewport
    }

    pub fn surface(&self) -> Option<Arc<dyn RenderSurface>> {
        self.state.lock().surface.clone()
    }

    pub fn shares_surface(&self, surface: &Arc<dyn RenderSurface>) -> bool {
        self.state
            .lock()
            .surface
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, surface))
    }
}

impl CaptureSource for StaticCamera {
    fn set_output_surface(&mut self, surface: Arc<dyn RenderSurface>) {
        self.state.lock().surface = Some(surface);
    }

    fn assign_viewport(&mut self, viewport: Viewport) {
        self.state.lock().viewport = Some(viewport);
    }
}

//! Multi-camera video sender
//!
//! A [`MultiViewSender`] composes several capture sources side by side onto a
//! single render surface and streams that surface as one video track. A
//! stereo session uses two of them, one per eye.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use str0m::media::MediaKind;
use tracing::{debug, info, warn};

use crate::error::SenderError;
use crate::media::{MediaSender, MediaTrack, SenderCore, SharedRtpSender};
use crate::model::connection::ConnectionId;
use crate::model::params::ParameterUpdate;
use crate::model::view::{tile_horizontally, StreamingSize, Viewport};

const VALID_DEPTHS: [u32; 4] = [0, 16, 24, 32];
const VALID_SAMPLES: [u32; 4] = [1, 2, 4, 8];

/// Depth buffer and anti-aliasing settings for the composed surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderConfig {
    /// Depth buffer bits: 0, 16, 24 or 32.
    pub depth: u32,
    /// Anti-aliasing samples: 1, 2, 4 or 8.
    pub anti_aliasing: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            depth: 0,
            anti_aliasing: 4,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), SenderError> {
        if !VALID_DEPTHS.contains(&self.depth) {
            return Err(SenderError::RenderConfig(format!(
                "depth {} is not one of {:?}",
                self.depth, VALID_DEPTHS
            )));
        }
        if !VALID_SAMPLES.contains(&self.anti_aliasing) {
            return Err(SenderError::RenderConfig(format!(
                "anti-aliasing {} is not one of {:?}",
                self.anti_aliasing, VALID_SAMPLES
            )));
        }
        Ok(())
    }
}

/// What a [`SurfaceProvider`] is asked to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    pub size: StreamingSize,
    pub depth: u32,
    pub anti_aliasing: u32,
}

/// A render target that capture sources draw into.
pub trait RenderSurface: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> SurfaceDescriptor;
}

/// Allocates render surfaces.
pub trait SurfaceProvider: Send + Sync {
    fn allocate(&self, descriptor: SurfaceDescriptor) -> Result<Arc<dyn RenderSurface>, SenderError>;
}

/// A camera-like source whose output can be pointed at a region of a surface.
pub trait CaptureSource: Send {
    fn set_output_surface(&mut self, surface: Arc<dyn RenderSurface>);

    fn assign_viewport(&mut self, viewport: Viewport);
}

struct MultiViewState {
    cameras: Vec<Box<dyn CaptureSource>>,
    surface: Option<Arc<dyn RenderSurface>>,
    viewports: Vec<Viewport>,
    priority_map: Vec<u32>,
}

pub struct MultiViewSender {
    core: SenderCore,
    streaming_size: StreamingSize,
    render: RenderConfig,
    provider: Arc<dyn SurfaceProvider>,
    state: Mutex<MultiViewState>,
}

impl MultiViewSender {
    pub fn new(
        label: &str,
        streaming_size: StreamingSize,
        render: RenderConfig,
        provider: Arc<dyn SurfaceProvider>,
        cameras: Vec<Box<dyn CaptureSource>>,
    ) -> Result<MultiViewSender, SenderError> {
        if cameras.is_empty() {
            return Err(SenderError::NoCaptureSources(label.to_string()));
        }
        render.validate()?;

        Ok(MultiViewSender {
            core: SenderCore::new(MediaKind::Video, label),
            streaming_size,
            render,
            provider,
            state: Mutex::new(MultiViewState {
                cameras,
                surface: None,
                viewports: vec![],
                priority_map: vec![],
            }),
        })
    }

    pub fn streaming_size(&self) -> StreamingSize {
        self.streaming_size
    }

    pub fn render_config(&self) -> RenderConfig {
        self.render
    }

    pub fn core(&self) -> &SenderCore {
        &self.core
    }

    /// Compose the cameras onto one surface and wrap it in a video track.
    ///
    /// The first call allocates the surface and assigns each camera its
    /// column; later calls return the cached track untouched.
    pub fn build_track(&self) -> Result<MediaTrack, SenderError> {
        self.core.track_or_create(|| {
            let mut state = self.state.lock();

            let surface = self.provider.allocate(SurfaceDescriptor {
                size: self.streaming_size,
                depth: self.render.depth,
                anti_aliasing: self.render.anti_aliasing,
            })?;

            let viewports = tile_horizontally(state.cameras.len());
            for (camera, viewport) in state.cameras.iter_mut().zip(&viewports) {
                camera.set_output_surface(Arc::clone(&surface));
                camera.assign_viewport(*viewport);
            }

            info!(
                "Sender {}: composed {} cameras onto a {} surface",
                self.core.label(),
                viewports.len(),
                self.streaming_size
            );

            state.surface = Some(surface);
            state.viewports = viewports;

            Ok(MediaTrack::new(MediaKind::Video, self.core.label()))
        })
    }

    pub fn surface(&self) -> Option<Arc<dyn RenderSurface>> {
        self.state.lock().surface.clone()
    }

    /// Viewports assigned by [`build_track`](Self::build_track), empty before it.
    pub fn viewports(&self) -> Vec<Viewport> {
        self.state.lock().viewports.clone()
    }

    pub fn bound_connection(&self) -> Option<ConnectionId> {
        self.core.started_connection()
    }

    /// Change encoder limits for the connection currently being streamed to.
    ///
    /// `bitrate_kbps` pins every layer's min and max bitrate, `max_framerate`
    /// caps every layer's framerate, and `None` leaves that value as is.
    /// Returns `Ok(false)` without doing anything if no connection is bound.
    pub fn set_send_parameters(
        &self,
        bitrate_kbps: Option<u64>,
        max_framerate: Option<u32>,
    ) -> Result<bool, SenderError> {
        let Some(connection) = self.core.started_connection() else {
            debug!("Sender {}: no bound connection, parameters unchanged", self.core.label());
            return Ok(false);
        };
        let Some(sender) = self.core.sender_for(&connection) else {
            return Ok(false);
        };

        let mut parameters = sender.parameters();
        ParameterUpdate::new(bitrate_kbps, max_framerate).apply(&mut parameters)?;
        sender.set_parameters(parameters)?;

        info!(
            "Sender {}: parameters for {} set to bitrate={:?}kbps framerate={:?}",
            self.core.label(),
            connection,
            bitrate_kbps,
            max_framerate
        );
        Ok(true)
    }

    /// Store the latest per-macroblock priorities for the encoder to pick up.
    pub fn apply_priority_map(&self, priorities: &[u32]) {
        let mut state = self.state.lock();
        if state.priority_map.len() != priorities.len() {
            if !state.priority_map.is_empty() {
                warn!(
                    "Sender {}: priority map resized from {} to {}",
                    self.core.label(),
                    state.priority_map.len(),
                    priorities.len()
                );
            }
            state.priority_map.resize(priorities.len(), 0);
        }
        state.priority_map.copy_from_slice(priorities);
    }

    pub fn priority_map(&self) -> Vec<u32> {
        self.state.lock().priority_map.clone()
    }
}

impl MediaSender for MultiViewSender {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn label(&self) -> &str {
        self.core.label()
    }

    fn track(&self) -> Result<MediaTrack, SenderError> {
        self.build_track()
    }

    fn set_target(&self, connection: &ConnectionId, sender: Option<SharedRtpSender>) {
        self.core.set_target(connection, sender)
    }

    fn set_active(&self, active: bool) {
        self.core.set_active(active)
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessSurfaceProvider, StaticCamera};
    use crate::media::RtpSender;
    use crate::model::params::{EncodingParameters, SendParameters};

    #[derive(Default)]
    struct LayeredSender(Mutex<SendParameters>);

    impl LayeredSender {
        fn with_layers(layers: usize) -> Arc<LayeredSender> {
            let encodings = (0..layers)
                .map(|_| EncodingParameters {
                    max_framerate: Some(90),
                    ..Default::default()
                })
                .collect();
            Arc::new(LayeredSender(Mutex::new(SendParameters { encodings })))
        }
    }

    impl RtpSender for LayeredSender {
        fn parameters(&self) -> SendParameters {
            self.0.lock().clone()
        }

        fn set_parameters(&self, parameters: SendParameters) -> Result<(), SenderError> {
            *self.0.lock() = parameters;
            Ok(())
        }
    }

    fn eye(cameras: usize) -> (MultiViewSender, Vec<StaticCamera>) {
        let probes: Vec<StaticCamera> = (0..cameras)
            .map(|i| StaticCamera::new(&format!("cam-{i}")))
            .collect();
        let boxed = probes
            .iter()
            .map(|c| Box::new(c.clone()) as Box<dyn CaptureSource>)
            .collect();
        let sender = MultiViewSender::new(
            "left",
            StreamingSize::new(1920, 1080),
            RenderConfig::default(),
            Arc::new(HeadlessSurfaceProvider::default()),
            boxed,
        )
        .unwrap();
        (sender, probes)
    }

    #[test]
    fn rejects_invalid_render_config() {
        let result = MultiViewSender::new(
            "left",
            StreamingSize::new(64, 64),
            RenderConfig {
                depth: 8,
                anti_aliasing: 4,
            },
            Arc::new(HeadlessSurfaceProvider::default()),
            vec![Box::new(StaticCamera::new("cam"))],
        );
        assert!(matches!(result, Err(SenderError::RenderConfig(_))));
    }

    #[test]
    fn rejects_empty_camera_list() {
        let result = MultiViewSender::new(
            "left",
            StreamingSize::new(64, 64),
            RenderConfig::default(),
            Arc::new(HeadlessSurfaceProvider::default()),
            vec![],
        );
        assert!(matches!(result, Err(SenderError::NoCaptureSources(_))));
    }

    #[test]
    fn build_track_tiles_cameras_onto_shared_surface() {
        let (sender, cameras) = eye(4);
        let track = sender.build_track().unwrap();
        assert_eq!(track.kind(), MediaKind::Video);

        let surface = sender.surface().unwrap();
        assert_eq!(
            surface.descriptor(),
            SurfaceDescriptor {
                size: StreamingSize::new(1920, 1080),
                depth: 0,
                anti_aliasing: 4,
            }
        );

        for (i, camera) in cameras.iter().enumerate() {
            let viewport = camera.viewport().unwrap();
            assert_eq!(viewport.x_min, i as f64 * 0.25);
            assert_eq!(viewport.width(), 0.25);
            assert!(camera.shares_surface(&surface));
        }
    }

    #[test]
    fn build_track_is_cached() {
        let (sender, _) = eye(2);
        let first = sender.build_track().unwrap();
        let surface = sender.surface().unwrap();

        let second = sender.track().unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&surface, &sender.surface().unwrap()));
    }

    #[test]
    fn parameters_without_connection_are_a_noop() {
        let (sender, _) = eye(1);
        assert!(!sender.set_send_parameters(Some(500), None).unwrap());
    }

    #[test]
    fn bitrate_update_reaches_every_layer() {
        let (sender, _) = eye(1);
        let rtp = LayeredSender::with_layers(3);
        sender.set_target(&"peer-1".into(), Some(rtp.clone()));

        assert!(sender.set_send_parameters(Some(500), None).unwrap());

        for encoding in rtp.parameters().encodings {
            assert_eq!(encoding.min_bitrate, Some(500_000));
            assert_eq!(encoding.max_bitrate, Some(500_000));
            assert_eq!(encoding.max_framerate, Some(90));
        }
    }

    #[test]
    fn parameters_follow_latest_started_connection() {
        let (sender, _) = eye(1);
        let first = LayeredSender::with_layers(1);
        let second = LayeredSender::with_layers(1);
        sender.set_target(&"a".into(), Some(first.clone()));
        sender.set_target(&"b".into(), Some(second.clone()));

        sender.set_send_parameters(None, Some(30)).unwrap();
        assert_eq!(first.parameters().encodings[0].max_framerate, Some(90));
        assert_eq!(second.parameters().encodings[0].max_framerate, Some(30));

        sender.set_target(&"b".into(), None);
        assert!(!sender.set_send_parameters(None, Some(15)).unwrap());
    }

    #[test]
    fn priority_map_is_copied() {
        let (sender, _) = eye(1);
        let mut source = vec![1, 2, 3];
        sender.apply_priority_map(&source);
        source[0] = 9;
        assert_eq!(sender.priority_map(), vec![1, 2, 3]);
    }
}

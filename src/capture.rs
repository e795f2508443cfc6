//! Device capture pipeline: permissions, photo, location, and audio.
//!
//! [`AttachmentCapture`] wraps a platform [`DeviceBackend`] behind a uniform
//! request/result contract.  Every operation checks its device permission
//! first, then performs the capture; nothing here touches the network.
//!
//! The microphone is an exclusive hardware resource: at most one recording
//! is live at a time, enforced here rather than trusted to the backend.

use crate::message::ResourceRef;

/// Device permissions the capture pipeline may need to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Camera,
    MediaLibrary,
    Location,
    Microphone,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::Camera => "camera",
            Permission::MediaLibrary => "media library",
            Permission::Location => "location",
            Permission::Microphone => "microphone",
        };
        write!(f, "{s}")
    }
}

/// Where a photo comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoSource {
    Camera,
    Library,
}

/// A geographic fix from the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    PermissionDenied(Permission),
    /// The user backed out of the capture UI.
    Cancelled,
    /// Device or OS failure.
    Failed(String),
    RecordingAlreadyActive,
    NoActiveRecording,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::PermissionDenied(permission) => {
                write!(f, "{permission} permission denied")
            }
            CaptureError::Cancelled => write!(f, "capture cancelled"),
            CaptureError::Failed(reason) => write!(f, "capture failed: {reason}"),
            CaptureError::RecordingAlreadyActive => {
                write!(f, "an audio recording is already active")
            }
            CaptureError::NoActiveRecording => write!(f, "no audio recording is active"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Platform integration point: OS permission dialogs, camera/library UI,
/// geolocation, microphone, and reverse geocoding.
///
/// Implementations live outside this core; tests supply fakes.
#[allow(async_fn_in_trait)]
pub trait DeviceBackend {
    /// Prompt for (or look up) a permission.  `Ok(false)` means refused.
    async fn request_permission(&self, permission: Permission) -> Result<bool, CaptureError>;

    async fn capture_photo(&self, source: PhotoSource) -> Result<ResourceRef, CaptureError>;

    /// A high-accuracy geographic fix.
    async fn current_position(&self) -> Result<Position, CaptureError>;

    async fn begin_recording(&self) -> Result<(), CaptureError>;

    /// Finish the recording and hand back the captured audio.
    async fn end_recording(&self) -> Result<ResourceRef, CaptureError>;

    /// Discard an in-progress recording.
    async fn abort_recording(&self) -> Result<(), CaptureError>;

    /// Resolve coordinates to a street address, when the platform can.
    async fn reverse_geocode(&self, position: Position) -> Result<Option<String>, CaptureError>;
}

/// Result of a successful photo capture.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoCapture {
    pub resource: ResourceRef,
}

/// Result of a successful location capture.  `address` is best-effort
/// enrichment; `None` when reverse geocoding was unavailable or failed.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationCapture {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

/// Result of a finished audio recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCapture {
    pub resource: ResourceRef,
}

/// Permission-gated capture operations over a [`DeviceBackend`].
pub struct AttachmentCapture<D: DeviceBackend> {
    backend: D,
    recording_active: bool,
}

impl<D: DeviceBackend> AttachmentCapture<D> {
    pub fn new(backend: D) -> Self {
        Self {
            backend,
            recording_active: false,
        }
    }

    async fn ensure_permission(&self, permission: Permission) -> Result<(), CaptureError> {
        if self.backend.request_permission(permission).await? {
            Ok(())
        } else {
            Err(CaptureError::PermissionDenied(permission))
        }
    }

    /// Capture a photo from the camera or the photo library.
    pub async fn capture_photo(&self, source: PhotoSource) -> Result<PhotoCapture, CaptureError> {
        let permission = match source {
            PhotoSource::Camera => Permission::Camera,
            PhotoSource::Library => Permission::MediaLibrary,
        };
        self.ensure_permission(permission).await?;
        let resource = self.backend.capture_photo(source).await?;
        Ok(PhotoCapture { resource })
    }

    /// Capture the current location, enriched with a reverse-geocoded
    /// address when one resolves.  Geocoding failure is not a capture
    /// failure: the coordinates alone are a valid result.
    pub async fn capture_location(&self) -> Result<LocationCapture, CaptureError> {
        self.ensure_permission(Permission::Location).await?;
        let position = self.backend.current_position().await?;
        let address = self
            .backend
            .reverse_geocode(position)
            .await
            .unwrap_or(None);
        Ok(LocationCapture {
            latitude: position.latitude,
            longitude: position.longitude,
            address,
        })
    }

    /// Begin an audio recording.  Fails with `RecordingAlreadyActive` while
    /// another recording is live; the live recording is unaffected.
    pub async fn start_audio_recording(&mut self) -> Result<(), CaptureError> {
        if self.recording_active {
            return Err(CaptureError::RecordingAlreadyActive);
        }
        self.ensure_permission(Permission::Microphone).await?;
        self.backend.begin_recording().await?;
        self.recording_active = true;
        Ok(())
    }

    /// Finish the active recording and return the captured audio.  The
    /// exclusive handle is released whether or not the backend succeeds.
    pub async fn stop_audio_recording(&mut self) -> Result<AudioCapture, CaptureError> {
        if !self.recording_active {
            return Err(CaptureError::NoActiveRecording);
        }
        self.recording_active = false;
        let resource = self.backend.end_recording().await?;
        Ok(AudioCapture { resource })
    }

    /// Discard the active recording, if any.  Safe to call during teardown.
    pub async fn cancel_recording(&mut self) -> Result<(), CaptureError> {
        if !self.recording_active {
            return Ok(());
        }
        self.recording_active = false;
        self.backend.abort_recording().await
    }

    pub fn is_recording(&self) -> bool {
        self.recording_active
    }

    /// Borrow the underlying backend.
    pub fn backend(&self) -> &D {
        &self.backend
    }
}

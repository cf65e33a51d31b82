use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::prelude::{LocalAudioTrack, LocalTrack, LocalVideoTrack, Room, RoomEvent, RoomOptions};
use livekit::publication::RemoteTrackPublication;
use livekit::track::{RemoteTrack, RemoteVideoTrack, TrackKind, TrackSource};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::{AudioSourceOptions, RtcAudioSource, RtcVideoSource, VideoResolution};
use livekit::webrtc::video_source::native::NativeVideoSource;
use tokio::sync::mpsc;

use crate::config::Credentials;
use crate::errors::TransportError;
use crate::handles::EndpointId;
use crate::transport::{ConnectSlot, Transport, TransportEvent, TransportEvents};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

const VIDEO_WIDTH: u32 = 1280;
const VIDEO_HEIGHT: u32 = 720;

/// Local camera and microphone tracks published as one publisher.
#[derive(Clone)]
struct LocalPublisher {
    video: LocalVideoTrack,
    video_source: NativeVideoSource,
    audio: LocalAudioTrack,
    audio_source: NativeAudioSource,
}

/// Transport backed by a LiveKit room.
///
/// The session token is a LiveKit access token (it already names the room);
/// the api key and session id are only used for logging. Remote video track
/// publications are surfaced as streams, keyed by track SID, and are
/// subscribed to explicitly.
pub struct LiveKitTransport {
    url: String,
    room: Arc<ConnectSlot<Arc<Room>>>,
    publications: Arc<StdMutex<HashMap<String, RemoteTrackPublication>>>,
    publishers: StdMutex<HashMap<EndpointId, LocalPublisher>>,
    subscribers: StdMutex<HashMap<EndpointId, RemoteTrackPublication>>,
    next_endpoint: AtomicU64,
}

impl LiveKitTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room: Arc::new(ConnectSlot::new()),
            publications: Arc::new(StdMutex::new(HashMap::new())),
            publishers: StdMutex::new(HashMap::new()),
            subscribers: StdMutex::new(HashMap::new()),
            next_endpoint: AtomicU64::new(1),
        }
    }

    /// Video source native capture code pushes camera frames into.
    pub fn video_source(&self, publisher: EndpointId) -> Option<NativeVideoSource> {
        lock(&self.publishers)
            .get(&publisher)
            .map(|p| p.video_source.clone())
    }

    /// Audio source native capture code pushes PCM frames into.
    pub fn audio_source(&self, publisher: EndpointId) -> Option<NativeAudioSource> {
        lock(&self.publishers)
            .get(&publisher)
            .map(|p| p.audio_source.clone())
    }

    /// Remote video track to hand to a renderer once subscribed.
    pub fn remote_video_track(&self, subscriber: EndpointId) -> Option<RemoteVideoTrack> {
        let publication = lock(&self.subscribers).get(&subscriber).cloned()?;
        match publication.track()? {
            RemoteTrack::Video(track) => Some(track),
            _ => None,
        }
    }

    fn allocate(&self) -> EndpointId {
        EndpointId(self.next_endpoint.fetch_add(1, Ordering::Relaxed))
    }

    fn current_room(&self) -> Result<Arc<Room>, TransportError> {
        self.room
            .current()
            .ok_or_else(|| TransportError::new("not connected"))
    }

    async fn event_loop(
        room: Arc<Room>,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
        publications: Arc<StdMutex<HashMap<String, RemoteTrackPublication>>>,
        slot: Arc<ConnectSlot<Arc<Room>>>,
        generation: u64,
        tx: mpsc::UnboundedSender<TransportEvent>,
    ) {
        // Streams already published before we joined.
        for participant in room.remote_participants().values() {
            for publication in participant.track_publications().values() {
                if publication.kind() == TrackKind::Video {
                    let sid = publication.sid().to_string();
                    lock(&publications).insert(sid.clone(), publication.clone());
                    let _ = tx.send(TransportEvent::RemoteStreamCreated(sid));
                }
            }
        }

        while let Some(event) = events.recv().await {
            let forwarded = match event {
                RoomEvent::TrackPublished { publication, .. } => {
                    if publication.kind() != TrackKind::Video {
                        continue;
                    }
                    let sid = publication.sid().to_string();
                    lock(&publications).insert(sid.clone(), publication);
                    TransportEvent::RemoteStreamCreated(sid)
                }
                RoomEvent::TrackUnpublished { publication, .. } => {
                    let sid = publication.sid().to_string();
                    if lock(&publications).remove(&sid).is_none() {
                        continue;
                    }
                    TransportEvent::RemoteStreamDestroyed(sid)
                }
                RoomEvent::TrackSubscriptionFailed { error, track_sid, .. } => {
                    TransportEvent::SubscribeFailed(format!("{track_sid}: {error}"))
                }
                RoomEvent::Disconnected { reason } => {
                    tracing::info!("livekit room disconnected: {reason:?}");
                    if slot.is_current(generation) {
                        lock(&publications).clear();
                        slot.release(generation);
                    }
                    let _ = tx.send(TransportEvent::Disconnected);
                    break;
                }
                other => {
                    tracing::debug!("unhandled room event: {other:?}");
                    continue;
                }
            };
            if tx.send(forwarded).is_err() {
                break;
            }
        }

        tracing::info!("livekit event loop ended");
    }
}

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<TransportEvents, TransportError> {
        let generation = self.room.begin()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let url = self.url.clone();
        let token = credentials.session_token.clone();
        let slot = self.room.clone();
        let publications = self.publications.clone();
        tracing::info!(
            "connecting to livekit {url} (api key {}, session {})",
            credentials.api_key,
            credentials.session_id
        );

        let task = tokio::spawn(async move {
            let mut options = RoomOptions::default();
            options.auto_subscribe = false;

            let (room, events) = match Room::connect(&url, &token, options).await {
                Ok(connected) => connected,
                Err(e) => {
                    slot.release(generation);
                    let _ = tx.send(TransportEvent::ConnectFailed(e.to_string()));
                    return;
                }
            };
            let room = Arc::new(room);
            let claimed = if tx.is_closed() {
                slot.release(generation);
                Err(room)
            } else {
                slot.complete(generation, room.clone()).map(|()| room)
            };
            let room = match claimed {
                Ok(room) => room,
                Err(orphan) => {
                    tracing::info!("livekit connect finished after disconnect, closing room");
                    // Detached so aborting this task cannot interrupt the close.
                    tokio::spawn(async move {
                        if let Err(e) = orphan.close().await {
                            tracing::warn!("closing orphaned room failed: {e}");
                        }
                    });
                    return;
                }
            };
            if tx.send(TransportEvent::Connected).is_err() {
                return;
            }
            Self::event_loop(room, events, publications, slot, generation, tx).await;
        });
        self.room.track(generation, task.abort_handle());

        Ok(rx)
    }

    fn create_publisher(&self) -> Result<EndpointId, TransportError> {
        let video_source = NativeVideoSource::new(
            VideoResolution {
                width: VIDEO_WIDTH,
                height: VIDEO_HEIGHT,
            },
            false, // not a screencast
        );
        let video =
            LocalVideoTrack::create_video_track("camera", RtcVideoSource::Native(video_source.clone()));

        let audio_source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS,
            AUDIO_QUEUE_SIZE_MS,
        );
        let audio =
            LocalAudioTrack::create_audio_track("microphone", RtcAudioSource::Native(audio_source.clone()));

        let endpoint = self.allocate();
        lock(&self.publishers).insert(
            endpoint,
            LocalPublisher {
                video,
                video_source,
                audio,
                audio_source,
            },
        );
        Ok(endpoint)
    }

    fn create_subscriber(&self, stream_id: &str) -> Result<EndpointId, TransportError> {
        let publication = lock(&self.publications)
            .get(stream_id)
            .cloned()
            .ok_or_else(|| TransportError::new(format!("unknown stream {stream_id}")))?;
        let endpoint = self.allocate();
        lock(&self.subscribers).insert(endpoint, publication);
        Ok(endpoint)
    }

    async fn publish(&self, publisher: EndpointId) -> Result<(), TransportError> {
        let local = lock(&self.publishers)
            .get(&publisher)
            .cloned()
            .ok_or_else(|| TransportError::new(format!("unknown publisher {publisher}")))?;
        let room = self.current_room()?;
        let participant = room.local_participant();

        participant
            .publish_track(
                LocalTrack::Video(local.video),
                TrackPublishOptions {
                    source: TrackSource::Camera,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::new(format!("publish video: {e}")))?;
        participant
            .publish_track(
                LocalTrack::Audio(local.audio),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::new(format!("publish audio: {e}")))?;

        tracing::info!("camera and microphone tracks published");
        Ok(())
    }

    async fn subscribe(&self, subscriber: EndpointId) -> Result<(), TransportError> {
        let publication = lock(&self.subscribers)
            .get(&subscriber)
            .cloned()
            .ok_or_else(|| TransportError::new(format!("unknown subscriber {subscriber}")))?;
        publication.set_subscribed(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let room = self.room.take();
        lock(&self.publishers).clear();
        lock(&self.subscribers).clear();
        lock(&self.publications).clear();
        match room {
            Some(room) => room
                .close()
                .await
                .map_err(|e| TransportError::new(e.to_string())),
            None => Ok(()),
        }
    }
}

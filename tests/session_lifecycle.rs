use std::sync::Arc;

use parking_lot::Mutex;
use vr_stream_rtc::{
    error::{BrokerError, ChannelError, SenderError},
    headless::{HeadlessSurfaceProvider, StaticCamera},
    media::channel::ChannelLink,
    model::params::SendParameters,
    multiview::CaptureSource,
    session::events::ClientEvent,
    AudioStreamSender, Broker, ClientEvents, ClientSession, ConnectionId, DataChannelSlot,
    MediaSender, MultiViewSender, Registration, RenderConfig, RtpSender, StreamingSize,
};

/// Broker that attaches every registration straight away, the way a real
/// broker does once negotiation succeeds.
#[derive(Default)]
struct AttachingBroker {
    log: Vec<(ConnectionId, String)>,
    rtp: Vec<Arc<ParameterStore>>,
    links: Vec<Arc<Outbox>>,
    receipts: Vec<Registration>,
}

impl AttachingBroker {
    fn accept(&mut self, connection: &ConnectionId, label: &str) -> Registration {
        self.log.push((connection.clone(), label.to_string()));
        let receipt = Registration::new();
        self.receipts.push(receipt.clone());
        receipt
    }
}

impl Broker for AttachingBroker {
    fn add_sender(
        &mut self,
        connection: &ConnectionId,
        sender: Arc<dyn MediaSender>,
    ) -> Result<Registration, BrokerError> {
        sender
            .track()
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;
        let rtp = Arc::new(ParameterStore(Mutex::new(SendParameters::single_layer())));
        sender.set_target(connection, Some(rtp.clone()));
        self.rtp.push(rtp);
        Ok(self.accept(connection, sender.label()))
    }

    fn add_channel(
        &mut self,
        connection: &ConnectionId,
        channel: Arc<DataChannelSlot>,
    ) -> Result<Registration, BrokerError> {
        let link = Arc::new(Outbox::default());
        channel.set_channel(connection, Some(link.clone()));
        self.links.push(link);
        Ok(self.accept(connection, channel.label()))
    }
}

struct ParameterStore(Mutex<SendParameters>);

impl RtpSender for ParameterStore {
    fn parameters(&self) -> SendParameters {
        self.0.lock().clone()
    }

    fn set_parameters(&self, parameters: SendParameters) -> Result<(), SenderError> {
        *self.0.lock() = parameters;
        Ok(())
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<String>>);

impl ChannelLink for Outbox {
    fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.0.lock().push(text.to_string());
        Ok(())
    }
}

struct Rig {
    session: ClientSession,
    left: Arc<MultiViewSender>,
    right: Arc<MultiViewSender>,
    audio: Vec<Arc<AudioStreamSender>>,
}

fn rig(size: StreamingSize, audio_tracks: usize) -> Rig {
    let eye = |label: &str| {
        let cameras = (0..2)
            .map(|i| {
                Box::new(StaticCamera::new(&format!("{label}-{i}"))) as Box<dyn CaptureSource>
            })
            .collect();
        Arc::new(
            MultiViewSender::new(
                label,
                size,
                RenderConfig::default(),
                Arc::new(HeadlessSurfaceProvider),
                cameras,
            )
            .unwrap(),
        )
    };

    let left = eye("left");
    let right = eye("right");
    let audio: Vec<_> = (0..audio_tracks)
        .map(|i| Arc::new(AudioStreamSender::new(&format!("audio-{i}"))))
        .collect();

    let mut builder = ClientSession::builder()
        .left(left.clone())
        .right(right.clone())
        .channel(Arc::new(DataChannelSlot::new("input")));
    for a in &audio {
        builder = builder.audio(a.clone());
    }

    Rig {
        session: builder.build().unwrap(),
        left,
        right,
        audio,
    }
}

#[test]
fn client_joins_and_leaves() {
    let mut rig = rig(StreamingSize::new(1920, 1080), 2);
    let mut broker = AttachingBroker::default();
    let id = ConnectionId::from("peer-1");

    rig.session.bind(&id, &mut broker).unwrap();

    let labels: Vec<&str> = broker.log.iter().map(|(_, l)| l.as_str()).collect();
    assert_eq!(labels, ["right", "left", "audio-0", "audio-1", "input"]);
    assert_eq!(broker.rtp.len(), 4);
    assert_eq!(rig.session.stream_dimensions(), StreamingSize::new(1920, 1080));
    assert_eq!(rig.left.bound_connection(), Some(id.clone()));
    assert!(rig.audio.iter().all(|a| a.core().connections() == [id.clone()]));
    assert!(broker.receipts.iter().all(|r| !r.is_withdrawn()));

    rig.session.send_event("welcome", "peer-1").unwrap();
    assert_eq!(broker.links[0].0.lock().len(), 1);

    assert!(rig.session.unbind(&id));

    assert_eq!(rig.session.connection_id(), None);
    assert!(rig.left.core().connections().is_empty());
    assert!(rig.right.core().connections().is_empty());
    assert!(rig.audio.iter().all(|a| a.core().connections().is_empty()));
    assert!(!rig.session.channel().is_bound());
    assert_eq!(broker.receipts.len(), 5);
    assert!(broker.receipts.iter().all(|r| r.is_withdrawn()));
}

#[test]
fn bitrate_applies_only_while_bound() {
    let mut rig = rig(StreamingSize::new(1280, 720), 0);
    let mut broker = AttachingBroker::default();
    let id = ConnectionId::from("peer-1");

    assert!(!rig.left.set_send_parameters(Some(500), None).unwrap());

    rig.session.bind(&id, &mut broker).unwrap();
    assert!(rig.left.set_send_parameters(Some(500), None).unwrap());

    // Registration order puts the right eye first.
    let left_rtp = &broker.rtp[1];
    let encoding = &left_rtp.parameters().encodings[0];
    assert_eq!(encoding.min_bitrate, Some(500_000));
    assert_eq!(encoding.max_bitrate, Some(500_000));
    assert_eq!(encoding.max_framerate, None);
    assert_eq!(broker.rtp[0].parameters(), SendParameters::single_layer());

    rig.session.unbind(&id);
    assert!(!rig.left.set_send_parameters(Some(800), None).unwrap());
}

#[test]
fn bind_composes_both_eyes() {
    let mut rig = rig(StreamingSize::new(1280, 720), 0);
    rig.session
        .bind(&"peer-1".into(), &mut AttachingBroker::default())
        .unwrap();

    for eye in [&rig.left, &rig.right] {
        let viewports = eye.viewports();
        assert_eq!(viewports.len(), 2);
        assert_eq!(viewports[0].x_max, 0.5);
        assert_eq!(viewports[1].x_min, 0.5);
        assert_eq!(
            eye.surface().unwrap().descriptor().size,
            StreamingSize::new(1280, 720)
        );
    }
}

#[test]
fn lobby_hears_join_and_leave() {
    let events = ClientEvents::new();
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let subscription = events.subscribe(move |event, session| {
        sink.lock()
            .push((event, session.lock().connection_id().cloned()));
    });

    let handle = rig(StreamingSize::new(640, 480), 1).session.into_handle();
    let id = ConnectionId::from("peer-7");

    handle
        .lock()
        .bind(&id, &mut AttachingBroker::default())
        .unwrap();
    events.activate(&handle);
    events.deactivate(&handle);
    handle.lock().unbind(&id);

    assert_eq!(
        *seen.lock(),
        vec![
            (ClientEvent::Added, Some(id.clone())),
            (ClientEvent::Left, Some(id)),
        ]
    );
    assert!(events.unsubscribe(subscription));
}

use std::{
    collections::HashMap,
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::{
        mpsc::{self, Receiver, SyncSender, TryRecvError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use rouille::{Request, Response, Server};
use str0m::{
    bwe::Bitrate,
    change::SdpOffer,
    net::{Protocol, Receive},
    Candidate, Input, Rtc,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use vr_stream_rtc::{
    config::StreamConfig,
    headless::{HeadlessSurfaceProvider, StaticCamera},
    multiview::CaptureSource,
    rtc::{Peer, PeerOutput},
    session::events::ClientEvent,
    AudioStreamSender, ClientEvents, ClientSession, ConnectionId, MultiViewSender,
    SessionHandle,
};

use crate::util::select_host_address;

fn init_log() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

pub fn main(config: StreamConfig) -> Result<()> {
    init_log();

    let host_addr = select_host_address()?;

    let (tx, rx) = mpsc::sync_channel(1);

    let socket = UdpSocket::bind(format!("{host_addr}:0")).context("binding a random UDP port")?;
    let addr = socket.local_addr().context("reading the local socket address")?;
    info!("Bound UDP port: {}", addr);

    let initial_bitrate = Bitrate::kbps(config.server.initial_bitrate_kbps);
    let http_addr = config.server.http_addr.clone();
    thread::spawn(move || run(socket, addr, rx, config));

    let server = Server::new(http_addr, move |request| {
        web_request(request, addr, initial_bitrate, tx.clone())
    })
    .map_err(|e| anyhow!("starting the web server: {e}"))?;

    let port = server.server_addr().port();
    info!("Connect a viewer to http://{:?}:{:?}", addr.ip(), port);

    server.run();
    Ok(())
}

/// Sessions and the peers they are bound to, driven from a single thread.
struct Host {
    config: StreamConfig,
    events: ClientEvents,
    peers: Vec<Peer>,
    sessions: HashMap<ConnectionId, SessionHandle>,
}

impl Host {
    fn new(config: StreamConfig) -> Host {
        let events = ClientEvents::new();
        events.subscribe(|event, session| {
            let session = session.lock();
            match event {
                ClientEvent::Added => info!(
                    "Client added: {:?} at {}",
                    session.connection_id(),
                    session.stream_dimensions()
                ),
                ClientEvent::Left => info!("Client left: {:?}", session.connection_id()),
            }
        });

        Host {
            config,
            events,
            peers: vec![],
            sessions: HashMap::new(),
        }
    }

    fn compose_session(&self, id: &ConnectionId) -> Result<ClientSession> {
        let stream = &self.config.stream;
        let provider = Arc::new(HeadlessSurfaceProvider);

        let eye = |name: &str| -> Result<Arc<MultiViewSender>> {
            let cameras = (0..stream.cameras_per_eye)
                .map(|i| Box::new(StaticCamera::new(&format!("{id}-{name}-{i}"))) as Box<dyn CaptureSource>)
                .collect();
            let sender = MultiViewSender::new(
                &format!("{id}-{name}"),
                stream.streaming_size(),
                stream.render_config(),
                provider.clone(),
                cameras,
            )?;
            Ok(Arc::new(sender))
        };

        let mut builder = ClientSession::builder()
            .left(eye("left")?)
            .right(eye("right")?)
            .object_level_streaming(stream.object_level_streaming);
        for i in 0..stream.audio_tracks {
            builder = builder.audio(Arc::new(AudioStreamSender::new(&format!("{id}-audio-{i}"))));
        }

        Ok(builder.build()?)
    }

    /// Compose, bind and announce a session for a new peer. A peer whose
    /// session cannot be set up is disconnected and left for
    /// [`Host::remove_dead_peers`].
    fn add_peer(&mut self, mut peer: Peer) {
        let id = peer.id.clone();

        let session = match self.compose_session(&id) {
            Ok(session) => session.into_handle(),
            Err(e) => {
                warn!("Peer ({}): failed to compose session: {:?}", id, e);
                peer.disconnect();
                self.peers.push(peer);
                return;
            }
        };

        let bound = session.lock().bind(&id, &mut peer);
        if let Err(e) = bound {
            warn!("Peer ({}): failed to bind session: {}", id, e);
            peer.disconnect();
            self.peers.push(peer);
            return;
        }

        self.events.activate(&session);
        self.sessions.insert(id, session);
        self.peers.push(peer);
    }

    /// Tear down sessions of peers that are no longer alive.
    fn remove_dead_peers(&mut self) {
        for peer in self.peers.iter().filter(|p| !p.is_alive()) {
            if let Some(session) = self.sessions.remove(&peer.id) {
                self.events.deactivate(&session);
                session.lock().unbind(&peer.id);
            }
        }

        self.peers.retain(|p| p.is_alive());
    }
}

fn run(socket: UdpSocket, local_addr: SocketAddr, rx: Receiver<(ConnectionId, Rtc)>, config: StreamConfig) {
    let mut host = Host::new(config);
    let mut buf = vec![0; 2000];

    loop {
        host.remove_dead_peers();

        // Spawn new peers from the web server thread
        match rx.try_recv() {
            Ok((id, rtc)) => host.add_peer(Peer::new(id, rtc)),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!("Web server thread is gone; stopping the media loop");
                return;
            }
        }

        // Poll peers until they return timeout
        let mut timeout = Instant::now() + Duration::from_millis(100);
        for peer in host.peers.iter_mut() {
            let t = poll_until_timeout(peer, &socket);
            timeout = timeout.min(t);
        }

        // The read timeout is not allowed to be 0. In case it is 0, we set 1 millisecond.
        let duration = (timeout - Instant::now()).max(Duration::from_millis(1));

        if let Err(e) = socket.set_read_timeout(Some(duration)) {
            warn!("Failed to set socket read timeout: {:?}", e);
        }

        if let Some(input) = read_socket_input(&socket, local_addr, &mut buf) {
            // The rtc.accepts() call is how we demultiplex the incoming packet to know which
            // Rtc instance the traffic belongs to.
            if let Some(peer) = host.peers.iter_mut().find(|p| p.accepts(&input)) {
                peer.handle_input(input);
            } else {
                // This is quite common because we don't get the Rtc instance via the mpsc channel
                // quickly enough before the browser send the first STUN.
                debug!("No peer accepts UDP input: {:?}", input);
            }
        }

        // Drive time forward in all peers.
        let now = Instant::now();
        for peer in &mut host.peers {
            peer.handle_input(Input::Timeout(now));
        }
    }
}

fn web_request(
    request: &Request,
    addr: SocketAddr,
    initial_bitrate: Bitrate,
    tx: SyncSender<(ConnectionId, Rtc)>,
) -> Response {
    debug!("{:#?}", request);

    let Some(mut data) = request.data() else {
        return Response::text("request body already consumed").with_status_code(400);
    };

    let offer: SdpOffer = match serde_json::from_reader(&mut data) {
        Ok(offer) => offer,
        Err(e) => return Response::text(format!("invalid offer: {e}")).with_status_code(400),
    };

    let mut rtc = Rtc::builder().enable_bwe(Some(initial_bitrate)).build();

    match Candidate::host(addr, "udp") {
        Ok(candidate) => {
            rtc.add_local_candidate(candidate);
        }
        Err(e) => {
            warn!("Failed to create host candidate: {:?}", e);
            return Response::text("no host candidate").with_status_code(500);
        }
    }

    let answer = match rtc.sdp_api().accept_offer(offer) {
        Ok(answer) => answer,
        Err(e) => return Response::text(format!("offer rejected: {e}")).with_status_code(400),
    };

    let id = ConnectionId::next();
    info!("Accepted offer for {}", id);
    if tx.send((id, rtc)).is_err() {
        return Response::text("media loop stopped").with_status_code(503);
    }

    match serde_json::to_vec(&answer) {
        Ok(body) => Response::from_data("application/json", body),
        Err(e) => Response::text(format!("failed to serialise answer: {e}")).with_status_code(500),
    }
}

/// Poll all the output from the peer until it returns a timeout.
fn poll_until_timeout(peer: &mut Peer, socket: &UdpSocket) -> Instant {
    loop {
        if !peer.is_alive() {
            // This peer will be cleaned up in the next run of the main loop.
            return Instant::now();
        }

        match peer.poll_output(socket) {
            PeerOutput::Timeout(t) => return t,
            PeerOutput::ChannelOpen(id) => info!("Peer ({}): channel ready", id),
            PeerOutput::Noop => {}
        }
    }
}

fn read_socket_input<'a>(socket: &UdpSocket, local_addr: SocketAddr, buf: &'a mut Vec<u8>) -> Option<Input<'a>> {
    buf.resize(2000, 0);

    match socket.recv_from(buf) {
        Ok((n, source)) => {
            buf.truncate(n);

            // Parse data to a DatagramRecv, which help preparse network data to
            // figure out the multiplexing of all protocols on one UDP port.
            let Ok(contents) = buf.as_slice().try_into() else {
                return None;
            };

            Some(Input::Receive(
                Instant::now(),
                Receive {
                    proto: Protocol::Udp,
                    source,
                    destination: local_addr,
                    contents,
                },
            ))
        }

        Err(e) => match e.kind() {
            // Expected error for set_read_timeout(). One for windows, one for the rest.
            ErrorKind::WouldBlock | ErrorKind::TimedOut => None,
            _ => {
                warn!("UdpSocket read failed: {:?}", e);
                None
            }
        },
    }
}

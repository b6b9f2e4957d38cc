//! Per-device session.
//!
//! A [`Session`] owns everything tied to one connected device: the
//! transport, the command queue and the plugin set. It runs as a single
//! Tokio task, so decoding, queue updates and plugin dispatch never race
//! and need no locks. [`SessionHandle`] is the outside view of the task.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::connection::DeviceIdentity;
use crate::error::{Error, Result};
use crate::event::{EventBus, SessionEvent};
use crate::plugin::{OutboundChannel, Plugin, PluginRegistry};
use crate::protocol::{
    FeatureDescriptor, FeatureId, FrameDecoder, Framing, GaiaPacket, LegacyPacket, Message,
    Packet, PacketFormat,
};
use crate::queue::{CommandQueue, QueueObserver, QueuedCommand};
use crate::transport::Transport;

/// Requests sent from a [`SessionHandle`] to its task.
#[derive(Debug)]
enum Control {
    Handover,
    Disconnect,
}

/// Which plugins a classified message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Every plugin (legacy packets carry no feature).
    All,
    /// Plugins for one feature.
    Feature(FeatureId),
    /// No plugin (vendor-specific features).
    Nowhere,
}

/// Publishes acknowledgement timeouts on the bus.
struct BusTimeoutObserver {
    bus: EventBus,
    device: DeviceIdentity,
}

impl QueueObserver for BusTimeoutObserver {
    fn ack_timed_out(&mut self) {
        self.bus.publish(SessionEvent::AckTimedOut {
            device: self.device.clone(),
        });
    }
}

/// Everything owned by one connected device.
pub struct Session<T> {
    device: DeviceIdentity,
    transport: T,
    config: SessionConfig,
    queue: CommandQueue,
    plugins: Vec<Box<dyn Plugin>>,
    bus: EventBus,
    decoder: FrameDecoder,
    incoming_rx: mpsc::Receiver<Bytes>,
    outbound_rx: mpsc::UnboundedReceiver<QueuedCommand>,
    control_rx: mpsc::Receiver<Control>,
}

impl<T: Transport + 'static> Session<T> {
    /// Instantiates plugins for the advertised features and starts the
    /// session task.
    ///
    /// `incoming` carries the bytes the transport receives from the device.
    /// Must be called from within a Tokio runtime.
    pub fn start(
        device: DeviceIdentity,
        transport: T,
        incoming: mpsc::Receiver<Bytes>,
        registry: &PluginRegistry,
        features: &[FeatureDescriptor],
        bus: EventBus,
        config: SessionConfig,
    ) -> SessionHandle {
        let (channel, outbound_rx) = OutboundChannel::new(&config);
        let (control_tx, control_rx) = mpsc::channel(8);

        let plugins = registry.instantiate_for_device(&device, features, &channel, &bus);

        let mut queue = CommandQueue::with_ack_timeout(config.ack_timeout);
        queue.set_observer(BusTimeoutObserver {
            bus: bus.clone(),
            device: device.clone(),
        });

        let decoder = FrameDecoder::with_length_extension(config.length_extension);

        let session = Self {
            device: device.clone(),
            transport,
            config,
            queue,
            plugins,
            bus,
            decoder,
            incoming_rx: incoming,
            outbound_rx,
            control_rx,
        };

        let task = tokio::spawn(session.run());

        SessionHandle {
            device: Arc::new(device),
            channel,
            control_tx,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        tracing::info!("session started for {}", self.device);

        for plugin in &mut self.plugins {
            plugin.start();
        }
        self.bus.publish(SessionEvent::Started {
            device: self.device.clone(),
            features: self.plugins.iter().map(|p| p.feature()).collect(),
        });

        loop {
            self.pump().await;

            tokio::select! {
                biased;
                incoming = self.incoming_rx.recv() => match incoming {
                    Some(data) => self.handle_incoming(&data),
                    None => {
                        tracing::info!("transport closed for {}", self.device);
                        break;
                    }
                },
                Some(command) = self.outbound_rx.recv() => {
                    self.queue.enqueue(command);
                }
                control = self.control_rx.recv() => match control {
                    Some(Control::Handover) => self.handover(),
                    Some(Control::Disconnect) | None => break,
                },
                () = self.queue.timed_out() => {}
            }
        }

        self.shutdown().await;
    }

    /// Writes queued commands until the queue blocks or empties.
    async fn pump(&mut self) {
        while let Some(command) = self.queue.try_dequeue() {
            tracing::trace!("sending {}", hex::encode(&command.payload));
            let result = self.transport.send(command.payload).await;
            if let Err(e) = &result {
                tracing::warn!("send to {} failed: {}", self.device, e);
            }

            let kind = self.transport.kind();
            for plugin in &mut self.plugins {
                plugin.on_send_result(kind, result.as_ref().err());
            }
        }
    }

    fn handle_incoming(&mut self, data: &[u8]) {
        tracing::trace!("received {}", hex::encode(data));
        match self.config.framing {
            Framing::Gatt => self.dispatch(data),
            Framing::Stream => {
                self.decoder.feed(data);
                loop {
                    match self.decoder.decode() {
                        Ok(Some(frame)) => self.dispatch(frame.payload()),
                        Ok(None) => break,
                        Err(e) => tracing::debug!("dropping frame: {}", e),
                    }
                }
            }
        }
    }

    /// Decodes one packet, classifies it and hands it to its plugins.
    fn dispatch(&mut self, data: &[u8]) {
        let decoded = match self.config.format {
            PacketFormat::Legacy => {
                LegacyPacket::decode(data).map(|packet| (Route::All, packet.classify()))
            }
            PacketFormat::BitPacked => GaiaPacket::decode(data).map(|packet| {
                let route = packet
                    .feature()
                    .feature_id()
                    .map_or(Route::Nowhere, Route::Feature);
                (route, packet.classify())
            }),
        };

        let (route, message) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("dropping packet: {}", e);
                return;
            }
        };

        if message.is_reply() {
            self.queue.acknowledge();
        }

        if matches!(message, Message::Command | Message::Unknown) {
            tracing::debug!("ignoring unclassified packet");
            return;
        }

        for plugin in &mut self.plugins {
            let addressed = match route {
                Route::All => true,
                Route::Feature(id) => plugin.feature() == id,
                Route::Nowhere => false,
            };
            if addressed {
                plugin.on_message(&message);
            }
        }
    }

    fn handover(&mut self) {
        tracing::info!("handover for {}", self.device);
        self.queue.reset();
        for plugin in &mut self.plugins {
            plugin.on_handover();
        }
        self.bus.publish(SessionEvent::HandedOver {
            device: self.device.clone(),
        });
    }

    async fn shutdown(&mut self) {
        self.queue.reset();
        for plugin in &mut self.plugins {
            plugin.stop();
        }
        self.plugins.clear();

        if let Err(e) = self.transport.close().await {
            tracing::warn!("failed to close transport for {}: {}", self.device, e);
        }

        tracing::info!("session stopped for {}", self.device);
        self.bus.publish(SessionEvent::Stopped {
            device: self.device.clone(),
        });
    }
}

/// Handle to a running [`Session`].
///
/// Dropping the handle stops the session like [`disconnect`](Self::disconnect)
/// without waiting for it: plugins are stopped, the transport is closed and
/// [`SessionEvent::Stopped`] is published.
pub struct SessionHandle {
    device: Arc<DeviceIdentity>,
    channel: OutboundChannel,
    control_tx: mpsc::Sender<Control>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Device this session belongs to.
    #[must_use]
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Returns a channel for sending commands outside any plugin.
    #[must_use]
    pub fn outbound(&self) -> OutboundChannel {
        self.channel.clone()
    }

    /// Notifies every plugin of a handover and clears the queue.
    pub async fn handover(&self) -> Result<()> {
        self.control_tx
            .send(Control::Handover)
            .await
            .map_err(|_| Error::ChannelSend)
    }

    /// Stops the session and waits for it to finish.
    ///
    /// Queued commands are dropped, plugins are stopped and the transport
    /// is closed.
    pub async fn disconnect(&mut self) -> Result<()> {
        // the task may already have ended on its own
        let _ = self.control_tx.send(Control::Disconnect).await;
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| Error::ChannelClosed)?;
        }
        Ok(())
    }

    /// Returns true once the session task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::connection::ConnectionKind;
    use crate::event::Subscription;
    use crate::protocol::legacy::EVENT_NOTIFICATION;
    use crate::protocol::{FeatureSelector, REFERENCE_VENDOR_ID, Reason, StreamFrame};
    use crate::transport::{MemoryPeer, MemoryTransport};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records its lifecycle and sends one command on start.
    struct RecordingPlugin {
        feature: FeatureId,
        channel: OutboundChannel,
        log: Log,
    }

    impl RecordingPlugin {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl Plugin for RecordingPlugin {
        fn feature(&self) -> FeatureId {
            self.feature
        }

        fn start(&mut self) {
            self.record(format!("{:?} start", self.feature));
            match self.channel.format() {
                PacketFormat::BitPacked => self
                    .channel
                    .send_command(self.feature, 0x01, Bytes::new())
                    .unwrap(),
                PacketFormat::Legacy => self
                    .channel
                    .send(&LegacyPacket::new(0x000A, 0x0301, false, Bytes::new()), true)
                    .unwrap(),
            }
        }

        fn stop(&mut self) {
            self.record(format!("{:?} stop", self.feature));
        }

        fn on_handover(&mut self) {
            self.record(format!("{:?} handover", self.feature));
        }

        fn on_message(&mut self, message: &Message) {
            self.record(format!("{:?} {:?}", self.feature, message));
        }

        fn on_send_result(&mut self, _kind: ConnectionKind, error: Option<&Error>) {
            if error.is_some() {
                self.record(format!("{:?} send failed", self.feature));
            }
        }
    }

    fn registry(log: &Log, features: &[FeatureId]) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for &feature in features {
            let log = Arc::clone(log);
            registry.register(feature, move |_version, _device, channel, _bus| {
                Box::new(RecordingPlugin {
                    feature,
                    channel,
                    log: Arc::clone(&log),
                })
            });
        }
        registry
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Waits up to a second for an event matching `filter`.
    async fn next_matching(
        events: &mut Subscription<SessionEvent>,
        filter: impl Fn(&SessionEvent) -> bool,
    ) -> bool {
        let found = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(event) = events.recv().await {
                if filter(&event) {
                    return true;
                }
            }
            false
        })
        .await;
        found == Ok(true)
    }

    fn start(
        kind: ConnectionKind,
        config: SessionConfig,
        registry: &PluginRegistry,
        features: &[FeatureDescriptor],
        bus: &EventBus,
    ) -> (SessionHandle, MemoryPeer) {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let (transport, incoming, peer) = MemoryTransport::pair(kind);
        let device = DeviceIdentity::new("AA:BB", kind);
        let handle = Session::start(
            device,
            transport,
            incoming,
            registry,
            features,
            bus.clone(),
            config,
        );
        (handle, peer)
    }

    fn battery_response(payload: &[u8]) -> Bytes {
        GaiaPacket::new(
            REFERENCE_VENDOR_ID,
            FeatureId::Battery.into(),
            Reason::Response,
            0x01,
            payload.to_vec(),
        )
        .encode()
    }

    #[tokio::test]
    async fn test_instantiates_only_registered_features() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery]);
        let bus = EventBus::default();
        let mut started = bus.subscribe::<SessionEvent>();

        let (mut handle, _peer) = start(
            ConnectionKind::Ble,
            SessionConfig::default(),
            &registry,
            &[
                FeatureDescriptor::new(FeatureId::Battery, 1),
                FeatureDescriptor::new(FeatureId::Handset, 2),
            ],
            &bus,
        );

        let event = tokio::time::timeout(Duration::from_secs(1), started.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::Started {
                device: handle.device().clone(),
                features: vec![FeatureId::Battery],
            })
        );

        handle.disconnect().await.unwrap();
        assert!(handle.is_finished());
        assert_eq!(entries(&log), vec!["Battery start", "Battery stop"]);
    }

    #[tokio::test]
    async fn test_reply_acknowledges_and_reaches_plugin() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery, FeatureId::Handset]);
        let bus = EventBus::default();

        let (mut handle, mut peer) = start(
            ConnectionKind::Ble,
            SessionConfig::default(),
            &registry,
            &[
                FeatureDescriptor::new(FeatureId::Battery, 1),
                FeatureDescriptor::new(FeatureId::Handset, 1),
            ],
            &bus,
        );

        // only the first command goes out until it is answered
        let first = peer.next_write().await.unwrap();
        assert_eq!(&first[..], &[0x00, 0x1D, 0x1A, 0x01]);
        tokio::task::yield_now().await;
        assert_eq!(peer.try_next_write(), None);

        peer.inject(battery_response(&[0x64])).await.unwrap();

        let second = peer.next_write().await.unwrap();
        assert_eq!(&second[..], &[0x00, 0x1D, 0x0E, 0x01]);

        handle.disconnect().await.unwrap();
        let log = entries(&log);
        assert!(log.contains(&format!(
            "Battery {:?}",
            Message::Response {
                command: 1,
                data: Bytes::from_static(&[0x64])
            }
        )));
        assert!(!log.iter().any(|e| e.starts_with("Handset Response")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_publishes_event_and_moves_on() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery, FeatureId::EarbudFit]);
        let bus = EventBus::default();
        let mut events = bus.subscribe::<SessionEvent>();

        let (mut handle, mut peer) = start(
            ConnectionKind::Ble,
            SessionConfig::default(),
            &registry,
            &[
                FeatureDescriptor::new(FeatureId::Battery, 1),
                FeatureDescriptor::new(FeatureId::EarbudFit, 1),
            ],
            &bus,
        );

        let begin = tokio::time::Instant::now();
        peer.next_write().await.unwrap();

        loop {
            match events.recv().await {
                Some(SessionEvent::AckTimedOut { .. }) => break,
                Some(_) => {}
                None => panic!("bus closed"),
            }
        }
        assert!(tokio::time::Instant::now() - begin >= Duration::from_secs(5));

        // the unanswered command is dropped and the next one is written
        let second = peer.next_write().await.unwrap();
        assert_eq!(&second[..], &[0x00, 0x1D, 0x12, 0x01]);

        handle.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_legacy_stream_session() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Core]);
        let bus = EventBus::default();
        let config =
            SessionConfig::for_kind(PacketFormat::Legacy, ConnectionKind::AccessoryStream);

        let (mut handle, mut peer) = start(
            ConnectionKind::AccessoryStream,
            config,
            &registry,
            &[FeatureDescriptor::new(FeatureId::Core, 1)],
            &bus,
        );

        // the plugin's legacy command is framed for the stream
        let written = peer.next_write().await.unwrap();
        assert_eq!(written[0], 0xFF);
        assert_eq!(&written[4..], &[0x00, 0x0A, 0x03, 0x01]);

        let notification =
            LegacyPacket::new(0x000A, EVENT_NOTIFICATION, false, vec![0x05, 0xAA]);
        let frame = StreamFrame::new(notification.encode(), false).unwrap().encode();

        // noise, then the frame split across two reads
        peer.inject(vec![0x00, 0x13]).await.unwrap();
        peer.inject(frame.slice(..3)).await.unwrap();
        peer.inject(frame.slice(3..)).await.unwrap();

        handle.disconnect().await.unwrap();
        let expected = format!(
            "Core {:?}",
            Message::Notification {
                id: 5,
                data: Bytes::from_static(&[0xAA])
            }
        );
        assert!(entries(&log).contains(&expected));
    }

    #[tokio::test]
    async fn test_malformed_and_vendor_packets_are_dropped() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery]);
        let bus = EventBus::default();

        let (mut handle, mut peer) = start(
            ConnectionKind::Ble,
            SessionConfig::default(),
            &registry,
            &[FeatureDescriptor::new(FeatureId::Battery, 1)],
            &bus,
        );
        peer.next_write().await.unwrap();

        peer.inject(vec![0x00, 0x1D]).await.unwrap();
        let vendor = GaiaPacket::new(
            0x000A,
            FeatureSelector::Vendor(0x0D),
            Reason::Notification,
            1,
            vec![1],
        );
        peer.inject(vendor.encode()).await.unwrap();

        handle.disconnect().await.unwrap();
        assert_eq!(entries(&log), vec!["Battery start", "Battery stop"]);
    }

    #[tokio::test]
    async fn test_handover_and_send_failure() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery]);
        let bus = EventBus::default();
        let mut events = bus.subscribe::<SessionEvent>();

        let (transport, incoming, peer) = MemoryTransport::pair(ConnectionKind::Ble);
        peer.set_fail_sends(true);
        let mut handle = Session::start(
            DeviceIdentity::new("CC:DD", ConnectionKind::Ble),
            transport,
            incoming,
            &registry,
            &[FeatureDescriptor::new(FeatureId::Battery, 1)],
            bus.clone(),
            SessionConfig::default(),
        );

        handle.handover().await.unwrap();
        assert!(
            next_matching(&mut events, |e| matches!(e, SessionEvent::HandedOver { .. })).await
        );

        handle.disconnect().await.unwrap();
        let log = entries(&log);
        assert!(log.contains(&"Battery send failed".to_string()));
        assert!(log.contains(&"Battery handover".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("Battery stop"));
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_session() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery]);
        let bus = EventBus::default();
        let mut events = bus.subscribe::<SessionEvent>();

        let (handle, mut peer) = start(
            ConnectionKind::Ble,
            SessionConfig::default(),
            &registry,
            &[FeatureDescriptor::new(FeatureId::Battery, 1)],
            &bus,
        );
        peer.next_write().await.unwrap();

        drop(handle);
        assert!(next_matching(&mut events, |e| matches!(e, SessionEvent::Stopped { .. })).await);

        assert_eq!(peer.next_write().await, None);
        assert_eq!(entries(&log), vec!["Battery start", "Battery stop"]);
    }

    #[tokio::test]
    async fn test_stream_session_with_length_extension() {
        let log = Log::default();
        let registry = registry(&log, &[FeatureId::Battery]);
        let bus = EventBus::default();
        let config =
            SessionConfig::for_kind(PacketFormat::BitPacked, ConnectionKind::AccessoryStream)
                .length_extension(true);

        let (mut handle, mut peer) = start(
            ConnectionKind::AccessoryStream,
            config,
            &registry,
            &[FeatureDescriptor::new(FeatureId::Battery, 1)],
            &bus,
        );
        peer.next_write().await.unwrap();

        let mut status = vec![0x00];
        status.extend(std::iter::repeat_n(0x11, 299));
        let response = battery_response(&status);
        let frame = StreamFrame::new(response, true).unwrap().with_checksum();

        // a stray marker with an oversized length must not hold the frame back
        peer.inject(vec![0xFF, 0x01, 0x10, 0xFF, 0xFF]).await.unwrap();
        peer.inject(frame.encode()).await.unwrap();

        handle.disconnect().await.unwrap();
        assert!(
            entries(&log)
                .iter()
                .any(|e| e.starts_with("Battery Response { command: 1"))
        );
    }
}

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad, noise, ping, tcp, yamux,
    swarm::SwarmEvent,
    Multiaddr, PeerId, StreamProtocol, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use tokio::sync::mpsc;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::P2pConfig;
use crate::fabric::TopicFabric;
use sdn_core::{SdnError, EXCHANGE_PROTOCOL_ID, PNM_TOPIC};
use sdn_identity::TopicPublisher;
use sdn_peers::{ConnectionGater, PeerRegistry, RateLimiter};
use sdn_proto::ExchangeEngine;

/// Combined libp2p network behaviour for an SDN node.
///
/// The `#[derive(NetworkBehaviour)]` macro auto-generates an
/// `SdnBehaviourEvent` enum with one variant per field.
#[derive(NetworkBehaviour)]
pub struct SdnBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub stream: libp2p_stream::Behaviour,
}

/// Commands the rest of the node may send into the swarm loop.
#[derive(Debug)]
pub enum P2pCommand {
    Publish { topic: String, payload: Vec<u8> },
    Subscribe { schema: String },
    Unsubscribe { schema: String },
    Dial { addr: String },
}

/// Application-facing handle returned from `P2pNetwork::new()`.
pub struct P2pHandle {
    pub command_tx: mpsc::Sender<P2pCommand>,
    pub local_peer_id: PeerId,
}

impl P2pHandle {
    /// A publisher suitable for the profile publication task.
    pub fn topic_publisher(&self) -> Arc<dyn TopicPublisher> {
        Arc::new(CommandPublisher(self.command_tx.clone()))
    }
}

struct CommandPublisher(mpsc::Sender<P2pCommand>);

impl TopicPublisher for CommandPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SdnError> {
        self.0
            .try_send(P2pCommand::Publish {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| SdnError::Other("p2p command queue full".into()))
    }
}

/// Owns the libp2p Swarm. Pass to `tokio::spawn(network.run(cancel))`.
pub struct P2pNetwork {
    swarm: Swarm<SdnBehaviour>,
    command_rx: mpsc::Receiver<P2pCommand>,
    fabric: Arc<TopicFabric>,
    gater: Arc<ConnectionGater>,
    registry: Arc<PeerRegistry>,
    limiter: Arc<RateLimiter>,
    incoming: libp2p_stream::IncomingStreams,
    engine: Arc<ExchangeEngine>,
}

impl P2pNetwork {
    /// Build the network and return `(P2pNetwork, P2pHandle)`.
    ///
    /// The overlay identity comes from the HD base key, so the peer id is
    /// stable across restarts of the same identity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &P2pConfig,
        identity: libp2p::identity::Keypair,
        engine: Arc<ExchangeEngine>,
        fabric: Arc<TopicFabric>,
        gater: Arc<ConnectionGater>,
        registry: Arc<PeerRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Result<(Self, P2pHandle), Box<dyn std::error::Error + Send + Sync>> {
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(identity)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                let message_id_fn = |msg: &gossipsub::Message| {
                    let mut s = DefaultHasher::new();
                    msg.data.hash(&mut s);
                    gossipsub::MessageId::from(s.finish().to_string())
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let store = kad::store::MemoryStore::new(key.public().to_peer_id());
                let kademlia = kad::Behaviour::new(key.public().to_peer_id(), store);

                let identify = identify::Behaviour::new(identify::Config::new(
                    config.protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();
                let stream = libp2p_stream::Behaviour::new();

                Ok(SdnBehaviour { gossipsub, kademlia, identify, ping, stream })
            })?
            .build();

        // The reserved profile topic plus every configured schema topic.
        let pnm = gossipsub::IdentTopic::new(PNM_TOPIC);
        swarm.behaviour_mut().gossipsub.subscribe(&pnm)?;
        for schema in &config.subscribe_schemas {
            let topic = fabric.subscribe(schema)?;
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&gossipsub::IdentTopic::new(topic))?;
        }

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        for addr_str in &config.bootstrap_peers {
            if let Ok(addr) = addr_str.parse::<Multiaddr>() {
                if let Some(libp2p::multiaddr::Protocol::P2p(peer_id)) = addr.iter().last() {
                    swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                    debug!(peer = %peer_id, "added bootstrap peer");
                }
            }
        }

        let incoming = swarm
            .behaviour()
            .stream
            .new_control()
            .accept(StreamProtocol::new(EXCHANGE_PROTOCOL_ID))?;

        let local_peer_id = *swarm.local_peer_id();
        let (command_tx, command_rx) = mpsc::channel(256);

        let network = P2pNetwork {
            swarm,
            command_rx,
            fabric,
            gater,
            registry,
            limiter,
            incoming,
            engine,
        };
        let handle = P2pHandle { command_tx, local_peer_id };

        Ok((network, handle))
    }

    /// Drive the P2P event loop until cancelled. Run in a dedicated task.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("p2p loop stopping");
                    return;
                }

                Some((peer, stream)) = self.incoming.next() => {
                    // Worker per stream; the engine applies admission and
                    // deadlines, and errors stay local to this stream.
                    let engine = Arc::clone(&self.engine);
                    let child = cancel.child_token();
                    tokio::spawn(async move {
                        let peer_id = peer.to_base58();
                        tokio::select! {
                            _ = child.cancelled() => {}
                            result = engine.serve_stream(&peer_id, stream.compat()) => {
                                if let Err(e) = result {
                                    debug!(peer = %peer_id, error = %e, "exchange stream closed");
                                }
                            }
                        }
                    });
                }

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }

                event = self.swarm.select_next_some() => {
                    self.handle_event(event, &cancel);
                }
            }
        }
    }

    fn handle_command(&mut self, command: P2pCommand) {
        match command {
            P2pCommand::Publish { topic, payload } => {
                let topic = gossipsub::IdentTopic::new(topic);
                if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(topic, payload) {
                    warn!(error = %e, "gossipsub publish failed");
                }
            }
            P2pCommand::Subscribe { schema } => match self.fabric.subscribe(&schema) {
                Ok(topic) => {
                    let topic = gossipsub::IdentTopic::new(topic);
                    if let Err(e) = self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                        warn!(schema = %schema, error = ?e, "subscribe failed");
                    }
                }
                Err(e) => warn!(schema = %schema, error = %e, "refusing bad schema subscribe"),
            },
            P2pCommand::Unsubscribe { schema } => {
                if let Some(topic) = self.fabric.unsubscribe(&schema) {
                    let topic = gossipsub::IdentTopic::new(topic);
                    let _ = self.swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
                }
            }
            P2pCommand::Dial { addr } => {
                let parsed: Result<Multiaddr, _> = addr.parse();
                match parsed {
                    Ok(ma) => {
                        // Outbound gating happens here, before the dial.
                        if let Some(libp2p::multiaddr::Protocol::P2p(peer_id)) = ma.iter().last() {
                            if !self.gater.intercept_peer_dial(&peer_id) {
                                return;
                            }
                        }
                        if let Err(e) = self.swarm.dial(ma) {
                            warn!(addr = %addr, error = %e, "dial failed");
                        }
                    }
                    Err(_) => warn!(addr = %addr, "bad dial address"),
                }
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<SdnBehaviourEvent>, cancel: &CancellationToken) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(addr = %address, "p2p listening on");
            }

            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                // The gater ran its pre-identity accept already (always
                // allow); now the identity is known, enforce policy.
                if !self.gater.intercept_secured(&peer_id) {
                    let _ = self.swarm.disconnect_peer_id(peer_id);
                    return;
                }
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = self.registry.record_connection(&peer_id.to_base58(), now) {
                    warn!(peer = %peer_id, error = %e, "failed to record connection");
                }
                debug!(peer = %peer_id, "connection established");
            }

            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                self.limiter.forget(&peer_id.to_base58());
                debug!(peer = %peer_id, "connection closed");
            }

            SwarmEvent::Behaviour(SdnBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let fabric = Arc::clone(&self.fabric);
                let topic = message.topic.as_str().to_string();
                let source = propagation_source.to_base58();
                let child = cancel.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = child.cancelled() => {}
                        result = fabric.deliver(&topic, &message.data, &source) => {
                            if let Err(e) = result {
                                debug!(topic = %topic, peer = %source, error = %e, "topic delivery refused");
                            }
                        }
                    }
                });
            }

            SwarmEvent::Behaviour(SdnBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for addr in info.listen_addrs {
                    self.swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
                }
            }

            _ => {}
        }
    }
}

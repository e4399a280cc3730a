//! Commands into the network service.
//!
//! The network service owns the connections; everything else talks to it
//! through a [`NetworkHandle`].

use crate::{Error, Result};
use libp2p::PeerId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Reason sent to a peer when we drop the connection (devp2p disconnect codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Disconnect requested by the local node
    Requested = 0x00,
    /// TCP sub-system error
    TcpSubsystemError = 0x01,
    /// Peer broke the protocol, e.g. sent data it was not asked for
    BreachOfProtocol = 0x02,
    /// Peer is of no use to us
    UselessPeer = 0x03,
    /// Peer limit reached, or peer evicted to make room
    TooManyPeers = 0x04,
    /// Already connected to this peer
    AlreadyConnected = 0x05,
    /// Incompatible P2P protocol version
    IncompatibleP2pProtocolVersion = 0x06,
    /// Local client is shutting down
    ClientQuitting = 0x08,
    /// Peer did not answer in time
    TimeoutOnReceivingMessage = 0x0b,
    /// Sub-protocol specific reason
    SubprotocolTriggered = 0x10,
}

impl DisconnectReason {
    /// The wire code of this reason
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Reason for a wire code, if known
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Requested,
            0x01 => Self::TcpSubsystemError,
            0x02 => Self::BreachOfProtocol,
            0x03 => Self::UselessPeer,
            0x04 => Self::TooManyPeers,
            0x05 => Self::AlreadyConnected,
            0x06 => Self::IncompatibleP2pProtocolVersion,
            0x08 => Self::ClientQuitting,
            0x0b => Self::TimeoutOnReceivingMessage,
            0x10 => Self::SubprotocolTriggered,
            _ => return None,
        })
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "REQUESTED",
            Self::TcpSubsystemError => "TCP_SUBSYSTEM_ERROR",
            Self::BreachOfProtocol => "BREACH_OF_PROTOCOL",
            Self::UselessPeer => "USELESS_PEER",
            Self::TooManyPeers => "TOO_MANY_PEERS",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::IncompatibleP2pProtocolVersion => "INCOMPATIBLE_P2P_PROTOCOL_VERSION",
            Self::ClientQuitting => "CLIENT_QUITTING",
            Self::TimeoutOnReceivingMessage => "TIMEOUT_ON_RECEIVING_MESSAGE",
            Self::SubprotocolTriggered => "SUBPROTOCOL_TRIGGERED",
        };
        write!(f, "{} (0x{:02x})", name, self.code())
    }
}

/// Commands that can be sent to the network service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Disconnect from a peer
    Disconnect(PeerId, DisconnectReason),
    /// Shutdown the network
    Shutdown,
}

/// Something that can drop a connection to one peer.
pub trait PeerConnection: Send + Sync {
    /// Ask the network layer to disconnect. Must not block.
    fn disconnect(&self, reason: DisconnectReason);
}

/// Handle for sending commands to the network service
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::Sender<Command>,
}

impl NetworkHandle {
    /// Create a new network handle
    pub fn new(command_tx: mpsc::Sender<Command>) -> Self {
        Self { command_tx }
    }

    /// Disconnect from a peer
    pub async fn disconnect(&self, peer_id: PeerId, reason: DisconnectReason) -> Result<()> {
        self.command_tx
            .send(Command::Disconnect(peer_id, reason))
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// Queue a disconnect without waiting for channel capacity
    pub fn try_disconnect(&self, peer_id: PeerId, reason: DisconnectReason) -> Result<()> {
        self.command_tx
            .try_send(Command::Disconnect(peer_id, reason))
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// Shutdown the network service
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// A [`PeerConnection`] for `peer_id` backed by this handle
    pub fn connection(&self, peer_id: PeerId) -> Arc<dyn PeerConnection> {
        Arc::new(HandleConnection {
            peer_id,
            handle: self.clone(),
        })
    }
}

struct HandleConnection {
    peer_id: PeerId,
    handle: NetworkHandle,
}

impl PeerConnection for HandleConnection {
    fn disconnect(&self, reason: DisconnectReason) {
        match self.handle.try_disconnect(self.peer_id, reason) {
            Ok(()) => debug!(peer = %self.peer_id, %reason, "Queued peer disconnect"),
            Err(e) => warn!(peer = %self.peer_id, error = %e, "Failed to queue peer disconnect"),
        }
    }
}

mod endpoint;
mod mux;
mod overlay;
mod protocol;
mod registry;
mod socket;
mod transport;

pub use endpoint::{Broadcast, ClientNetwork, ListenerId, RegistryListener, ServerNetwork};
pub use mux::{EventMux, Handler, Multiplexer};
pub use overlay::{ChannelOverlay, ChannelOverlays, ScopedSocket};
pub use protocol::{
    ClientStart, DEFAULT_PORT, Frame, FrameError, LoadModule, MAX_FRAME_SIZE, ModuleSpec,
    PeerRegister, PeerRoute, RecordError, Severity, StateEntry, StateFlush, TakeSnapshot,
    TakeSnapshotRes, TimeSync, kind, scoped_kind, split_scoped,
};
pub use registry::{
    ClientRecord, ClientRegistry, DEFAULT_MAX_CLIENTS, RegistrationError, RegistryEvent,
};
pub use socket::{Outbound, SocketHandle, SocketId};
pub use transport::{DisconnectReason, Inbound, connect, spawn_connection};

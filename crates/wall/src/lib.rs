pub mod clock;
pub mod geometry;
pub mod module;
pub mod net;
pub mod state;
pub mod surface;

pub use clock::{AdjustableClock, Clock, ClockReference, ManualClock, SharedClock, SystemClock};
pub use geometry::{GeometryError, Point, Rect};
pub use module::{
    ClientContext, ClientModule, ClientModules, LibraryError, ModuleDef, ModuleError,
    ModuleLibrary, Schedule, ScheduleEntry, ServerContext, ServerModule, ServerModules,
};
pub use net::{
    ChannelOverlay, ChannelOverlays, ClientNetwork, ClientRecord, ClientRegistry, Frame,
    FrameError, RegistrationError, ServerNetwork, SocketHandle, SocketId,
};
pub use state::{Schema, SharedState, StateError, StateManager, StateStore};
pub use surface::{Surface, SurfaceCapabilities, SurfaceError, SurfaceSnapshot};

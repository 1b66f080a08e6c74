mod def;
mod interface;
mod schedule;

pub use def::{EMPTY_MODULE, LibraryError, ModuleDef, ModuleLibrary};
pub use interface::{
    BoxFuture, ClientContext, ClientModule, ClientModuleFactory, ClientModules, JoinSubscriptions,
    ModuleError, ServerContext, ServerModule, ServerModuleFactory, ServerModules,
};
pub use schedule::{DEFAULT_DURATION_SECS, Schedule, ScheduleEntry};

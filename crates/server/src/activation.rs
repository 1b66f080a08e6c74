use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use wall::Point;
use wall::module::{JoinSubscriptions, ModuleDef, ServerModule};
use wall::net::{ChannelOverlays, LoadModule, ServerNetwork};
use wall::state::StateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    FadingIn,
    Visible,
    Disposed,
}

/// Per-instance resources opened when an activation starts.
pub struct Resources {
    pub state: StateStore,
    pub overlays: Arc<ChannelOverlays<ServerNetwork>>,
    pub subscriptions: JoinSubscriptions,
}

/// One scheduled run of a module, from preparation to disposal.
pub struct Activation {
    pub id: String,
    pub def: ModuleDef,
    pub deadline: f64,
    pub geo: Vec<Point>,
    pub hold_ms: Option<f64>,
    phase: Phase,
    module: Option<Box<dyn ServerModule>>,
    resources: Resources,
}

impl Activation {
    pub fn new(
        id: String,
        def: ModuleDef,
        deadline: f64,
        geo: Vec<Point>,
        hold_ms: Option<f64>,
        resources: Resources,
    ) -> Self {
        Self {
            id,
            def,
            deadline,
            geo,
            hold_ms,
            phase: Phase::Pending,
            module: None,
            resources,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_module(&mut self, module: Option<Box<dyn ServerModule>>) {
        self.module = module;
    }

    pub fn fade_in(&mut self) {
        if self.phase == Phase::Pending {
            self.phase = Phase::FadingIn;
        }
    }

    pub fn show(&mut self) {
        if self.phase == Phase::FadingIn {
            self.phase = Phase::Visible;
        }
    }

    /// Runs one module tick. Returns false if the module panicked.
    pub fn tick(&mut self, time: f64, delta: f64) -> bool {
        match self.module.as_mut() {
            Some(module) => catch_unwind(AssertUnwindSafe(|| module.tick(time, delta))).is_ok(),
            None => true,
        }
    }

    pub fn load_message(&self) -> LoadModule {
        LoadModule {
            module: self.def.spec(),
            id: self.id.clone(),
            deadline: self.deadline,
            geo: self.geo.clone(),
        }
    }

    /// Tears the instance down. The store, overlay and subscriptions go
    /// first so nothing reaches the module once its hook runs. Safe to call
    /// on a half-built activation and more than once.
    pub fn dispose(&mut self) -> bool {
        if self.phase == Phase::Disposed {
            return false;
        }
        self.phase = Phase::Disposed;

        self.resources.state.close(&self.id);
        self.resources.overlays.close(&self.id);
        let released = self.resources.subscriptions.release();
        if released > 0 {
            log::debug!("{}: released {} join subscriptions", self.id, released);
        }

        if let Some(mut module) = self.module.take() {
            if catch_unwind(AssertUnwindSafe(|| module.dispose())).is_err() {
                log::warn!("{}: {} panicked while disposing", self.id, self.def.name);
            }
        }
        log::info!("{}: disposed {}", self.id, self.def.name);
        true
    }
}

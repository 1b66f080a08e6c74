use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{self, JoinError, JoinSet};

use wall::module::{
    JoinSubscriptions, ModuleDef, ModuleError, ModuleLibrary, Schedule, ServerContext,
    ServerModule, ServerModules,
};
use wall::net::{Broadcast, ChannelOverlays, ClientRecord, LoadModule, ServerNetwork, kind};
use wall::state::StateStore;
use wall::{Rect, SharedClock};

use crate::activation::{Activation, Phase, Resources};
use crate::config::DriverConfig;

const EMPTY_CROSSFADE_MS: f64 = 1000.0;

/// What a preparation task hands back to the driver.
pub struct Prepared {
    pub id: String,
    pub module: Option<Box<dyn ServerModule>>,
    pub result: Result<(), ModuleError>,
}

/// Walks the schedule: prepares the next module, announces it with a shared
/// deadline, swaps it in when the deadline passes and disposes the old one.
pub struct ModuleDriver {
    config: DriverConfig,
    library: ModuleLibrary,
    schedule: Schedule,
    modules: ServerModules,
    network: Arc<ServerNetwork>,
    overlays: Arc<ChannelOverlays<ServerNetwork>>,
    state: StateStore,
    clock: SharedClock,
    wall: Rect,
    visible: Option<Activation>,
    incoming: Option<Activation>,
    preparing: JoinSet<Prepared>,
    /// Preparation task -> activation id, so a panicked task can be traced.
    tasks: HashMap<task::Id, String>,
    next_advance_at: Option<f64>,
    paused: bool,
    serial: u64,
}

impl ModuleDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DriverConfig,
        library: ModuleLibrary,
        schedule: Schedule,
        modules: ServerModules,
        network: Arc<ServerNetwork>,
        state: StateStore,
        clock: SharedClock,
        wall: Rect,
    ) -> Self {
        let overlays = Arc::new(ChannelOverlays::new(Arc::clone(&network)));
        Self {
            config,
            library,
            schedule,
            modules,
            network,
            overlays,
            state,
            clock,
            wall,
            visible: None,
            incoming: None,
            preparing: JoinSet::new(),
            tasks: HashMap::new(),
            next_advance_at: None,
            paused: false,
            serial: 0,
        }
    }

    pub fn start(&mut self) {
        if self.schedule.is_empty() {
            log::warn!("Schedule is empty, nothing to play");
            return;
        }
        self.advance();
    }

    /// Starts the next schedule entry. Returns the new activation id.
    pub fn advance(&mut self) -> Option<String> {
        let entry = self.schedule.advance()?.clone();
        let def = match self.library.get(&entry.module) {
            Ok(def) => def.clone().with_config(entry.config.clone()),
            Err(e) => {
                log::error!("Skipping schedule entry: {}", e);
                self.retry_later();
                return None;
            }
        };
        Some(self.begin(def, Some(entry.duration_secs * 1000.0)))
    }

    pub fn play_module(&mut self, name: &str) -> Option<String> {
        let def = match self.library.get(name) {
            Ok(def) => def.clone(),
            Err(e) => {
                log::warn!("Cannot play: {}", e);
                return None;
            }
        };
        self.paused = false;
        let hold = self
            .schedule
            .entries()
            .iter()
            .find(|e| e.module == name)
            .map(|e| e.duration_secs * 1000.0);
        Some(self.begin(def, hold))
    }

    pub fn skip_ahead(&mut self) -> Option<String> {
        self.paused = false;
        self.advance()
    }

    /// Fades to the empty module and holds there until resumed.
    pub fn fade_to_black(&mut self) -> String {
        self.paused = true;
        self.begin(ModuleDef::empty(), None)
    }

    fn begin(&mut self, def: ModuleDef, hold_ms: Option<f64>) -> String {
        if let Some(mut superseded) = self.incoming.take() {
            log::info!("{}: superseded before its deadline", superseded.id);
            superseded.dispose();
        }

        let crossfade = if def.is_empty() {
            EMPTY_CROSSFADE_MS
        } else {
            self.config.crossfade.as_secs_f64() * 1000.0
        };
        let deadline = self.clock.now_ms() + crossfade;
        self.serial += 1;
        let id = format!("{}-{:.0}", self.serial, deadline);
        self.next_advance_at = None;

        let resources = Resources {
            state: self.state.clone(),
            overlays: Arc::clone(&self.overlays),
            subscriptions: JoinSubscriptions::new(Arc::clone(&self.network)),
        };
        let context = ServerContext {
            id: id.clone(),
            network: self.overlays.open(&id),
            state: self.state.open(&id),
            wall: self.wall,
            clock: Arc::clone(&self.clock),
            subscriptions: resources.subscriptions.clone(),
        };
        let activation = Activation::new(
            id.clone(),
            def,
            deadline,
            self.wall.points(),
            hold_ms,
            resources,
        );
        log::info!(
            "{}: preparing {} for deadline {:.0}",
            id,
            activation.def.name,
            deadline
        );

        let module = match activation.def.server.clone() {
            Some(server_kind) => {
                match self
                    .modules
                    .create(&server_kind, context, &activation.def.config)
                {
                    Ok(module) => Some(module),
                    Err(e) => {
                        self.abandon(activation, e);
                        return id;
                    }
                }
            }
            None => None,
        };

        let timeout = self.config.prepare_timeout;
        let task_id = id.clone();
        let handle = self.preparing.spawn(async move {
            let mut module = module;
            let result = match module.as_mut() {
                Some(m) => match tokio::time::timeout(timeout, m.prepare(deadline)).await {
                    Ok(result) => result,
                    Err(_) => Err(ModuleError::Timeout(timeout)),
                },
                None => Ok(()),
            };
            Prepared {
                id: task_id,
                module,
                result,
            }
        });
        self.tasks.insert(handle.id(), id.clone());

        self.incoming = Some(activation);
        id
    }

    pub fn is_preparing(&self) -> bool {
        !self.preparing.is_empty()
    }

    pub async fn next_prepared(&mut self) -> Option<Result<Prepared, JoinError>> {
        let joined = self.preparing.join_next_with_id().await?;
        Some(joined.map(|(task, prepared)| {
            self.tasks.remove(&task);
            prepared
        }))
    }

    pub fn on_prepared(&mut self, joined: Result<Prepared, JoinError>) {
        match joined {
            Ok(prepared) => self.finish_preparation(prepared),
            Err(e) => {
                let Some(id) = self.tasks.remove(&e.id()) else {
                    log::error!("Untracked preparation task failed: {}", e);
                    return;
                };
                let current = self
                    .incoming
                    .as_ref()
                    .is_some_and(|a| a.id == id && a.phase() == Phase::Pending);
                if !current {
                    log::warn!("{}: superseded preparation failed: {}", id, e);
                    return;
                }
                if let Some(activation) = self.incoming.take() {
                    let reason = if e.is_panic() {
                        "prepare panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    self.abandon(activation, ModuleError::Failed(reason));
                }
            }
        }
    }

    pub fn finish_preparation(&mut self, prepared: Prepared) {
        let Prepared { id, module, result } = prepared;

        let current = self
            .incoming
            .as_ref()
            .is_some_and(|a| a.id == id && a.phase() == Phase::Pending);
        if !current {
            log::debug!("{}: ignoring preparation of superseded activation", id);
            if let Some(mut module) = module {
                module.dispose();
            }
            return;
        }
        let Some(mut activation) = self.incoming.take() else {
            return;
        };
        activation.set_module(module);

        if let Err(e) = result {
            self.abandon(activation, e);
            return;
        }

        activation.fade_in();
        let message = activation.load_message();
        let sent = self.broadcast_load(&message);
        log::info!(
            "{}: {} fading in on {} clients",
            activation.id,
            activation.def.name,
            sent
        );
        self.incoming = Some(activation);
    }

    fn abandon(&mut self, mut activation: Activation, error: ModuleError) {
        log::error!(
            "{}: failed to prepare {}: {}",
            activation.id,
            activation.def.name,
            error
        );
        activation.dispose();
        self.retry_later();
    }

    fn retry_later(&mut self) {
        if !self.paused {
            let retry = self.config.retry_delay.as_secs_f64() * 1000.0;
            self.next_advance_at = Some(self.clock.now_ms() + retry);
        }
    }

    fn broadcast_load(&self, message: &LoadModule) -> usize {
        match serde_json::to_value(message) {
            Ok(payload) => self.network.broadcast(kind::LOAD_MODULE, payload),
            Err(e) => {
                log::error!("{}: failed to encode loadModule: {}", message.id, e);
                0
            }
        }
    }

    pub fn tick(&mut self, now: f64, delta: f64) {
        let due = self
            .incoming
            .as_ref()
            .is_some_and(|a| a.phase() == Phase::FadingIn && now >= a.deadline);
        if due {
            self.promote();
        }

        let crashed = self
            .visible
            .as_mut()
            .is_some_and(|visible| !visible.tick(now, delta));
        if crashed {
            if let Some(mut visible) = self.visible.take() {
                log::warn!("{}: {} panicked in tick, retiring it", visible.id, visible.def.name);
                visible.dispose();
            }
            self.retry_later();
        }

        let advance = !self.paused
            && self.incoming.is_none()
            && self.next_advance_at.is_some_and(|at| now >= at);
        if advance {
            self.advance();
        }
    }

    fn promote(&mut self) {
        let Some(mut incoming) = self.incoming.take() else {
            return;
        };
        if let Some(mut outgoing) = self.visible.take() {
            outgoing.dispose();
        }
        incoming.show();
        log::info!("{}: {} is visible", incoming.id, incoming.def.name);
        self.next_advance_at = match (self.paused, incoming.hold_ms) {
            (false, Some(hold)) => Some(incoming.deadline + hold),
            _ => None,
        };
        self.visible = Some(incoming);
    }

    /// Replays what a newly registered client missed: the visible module
    /// with its original deadline, then the incoming one if already
    /// announced.
    pub fn client_joined(&self, record: &ClientRecord) {
        let replay = self
            .visible
            .iter()
            .chain(self.incoming.iter().filter(|a| a.phase() == Phase::FadingIn));
        for activation in replay {
            match serde_json::to_value(activation.load_message()) {
                Ok(payload) => {
                    record.socket.send(kind::LOAD_MODULE, payload);
                }
                Err(e) => log::error!("{}: failed to encode loadModule: {}", activation.id, e),
            }
        }
    }

    pub fn visible_id(&self) -> Option<&str> {
        self.visible.as_ref().map(|a| a.id.as_str())
    }

    pub fn incoming_id(&self) -> Option<&str> {
        self.incoming.as_ref().map(|a| a.id.as_str())
    }

    pub fn incoming_phase(&self) -> Option<Phase> {
        self.incoming.as_ref().map(Activation::phase)
    }

    pub fn next_advance_at(&self) -> Option<f64> {
        self.next_advance_at
    }

    pub fn shutdown(&mut self) {
        self.preparing.abort_all();
        self.tasks.clear();
        for mut activation in self.incoming.take().into_iter().chain(self.visible.take()) {
            activation.dispose();
        }
    }
}

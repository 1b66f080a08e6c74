use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{self, JoinError, JoinSet};

use wall::module::{ClientContext, ClientModule, ClientModules, ModuleError};
use wall::net::{
    ChannelOverlays, ClientNetwork, LoadModule, RecordError, Severity, TakeSnapshotRes, kind,
};
use wall::state::StateManager;
use wall::{Clock, Point, Rect, SharedClock, Surface, SurfaceCapabilities};

use crate::title::TitleCard;

/// Snapshots are shrunk to this width before they go over the wire.
pub const SNAPSHOT_WIDTH: u32 = 192;

pub type SurfaceFactory = Arc<dyn Fn(Rect) -> Box<dyn Surface> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    FadingIn,
    Visible,
    Disposed,
}

struct ClientActivation {
    id: String,
    name: String,
    deadline: f64,
    fade_start: f64,
    phase: Phase,
    module: Option<Box<dyn ClientModule>>,
    surface: Option<Box<dyn Surface>>,
    title: TitleCard,
}

impl ClientActivation {
    /// Returns false if the module panicked while drawing.
    fn draw(&mut self, time: f64, delta: f64) -> bool {
        let (Some(module), Some(surface)) = (self.module.as_mut(), self.surface.as_mut()) else {
            return true;
        };
        let drawn = catch_unwind(AssertUnwindSafe(|| {
            module.draw(time, delta, surface.as_mut());
        }))
        .is_ok();
        if drawn {
            self.title.draw(surface.as_mut());
        }
        drawn
    }

    fn set_opacity(&mut self, opacity: f64) {
        if let Some(surface) = self.surface.as_mut() {
            surface.set_opacity(opacity.clamp(0.0, 1.0));
        }
    }
}

struct PreparedClient {
    id: String,
    module: Option<Box<dyn ClientModule>>,
    surface: Box<dyn Surface>,
    result: Result<(), ModuleError>,
}

/// Client half of the module lifecycle: prepares what the server announces,
/// fades it in and swaps it with the current module exactly at the deadline.
pub struct ClientPlayer {
    rect: Rect,
    modules: ClientModules,
    surfaces: SurfaceFactory,
    network: Arc<ClientNetwork>,
    overlays: ChannelOverlays<ClientNetwork>,
    state: StateManager,
    clock: SharedClock,
    prepare_timeout: Duration,
    title_display: bool,
    visible: Option<ClientActivation>,
    incoming: Option<ClientActivation>,
    preparing: JoinSet<PreparedClient>,
    tasks: HashMap<task::Id, String>,
}

impl ClientPlayer {
    pub fn new(
        rect: Rect,
        modules: ClientModules,
        surfaces: SurfaceFactory,
        network: Arc<ClientNetwork>,
        state: StateManager,
        clock: SharedClock,
        prepare_timeout: Duration,
    ) -> Self {
        Self {
            rect,
            modules,
            surfaces,
            overlays: ChannelOverlays::new(Arc::clone(&network)),
            network,
            state,
            clock,
            prepare_timeout,
            title_display: false,
            visible: None,
            incoming: None,
            preparing: JoinSet::new(),
            tasks: HashMap::new(),
        }
    }

    /// Makes this screen the one that shows title cards.
    pub fn with_title_display(mut self, title_display: bool) -> Self {
        self.title_display = title_display;
        self
    }

    pub fn load(&mut self, load: LoadModule) {
        let known = [&self.visible, &self.incoming]
            .into_iter()
            .flatten()
            .any(|a| a.id == load.id);
        if known {
            log::debug!("{}: already playing", load.id);
            return;
        }

        if let Some(superseded) = self.incoming.take() {
            log::info!("{}: superseded by {}", superseded.id, load.id);
            self.dispose(superseded);
        }

        let activation = ClientActivation {
            id: load.id.clone(),
            name: load.module.name.clone(),
            deadline: load.deadline,
            fade_start: self.clock.now_ms(),
            phase: Phase::Pending,
            module: None,
            surface: None,
            title: TitleCard::from_credit(&load.module.credit),
        };

        let module = match &load.module.client {
            Some(client_kind) => {
                let context = ClientContext {
                    id: load.id.clone(),
                    network: self.overlays.open(&load.id),
                    state: self.state.open(&load.id),
                    wall: bounds(&load.geo).unwrap_or(self.rect),
                    clock: Arc::clone(&self.clock),
                };
                match self.modules.create(client_kind, context, &load.module.config) {
                    Ok(module) => Some(module),
                    Err(e) => {
                        self.report(&activation.name, &e);
                        self.dispose(activation);
                        return;
                    }
                }
            }
            None => None,
        };

        log::info!(
            "{}: preparing {} for {:.0}",
            activation.id,
            activation.name,
            activation.deadline
        );
        let mut surface = (self.surfaces)(self.rect);
        surface.set_opacity(0.0);
        let timeout = self.prepare_timeout;
        let deadline = load.deadline;
        let id = load.id;
        let handle = self.preparing.spawn(async move {
            let mut module = module;
            let result = match module.as_mut() {
                Some(m) => {
                    let prepare = m.will_be_shown_soon(surface.as_mut(), deadline);
                    match tokio::time::timeout(timeout, prepare).await {
                        Ok(result) => result,
                        Err(_) => Err(ModuleError::Timeout(timeout)),
                    }
                }
                None => Ok(()),
            };
            PreparedClient {
                id,
                module,
                surface,
                result,
            }
        });
        self.tasks.insert(handle.id(), activation.id.clone());
        self.incoming = Some(activation);
    }

    pub fn is_preparing(&self) -> bool {
        !self.preparing.is_empty()
    }

    pub async fn next_prepared(&mut self) -> Option<Result<PreparedClientHandle, JoinError>> {
        let joined = self.preparing.join_next_with_id().await?;
        Some(joined.map(|(task, prepared)| {
            self.tasks.remove(&task);
            PreparedClientHandle(prepared)
        }))
    }

    pub fn on_prepared(&mut self, joined: Result<PreparedClientHandle, JoinError>) {
        let prepared = match joined {
            Ok(PreparedClientHandle(prepared)) => prepared,
            Err(e) => {
                let Some(id) = self.tasks.remove(&e.id()) else {
                    log::error!("Untracked preparation task failed: {}", e);
                    return;
                };
                let current = self
                    .incoming
                    .as_ref()
                    .is_some_and(|a| a.id == id && a.phase == Phase::Pending);
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
                    self.report(&activation.name, &ModuleError::Failed(reason));
                    self.dispose(activation);
                }
                return;
            }
        };

        let current = self
            .incoming
            .as_ref()
            .is_some_and(|a| a.id == prepared.id && a.phase == Phase::Pending);
        if !current {
            log::debug!("{}: ignoring preparation of superseded module", prepared.id);
            if let Some(mut module) = prepared.module {
                module.dispose();
            }
            return;
        }
        let Some(mut activation) = self.incoming.take() else {
            return;
        };
        activation.module = prepared.module;
        activation.surface = Some(prepared.surface);

        if let Err(e) = prepared.result {
            self.report(&activation.name, &e);
            self.dispose(activation);
            return;
        }

        activation.phase = Phase::FadingIn;
        activation.fade_start = self.clock.now_ms();
        if let Some(module) = activation.module.as_mut() {
            module.begin_fade_in(activation.deadline);
        }
        if let Some(visible) = self.visible.as_mut() {
            visible.title.exit();
            if let Some(module) = visible.module.as_mut() {
                module.begin_fade_out(activation.deadline);
            }
        }
        log::info!("{}: {} fading in", activation.id, activation.name);
        self.incoming = Some(activation);
    }

    /// Advances transitions and draws. Deadlines are compared against `now`;
    /// modules draw at `draw_time`.
    pub fn render(&mut self, now: f64, draw_time: f64, delta: f64) {
        let due = self
            .incoming
            .as_ref()
            .is_some_and(|a| a.phase == Phase::FadingIn && now >= a.deadline);
        if due {
            self.promote();
        }

        if self.visible.as_mut().is_some_and(|v| !v.draw(draw_time, delta)) {
            if let Some(crashed) = self.visible.take() {
                self.crashed(crashed);
            }
        }
        let mut crashed = false;
        if let Some(incoming) = self.incoming.as_mut().filter(|a| a.phase == Phase::FadingIn) {
            let span = incoming.deadline - incoming.fade_start;
            let opacity = if span > 0.0 {
                (now - incoming.fade_start) / span
            } else {
                1.0
            };
            incoming.set_opacity(opacity);
            crashed = !incoming.draw(draw_time, delta);
        }
        if crashed {
            if let Some(activation) = self.incoming.take() {
                self.crashed(activation);
            }
        }
    }

    fn crashed(&mut self, activation: ClientActivation) {
        log::warn!("{}: {} panicked while drawing", activation.id, activation.name);
        self.report(&activation.name, &ModuleError::Failed("draw panicked".into()));
        self.dispose(activation);
    }

    fn promote(&mut self) {
        let Some(mut incoming) = self.incoming.take() else {
            return;
        };
        if let Some(mut outgoing) = self.visible.take() {
            if let Some(module) = outgoing.module.as_mut() {
                module.finish_fade_out();
            }
            self.dispose(outgoing);
        }
        incoming.set_opacity(1.0);
        if let Some(module) = incoming.module.as_mut() {
            module.finish_fade_in();
        }
        incoming.phase = Phase::Visible;
        incoming.title.enter(self.title_display);
        log::info!("{}: {} visible", incoming.id, incoming.name);
        self.visible = Some(incoming);
    }

    fn dispose(&mut self, mut activation: ClientActivation) {
        if activation.phase == Phase::Disposed {
            return;
        }
        activation.phase = Phase::Disposed;
        activation.title.exit();
        self.overlays.close(&activation.id);
        self.state.close(&activation.id);
        if let Some(mut module) = activation.module.take() {
            if catch_unwind(AssertUnwindSafe(|| module.dispose())).is_err() {
                log::warn!("{}: {} panicked while disposing", activation.id, activation.name);
            }
        }
        activation.surface = None;
        log::debug!("{}: disposed {}", activation.id, activation.name);
    }

    fn report(&self, module: &str, error: &ModuleError) {
        log::error!("{}: {}", module, error);
        let record = RecordError {
            message: error.to_string(),
            stack: None,
            namespace: "player".into(),
            severity: Severity::Error,
            client: Some(self.rect.serialize()),
            module: Some(module.to_string()),
        };
        match serde_json::to_value(&record) {
            Ok(payload) => {
                self.network.send_to_server(kind::RECORD_ERROR, payload);
            }
            Err(e) => log::warn!("Failed to encode error report: {}", e),
        }
    }

    /// Answers a snapshot request from whatever is on screen.
    pub fn take_snapshot(&self, id: u64) -> TakeSnapshotRes {
        let surface = self
            .visible
            .as_ref()
            .or(self.incoming.as_ref())
            .and_then(|a| a.surface.as_deref());
        let mut response = TakeSnapshotRes {
            client: self.rect.serialize(),
            id,
            data: None,
            width: None,
            error: None,
        };
        match surface {
            Some(surface) if surface.supports(SurfaceCapabilities::SNAPSHOT) => {
                match surface.take_snapshot() {
                    Ok(snapshot) => {
                        let snapshot = snapshot.downscale(SNAPSHOT_WIDTH);
                        response.width = Some(snapshot.width);
                        response.data = Some(snapshot.data);
                    }
                    Err(e) => response.error = Some(e.to_string()),
                }
            }
            Some(_) => response.error = Some("surface cannot take snapshots".into()),
            None => response.error = Some("nothing on screen".into()),
        }
        response
    }

    pub fn visible_id(&self) -> Option<&str> {
        self.visible.as_ref().map(|a| a.id.as_str())
    }

    #[cfg(test)]
    pub fn incoming_phase(&self) -> Option<Phase> {
        self.incoming.as_ref().map(|a| a.phase)
    }

    #[cfg(test)]
    pub fn visible_opacity(&self) -> Option<f64> {
        self.visible
            .as_ref()
            .and_then(|a| a.surface.as_ref())
            .map(|s| s.opacity())
    }

    #[cfg(test)]
    pub fn title_shown(&self) -> bool {
        self.visible.as_ref().is_some_and(|a| a.title.is_shown())
    }

    pub fn shutdown(&mut self) {
        self.preparing.abort_all();
        self.tasks.clear();
        for activation in self.incoming.take().into_iter().chain(self.visible.take()) {
            self.dispose(activation);
        }
    }
}

/// Opaque result of a finished preparation, fed back through `on_prepared`.
pub struct PreparedClientHandle(PreparedClient);

fn bounds(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let (min, max) = points
        .iter()
        .fold((*first, *first), |(min, max), p| (min.min(*p), max.max(*p)));
    let size = max - min;
    (size.x > 0.0 && size.y > 0.0).then(|| Rect::new(min.x, min.y, size.x, size.y))
}

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::clock::SharedClock;
use crate::geometry::Rect;
use crate::net::{ChannelOverlay, ClientNetwork, ClientRecord, ListenerId, RegistryEvent, ServerNetwork};
use crate::state::{ModuleState, ModuleStates, StateError};
use crate::surface::Surface;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("no {half} implementation named {kind:?}")]
    UnknownKind { half: &'static str, kind: String },
    #[error("bad config: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failed(String),
}

/// Registry listeners a module added while alive. Released all at once when
/// the module is disposed; nothing can be added afterwards.
#[derive(Clone)]
pub struct JoinSubscriptions {
    network: Arc<ServerNetwork>,
    ids: Arc<Mutex<Option<Vec<ListenerId>>>>,
}

impl JoinSubscriptions {
    pub fn new(network: Arc<ServerNetwork>) -> Self {
        Self {
            network,
            ids: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    pub fn on_client_joined<F>(&self, handler: F) -> bool
    where
        F: Fn(&ClientRecord) + Send + Sync + 'static,
    {
        let mut ids = self.ids.lock();
        let Some(ids) = ids.as_mut() else {
            return false;
        };
        let id = self.network.subscribe(Arc::new(move |event| {
            if let RegistryEvent::NewClient(record) = event {
                handler(record);
            }
        }));
        ids.push(id);
        true
    }

    pub fn release(&self) -> usize {
        let Some(ids) = self.ids.lock().take() else {
            return 0;
        };
        ids.into_iter()
            .filter(|id| self.network.unsubscribe(*id))
            .count()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything the server half of a module instance is handed.
#[derive(Clone)]
pub struct ServerContext {
    pub id: String,
    pub network: Arc<ChannelOverlay<ServerNetwork>>,
    pub state: ModuleState,
    pub wall: Rect,
    pub clock: SharedClock,
    pub subscriptions: JoinSubscriptions,
}

pub trait ServerModule: Send + 'static {
    fn prepare(&mut self, _deadline: f64) -> BoxFuture<'_, Result<(), ModuleError>> {
        Box::pin(async { Ok(()) })
    }

    fn tick(&mut self, time: f64, delta: f64);

    fn dispose(&mut self) {}
}

/// Everything the client half of a module instance is handed.
#[derive(Clone)]
pub struct ClientContext {
    pub id: String,
    pub network: Arc<ChannelOverlay<ClientNetwork>>,
    pub state: ModuleStates,
    pub wall: Rect,
    pub clock: SharedClock,
}

pub trait ClientModule: Send + 'static {
    fn will_be_shown_soon<'a>(
        &'a mut self,
        _surface: &'a mut dyn Surface,
        _deadline: f64,
    ) -> BoxFuture<'a, Result<(), ModuleError>> {
        Box::pin(async { Ok(()) })
    }

    fn begin_fade_in(&mut self, _deadline: f64) {}

    fn finish_fade_in(&mut self) {}

    fn draw(&mut self, time: f64, delta: f64, surface: &mut dyn Surface);

    fn begin_fade_out(&mut self, _deadline: f64) {}

    fn finish_fade_out(&mut self) {}

    fn dispose(&mut self) {}
}

pub type ServerModuleFactory =
    Arc<dyn Fn(ServerContext, &Value) -> Result<Box<dyn ServerModule>, ModuleError> + Send + Sync>;

pub type ClientModuleFactory =
    Arc<dyn Fn(ClientContext, &Value) -> Result<Box<dyn ClientModule>, ModuleError> + Send + Sync>;

/// Server halves by implementation name.
#[derive(Clone, Default)]
pub struct ServerModules {
    factories: HashMap<String, ServerModuleFactory>,
}

impl ServerModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(ServerContext, &Value) -> Result<Box<dyn ServerModule>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn create(
        &self,
        kind: &str,
        context: ServerContext,
        config: &Value,
    ) -> Result<Box<dyn ServerModule>, ModuleError> {
        let factory = self.factories.get(kind).ok_or_else(|| ModuleError::UnknownKind {
            half: "server",
            kind: kind.to_string(),
        })?;
        factory(context, config)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

/// Client halves by implementation name.
#[derive(Clone, Default)]
pub struct ClientModules {
    factories: HashMap<String, ClientModuleFactory>,
}

impl ClientModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(ClientContext, &Value) -> Result<Box<dyn ClientModule>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn create(
        &self,
        kind: &str,
        context: ClientContext,
        config: &Value,
    ) -> Result<Box<dyn ClientModule>, ModuleError> {
        let factory = self.factories.get(kind).ok_or_else(|| ModuleError::UnknownKind {
            half: "client",
            kind: kind.to_string(),
        })?;
        factory(context, config)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

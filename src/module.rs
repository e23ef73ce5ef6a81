//! Named server-side modules and the registry that resolves invocations.
//!
//! A [`Module`] is built once, up front, from an explicit map of method
//! names to async handlers — there is no per-call reflection. The
//! [`ModuleRegistry`] owns registered modules, runs their `init` and
//! `destroy` lifecycle hooks, and gates dispatch on each module's
//! readiness.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    error::{ChannelError, WireError},
    generator::Generator,
};

/// Result of a successful handler call.
pub enum Outcome {
    /// A plain (or awaited) value, answered with a single RETURN.
    Value(Value),
    /// A streaming result; a task is registered and the INVOKE echo sent.
    Stream(Box<dyn Generator>),
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Boxed async method handler: arguments in, [`Outcome`] out.
pub type Handler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Outcome, WireError>> + Send + Sync>;

/// Boxed async lifecycle hook (`init` / `destroy`).
pub type LifecycleHook =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), WireError>> + Send + Sync + 'static>;

/// Lifecycle readiness of a registered module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Registered but `init` has not completed successfully.
    NotReady,
    /// `init` completed; methods may be invoked.
    Ready,
    /// `destroy` has run; the module is permanently out of service.
    Disposed,
}

/// What to do when a module's `init` hook fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitFailurePolicy {
    /// Remove the registration and report the failure to the caller.
    FailRegistration,
    /// Keep the module registered but not ready: it stays resolvable by
    /// name, and invocations surface `UnavailableError` until re-registered.
    #[default]
    DegradeAndMarkNotReady,
}

/// Errors raised while building or registering modules.
#[derive(Debug)]
pub enum RegistryError {
    /// A method with this name was already registered on the module.
    DuplicateMethod { module: String, method: String },
    /// A module with this name was already registered.
    DuplicateModule(String),
    /// The module's `init` hook failed under [`InitFailurePolicy::FailRegistration`].
    Init { module: String, source: WireError },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateMethod { module, method } => {
                write!(f, "method '{method}' already registered on module '{module}'")
            }
            Self::DuplicateModule(module) => {
                write!(f, "module '{module}' already registered")
            }
            Self::Init { module, source } => {
                write!(f, "init hook of module '{module}' failed: {source}")
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Init { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A named capability unit exposing invokable methods.
pub struct Module {
    name: String,
    handlers: HashMap<String, Handler>,
    init: Option<LifecycleHook>,
    destroy: Option<LifecycleHook>,
}

impl Module {
    /// Start building a module with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            handlers: HashMap::new(),
            init: None,
            destroy: None,
        }
    }

    /// The module's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method handler by name.
    #[must_use]
    pub fn handler(&self, method: &str) -> Option<Handler> {
        self.handlers.get(method).cloned()
    }

    /// Names of the module's registered methods.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Builder assembling a [`Module`]'s handler map and lifecycle hooks.
pub struct ModuleBuilder {
    name: String,
    handlers: HashMap<String, Handler>,
    init: Option<LifecycleHook>,
    destroy: Option<LifecycleHook>,
}

impl ModuleBuilder {
    /// Register an async method handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateMethod`] if a handler with this
    /// name was already registered.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Result<Self, RegistryError>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome, WireError>> + Send + 'static,
    {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::DuplicateMethod {
                module: self.name,
                method: name,
            });
        }
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(name, handler);
        Ok(self)
    }

    /// Set the `init` hook, run once at registration.
    #[must_use]
    pub fn on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WireError>> + Send + 'static,
    {
        self.init = Some(Arc::new(move || Box::pin(hook())));
        self
    }

    /// Set the `destroy` hook, run once at shutdown.
    #[must_use]
    pub fn on_destroy<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WireError>> + Send + 'static,
    {
        self.destroy = Some(Arc::new(move || Box::pin(hook())));
        self
    }

    /// Freeze the handler map into a [`Module`].
    #[must_use]
    pub fn build(self) -> Module {
        Module {
            name: self.name,
            handlers: self.handlers,
            init: self.init,
            destroy: self.destroy,
        }
    }
}

struct ModuleEntry {
    module: Module,
    state: RwLock<ReadyState>,
}

impl ModuleEntry {
    fn state(&self) -> ReadyState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: ReadyState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Concurrent registry mapping module names to callable service instances.
pub struct ModuleRegistry {
    entries: DashMap<String, Arc<ModuleEntry>>,
    policy: InitFailurePolicy,
}

impl ModuleRegistry {
    /// Create a registry with the given init-failure policy.
    #[must_use]
    pub fn new(policy: InitFailurePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
        }
    }

    /// Store `module` and run its `init` hook once.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateModule`] for a name collision, or
    /// [`RegistryError::Init`] when the hook fails under
    /// [`InitFailurePolicy::FailRegistration`]. Under the degrade policy an
    /// init failure is logged and the module stays registered but not
    /// ready.
    pub async fn register(&self, module: Module) -> Result<(), RegistryError> {
        let name = module.name().to_owned();
        let init = module.init.clone();
        let entry = Arc::new(ModuleEntry {
            module,
            state: RwLock::new(ReadyState::NotReady),
        });
        // Duplicate detection and insertion must be one operation so
        // concurrent registrations under the same name cannot both pass.
        match self.entries.entry(name.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateModule(name)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
            }
        }

        if let Some(hook) = init {
            if let Err(source) = hook().await {
                return match self.policy {
                    InitFailurePolicy::FailRegistration => {
                        self.entries.remove(&name);
                        Err(RegistryError::Init {
                            module: name,
                            source,
                        })
                    }
                    InitFailurePolicy::DegradeAndMarkNotReady => {
                        error!(module = %name, error = %source, "module init failed; degrading to not-ready");
                        Ok(())
                    }
                };
            }
        }
        entry.set_state(ReadyState::Ready);
        debug!(module = %name, "module registered");
        Ok(())
    }

    /// Resolve a `(module, method)` pair to its handler.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] when the module is unknown or
    /// not ready, and a `ReferenceError`-shaped [`ChannelError::Call`] when
    /// the module is ready but the method does not exist.
    pub fn resolve(&self, module: &str, method: &str) -> Result<Handler, ChannelError> {
        let entry = self
            .entries
            .get(module)
            .map(|guard| Arc::clone(guard.value()))
            .ok_or_else(|| ChannelError::Unavailable {
                module: module.to_owned(),
            })?;
        if entry.state() != ReadyState::Ready {
            return Err(ChannelError::Unavailable {
                module: module.to_owned(),
            });
        }
        entry.module.handler(method).ok_or_else(|| {
            ChannelError::Call(WireError::new(
                "ReferenceError",
                format!("module '{module}' has no method '{method}'"),
            ))
        })
    }

    /// The readiness of a registered module, if any.
    #[must_use]
    pub fn ready_state(&self, module: &str) -> Option<ReadyState> {
        self.entries.get(module).map(|entry| entry.state())
    }

    /// Run `destroy` on every module, swallowing individual hook failures
    /// so one bad module never blocks teardown of the rest.
    pub async fn shutdown(&self) {
        for entry in &self.entries {
            let entry = Arc::clone(entry.value());
            if entry.state() == ReadyState::Disposed {
                continue;
            }
            if let Some(hook) = entry.module.destroy.clone()
                && let Err(error) = hook().await
            {
                warn!(module = %entry.module.name(), %error, "destroy hook failed; continuing teardown");
            }
            entry.set_state(ReadyState::Disposed);
        }
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(InitFailurePolicy::default())
    }
}

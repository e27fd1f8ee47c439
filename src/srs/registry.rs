use super::{BuiltinLookup, DefinitionLookup, SrsError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::broadcast;

type Definition = Arc<str>;
type RegisterCallback = Arc<dyn Fn(u32, &str) + Send + Sync>;
/// Settled lookup: the definition in the registry, and whether this lookup inserted it
type Settled = Result<(Definition, bool), SrsError>;

#[derive(Default)]
struct RegistryState {
    definitions: HashMap<u32, Definition>,
    /// Lookups in flight; concurrent callers for the same code subscribe instead of
    /// issuing a second lookup
    pending: HashMap<u32, broadcast::Sender<Settled>>,
}

struct Inner {
    lookup: Arc<dyn DefinitionLookup>,
    on_register: Mutex<Option<RegisterCallback>>,
    state: Mutex<RegistryState>,
}

/// Memoized EPSG code -> coordinate definition mapping.
///
/// Entries live for the lifetime of the registry. Failed lookups are not remembered, so
/// the next request for the same code retries. Concurrent registrations of one code
/// share a single lookup, and the registration callback fires once per new code.
#[derive(Clone)]
pub struct SrsRegistry {
    inner: Arc<Inner>,
}

enum Registration {
    Known,
    Started(broadcast::Receiver<Settled>),
    Joined(broadcast::Receiver<Settled>),
}

impl SrsRegistry {
    pub fn new(lookup: Arc<dyn DefinitionLookup>) -> Self {
        Self {
            inner: Arc::new(Inner {
                lookup,
                on_register: Mutex::new(None),
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Process-wide registry backed by the embedded definition database.
    pub fn shared() -> &'static SrsRegistry {
        static SHARED: OnceLock<SrsRegistry> = OnceLock::new();
        SHARED.get_or_init(|| SrsRegistry::new(Arc::new(BuiltinLookup)))
    }

    /// Install the callback invoked once for every newly registered code.
    pub fn set_on_register<F>(&self, callback: F)
    where
        F: Fn(u32, &str) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_register
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn is_registered(&self, code: u32) -> bool {
        self.lock().definitions.contains_key(&code)
    }

    pub fn definition(&self, code: u32) -> Option<Definition> {
        self.lock().definitions.get(&code).cloned()
    }

    /// Register a definition directly. Returns false if the code was already known.
    pub fn register(&self, code: u32, definition: &str) -> bool {
        let definition: Definition = Arc::from(definition.trim());
        {
            let mut state = self.lock();
            if state.definitions.contains_key(&code) {
                return false;
            }
            state.definitions.insert(code, definition.clone());
        }
        self.notify(code, &definition);
        true
    }

    /// Make sure `code` is registered, looking it up if needed.
    ///
    /// Returns `true` only to the caller whose lookup registered the code.
    pub async fn ensure_registered(&self, code: u32) -> Result<bool, SrsError> {
        let registration = {
            let mut state = self.lock();
            if state.definitions.contains_key(&code) {
                Registration::Known
            } else if let Some(tx) = state.pending.get(&code) {
                tracing::debug!(code, "joining in-flight SRS lookup");
                Registration::Joined(tx.subscribe())
            } else {
                let (tx, rx) = broadcast::channel(1);
                state.pending.insert(code, tx.clone());
                tokio::spawn(self.clone().resolve(code, tx));
                Registration::Started(rx)
            }
        };

        match registration {
            Registration::Known => Ok(false),
            Registration::Started(rx) => receive(code, rx).await.map(|(_, inserted)| inserted),
            Registration::Joined(rx) => receive(code, rx).await.map(|_| false),
        }
    }

    async fn resolve(self, code: u32, tx: broadcast::Sender<Settled>) {
        let outcome = self.inner.lookup.lookup(code).await;

        let result = {
            let mut state = self.lock();
            state.pending.remove(&code);
            match outcome {
                // A manual `register` may have landed while the lookup was in flight;
                // the first definition wins
                Ok(definition) => match state.definitions.get(&code).cloned() {
                    Some(existing) => Ok((existing, false)),
                    None => {
                        let definition: Definition = Arc::from(definition.trim());
                        state.definitions.insert(code, definition.clone());
                        Ok((definition, true))
                    }
                },
                Err(error) => Err(error),
            }
        };

        match &result {
            Ok((definition, true)) => {
                tracing::info!(code, definition = %definition, "registered spatial reference");
                self.notify(code, definition);
            }
            Ok((_, false)) => {
                tracing::debug!(code, "spatial reference registered during lookup, keeping existing")
            }
            Err(error) => tracing::warn!(code, %error, "spatial reference lookup failed"),
        }

        let _ = tx.send(result);
    }

    fn notify(&self, code: u32, definition: &str) {
        let callback = self
            .inner
            .on_register
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(code, definition);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn receive(code: u32, mut rx: broadcast::Receiver<Settled>) -> Settled {
    rx.recv()
        .await
        .unwrap_or(Err(SrsError::Aborted { code }))
}

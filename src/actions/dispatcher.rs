//! Slot dispatch and binding management
//!
//! The binding table is published through an [`ArcSwap`]: readers take a
//! snapshot without locking, writers build a new table and swap it in, so
//! a dispatch in flight only ever sees a complete old or new binding.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::binding::{ActionKind, Binding, BindingError, BindingTable, BuiltinAction};
use super::launcher::ProcessLauncher;
use crate::events::ActionEvent;
use crate::hotkey::Slot;
use crate::input::{ComboSynthesizer, InjectionError, VolumeActuator};
use crate::store::BindingStore;

/// Failures while running a bound action; never fatal to the daemon
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Injection(#[from] InjectionError),
}

/// Result of dispatching one slot
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nothing is bound to the slot
    Unconfigured,
    /// The bound action ran
    Executed { name: String },
    /// The bound action failed
    Failed { name: String, error: ActionError },
}

/// Owns the binding table and runs bound actions
pub struct ActionDispatcher {
    table: ArcSwap<BindingTable>,
    /// Serializes writers so saves land in the order changes were made
    writer: Mutex<()>,
    launcher: Arc<dyn ProcessLauncher>,
    combos: Arc<ComboSynthesizer>,
    volume: VolumeActuator,
    store: Option<Arc<dyn BindingStore>>,
    events: broadcast::Sender<ActionEvent>,
}

impl ActionDispatcher {
    pub fn new(
        table: BindingTable,
        launcher: Arc<dyn ProcessLauncher>,
        combos: Arc<ComboSynthesizer>,
        store: Option<Arc<dyn BindingStore>>,
        events: broadcast::Sender<ActionEvent>,
    ) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            writer: Mutex::new(()),
            launcher,
            volume: VolumeActuator::new(Arc::clone(&combos)),
            combos,
            store,
            events,
        }
    }

    /// Current binding table
    pub fn snapshot(&self) -> Arc<BindingTable> {
        self.table.load_full()
    }

    pub fn binding(&self, slot: Slot) -> Option<Arc<Binding>> {
        self.table.load().get(slot).cloned()
    }

    /// Run whatever is bound to `slot`
    pub fn dispatch(&self, slot: Slot) -> DispatchOutcome {
        let Some(binding) = self.binding(slot) else {
            debug!(%slot, "slot has no binding");
            self.emit(ActionEvent::Unconfigured { slot });
            return DispatchOutcome::Unconfigured;
        };

        let name = binding.name().to_string();
        match self.execute(&binding) {
            Ok(()) => {
                info!(%slot, name, "action executed");
                self.emit(ActionEvent::Dispatched {
                    slot,
                    name: name.clone(),
                });
                DispatchOutcome::Executed { name }
            }
            Err(error) => {
                warn!(%slot, name, error = %error, "action failed");
                self.emit(ActionEvent::Failed {
                    slot,
                    name: name.clone(),
                    error: error.to_string(),
                });
                DispatchOutcome::Failed { name, error }
            }
        }
    }

    fn execute(&self, binding: &Binding) -> Result<(), ActionError> {
        match binding.kind() {
            ActionKind::Launch { command, argument } => self
                .launcher
                .spawn(command, argument.as_deref())
                .map_err(|source| ActionError::Launch {
                    command: command.clone(),
                    source,
                }),
            ActionKind::Combo { combo, .. } => Ok(self.combos.execute(combo)?),
            ActionKind::Builtin(action) => {
                let result = match action {
                    BuiltinAction::VolumeUp => self.volume.up(),
                    BuiltinAction::VolumeDown => self.volume.down(),
                    BuiltinAction::Mute => self.volume.toggle_mute(),
                    BuiltinAction::PlayPause => self.volume.play_pause(),
                };
                Ok(result?)
            }
        }
    }

    /// Bind `slot`, replacing any previous binding, and persist the table
    pub fn set_binding(&self, slot: Slot, binding: Binding) -> Result<(), BindingError> {
        self.update(slot, Some(Arc::new(binding)))
    }

    /// Unbind `slot` and persist the table
    pub fn clear_binding(&self, slot: Slot) -> Result<(), BindingError> {
        self.update(slot, None)
    }

    /// Persist and swap in a whole new table, e.g. after an import.
    ///
    /// Announces every slot whose binding changed.
    pub fn replace_table(&self, table: BindingTable) -> Result<(), BindingError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        self.persist(&table)?;
        let previous = self.table.swap(Arc::new(table));
        let current = self.table.load();
        info!(bound = current.len(), "binding table replaced");

        for slot in Slot::all() {
            let binding = current.get(slot);
            if previous.get(slot) != binding {
                self.emit(ActionEvent::BindingChanged {
                    slot,
                    name: binding.map(|b| b.name().to_string()),
                });
            }
        }
        Ok(())
    }

    fn update(&self, slot: Slot, binding: Option<Arc<Binding>>) -> Result<(), BindingError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let name = binding.as_ref().map(|b| b.name().to_string());
        let mut next = BindingTable::clone(&self.table.load());
        next.put(slot, binding);

        // A table that could not be saved never goes live
        self.persist(&next)?;
        self.table.store(Arc::new(next));

        info!(%slot, name = name.as_deref().unwrap_or("<none>"), "binding updated");
        self.emit(ActionEvent::BindingChanged { slot, name });
        Ok(())
    }

    fn persist(&self, table: &BindingTable) -> Result<(), BindingError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save_bindings(table).map_err(|e| {
            let message = format!("{e:#}");
            warn!(error = %message, "failed to save bindings");
            BindingError::Persist(message)
        })
    }

    fn emit(&self, event: ActionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::input::testing::RecordingInjector;
    use crate::input::{KeyInjector, VirtualKey};

    /// Launcher that records launches, optionally failing every one
    #[derive(Default)]
    pub struct RecordingLauncher {
        pub launches: Mutex<Vec<(String, Option<String>)>>,
        pub fail: bool,
    }

    impl ProcessLauncher for RecordingLauncher {
        fn spawn(&self, command: &str, argument: Option<&str>) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            self.launches
                .lock()
                .unwrap()
                .push((command.to_string(), argument.map(str::to_string)));
            Ok(())
        }
    }

    pub fn dispatcher_with(
        table: BindingTable,
        injector: Arc<RecordingInjector>,
        launcher: Arc<RecordingLauncher>,
    ) -> (ActionDispatcher, broadcast::Receiver<ActionEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let combos = Arc::new(ComboSynthesizer::new(
            Some(injector as Arc<dyn KeyInjector>),
            Duration::ZERO,
        ));
        (ActionDispatcher::new(table, launcher, combos, None, tx), rx)
    }

    fn slot(index: u8) -> Slot {
        Slot::new(index).unwrap()
    }

    #[test]
    fn test_unbound_slot_is_unconfigured() {
        let injector = Arc::new(RecordingInjector::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, mut rx) =
            dispatcher_with(BindingTable::new(), injector.clone(), launcher.clone());

        assert!(matches!(dispatcher.dispatch(slot(7)), DispatchOutcome::Unconfigured));
        assert!(injector.strokes().is_empty());
        assert!(launcher.launches.lock().unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap(), ActionEvent::Unconfigured { slot: slot(7) });
    }

    #[test]
    fn test_launch_with_argument() {
        let injector = Arc::new(RecordingInjector::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, _rx) =
            dispatcher_with(BindingTable::defaults(), injector, launcher.clone());

        let outcome = dispatcher.dispatch(slot(3));
        assert!(matches!(outcome, DispatchOutcome::Executed { ref name } if name == "Open Browser"));
        assert_eq!(
            launcher.launches.lock().unwrap().as_slice(),
            &[(
                "explorer.exe".to_string(),
                Some("https://www.google.com".to_string())
            )]
        );
    }

    #[test]
    fn test_launch_failure_is_reported() {
        let injector = Arc::new(RecordingInjector::default());
        let launcher = Arc::new(RecordingLauncher {
            fail: true,
            ..Default::default()
        });
        let (dispatcher, mut rx) = dispatcher_with(BindingTable::defaults(), injector, launcher);

        let outcome = dispatcher.dispatch(slot(1));
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                error: ActionError::Launch { .. },
                ..
            }
        ));
        assert!(matches!(rx.try_recv().unwrap(), ActionEvent::Failed { .. }));
    }

    #[test]
    fn test_builtin_and_combo() {
        let injector = Arc::new(RecordingInjector::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, _rx) =
            dispatcher_with(BindingTable::defaults(), injector.clone(), launcher);

        dispatcher.dispatch(Slot::ADD);
        dispatcher
            .set_binding(slot(6), Binding::combo("Copy", "ctrl+c").unwrap())
            .unwrap();
        dispatcher.dispatch(slot(6));

        assert_eq!(injector.presses_of(VirtualKey::VOLUME_UP), 1);
        assert_eq!(injector.presses_of(VirtualKey::CONTROL), 1);
        assert_eq!(injector.presses_of(VirtualKey(0x43)), 1);
    }

    #[test]
    fn test_injection_failure_is_reported() {
        let injector = Arc::new(RecordingInjector::failing_on(VirtualKey::MEDIA_PLAY_PAUSE));
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, _rx) = dispatcher_with(BindingTable::defaults(), injector, launcher);

        assert!(matches!(
            dispatcher.dispatch(Slot::ENTER),
            DispatchOutcome::Failed {
                error: ActionError::Injection(_),
                ..
            }
        ));
    }

    #[test]
    fn test_set_and_clear_binding() {
        let injector = Arc::new(RecordingInjector::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, mut rx) = dispatcher_with(BindingTable::new(), injector, launcher);

        let before = dispatcher.snapshot();
        dispatcher
            .set_binding(slot(9), Binding::launch("Editor", "code", None))
            .unwrap();
        assert!(before.get(slot(9)).is_none(), "old snapshot must not change");
        assert_eq!(dispatcher.binding(slot(9)).unwrap().name(), "Editor");

        dispatcher.clear_binding(slot(9)).unwrap();
        assert!(dispatcher.binding(slot(9)).is_none());

        assert_eq!(
            rx.try_recv().unwrap(),
            ActionEvent::BindingChanged {
                slot: slot(9),
                name: Some("Editor".to_string())
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ActionEvent::BindingChanged {
                slot: slot(9),
                name: None
            }
        );
    }

    /// Store whose saves can be switched to fail
    #[derive(Default)]
    struct FlakyStore {
        fail: AtomicBool,
        saved: Mutex<Vec<BindingTable>>,
    }

    impl BindingStore for FlakyStore {
        fn load_bindings(&self) -> anyhow::Result<Option<BindingTable>> {
            Ok(None)
        }

        fn save_bindings(&self, table: &BindingTable) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.saved.lock().unwrap().push(table.clone());
            Ok(())
        }
    }

    fn dispatcher_with_store(
        table: BindingTable,
        store: Arc<FlakyStore>,
    ) -> (ActionDispatcher, broadcast::Receiver<ActionEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let combos = Arc::new(ComboSynthesizer::new(None, Duration::ZERO));
        let launcher = Arc::new(RecordingLauncher::default());
        let dispatcher =
            ActionDispatcher::new(table, launcher, combos, Some(store as Arc<dyn BindingStore>), tx);
        (dispatcher, rx)
    }

    #[test]
    fn test_failed_save_keeps_previous_binding() {
        let store = Arc::new(FlakyStore::default());
        let (dispatcher, mut rx) = dispatcher_with_store(BindingTable::defaults(), store.clone());
        store.fail.store(true, Ordering::SeqCst);

        let err = dispatcher
            .set_binding(slot(1), Binding::launch("x", "x.exe", None))
            .unwrap_err();
        assert!(matches!(err, BindingError::Persist(ref message) if message.contains("disk full")));
        assert_eq!(dispatcher.binding(slot(1)).unwrap().name(), "Open Notepad");
        assert!(rx.try_recv().is_err());

        assert!(dispatcher.clear_binding(slot(1)).is_err());
        assert!(dispatcher.binding(slot(1)).is_some());

        store.fail.store(false, Ordering::SeqCst);
        dispatcher
            .set_binding(slot(1), Binding::launch("x", "x.exe", None))
            .unwrap();
        assert_eq!(dispatcher.binding(slot(1)).unwrap().name(), "x");
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_table_persists_and_announces_changes() {
        let store = Arc::new(FlakyStore::default());
        let (dispatcher, mut rx) = dispatcher_with_store(BindingTable::defaults(), store.clone());

        let mut imported = BindingTable::defaults();
        imported.put(slot(2), None);
        imported.insert(slot(6), Binding::combo("Copy", "ctrl+c").unwrap());
        dispatcher.replace_table(imported.clone()).unwrap();

        assert_eq!(*dispatcher.snapshot(), imported);
        assert_eq!(store.saved.lock().unwrap().as_slice(), &[imported.clone()]);
        assert_eq!(
            rx.try_recv().unwrap(),
            ActionEvent::BindingChanged {
                slot: slot(2),
                name: None
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ActionEvent::BindingChanged {
                slot: slot(6),
                name: Some("Copy".to_string())
            }
        );
        assert!(rx.try_recv().is_err());

        // Unsaveable imports are rejected whole
        store.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            dispatcher.replace_table(BindingTable::new()),
            Err(BindingError::Persist(_))
        ));
        assert_eq!(*dispatcher.snapshot(), imported);
    }

    #[test]
    fn test_concurrent_reader_sees_whole_bindings() {
        let injector = Arc::new(RecordingInjector::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let (dispatcher, _rx) = dispatcher_with(BindingTable::new(), injector, launcher);
        let dispatcher = Arc::new(dispatcher);

        let writer = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                for i in 0..500 {
                    let binding = if i % 2 == 0 {
                        Binding::launch("even", "even.exe", Some("even-arg".to_string()))
                    } else {
                        Binding::combo("odd", "ctrl+o").unwrap()
                    };
                    dispatcher.set_binding(slot(4), binding).unwrap();
                }
            })
        };

        for _ in 0..2000 {
            if let Some(binding) = dispatcher.binding(slot(4)) {
                match binding.kind() {
                    ActionKind::Launch { command, argument } => {
                        assert_eq!(binding.name(), "even");
                        assert_eq!(command, "even.exe");
                        assert_eq!(argument.as_deref(), Some("even-arg"));
                    }
                    ActionKind::Combo { spec, .. } => {
                        assert_eq!(binding.name(), "odd");
                        assert_eq!(spec, "ctrl+o");
                    }
                    ActionKind::Builtin(_) => panic!("never bound a builtin"),
                }
            }
        }
        writer.join().unwrap();
    }
}

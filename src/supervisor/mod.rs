use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

mod child;
mod signals;

pub use child::{ChildLauncher, ChildSignal, CommandLauncher, SpawnedChild};
pub use signals::forward_signals;

// ============================================================================
// Process Supervisor
// ============================================================================
//
// One loop owns all state and consumes one queue of events. Signal handlers
// and timers only enqueue.
//
//   Restart          terminate child, wait restart grace, start a fresh one
//   Shutdown         terminate child, exit 0 after shutdown grace
//   ChildExited      unexpected exit -> respawn after cool-down
//   GraceElapsed     old child still alive -> SIGKILL, start once it exits
//   RespawnDue       cool-down over
//   ShutdownDeadline stop the loop
//
// While a restart or shutdown is in progress auto-respawn is suppressed and
// a repeated command is a no-op. A restart is in progress until its
// replacement child has started; a request after that begins a new cycle.
// There is never more than one live child:
// every spawn path first checks that no child is tracked.
//
// ============================================================================

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child exited before its pid could be read")]
    ExitedBeforeStart,

    #[error("pid {0} out of range")]
    InvalidPid(u32),

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay before restarting a child that exited on its own
    pub cooldown: Duration,
    /// Time the old child gets to exit during a graceful restart
    pub restart_grace: Duration,
    /// Time the child gets before the supervisor exits on shutdown
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            restart_grace: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum Event {
    Restart,
    Shutdown,
    ChildExited { generation: u64, code: Option<i32> },
    GraceElapsed { generation: u64 },
    RespawnDue { token: u64 },
    ShutdownDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Restart,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct LiveChild {
    generation: u64,
    pid: u32,
}

/// Enqueues commands for a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl SupervisorHandle {
    pub fn restart(&self) {
        let _ = self.tx.send(Event::Restart);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

pub struct Supervisor {
    launcher: Box<dyn ChildLauncher>,
    config: SupervisorConfig,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    child: Option<LiveChild>,
    generation: u64,
    /// Set while a restart or shutdown is in progress
    intent: Option<Intent>,
    /// Grace elapsed with the old child still alive; start on its exit
    start_on_exit: bool,
    respawn_token: u64,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn ChildLauncher>, config: SupervisorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            config,
            tx,
            rx,
            child: None,
            generation: 0,
            intent: None,
            start_on_exit: false,
            respawn_token: 0,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle { tx: self.tx.clone() }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.intent.is_some()
    }

    /// Run until shutdown. Returns the supervisor's exit code.
    pub async fn run(mut self) -> i32 {
        tracing::info!(
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            restart_grace_ms = self.config.restart_grace.as_millis() as u64,
            shutdown_grace_ms = self.config.shutdown_grace.as_millis() as u64,
            "Supervisor starting"
        );
        self.start_child();

        while let Some(event) = self.rx.recv().await {
            tracing::trace!(event = ?event, "Supervisor event");
            match event {
                Event::Restart => self.on_restart(),
                Event::Shutdown => self.on_shutdown(),
                Event::ChildExited { generation, code } => self.on_child_exited(generation, code),
                Event::GraceElapsed { generation } => self.on_grace_elapsed(generation),
                Event::RespawnDue { token } => self.on_respawn_due(token),
                Event::ShutdownDeadline => {
                    tracing::info!("Supervisor exiting");
                    return 0;
                }
            }
        }

        0
    }

    fn schedule(&self, delay: Duration, event: Event) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }

    fn start_child(&mut self) {
        if let Some(child) = self.child {
            tracing::warn!(pid = child.pid, "Child already running, not starting another");
            return;
        }

        match self.launcher.spawn() {
            Ok(spawned) => {
                self.generation += 1;
                self.respawn_token += 1;
                let generation = self.generation;
                self.child = Some(LiveChild {
                    generation,
                    pid: spawned.pid,
                });

                let tx = self.tx.clone();
                let exit = spawned.exit;
                tokio::spawn(async move {
                    let code = exit.await;
                    let _ = tx.send(Event::ChildExited { generation, code });
                });

                tracing::info!(pid = spawned.pid, generation = generation, "Child started");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start child, retrying after cool-down");
                self.schedule_respawn();
            }
        }
    }

    fn schedule_respawn(&mut self) {
        self.respawn_token += 1;
        self.schedule(
            self.config.cooldown,
            Event::RespawnDue {
                token: self.respawn_token,
            },
        );
    }

    fn signal_child(&self, signal: ChildSignal) {
        if let Some(child) = self.child {
            if let Err(e) = self.launcher.signal(child.pid, signal) {
                tracing::warn!(pid = child.pid, signal = ?signal, error = %e, "Failed to signal child");
            }
        }
    }

    fn on_restart(&mut self) {
        if self.intent.is_some() {
            tracing::info!("Restart or shutdown already in progress, ignoring restart");
            return;
        }

        self.intent = Some(Intent::Restart);
        tracing::info!("Graceful restart requested");
        self.signal_child(ChildSignal::Terminate);
        self.schedule(
            self.config.restart_grace,
            Event::GraceElapsed {
                generation: self.generation,
            },
        );
    }

    fn on_shutdown(&mut self) {
        if self.intent == Some(Intent::Shutdown) {
            tracing::info!("Shutdown already in progress");
            return;
        }

        self.intent = Some(Intent::Shutdown);
        self.start_on_exit = false;
        tracing::info!("Shutdown requested");
        self.signal_child(ChildSignal::Terminate);
        self.schedule(self.config.shutdown_grace, Event::ShutdownDeadline);
    }

    fn on_child_exited(&mut self, generation: u64, code: Option<i32>) {
        match self.child {
            Some(child) if child.generation == generation => {}
            _ => {
                tracing::debug!(generation = generation, "Ignoring exit of a previous child");
                return;
            }
        }
        self.child = None;

        match self.intent {
            None => {
                tracing::warn!(
                    code = ?code,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "Child exited unexpectedly, restarting after cool-down"
                );
                self.schedule_respawn();
            }
            Some(Intent::Restart) => {
                tracing::info!(code = ?code, "Child stopped for restart");
                if self.start_on_exit {
                    self.finish_restart();
                }
            }
            Some(Intent::Shutdown) => {
                tracing::info!(code = ?code, "Child stopped");
            }
        }
    }

    fn on_grace_elapsed(&mut self, generation: u64) {
        if self.intent != Some(Intent::Restart) {
            return;
        }

        match self.child {
            Some(child) if child.generation == generation => {
                tracing::warn!(pid = child.pid, "Child ignored SIGTERM, killing it");
                self.signal_child(ChildSignal::Kill);
                self.start_on_exit = true;
            }
            _ => self.finish_restart(),
        }
    }

    fn finish_restart(&mut self) {
        self.start_on_exit = false;
        self.start_child();
        self.intent = None;
    }

    fn on_respawn_due(&mut self, token: u64) {
        if token != self.respawn_token || self.intent.is_some() || self.child.is_some() {
            tracing::debug!(token = token, "Respawn no longer needed");
            return;
        }
        self.start_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeState {
        next_pid: u32,
        running: HashMap<u32, oneshot::Sender<Option<i32>>>,
        spawned: u32,
        max_alive: usize,
        /// Children ignore SIGTERM
        stubborn: bool,
        signals: Vec<(u32, ChildSignal)>,
    }

    impl FakeState {
        fn exit(&mut self, pid: u32, code: Option<i32>) {
            if let Some(tx) = self.running.remove(&pid) {
                let _ = tx.send(code);
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakeLauncher {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeLauncher {
        fn spawned(&self) -> u32 {
            self.state.lock().unwrap().spawned
        }

        fn alive(&self) -> usize {
            self.state.lock().unwrap().running.len()
        }

        fn max_alive(&self) -> usize {
            self.state.lock().unwrap().max_alive
        }

        fn crash_current(&self) {
            let mut state = self.state.lock().unwrap();
            let pids: Vec<u32> = state.running.keys().copied().collect();
            for pid in pids {
                state.exit(pid, Some(1));
            }
        }
    }

    impl ChildLauncher for FakeLauncher {
        fn spawn(&mut self) -> Result<SpawnedChild, SupervisorError> {
            let mut state = self.state.lock().unwrap();
            state.next_pid += 1;
            state.spawned += 1;
            let pid = state.next_pid;
            let (tx, rx) = oneshot::channel();
            state.running.insert(pid, tx);
            state.max_alive = state.max_alive.max(state.running.len());

            Ok(SpawnedChild {
                pid,
                exit: async move { rx.await.ok().flatten() }.boxed(),
            })
        }

        fn signal(&self, pid: u32, signal: ChildSignal) -> Result<(), SupervisorError> {
            let mut state = self.state.lock().unwrap();
            state.signals.push((pid, signal));
            match signal {
                ChildSignal::Terminate if state.stubborn => {}
                ChildSignal::Terminate => state.exit(pid, Some(0)),
                ChildSignal::Kill => state.exit(pid, None),
            }
            Ok(())
        }
    }

    fn start(launcher: &FakeLauncher) -> (SupervisorHandle, tokio::task::JoinHandle<i32>) {
        let supervisor = Supervisor::new(Box::new(launcher.clone()), SupervisorConfig::default());
        let handle = supervisor.handle();
        (handle, tokio::spawn(supervisor.run()))
    }

    async fn advance(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_restart_yields_one_new_child() {
        let launcher = FakeLauncher::default();
        let (handle, _task) = start(&launcher);
        advance(0.1).await;
        assert_eq!(launcher.spawned(), 1);

        handle.restart();
        advance(0.5).await;
        handle.restart();
        advance(3.0).await;

        assert_eq!(launcher.spawned(), 2);
        assert_eq!(launcher.alive(), 1);
        assert_eq!(launcher.max_alive(), 1);

        // Past the cool-down nothing else appears
        advance(10.0).await;
        assert_eq!(launcher.spawned(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_replacement_started_is_a_new_cycle() {
        let launcher = FakeLauncher::default();
        let (handle, _task) = start(&launcher);
        advance(0.1).await;

        handle.restart();
        advance(2.5).await;
        assert_eq!(launcher.spawned(), 2);

        handle.restart();
        advance(2.5).await;
        assert_eq!(launcher.spawned(), 3);
        assert_eq!(launcher.alive(), 1);
        assert_eq!(launcher.max_alive(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_exit_respawns_after_cooldown() {
        let launcher = FakeLauncher::default();
        let (_handle, _task) = start(&launcher);
        advance(0.1).await;

        launcher.crash_current();
        advance(4.0).await;
        assert_eq!(launcher.spawned(), 1);
        assert_eq!(launcher.alive(), 0);

        advance(1.5).await;
        assert_eq!(launcher.spawned(), 2);
        assert_eq!(launcher.alive(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_child_is_killed_before_replacement() {
        let launcher = FakeLauncher::default();
        launcher.state.lock().unwrap().stubborn = true;
        let (handle, _task) = start(&launcher);
        advance(0.1).await;

        handle.restart();
        advance(1.0).await;
        assert_eq!(launcher.spawned(), 1);
        assert_eq!(launcher.alive(), 1);

        advance(1.5).await;
        assert_eq!(launcher.spawned(), 2);
        assert_eq!(launcher.max_alive(), 1);

        let signals = launcher.state.lock().unwrap().signals.clone();
        assert_eq!(signals, vec![(1, ChildSignal::Terminate), (1, ChildSignal::Kill)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_exits_zero_even_if_child_lingers() {
        let launcher = FakeLauncher::default();
        launcher.state.lock().unwrap().stubborn = true;
        let (handle, task) = start(&launcher);
        advance(0.1).await;

        handle.shutdown();
        handle.restart();

        assert_eq!(task.await.unwrap(), 0);
        assert_eq!(launcher.spawned(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_cooldown_does_not_double_spawn() {
        let launcher = FakeLauncher::default();
        let (handle, _task) = start(&launcher);
        advance(0.1).await;

        launcher.crash_current();
        advance(1.0).await;
        handle.restart();
        advance(2.5).await;
        assert_eq!(launcher.spawned(), 2);

        // The pending cool-down respawn is stale by now
        advance(5.0).await;
        assert_eq!(launcher.spawned(), 2);
        assert_eq!(launcher.max_alive(), 1);
    }
}

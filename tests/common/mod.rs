// Shared fakes for integration tests: scripted overwrite collaborators and
// a no-op unmount stage.

#![allow(dead_code)]

use expunge::engine::{CommandSpec, OverwriteProcess, OverwriteSpawner, ProcessExit};
use expunge::mounts::{DeviceRelease, PartitionOutcome, UnmountReport};
use expunge::{Device, DeviceRole, Transport};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub fn usb_device(path: &str, size: u64) -> Device {
    Device {
        path: path.to_string(),
        size,
        transport: Transport::USB,
        removable: true,
        role: DeviceRole::WholeDisk,
        model: Some("Test Stick".to_string()),
    }
}

/// Unmount stage that reports nothing mounted.
pub struct NoMounts;

impl DeviceRelease for NoMounts {
    fn release(&self, _device_path: &str) -> UnmountReport {
        UnmountReport::default()
    }
}

/// Unmount stage with fixed per-partition outcomes.
pub struct ScriptedMounts(pub Vec<PartitionOutcome>);

impl DeviceRelease for ScriptedMounts {
    fn release(&self, _device_path: &str) -> UnmountReport {
        UnmountReport {
            outcomes: self.0.clone(),
        }
    }
}

enum LineScript {
    Finite(VecDeque<String>),
    /// Endless "N% done" stream; cancellation is the only way out.
    Endless(u64),
}

/// Scripted overwrite process driven from a `FakeSpawner` plan.
pub struct FakeProcess {
    script: LineScript,
    exit: ProcessExit,
    line_delay: Duration,
    terminated: Arc<AtomicBool>,
    /// Runs once, right before the process "exits" successfully. Used to
    /// emulate the destructive effect (e.g. zeroing a scratch file).
    effect: Option<Box<dyn FnOnce() + Send>>,
}

impl OverwriteProcess for FakeProcess {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(None);
        }
        thread::sleep(self.line_delay);
        match &mut self.script {
            LineScript::Finite(lines) => Ok(lines.pop_front()),
            LineScript::Endless(counter) => {
                *counter += 1;
                Ok(Some(format!("{}% done", *counter % 100)))
            }
        }
    }

    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(Some(ProcessExit::Signalled));
        }
        if let Some(effect) = self.effect.take() {
            if self.exit == ProcessExit::Success {
                effect();
            }
        }
        Ok(Some(self.exit))
    }

    fn wait(&mut self) -> io::Result<ProcessExit> {
        if self.terminated.load(Ordering::SeqCst) {
            return Ok(ProcessExit::Signalled);
        }
        if let Some(effect) = self.effect.take() {
            if self.exit == ProcessExit::Success {
                effect();
            }
        }
        Ok(self.exit)
    }
}

type Effect = Arc<dyn Fn() + Send + Sync>;

/// Overwrite spawner producing scripted processes.
pub struct FakeSpawner {
    lines: Option<Vec<String>>, // None = endless progress stream
    exit: ProcessExit,
    line_delay: Duration,
    spawn_error: Option<io::ErrorKind>,
    effect: Option<Effect>,
    pub spawn_count: Arc<AtomicUsize>,
    pub terminated: Arc<AtomicBool>,
}

impl FakeSpawner {
    pub fn with_lines(lines: &[&str], exit: ProcessExit) -> Self {
        Self {
            lines: Some(lines.iter().map(|s| s.to_string()).collect()),
            exit,
            line_delay: Duration::from_millis(1),
            spawn_error: None,
            effect: None,
            spawn_count: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn endless() -> Self {
        let mut spawner = Self::with_lines(&[], ProcessExit::Success);
        spawner.lines = None;
        spawner.line_delay = Duration::from_millis(5);
        spawner
    }

    pub fn failing_spawn(kind: io::ErrorKind) -> Self {
        let mut spawner = Self::with_lines(&[], ProcessExit::Success);
        spawner.spawn_error = Some(kind);
        spawner
    }

    /// Run `effect` when a spawned process exits successfully.
    pub fn with_effect(mut self, effect: impl Fn() + Send + Sync + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }
}

impl OverwriteSpawner for FakeSpawner {
    fn spawn(&self, _spec: &CommandSpec) -> io::Result<Box<dyn OverwriteProcess>> {
        if let Some(kind) = self.spawn_error {
            return Err(io::Error::new(kind, "scripted spawn failure"));
        }
        self.spawn_count.fetch_add(1, Ordering::SeqCst);

        let script = match &self.lines {
            Some(lines) => LineScript::Finite(lines.iter().cloned().collect()),
            None => LineScript::Endless(0),
        };

        let effect: Option<Box<dyn FnOnce() + Send>> = self.effect.as_ref().map(|e| {
            let e = Arc::clone(e);
            Box::new(move || e()) as Box<dyn FnOnce() + Send>
        });

        Ok(Box::new(FakeProcess {
            script,
            exit: self.exit,
            line_delay: self.line_delay,
            terminated: Arc::clone(&self.terminated),
            effect,
        }))
    }
}

/// Wait until `predicate` holds or the timeout elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

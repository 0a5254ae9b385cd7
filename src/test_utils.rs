//! Shared test utilities: scripted remotes, a recording launcher, and
//! arbitrary generators for property-based testing.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{
    Connection, JobLauncher, JobOutcome, JobTable, LaunchRequest, Registry, RegistryConfig,
    WorkflowTarget,
};
use crate::runner::{ActionRunner, Outbound, ReplySlot, TransportError};
use crate::types::JobId;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

fn parse_request(frame: Outbound) -> Value {
    match frame {
        Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
        Outbound::Close { code, reason } => {
            panic!("expected a request, got close {code} ({reason})")
        }
    }
}

// ─── Direct runner harness ───

/// The remote end of a runner built by [`runner_pair`], driven synchronously
/// from the test thread while the runner blocks on another thread.
pub struct ScriptedRemote {
    outbound: Mutex<mpsc::UnboundedReceiver<Outbound>>,
    slot: Arc<ReplySlot>,
    cancel: CancellationToken,
}

impl ScriptedRemote {
    pub fn try_next(&self) -> Option<Outbound> {
        self.outbound.lock().unwrap().try_recv().ok()
    }

    pub fn next_frame(&self) -> Outbound {
        let deadline = Instant::now() + FRAME_TIMEOUT;
        loop {
            if let Some(frame) = self.try_next() {
                return frame;
            }
            assert!(Instant::now() < deadline, "runner sent nothing within {FRAME_TIMEOUT:?}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn next_request(&self) -> Value {
        parse_request(self.next_frame())
    }

    pub fn reply(&self, reply: Value) {
        self.slot.deliver(reply).unwrap();
    }

    /// Simulates the connection dropping.
    pub fn disconnect(&self) {
        self.cancel.cancel();
        self.slot.close(TransportError::ConnectionClosed);
    }

    /// Drops the receiving end of the outbound channel without touching the
    /// slot or the token, as when the socket task dies.
    pub fn abandon(self) {
        drop(self.outbound);
    }
}

/// A runner wired to a [`ScriptedRemote`], before the handshake.
pub fn runner_pair() -> (ActionRunner, ScriptedRemote) {
    let (tx, rx) = mpsc::unbounded_channel();
    let slot = Arc::new(ReplySlot::new());
    let cancel = CancellationToken::new();
    let runner = ActionRunner::new(
        JobId::new_random(),
        tx,
        Arc::clone(&slot),
        cancel.clone(),
        Arc::new(JobTable::new()),
    );
    let remote = ScriptedRemote {
        outbound: Mutex::new(rx),
        slot,
        cancel,
    };
    (runner, remote)
}

/// A runner that completed the handshake for `octo/widgets`, run 99, home `/home/runner`.
pub fn connected_runner() -> (ActionRunner, ScriptedRemote) {
    let (mut runner, remote) = runner_pair();
    let handle = thread::spawn(move || {
        runner.request_details().unwrap();
        runner
    });
    assert_eq!(remote.next_request(), json!({"type": "details"}));
    remote.reply(json!({"repository": "octo/widgets", "id": 99, "userHome": "/home/runner"}));
    (handle.join().unwrap(), remote)
}

// ─── Registry harness ───

#[derive(Debug, Error)]
#[error("launch refused by mock platform")]
pub struct MockLaunchError;

/// Records launch requests instead of starting anything.
#[derive(Default)]
pub struct MockLauncher {
    requests: Mutex<Vec<LaunchRequest>>,
    fail: bool,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl JobLauncher for MockLauncher {
    type Error = MockLaunchError;

    async fn launch(&self, request: &LaunchRequest) -> Result<(), Self::Error> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail { Err(MockLaunchError) } else { Ok(()) }
    }
}

pub fn test_config() -> RegistryConfig {
    RegistryConfig::new("wss://bot.test/runner/<id>/ws")
        .with_default_target(WorkflowTarget::parse("octo/runners", "runner.yml@main").unwrap())
}

pub fn test_registry(launcher: MockLauncher) -> Registry<MockLauncher> {
    Registry::new(launcher, test_config())
}

/// Plays the runner side of a promoted job through the registry, the way
/// the WebSocket handler would.
pub struct FakeRemote<'r> {
    registry: &'r Registry<MockLauncher>,
    connection: Connection,
}

impl<'r> FakeRemote<'r> {
    pub fn connect(registry: &'r Registry<MockLauncher>, id: JobId) -> Self {
        let connection = registry.connect(id).unwrap();
        Self {
            registry,
            connection,
        }
    }

    pub async fn next_frame(&mut self) -> Outbound {
        tokio::time::timeout(FRAME_TIMEOUT, self.connection.outbound.recv())
            .await
            .expect("runner sent nothing in time")
            .expect("worker dropped the connection")
    }

    pub async fn next_request(&mut self) -> Value {
        parse_request(self.next_frame().await)
    }

    pub fn reply(&self, reply: Value) {
        self.registry
            .deliver(self.connection.job, &reply.to_string())
            .unwrap();
    }

    pub async fn expect_close(&mut self) -> (u16, &'static str) {
        match self.next_frame().await {
            Outbound::Close { code, reason } => (code, reason),
            Outbound::Text(text) => panic!("expected close, got {text}"),
        }
    }

    /// Simulates the connection dropping.
    pub fn disconnect(&self) {
        self.registry.disconnected(self.connection.job);
    }

    /// Drops the outbound receiver without telling the registry, as when
    /// the socket task is torn down mid-job.
    pub fn abandon(&mut self) {
        let (_, closed) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.connection.outbound, closed));
    }

    /// Waits for the job's worker to finish.
    pub async fn finish(self) -> JobOutcome {
        tokio::time::timeout(FRAME_TIMEOUT, self.connection.worker)
            .await
            .expect("worker did not finish in time")
            .unwrap()
    }
}

/// Thread-safe list of strings, for recording callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.inner.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.inner.lock().unwrap().clone()
    }
}

// ─── Generators ───

/// A relative path made of ordinary components.
pub fn arb_safe_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,11}", 1..5)
        .prop_filter("no dot-only or .git components", |parts| {
            parts
                .iter()
                .all(|p| p != "." && p != ".." && !p.eq_ignore_ascii_case(".git"))
        })
        .prop_map(|parts| parts.join("/"))
}

/// A path that tries to escape the root or reach into `.git`.
pub fn arb_hostile_path() -> impl Strategy<Value = String> {
    let component = "[a-z]{1,6}";
    prop_oneof![
        (component, component).prop_map(|(a, b)| format!("{a}/../../{b}")),
        component.prop_map(|a| format!("../{a}")),
        component.prop_map(|a| format!("/{a}")),
        component.prop_map(|a| format!(".git/{a}")),
        (component, component).prop_map(|(a, b)| format!("{a}/.GIT/{b}")),
        component.prop_map(|a| format!("..\\{a}")),
    ]
}

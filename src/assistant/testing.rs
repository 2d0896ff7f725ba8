//! In-memory job service and manual clock for deterministic tests.

use super::{AssistantInfo, Clock, JobService, Run, RunStatus, ThreadMessage, UpstreamError};
use crate::models::Role;
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

/// Every run replays the same status script; the last entry repeats forever.
/// When a run is first observed as completed, the next queued reply is
/// posted to the thread as an assistant message.
pub struct ScriptedJobs {
    script: Vec<RunStatus>,
    cursors: Mutex<HashMap<String, usize>>,
    replies: Mutex<VecDeque<String>>,
    messages: Mutex<Vec<ThreadMessage>>,
    events: Mutex<Vec<String>>,
    fail_on: Mutex<Option<&'static str>>,
    runs_started: AtomicU32,
    status_checks: AtomicU32,
}

impl ScriptedJobs {
    pub fn with_statuses(script: &[RunStatus]) -> Self {
        Self {
            script: script.to_vec(),
            cursors: Mutex::new(HashMap::new()),
            replies: Mutex::new(VecDeque::new()),
            messages: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            runs_started: AtomicU32::new(0),
            status_checks: AtomicU32::new(0),
        }
    }

    pub fn completing() -> Self {
        Self::with_statuses(&[RunStatus::InProgress, RunStatus::Completed])
    }

    pub fn reply_with(self, reply: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(reply.into());
        self
    }

    /// Makes the named operation fail with `Unavailable` from now on.
    pub fn fail_on(&self, operation: &'static str) {
        *self.fail_on.lock().unwrap() = Some(operation);
    }

    pub fn seed_message(&self, role: Role, text: &str) {
        self.messages.lock().unwrap().insert(
            0,
            ThreadMessage {
                role,
                text: text.to_string(),
            },
        );
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn status_checks(&self) -> u32 {
        self.status_checks.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> Result<(), UpstreamError> {
        if *self.fail_on.lock().unwrap() == Some(operation) {
            return Err(UpstreamError::Unavailable(format!("{operation} rejected")));
        }
        Ok(())
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl JobService for ScriptedJobs {
    async fn create_thread(&self) -> Result<String, UpstreamError> {
        self.check("create_thread")?;
        self.record("create_thread".into());
        Ok("thread_test".into())
    }

    async fn append_message(
        &self,
        _thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), UpstreamError> {
        self.check("append_message")?;
        self.record(format!("append:{}:{content}", role.as_str()));
        self.seed_message(role, content);
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, _assistant_id: &str) -> Result<Run, UpstreamError> {
        self.check("start_run")?;
        let n = self.runs_started.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("run_{n}");
        self.record(format!("start:{id}"));
        self.cursors.lock().unwrap().insert(id.clone(), 0);
        Ok(Run {
            id,
            thread_id: thread_id.to_string(),
            status: RunStatus::Queued,
        })
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, UpstreamError> {
        self.check("get_run")?;
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        let (status, fresh) = {
            let mut cursors = self.cursors.lock().unwrap();
            let cursor = cursors.entry(run_id.to_string()).or_insert(0);
            let fresh = *cursor < self.script.len();
            let index = (*cursor).min(self.script.len().saturating_sub(1));
            *cursor += 1;
            let status = self.script.get(index).copied().unwrap_or(RunStatus::Completed);
            (status, fresh)
        };
        if status == RunStatus::Completed && fresh {
            self.record(format!("completed:{run_id}"));
            if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                self.seed_message(Role::Assistant, &reply);
            }
        }
        Ok(Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            status,
        })
    }

    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, UpstreamError> {
        self.check("list_messages")?;
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn describe_assistant(&self, assistant_id: &str) -> Result<AssistantInfo, UpstreamError> {
        self.check("describe_assistant")?;
        Ok(AssistantInfo {
            id: assistant_id.to_string(),
            name: Some("Scripted".into()),
            model: "scripted-model".into(),
        })
    }
}

/// Clock whose time only moves when something sleeps on it.
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: AtomicU32,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: AtomicU32::new(0),
        }
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        *self.offset.lock().unwrap() += duration;
    }
}

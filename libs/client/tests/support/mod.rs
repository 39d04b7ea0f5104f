#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use switchboard_client::Callback;
use switchboard_core::Error;
use switchboard_server::{Server, ServerConfig, ServiceDefinition};

pub const CALCULATOR: &str = "demo.Calculator";

/// Calls made to `record`, in arrival order.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// A calculator that also answers `whoami` with `name`.
pub fn calculator(name: &str, journal: Journal) -> ServiceDefinition {
    let name = name.to_string();
    ServiceDefinition::new(CALCULATOR)
        .method("add", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) })
        .method("divide", |(a, b): (i64, i64)| async move {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            Ok(a / b)
        })
        .method("slow", |(delay_ms, text): (u64, String)| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, String>(text)
        })
        .method("whoami", move |(): ()| {
            let name = name.clone();
            async move { Ok::<_, String>(name) }
        })
        .method("record", move |(entry,): (String,)| {
            let journal = journal.clone();
            async move {
                journal.lock().unwrap().push(entry);
                Ok::<_, String>(())
            }
        })
}

pub async fn start_server(name: &str, journal: Journal) -> Server {
    Server::builder(ServerConfig::new("127.0.0.1:0").name(name))
        .service(calculator(name, journal))
        .unwrap()
        .start()
        .await
        .unwrap()
}

pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Keeps every outcome it is handed; failures as their display text.
pub struct Recorder<R> {
    outcomes: Mutex<Vec<Result<R, String>>>,
}

impl<R> Recorder<R> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }
}

impl<R: Clone> Recorder<R> {
    pub fn outcomes(&self) -> Vec<Result<R, String>> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R: Send + 'static> Callback<R> for Recorder<R> {
    async fn success(&self, result: R) {
        self.outcomes.lock().unwrap().push(Ok(result));
    }

    async fn fail(&self, error: &Error) {
        self.outcomes.lock().unwrap().push(Err(error.to_string()));
    }
}

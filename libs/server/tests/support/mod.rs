#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchboard_core::{Arguments, BincodeCodec, InvocationMode, Request};
use switchboard_server::ServiceDefinition;

pub const CALCULATOR: &str = "demo.Calculator";

/// Calls made to `record`, in arrival order.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn calculator(journal: Journal) -> ServiceDefinition {
    ServiceDefinition::new(CALCULATOR)
        .method("add", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) })
        .method("divide", |(a, b): (i64, i64)| async move {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            Ok(a / b)
        })
        .method("echo", |(text,): (String,)| async move { Ok::<_, String>(text) })
        .method("echo", |(text, times): (String, u32)| async move {
            Ok::<_, String>(text.repeat(times as usize))
        })
        .method("slow", |(delay_ms, text): (u64, String)| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, String>(text)
        })
        .method("explode", |(): ()| async move {
            if true {
                panic!("boom");
            }
            Ok::<(), String>(())
        })
        .method("record", move |(entry,): (String,)| {
            let journal = journal.clone();
            async move {
                journal.lock().unwrap().push(entry);
                Ok::<_, String>(())
            }
        })
}

pub fn request<A: Arguments>(method: &str, arguments: A, mode: InvocationMode) -> Request {
    Request::new(CALCULATOR, method, mode).arguments(arguments.encode(&BincodeCodec).unwrap())
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> T {
    bincode::deserialize(bytes).unwrap()
}

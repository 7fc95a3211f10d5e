// Shared test transport for integration tests
//
// RecordingTransport stands in for a store client. It keeps a set of
// uploaded script sources keyed by SHA-1, answers EVALSHA with NOSCRIPT for
// unknown hashes, and counts every call so tests can assert on exactly how
// many executions and uploads happened.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use scriptcache::script::content_hash;
use scriptcache::{ScriptTransport, TransportError};

pub const NOSCRIPT: &str = "NOSCRIPT No matching script. Please use EVAL.";

#[derive(Default)]
pub struct RecordingTransport {
    scripts: Mutex<HashMap<String, String>>,
    /// Replies returned by successful EVALSHA calls, in order; falls back to
    /// echoing keys and args when empty
    replies: Mutex<VecDeque<Value>>,
    /// Errors returned by EVALSHA before any other behaviour, in order
    eval_failures: Mutex<VecDeque<TransportError>>,
    /// Errors returned by SCRIPT LOAD, in order
    load_failures: Mutex<VecDeque<TransportError>>,
    /// When set, SCRIPT LOAD waits for a notification before completing
    load_gate: Option<Arc<Notify>>,
    /// When set, SCRIPT LOAD answers with this hash instead of the real one
    reported_hash: Mutex<Option<String>>,
    pub eval_calls: AtomicUsize,
    pub eval_source_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            load_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, value: Value) {
        self.replies.lock().unwrap().push_back(value);
    }

    pub fn fail_next_eval(&self, message: &str) {
        self.eval_failures
            .lock()
            .unwrap()
            .push_back(TransportError::new(message));
    }

    pub fn fail_next_load(&self, message: &str) {
        self.load_failures
            .lock()
            .unwrap()
            .push_back(TransportError::new(message));
    }

    /// Make SCRIPT LOAD report `hash` while still storing under the real one
    pub fn report_hash(&self, hash: &str) {
        *self.reported_hash.lock().unwrap() = Some(hash.to_string());
    }

    /// Pretend the script was uploaded out of band
    pub fn preload(&self, source: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(content_hash(source), source.to_string());
    }

    /// Pretend the store flushed its script cache
    pub fn flush(&self) {
        self.scripts.lock().unwrap().clear();
    }

    pub fn has_script(&self, hash: &str) -> bool {
        self.scripts.lock().unwrap().contains_key(hash)
    }

    pub fn evals(&self) -> usize {
        self.eval_calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    fn reply(&self, keys: &[String], args: &[String]) -> Value {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| serde_json::json!({ "keys": keys, "args": args }))
    }
}

#[async_trait]
impl ScriptTransport for RecordingTransport {
    async fn eval_by_hash(
        &self,
        hash: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, TransportError> {
        self.eval_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.eval_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if !self.has_script(hash) {
            return Err(TransportError::new(NOSCRIPT));
        }
        Ok(self.reply(keys, args))
    }

    async fn eval_source(
        &self,
        source: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, TransportError> {
        self.eval_source_calls.fetch_add(1, Ordering::SeqCst);
        self.preload(source);
        Ok(self.reply(keys, args))
    }

    async fn load_source(&self, source: &str) -> Result<String, TransportError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.load_gate {
            gate.notified().await;
        }
        if let Some(err) = self.load_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let hash = content_hash(source);
        self.scripts
            .lock()
            .unwrap()
            .insert(hash.clone(), source.to_string());
        Ok(self.reported_hash.lock().unwrap().clone().unwrap_or(hash))
    }
}

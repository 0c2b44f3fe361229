//! Deterministic in-process encoders for unit tests

use ndarray::{Array2, Array3};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::device::Device;
use crate::models::model::{Encoder, TokenStates};
use crate::models::{EmbeddingError, EmbeddingResult};

/// Whitespace tokenizer with a leading `[CLS]` token and hash-derived
/// token vectors, padded to the longest text in the batch.
pub struct HashEncoder {
    dimension: usize,
    max_length: usize,
    delay: Duration,
    fail_on: Option<String>,
    panic_on: Option<String>,
    text_delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    thread_names: Mutex<HashSet<String>>,
    completed: Mutex<Vec<String>>,
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_length: 16,
            delay: Duration::ZERO,
            fail_on: None,
            panic_on: None,
            text_delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            thread_names: Mutex::new(HashSet::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Sleep inside every forward pass
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail any batch containing `text`
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    /// Panic inside any batch containing `text`
    pub fn panicking_on(mut self, text: &str) -> Self {
        self.panic_on = Some(text.to_string());
        self
    }

    /// Extra sleep for batches containing `text`
    pub fn with_delay_for(mut self, text: &str, delay: Duration) -> Self {
        self.text_delays.insert(text.to_string(), delay);
        self
    }

    /// First text of each finished batch, in completion order
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Names of the threads `infer` ran on
    pub fn thread_names(&self) -> HashSet<String> {
        self.thread_names.lock().unwrap().clone()
    }

    fn tokens<'a>(&self, text: &'a str) -> Vec<&'a str> {
        std::iter::once("[CLS]")
            .chain(text.split_whitespace())
            .take(self.max_length)
            .collect()
    }

    fn token_value(&self, token: &str, component: usize) -> f32 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        component.hash(&mut hasher);
        (hasher.finish() % 2001) as f32 / 1000.0 - 1.0
    }
}

impl Encoder for HashEncoder {
    fn name(&self) -> &str {
        "hash-encoder"
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn infer(&self, texts: &[String]) -> EmbeddingResult<TokenStates> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let thread_name = std::thread::current().name().unwrap_or("unnamed").to_string();
        self.thread_names.lock().unwrap().insert(thread_name);

        if let Some(bad) = &self.fail_on {
            if texts.iter().any(|t| t == bad) {
                return Err(EmbeddingError::inference(format!("cannot encode {:?}", bad)));
            }
        }
        if let Some(bad) = &self.panic_on {
            if texts.iter().any(|t| t == bad) {
                panic!("encoder crashed on {:?}", bad);
            }
        }
        let delay = texts
            .iter()
            .filter_map(|t| self.text_delays.get(t))
            .fold(self.delay, |longest, d| longest.max(*d));
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let tokenized: Vec<Vec<&str>> = texts.iter().map(|t| self.tokens(t)).collect();
        let seq_len = tokenized.iter().map(Vec::len).max().unwrap_or(0);

        let mut hidden = Array3::<f32>::zeros((texts.len(), seq_len, self.dimension));
        let mut attention_mask = Array2::<f32>::zeros((texts.len(), seq_len));
        for (row, tokens) in tokenized.iter().enumerate() {
            for (position, token) in tokens.iter().enumerate() {
                attention_mask[[row, position]] = 1.0;
                for component in 0..self.dimension {
                    hidden[[row, position, component]] = self.token_value(token, component);
                }
            }
            // Padding positions carry junk that pooling must ignore
            for position in tokens.len()..seq_len {
                for component in 0..self.dimension {
                    hidden[[row, position, component]] = 42.0;
                }
            }
        }

        if let Some(first) = texts.first() {
            self.completed.lock().unwrap().push(first.clone());
        }
        Ok(TokenStates { hidden, attention_mask })
    }
}

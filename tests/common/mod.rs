//! Scripted language model shared by the integration tests
//!
//! Behaviour is keyed by the prompt:
//! - `fail ...` fails every mode with a backend error
//! - `exhaust ...` fails with resource exhaustion
//! - `break midway ...` streams two fragments, then fails
//! - `nonconforming ...` answers structured requests with JSON that
//!   ignores the schema
//! - `slow ...` sleeps before answering
//! - anything else is answered deterministically from the prompt

#![allow(dead_code)]

use fm_session::{
    Availability, AvailabilityReason, BackendError, GenerationOptions, LanguageModel,
    ModelSession, Schema, SchemaNode, SchemaType,
};
use serde_json::{Map, Value, json};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const SLOW: Duration = Duration::from_millis(100);

/// Text every mode produces for an ordinary prompt
pub fn reply(prompt: &str) -> String {
    format!("You said: {prompt}. That is all.")
}

#[derive(Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub live: AtomicUsize,
    pub calls: AtomicUsize,
    pub options: Mutex<Vec<GenerationOptions>>,
    pub instructions: Mutex<Vec<String>>,
}

pub struct ScriptedModel {
    availability: Availability,
    pub counters: Arc<Counters>,
}

impl ScriptedModel {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            availability: Availability::READY,
            counters: Arc::default(),
        })
    }

    pub fn unavailable(reason: AvailabilityReason) -> Arc<Self> {
        Arc::new(Self {
            availability: Availability::unavailable(reason),
            counters: Arc::default(),
        })
    }

    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn seen_options(&self) -> Vec<GenerationOptions> {
        self.counters.options.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn availability(&self) -> Result<Availability, BackendError> {
        Ok(self.availability)
    }

    fn open(&self, instructions: &str) -> Result<Box<dyn ModelSession>, BackendError> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        self.counters
            .instructions
            .lock()
            .unwrap()
            .push(instructions.to_string());
        Ok(Box::new(ScriptedSession {
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedSession {
    counters: Arc<Counters>,
}

impl ScriptedSession {
    fn begin(&self, prompt: &str, options: &GenerationOptions) -> Result<(), BackendError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        self.counters.options.lock().unwrap().push(*options);
        if prompt.starts_with("slow") {
            thread::sleep(SLOW);
        }
        if prompt.starts_with("fail") {
            return Err(BackendError::Other("scripted failure".into()));
        }
        if prompt.starts_with("exhaust") {
            return Err(BackendError::ResourceExhausted(
                "context window exceeded".into(),
            ));
        }
        Ok(())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ModelSession for ScriptedSession {
    fn respond(
        &mut self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        self.begin(prompt, options)?;
        Ok(reply(prompt))
    }

    fn respond_structured(
        &mut self,
        prompt: &str,
        schema: &Schema,
        options: &GenerationOptions,
    ) -> Result<String, BackendError> {
        self.begin(prompt, options)?;
        if prompt.starts_with("nonconforming") {
            return Ok(r#"{"unexpected": true}"#.into());
        }
        Ok(sample(schema.root()).to_string())
    }

    fn stream(
        &mut self,
        prompt: &str,
        options: &GenerationOptions,
        on_fragment: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), BackendError> {
        self.begin(prompt, options)?;
        let text = reply(prompt);
        for (index, fragment) in text.split_inclusive(' ').enumerate() {
            if prompt.starts_with("break midway") && index == 2 {
                return Err(BackendError::Other("stream interrupted".into()));
            }
            if on_fragment(fragment).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Builds a value that satisfies `node`
pub fn sample(node: &SchemaNode) -> Value {
    match node.resolved_type() {
        SchemaType::Object => {
            let mut object = Map::new();
            for property in node.properties.iter().flatten() {
                object.insert(property.name.clone(), sample(&property.schema));
            }
            Value::Object(object)
        }
        SchemaType::Array => {
            let count = node.minimum_elements.unwrap_or(1).max(1);
            let count = node.maximum_elements.map_or(count, |max| count.min(max));
            let item = node.items.as_deref().map(sample).unwrap_or(Value::Null);
            Value::Array(vec![item; count])
        }
        SchemaType::String => match node.any_of.as_ref().and_then(|choices| choices.first()) {
            Some(choice) => json!(choice),
            None => json!("text"),
        },
        SchemaType::Integer => json!(42),
        SchemaType::Number => json!(1.5),
        SchemaType::Boolean => json!(true),
    }
}

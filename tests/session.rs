//! Integration tests for sessions and the three response modes
//!
//! These run everywhere: sessions are bound to the scripted model in
//! `tests/common`, so no on-device model is needed.

mod common;

use common::{ScriptedModel, reply};
use fm_session::{
    AvailabilityReason, Chunk, Error, ErrorCode, FailureKind, GenerationOptions,
    LanguageModelSession, Result, Schema,
};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const PERSON_SCHEMA: &str = r#"{
    "name": "Person",
    "description": "A person",
    "properties": [
        {"name": "name", "schema": {"type": "string"}},
        {"name": "age", "schema": {"type": "integer"}},
        {"name": "mood", "schema": {"anyOf": ["happy", "sad"]}},
        {"name": "tags", "schema": {"type": "array", "items": {"type": "string"}, "minimumElements": 2}}
    ]
}"#;

fn session(model: &Arc<ScriptedModel>) -> LanguageModelSession {
    LanguageModelSession::with_model(model.clone(), "You are a concise assistant.")
        .expect("scripted model is ready")
}

fn collect(session: &LanguageModelSession, prompt: &str) -> (Vec<Chunk>, Result<()>) {
    let mut chunks = Vec::new();
    let result = session.stream_response(prompt, None, |chunk| {
        chunks.push(chunk.to_owned_chunk());
    });
    (chunks, result)
}

#[test]
fn test_lifecycle() {
    let model = ScriptedModel::ready();
    let first = session(&model);
    let second = LanguageModelSession::with_model(model.clone(), "").unwrap();
    assert_eq!(model.live_sessions(), 2);
    assert_eq!(first.instructions(), "You are a concise assistant.");
    assert_eq!(second.instructions(), "");

    drop(first);
    assert_eq!(model.live_sessions(), 1);
    drop(second);
    assert_eq!(model.live_sessions(), 0);

    let instructions = model.counters.instructions.lock().unwrap().clone();
    assert_eq!(instructions, vec!["You are a concise assistant.", ""]);
}

#[test]
fn test_unavailable_model_refuses_sessions() {
    let model = ScriptedModel::unavailable(AvailabilityReason::AppleIntelligenceNotEnabled);
    let err = LanguageModelSession::with_model(model.clone(), "").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Initialization);
    assert!(err.to_string().contains("Apple Intelligence not enabled"));
    assert_eq!(model.live_sessions(), 0);
}

#[test]
fn test_blocking_response() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let response = session.respond("What is 2+2?", None)?;
    assert_eq!(response, reply("What is 2+2?"));
    Ok(())
}

#[test]
fn test_defaults_equivalence() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let without = session.respond("hello", None)?;
    let empty = session.respond("hello", Some("{}"))?;
    let blank = session.respond("hello", Some("  "))?;
    assert_eq!(without, empty);
    assert_eq!(without, blank);
    assert!(model.seen_options().iter().all(GenerationOptions::is_default));
    Ok(())
}

#[test]
fn test_options_reach_the_model() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    session.respond(
        "hello",
        Some(r#"{"temperature": 0.3, "maxTokens": 64, "unknown": "ignored"}"#),
    )?;
    let seen = model.seen_options();
    assert_eq!(seen[0].temperature(), Some(0.3));
    assert_eq!(seen[0].max_output_tokens(), Some(64));
    assert_eq!(seen[0].top_k(), None);
    Ok(())
}

#[test]
fn test_empty_prompt() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let err = session.respond("", None).unwrap_err();
    assert_eq!(err, Error::InvalidInput("Prompt cannot be empty".into()));
    let err = session
        .respond_structured("", PERSON_SCHEMA, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    let (chunks, result) = collect(&session, "");
    assert_eq!(result.unwrap_err().code(), ErrorCode::InvalidInput);
    assert!(chunks.is_empty());
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_empty_prompt_wins_over_malformed_options() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let err = session.respond("", Some("[")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    let err = session
        .stream_response("", Some("["), |_| {})
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    let err = session.response_stream("", Some("[")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_malformed_options_are_rejected_before_generation() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    for document in [r#"{"temperature": "#, "[1, 2]", r#"{"top_k": "many"}"#] {
        let err = session.respond("hello", Some(document)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OptionsDecode, "document {document}");
    }
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_generation_failure_keeps_its_kind() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    match session.respond("exhaust the context", None) {
        Err(Error::Generation { kind, .. }) => assert_eq!(kind, FailureKind::ResourceExhausted),
        other => panic!("unexpected {other:?}"),
    }
    let err = session.respond("fail please", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::GenerationFailure);

    // The session stays usable after a failed call.
    assert_eq!(session.respond("again", None).unwrap(), reply("again"));
}

#[test]
fn test_structured_response_conforms() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let json = session.respond_structured("Invent a person", PERSON_SCHEMA, None)?;
    let value: Value = serde_json::from_str(&json).expect("structured output is JSON");
    assert_eq!(value["age"], 42);
    assert_eq!(value["mood"], "happy");
    assert_eq!(value["tags"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test]
fn test_structured_response_into_a_type() -> Result<()> {
    #[derive(Debug, Deserialize)]
    struct Person {
        name: String,
        age: u32,
        tags: Vec<String>,
    }

    let model = ScriptedModel::ready();
    let session = session(&model);
    let schema = Schema::parse(PERSON_SCHEMA)?;

    let person: Person = session.respond_structured_into("Invent a person", &schema, None)?;
    assert_eq!(person.name, "text");
    assert_eq!(person.age, 42);
    assert_eq!(person.tags.len(), 2);
    Ok(())
}

#[test]
fn test_nonconforming_output_is_never_returned() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let err = session
        .respond_structured("nonconforming person", PERSON_SCHEMA, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchemaConformance);
}

#[test]
fn test_schema_errors_come_before_generation() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let documents = [
        "",
        "{not json",
        r#"{"type": "array"}"#,
        r#"{"type": "object", "properties": []}"#,
        r#"{"type": "integer", "anyOf": ["a"]}"#,
    ];
    for document in documents {
        let err = session
            .respond_structured("Invent a person", document, None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Schema, "document {document:?}");
    }
    assert_eq!(model.calls(), 0);
}

#[test]
fn test_streaming_response() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);
    let prompt = "Count from 1 to 5";

    let (chunks, result) = collect(&session, prompt);
    result?;

    assert!(chunks.len() > 1, "expected several chunks, got {chunks:?}");
    let finals = chunks.iter().filter(|c| c.is_final).count();
    assert_eq!(finals, 1);
    assert!(chunks.last().is_some_and(|c| c.is_final));

    let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(text, session.respond(prompt, None)?);
    Ok(())
}

#[test]
fn test_stream_failure_midway() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let (chunks, result) = collect(&session, "break midway through");
    let err = result.unwrap_err();
    assert_eq!(err.code(), ErrorCode::GenerationFailure);
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| !c.is_final));
}

#[test]
fn test_stream_failure_before_any_fragment() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let (chunks, result) = collect(&session, "fail right away");
    assert_eq!(result.unwrap_err().code(), ErrorCode::GenerationFailure);
    assert!(chunks.is_empty());
}

#[test]
fn test_stream_cancellation() {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let mut chunks = Vec::new();
    let result = session.stream_response_until("Tell me a long story", None, |chunk| {
        chunks.push(chunk.to_owned_chunk());
        ControlFlow::Break(())
    });
    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(chunks.len(), 1);
    assert!(!chunks[0].is_final);

    // Cancelling does not poison the session.
    assert!(session.respond("still there?", None).is_ok());
}

#[test]
fn test_response_stream_iterator() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);
    let prompt = "Iterate over this";

    let chunks: Vec<Chunk> = session
        .response_stream(prompt, None)?
        .collect::<Result<_>>()?;
    assert!(chunks.last().is_some_and(|c| c.is_final));
    assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);

    let text = session.response_stream(prompt, None)?.collect_text()?;
    assert_eq!(text, reply(prompt));
    Ok(())
}

#[test]
fn test_response_stream_reports_errors_then_ends() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let mut stream = session.response_stream("break midway", None)?;
    let mut saw_error = false;
    for item in stream.by_ref() {
        if let Err(err) = item {
            assert_eq!(err.code(), ErrorCode::GenerationFailure);
            saw_error = true;
        }
    }
    assert!(saw_error);
    assert!(stream.next().is_none());
    Ok(())
}

#[test]
fn test_dropping_a_response_stream_frees_the_session() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let mut stream = session.response_stream("Start then stop", None)?;
    let first = stream.next().expect("at least one chunk")?;
    assert!(!first.is_final);
    drop(stream);

    assert_eq!(session.respond("next", None)?, reply("next"));
    Ok(())
}

#[test]
fn test_reentrant_call_is_an_invalid_state() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);

    let mut inner = None;
    session.stream_response("outer stream", None, |_| {
        if inner.is_none() {
            inner = Some(session.respond("inner", None));
        }
    })?;
    let err = inner.expect("callback ran").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    Ok(())
}

#[test]
fn test_respond_while_this_thread_holds_a_response_stream() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = session(&model);
    let prompt = "Pending until read";

    let stream = session.response_stream(prompt, None)?;
    let err = session.respond("meanwhile", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    let err = session.response_stream("another", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);

    // The pending stream is unaffected by the refused calls.
    assert_eq!(stream.collect_text()?, reply(prompt));
    assert_eq!(session.respond("afterwards", None)?, reply("afterwards"));
    assert_eq!(model.calls(), 2);
    Ok(())
}

#[test]
fn test_response_stream_consumed_on_another_thread() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = Arc::new(session(&model));
    let prompt = "Read me somewhere else";

    let stream = session.response_stream(prompt, None)?;
    let consumer = thread::spawn(move || stream.collect::<Result<Vec<Chunk>>>());
    let waiter = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.respond("after the stream", None))
    };

    let chunks = consumer.join().unwrap()?;
    assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
    assert!(chunks.last().is_some_and(|c| c.is_final));
    let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(text, reply(prompt));

    assert_eq!(waiter.join().unwrap()?, reply("after the stream"));
    assert_eq!(model.calls(), 2);
    Ok(())
}

#[test]
fn test_calls_on_one_session_are_serialized() {
    let model = ScriptedModel::ready();
    let session = Arc::new(session(&model));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let session = Arc::clone(&session);
            thread::spawn(move || session.respond(&format!("slow {i}"), None))
        })
        .collect();
    let started = Instant::now();
    for (i, handle) in handles.into_iter().enumerate() {
        let response = handle.join().unwrap().unwrap();
        assert_eq!(response, reply(&format!("slow {i}")));
    }
    assert!(started.elapsed() >= common::SLOW * 3);
}

#[test]
fn test_distinct_sessions_run_concurrently() {
    let model = ScriptedModel::ready();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let model = model.clone();
            thread::spawn(move || {
                let session = LanguageModelSession::with_model(model, "").unwrap();
                let (chunks, result) = collect(&session, &format!("slow {i}"));
                result.map(|_| chunks)
            })
        })
        .collect();
    for handle in handles {
        let chunks = handle.join().unwrap().unwrap();
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
    }
    assert_eq!(model.live_sessions(), 0);
}

#[test]
fn test_example_scenario() -> Result<()> {
    let model = ScriptedModel::ready();
    let session = LanguageModelSession::with_model(model.clone(), "You are terse.")?;
    assert_eq!(session.instructions(), "You are terse.");

    let answer = session.respond("Say hi", Some(r#"{"max_output_tokens":5}"#))?;
    assert!(!answer.is_empty());
    assert_eq!(answer, reply("Say hi"));
    let seen = model.seen_options();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].max_output_tokens(), Some(5));

    let (chunks, result) = collect(&session, "Say hi");
    result?;
    let streamed: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(streamed, answer);

    drop(session);
    assert_eq!(model.live_sessions(), 0);
    Ok(())
}

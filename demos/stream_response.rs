// demos/stream_response.rs
// Example: Streaming response generation
//
// Prints chunks as they arrive, then pulls a second response through the
// iterator interface.
//
// Usage: cargo run --example stream_response

use fm_session::LanguageModelSession;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Foundation Models - Streaming Response Example ===\n");

    println!("Creating session...");
    let session = LanguageModelSession::new("")?;
    println!("Session created!\n");

    let prompt = "Tell me a short story about a robot learning to paint.";
    println!("Prompt: \"{}\"\n", prompt);
    println!("Streaming response:\n");
    println!("---");

    // Called on this thread for each chunk, in order
    session.stream_response(prompt, None, |chunk| {
        print!("{}", chunk.text);
        let _ = io::stdout().flush();
    })?;

    println!("\n---\n");
    println!("Pulling a haiku through the iterator:\n");

    for chunk in session.response_stream("Write a haiku about rust on a bridge.", None)? {
        let chunk = chunk?;
        print!("{}", chunk.text);
        let _ = io::stdout().flush();
    }

    println!("\n\n=== Stream Complete ===");

    Ok(())
}

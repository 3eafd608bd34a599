// demos/response.rs
// Example: Blocking response generation
//
// Checks availability, opens a session with instructions and asks for a
// complete response with a couple of generation options.
//
// Usage: cargo run --example response
// Set RUST_LOG=fm_session=debug to see session events.

use fm_session::{LanguageModelSession, check_availability};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Foundation Models - Blocking Response Example ===\n");

    let availability = check_availability()?;
    println!("Model is {}", availability);
    if !availability.is_ready() {
        return Ok(());
    }

    println!("Creating session...");
    let session = LanguageModelSession::new("You are a concise assistant.")?;
    println!("Session created!\n");

    let prompt = "What is Rust programming language? Please explain in 2-3 sentences.";
    println!("Prompt: \"{}\"\n", prompt);
    println!("Generating response...\n");

    // Blocks until the entire response is generated
    let options = r#"{"temperature": 0.4, "max_output_tokens": 200}"#;
    let response = session.respond(prompt, Some(options))?;

    println!("Response:\n{}\n", response);
    println!("=== Complete ===");

    Ok(())
}

// demos/structured.rs
// Example: Structured response generation
//
// Asks for JSON that conforms to a schema and decodes it into a Rust type.
//
// Usage: cargo run --example structured

use fm_session::{LanguageModelSession, Schema};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Recipe {
    title: String,
    difficulty: String,
    ingredients: Vec<String>,
    minutes: i64,
}

const RECIPE_SCHEMA: &str = r#"{
    "name": "Recipe",
    "description": "A short cooking recipe",
    "properties": [
        {"name": "title", "schema": {"type": "string"}},
        {"name": "difficulty", "schema": {"anyOf": ["easy", "medium", "hard"]}},
        {"name": "ingredients", "schema": {
            "type": "array",
            "items": {"type": "string"},
            "minimumElements": 2,
            "maximumElements": 8
        }},
        {"name": "minutes", "schema": {"type": "integer"}}
    ]
}"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Foundation Models - Structured Response Example ===\n");

    let session = LanguageModelSession::new("You write simple recipes.")?;
    let schema = Schema::parse(RECIPE_SCHEMA)?;

    let recipe: Recipe =
        session.respond_structured_into("A quick vegetarian lunch", &schema, None)?;

    println!("{} ({}, {} min)", recipe.title, recipe.difficulty, recipe.minutes);
    for ingredient in &recipe.ingredients {
        println!("  - {}", ingredient);
    }

    println!("\n=== Complete ===");

    Ok(())
}

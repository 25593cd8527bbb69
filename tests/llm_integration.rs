//! Integration tests against a live LiteLLM-compatible endpoint.
//!
//! These tests make real API calls.
//! Run with: LITELLM_API_BASE=http://localhost:4000 cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use circuit_weaver::agents::Ideator;
use circuit_weaver::config::BackendSpec;
use circuit_weaver::llm::{Backend, GenerationRequest, LiteLlmClient, LlmProvider, Message};
use circuit_weaver::utils::extract_script;

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LITELLM_API_BASE environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Response should contain '4', got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_ideator_produces_concept() {
    let client: Arc<dyn LlmProvider> = Arc::new(create_test_client());
    let ideator = Ideator::new(Backend::new(BackendSpec::new("planner", 0.9), client));

    let concept = ideator.ideate("live-ideation").await.expect("concept");
    assert!(!concept.trim().is_empty());
    assert!(!concept.contains("```"));
}

#[tokio::test]
#[ignore]
async fn test_backend_returns_fenced_script() {
    let client: Arc<dyn LlmProvider> = Arc::new(create_test_client());
    let backend = Backend::new(BackendSpec::new("coder", 0.2), client);

    let reply = backend
        .complete(vec![
            Message::system("You write Python scripts. Answer with one fenced code block."),
            Message::user("Write a script that prints the resistance of two 1k resistors in series."),
        ])
        .await
        .expect("completion");

    let script = extract_script(&reply, Some("python")).expect("script block");
    assert!(script.contains("print"));
}

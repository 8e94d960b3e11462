//! Integration tests for the HTTP vector index
//!
//! Validates the similarity protocol and retry behaviour using mock servers.

use estate_engine::agents::{Agent, CallPolicy, RetrievalAgent};
use estate_engine::catalog::JsonCatalog;
use estate_engine::collaborators::HttpVectorIndex;
use estate_engine::conductor::planner::params;
use sdk::collaborators::{SimilarityRequest, VectorIndex};
use sdk::errors::EngineError;
use sdk::types::{AgentInput, ResultSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn request(text: &str) -> SimilarityRequest {
    SimilarityRequest {
        text: text.to_string(),
        limit: 5,
        embedding_model: "all-MiniLM-L6-v2".to_string(),
    }
}

#[tokio::test]
async fn test_search_sends_text_and_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_json(json!({
            "text": "sea view with a pool",
            "limit": 5,
            "model": "all-MiniLM-L6-v2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                { "property_id": "m1", "score": 0.91 },
                { "property_id": "p2", "score": 0.42 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let index = HttpVectorIndex::new(format!("{}/", server.uri()), Duration::from_secs(2)).unwrap();
    assert_eq!(index.endpoint(), server.uri());

    let hits = index.search(&request("sea view with a pool")).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].property_id, "m1");
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("index offline"))
        .mount(&server)
        .await;

    let index = HttpVectorIndex::new(server.uri(), Duration::from_secs(2)).unwrap();
    match index.search(&request("garden")).await {
        Err(EngineError::CollaboratorUnavailable {
            collaborator,
            reason,
        }) => {
            assert_eq!(collaborator, "vector_index");
            assert!(reason.contains("index offline"));
        }
        other => panic!("expected CollaboratorUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let index = HttpVectorIndex::new(server.uri(), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        index.search(&request("garden")).await,
        Err(EngineError::CollaboratorUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_retrieval_agent_retries_and_normalises() {
    let server = MockServer::start().await;

    // First call fails, the retry succeeds
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [
                { "property_id": "a", "score": 12.0 },
                { "property_id": "b", "score": 8.0 },
                { "property_id": "c", "score": 4.0 },
                { "property_id": "a", "score": 6.0 }
            ]
        })))
        .mount(&server)
        .await;

    let index: Arc<dyn VectorIndex> =
        Arc::new(HttpVectorIndex::new(server.uri(), Duration::from_secs(2)).unwrap());
    let agent = RetrievalAgent::new(
        Some(index),
        Arc::new(JsonCatalog::from_records(Vec::new())),
        5,
        "all-MiniLM-L6-v2".to_string(),
        CallPolicy {
            timeout: Duration::from_secs(2),
            retries: 1,
        },
    );

    let output = agent
        .run(AgentInput::new().with_param(params::TEXT, json!("quiet garden home")))
        .await
        .unwrap();
    let search = output.as_search().unwrap();

    assert_eq!(search.source(), ResultSource::Semantic);
    let scored: Vec<(&str, Option<f64>)> = search
        .results()
        .iter()
        .map(|r| (r.property_id.as_str(), r.score))
        .collect();
    assert_eq!(
        scored,
        vec![("a", Some(1.0)), ("b", Some(0.5)), ("c", Some(0.0))]
    );
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unavailable() {
    let index = HttpVectorIndex::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    assert!(matches!(
        index.search(&request("garden")).await,
        Err(EngineError::CollaboratorUnavailable { .. })
    ));
}

//! HTTP contract tests for the provider clients.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

use amp_ai_client::{
    first_success, AiError, DeepAiConfig, DeepAiSynthesizer, GeminiConfig, GeminiVision,
    HuggingFaceConfig, HuggingFaceSynthesizer, ImageSynthesizer, ProductImage, RetryPolicy,
    RunPodConfig, RunPodVideoSynthesizer, VideoSynthesizer, VisionAnalyzer,
};

fn product_image() -> ProductImage {
    ProductImage {
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
        mime_type: "image/png".to_string(),
        file_name: "soda_330ml_can.png".to_string(),
        product_label: "Soda".to_string(),
    }
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        backoff: Duration::from_millis(5),
    }
}

fn hf_config(server: &MockServer) -> HuggingFaceConfig {
    HuggingFaceConfig {
        api_token: Some("hf-token".to_string()),
        base_url: server.uri(),
        retry: quick_retry(),
        ..HuggingFaceConfig::default()
    }
}

// =============================================================================
// Gemini
// =============================================================================

#[tokio::test]
async fn test_gemini_sends_inline_image_and_reads_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .and(query_param("key", "g-key"))
        .and(body_partial_json(json!({
            "contents": [{"parts": [
                {"text": amp_ai_client::vision::ANALYSIS_PROMPT},
                {"inline_data": {"mime_type": "image/png", "data": "iVBORw=="}}
            ]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "  A red 330ml soda can  "}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = GeminiConfig {
        api_key: Some("g-key".to_string()),
        base_url: server.uri(),
        ..GeminiConfig::default()
    };
    let gemini = GeminiVision::new(&config, "gemini-1.5-flash").unwrap();
    let text = gemini.analyze(&product_image()).await.unwrap();
    assert_eq!(text, "A red 330ml soda can");
}

#[tokio::test]
async fn test_gemini_empty_text_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let config = GeminiConfig {
        api_key: Some("g-key".to_string()),
        base_url: server.uri(),
        ..GeminiConfig::default()
    };
    let gemini = GeminiVision::new(&config, "gemini-pro-vision").unwrap();
    let err = gemini.analyze(&product_image()).await.unwrap_err();
    assert!(matches!(err, AiError::EmptyResult(_)));
}

#[tokio::test]
async fn test_vision_chain_falls_back_to_heuristic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(2)
        .mount(&server)
        .await;

    let config = GeminiConfig {
        api_key: Some("g-key".to_string()),
        base_url: server.uri(),
        ..GeminiConfig::default()
    };
    let chain = amp_ai_client::analyzer_chain(&config).unwrap();
    let image = product_image();
    let outcome = first_success("vision", &chain, |a| a.analyze(&image))
        .await
        .unwrap();
    assert_eq!(outcome.provider, amp_ai_client::vision::HEURISTIC_NAME);
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.value.starts_with("This appears to be a 330ml Soda in aluminum can"));
}

// =============================================================================
// DeepAI
// =============================================================================

#[tokio::test]
async fn test_deepai_posts_form_then_downloads_output() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/text2img"))
        .and(header("Api-Key", "d-key"))
        .and(body_string_contains("text=Create+a+professional"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output_url": format!("{}/out/ad.png", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/out/ad.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
        .expect(1)
        .mount(&server)
        .await;

    let config = DeepAiConfig {
        api_key: Some("d-key".to_string()),
        base_url: server.uri(),
        ..DeepAiConfig::default()
    };
    let deepai = DeepAiSynthesizer::new(&config).unwrap();
    let bytes = deepai
        .synthesize("Create a professional advertisement")
        .await
        .unwrap();
    assert_eq!(bytes, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_deepai_missing_output_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
        .mount(&server)
        .await;

    let config = DeepAiConfig {
        api_key: Some("d-key".to_string()),
        base_url: server.uri(),
        ..DeepAiConfig::default()
    };
    let err = DeepAiSynthesizer::new(&config)
        .unwrap()
        .synthesize("p")
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::InvalidResponse(_)));
}

// =============================================================================
// Hugging Face
// =============================================================================

#[tokio::test]
async fn test_huggingface_retries_while_model_loads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/stabilityai/stable-diffusion-xl-base-1.0"))
        .and(header("Authorization", "Bearer hf-token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
        .expect(2)
        .mount(&server)
        .await;

    let hf = HuggingFaceSynthesizer::new(
        &hf_config(&server),
        "stabilityai/stable-diffusion-xl-base-1.0",
    )
    .unwrap();
    let err = hf.synthesize("prompt").await.unwrap_err();
    assert!(matches!(err, AiError::ServiceUnavailable(_)));
}

#[tokio::test]
async fn test_huggingface_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
        .expect(1)
        .mount(&server)
        .await;

    let hf = HuggingFaceSynthesizer::new(&hf_config(&server), "m/one").unwrap();
    assert!(hf.synthesize("prompt").await.is_err());
}

#[tokio::test]
async fn test_image_chain_uses_next_model_after_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/m/one"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/m/two"))
        .and(body_partial_json(json!({
            "parameters": {"num_inference_steps": 50, "width": 1024, "height": 1024}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 16]))
        .expect(1)
        .mount(&server)
        .await;

    let config = HuggingFaceConfig {
        models: vec!["m/one".to_string(), "m/two".to_string()],
        ..hf_config(&server)
    };
    let chain = amp_ai_client::synthesizer_chain(&DeepAiConfig::default(), &config).unwrap();
    let chain: Vec<Arc<dyn ImageSynthesizer>> = chain;
    let outcome = first_success("image", &chain, |s| s.synthesize("prompt"))
        .await
        .unwrap();
    assert_eq!(outcome.provider, "m/two");
    assert_eq!(outcome.value.len(), 16);
}

// =============================================================================
// RunPod
// =============================================================================

fn runpod(server: &MockServer) -> RunPodVideoSynthesizer {
    RunPodVideoSynthesizer::new(&RunPodConfig {
        api_key: Some("rp-key".to_string()),
        base_url: server.uri(),
        ..RunPodConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_runpod_generate_and_download() {
    let server = MockServer::start().await;
    let video_url = format!("{}/files/video.mp4", server.uri());
    Mock::given(method("POST"))
        .and(path("/wan-2-1-i2v-720/runsync"))
        .and(header("Authorization", "Bearer rp-key"))
        .and(body_partial_json(json!({
            "input": {"image": "https://cdn.example.com/ad.png", "size": "1280*720", "duration": 5}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "COMPLETED",
            "output": {"video_url": video_url}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/video.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
        .mount(&server)
        .await;

    let runpod = runpod(&server);
    let url = runpod
        .generate("promo", "https://cdn.example.com/ad.png")
        .await
        .unwrap();
    assert_eq!(url, video_url);
    assert_eq!(runpod.download(&url).await.unwrap().len(), 64);
}

#[tokio::test]
async fn test_runpod_without_video_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "FAILED"})))
        .mount(&server)
        .await;

    let err = runpod(&server)
        .generate("promo", "https://cdn.example.com/ad.png")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid response: No video URL returned");
}

#[tokio::test]
async fn test_runpod_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = runpod(&server)
        .generate("promo", "https://cdn.example.com/ad.png")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "RunPod returned 401: unauthorized");
}

// tests/stream_ask.rs
//
// Client-side reconstruction over real HTTP (mocked inference service).

use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use pulse::client::{ask, stream_ask, NullView, RecordingView, SessionState, StreamFailure};
use pulse::relay::AskRequest;

#[tokio::test]
async fn streamed_fragments_are_joined_into_prose() {
    let server = MockServer::start().await;
    let body = "data: assistant: The\n\ndata:  quick\n\ndata: brown\n\ndata:  fox\n\ndata: .\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/ask"))
        .and(query_param("stream", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let url = format!("{}/ask", server.uri());
    let (session, view) = stream_ask(&http, &url, &AskRequest::new("fox?"), RecordingView::default()).await;

    assert_eq!(session.state(), &SessionState::Completed);
    assert_eq!(session.text(), "The quick brown fox.");
    // every snapshot extends the previous one
    for pair in view.snapshots.windows(2) {
        assert!(pair[1].starts_with(pair[0].as_str()));
    }
    assert_eq!(view.finished, Some(SessionState::Completed));
}

#[tokio::test]
async fn error_event_is_shown_but_stream_continues() {
    let server = MockServer::start().await;
    let body = "data: Partial\n\nevent: error\ndata: model overloaded\n\ndata: answer\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/ask"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let url = format!("{}/ask", server.uri());
    let (session, view) = stream_ask(&http, &url, &AskRequest::new("q"), RecordingView::default()).await;

    assert_eq!(session.text(), "Partial answer");
    assert_eq!(session.errors(), ["model overloaded".to_string()]);
    assert_eq!(view.errors.len(), 1);
}

#[tokio::test]
async fn json_reply_is_accepted_as_single_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ask"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"response":"Short answer."}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let url = format!("{}/ask", server.uri());
    let (session, _) = stream_ask(&http, &url, &AskRequest::new("q"), NullView).await;
    assert_eq!(session.state(), &SessionState::Completed);
    assert_eq!(session.text(), "Short answer.");

    let text = ask(&http, &url, &AskRequest::new("q")).await.unwrap();
    assert_eq!(text, "Short answer.");
}

#[tokio::test]
async fn upstream_error_status_fails_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ask"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let url = format!("{}/ask", server.uri());
    let (session, view) = stream_ask(&http, &url, &AskRequest::new("q"), RecordingView::default()).await;
    assert_eq!(session.state(), &SessionState::Failed(StreamFailure::Status(503)));
    assert_eq!(session.text(), "");
    assert!(matches!(view.finished, Some(SessionState::Failed(_))));
}

#[tokio::test]
async fn refused_connection_fails_the_session() {
    let http = reqwest::Client::new();
    let (session, _) = stream_ask(&http, "http://127.0.0.1:9/ask", &AskRequest::new("q"), NullView).await;
    assert!(matches!(session.state(), SessionState::Failed(StreamFailure::Connect(_))));

    let err = ask(&http, "http://127.0.0.1:9/ask", &AskRequest::new("q")).await.unwrap_err();
    assert!(matches!(err, StreamFailure::Connect(_)));
}

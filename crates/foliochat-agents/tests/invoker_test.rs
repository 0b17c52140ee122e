mod common;

use common::{MockProvider, Registered, Step, context};
use foliochat_agents::{ChatMessage, HealthState, InvokeRequest, StreamDelta, ToolDefinition};
use foliochat_common::Error;
use serde_json::json;
use tokio::sync::mpsc;

fn request() -> InvokeRequest {
    InvokeRequest {
        messages: vec![ChatMessage::user("What is AAPL at?")],
        system: Some("Prices:\n- AAPL: $150.00".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn round_robin_spreads_calls_over_active_providers() {
    let a = Registered::streaming(MockProvider::new("a"));
    let b = Registered::streaming(MockProvider::new("b"));
    let c = Registered::streaming(MockProvider::new("c"));
    let invoker = context(&[&a, &b, &c]).invoker();

    let mut used = Vec::new();
    for _ in 0..6 {
        used.push(invoker.invoke(&request(), None, None).await.unwrap().provider_used);
    }
    assert_eq!(used, vec!["a", "b", "c", "a", "b", "c"]);
    assert_eq!((a.provider.calls(), b.provider.calls(), c.provider.calls()), (2, 2, 2));
}

#[tokio::test]
async fn permanent_failure_fails_over_and_sticks() {
    let a = Registered::streaming(MockProvider::new("a").with_steps(vec![Step::Status(401)]));
    let b = Registered::streaming(MockProvider::new("b"));
    let ctx = context(&[&a, &b]);
    let invoker = ctx.invoker();

    let completion = invoker.invoke(&request(), None, None).await.unwrap();
    assert_eq!(completion.provider_used, "b");
    assert_eq!(completion.attempts, 2);
    assert_eq!(completion.content, "answer from b");
    assert_eq!(completion.usage.total(), 15);

    let health = ctx.health.snapshot("a").unwrap();
    assert_eq!(health.state, HealthState::Inactive);
    assert!(health.last_error.unwrap().contains("401"));

    // Never selected again until something succeeds on it.
    for _ in 0..3 {
        assert_eq!(invoker.invoke(&request(), None, None).await.unwrap().provider_used, "b");
    }
    assert_eq!(a.provider.calls(), 1);
}

#[tokio::test]
async fn probe_success_revives_an_inactive_provider() {
    let a = Registered::streaming(MockProvider::new("a").with_steps(vec![Step::Status(403)]));
    let b = Registered::streaming(MockProvider::new("b"));
    let ctx = context(&[&a, &b]);

    ctx.invoker().invoke(&request(), None, None).await.unwrap();
    assert!(!ctx.health.is_active("a"));

    let results = ctx.probe_all().await;
    assert!(results.iter().all(|r| r.healthy));
    assert!(ctx.health.is_active("a"));
}

#[tokio::test]
async fn all_inactive_fails_fast_without_calls() {
    let a = Registered::streaming(MockProvider::new("a"));
    let ctx = context(&[&a]);
    ctx.health
        .record_failure("a", &Error::provider_status("a", 401, "bad key"));

    let err = ctx.invoker().invoke(&request(), Some(5), None).await.unwrap_err();
    assert!(matches!(err, Error::NoProvidersAvailable));
    assert_eq!(a.provider.calls(), 0);
}

#[tokio::test]
async fn attempts_are_bounded_and_last_error_propagates() {
    let failing = || (0..5).map(|_| Step::Status(500)).collect::<Vec<_>>();
    let a = Registered::streaming(MockProvider::new("a").with_steps(failing()));
    let b = Registered::streaming(MockProvider::new("b").with_steps(failing()));
    let ctx = context(&[&a, &b]);

    let err = ctx.invoker().invoke(&request(), Some(3), None).await.unwrap_err();
    assert!(matches!(err, Error::ProviderStatus { status: 500, .. }));
    assert_eq!(a.provider.calls() + b.provider.calls(), 3);

    // Transient failures keep both active.
    assert!(ctx.health.is_active("a"));
    assert_eq!(ctx.health.snapshot("a").unwrap().consecutive_failures, 2);
}

#[tokio::test]
async fn zero_attempts_still_makes_one_call() {
    let a = Registered::streaming(MockProvider::new("a"));
    let completion = context(&[&a])
        .invoker()
        .invoke(&request(), Some(0), None)
        .await
        .unwrap();
    assert_eq!(completion.attempts, 1);
}

#[tokio::test]
async fn partial_stream_failure_sends_restart_before_retry() {
    let a = Registered::streaming(
        MockProvider::new("a").with_steps(vec![Step::StreamThenFail(vec!["The pri"])]),
    );
    let b = Registered::streaming(
        MockProvider::new("b").with_steps(vec![Step::Reply("The price is $150".into())]),
    );
    let ctx = context(&[&a, &b]);
    let (tx, mut rx) = mpsc::channel(16);

    let completion = ctx.invoker().invoke(&request(), None, Some(&tx)).await.unwrap();
    drop(tx);

    let mut deltas = Vec::new();
    while let Some(delta) = rx.recv().await {
        deltas.push(delta);
    }
    assert_eq!(
        deltas,
        vec![
            StreamDelta::text("The pri"),
            StreamDelta::Restart {
                provider: "b".into()
            },
            StreamDelta::text("The price is $150"),
        ]
    );
    assert_eq!(completion.content, "The price is $150");
    assert_eq!(completion.provider_used, "b");
    assert_eq!(ctx.health.snapshot("a").unwrap().consecutive_failures, 1);
}

#[tokio::test]
async fn dropping_the_receiver_cancels_without_health_change() {
    let a = Registered::streaming(
        MockProvider::new("a").with_steps(vec![Step::StreamThenHang(vec!["The "])]),
    );
    let ctx = context(&[&a]);
    let invoker = ctx.invoker();
    let (tx, mut rx) = mpsc::channel(16);
    let req = request();

    let (result, first) = tokio::join!(invoker.invoke(&req, None, Some(&tx)), async move {
        let first = rx.recv().await;
        drop(rx);
        first
    });

    assert_eq!(first, Some(StreamDelta::text("The ")));
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(a.provider.calls(), 1);
    let health = ctx.health.snapshot("a").unwrap();
    assert_eq!(health.consecutive_failures, 0);
    assert!(health.last_success_at.is_none());
}

#[tokio::test]
async fn closed_sink_cancels_before_any_call() {
    let a = Registered::streaming(MockProvider::new("a"));
    let ctx = context(&[&a]);
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let err = ctx.invoker().invoke(&request(), None, Some(&tx)).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(ctx.health.is_active("a"));
}

#[tokio::test]
async fn non_streaming_provider_delivers_one_fragment() {
    let a = Registered {
        provider: std::sync::Arc::new(
            MockProvider::new("a").with_steps(vec![Step::Reply("AAPL is at $155.".into())]),
        ),
        supports_streaming: false,
        supports_tools: false,
    };
    let ctx = context(&[&a]);
    let (tx, mut rx) = mpsc::channel(4);

    let completion = ctx.invoker().invoke(&request(), None, Some(&tx)).await.unwrap();
    drop(tx);

    assert_eq!(rx.recv().await, Some(StreamDelta::text("AAPL is at $155.")));
    assert_eq!(rx.recv().await, None);
    assert_eq!(completion.content, "AAPL is at $155.");
}

#[tokio::test]
async fn tools_only_reach_providers_that_support_them() {
    let plain = Registered::streaming(MockProvider::new("plain"));
    let tooled = Registered {
        provider: std::sync::Arc::new(MockProvider::new("tooled")),
        supports_streaming: true,
        supports_tools: true,
    };
    let invoker = context(&[&plain, &tooled]).invoker();

    let mut req = request();
    req.tools = vec![ToolDefinition {
        name: "get_quote".into(),
        description: "Latest price".into(),
        input_schema: json!({"type": "object"}),
    }];
    invoker.invoke(&req, None, None).await.unwrap();
    invoker.invoke(&req, None, None).await.unwrap();

    assert!(plain.provider.last_request().unwrap().tools.is_empty());
    let sent = tooled.provider.last_request().unwrap();
    assert_eq!(sent.tools.len(), 1);
    assert_eq!(sent.model, "mock-model");
    assert_eq!(sent.max_tokens, Some(2048));
}

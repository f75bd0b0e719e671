// Copyright (c) The atcheck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests: dispatch → callback over real TCP → settle → verdict.

use atcheck_runner::{
    consistency::{CombinationVerdict, ConsistencyDiff},
    correlation::{CORRELATION_HEADER, CorrelationKey},
    dispatch::{DispatchRequest, WorkflowDispatcher},
    errors::DispatchError,
    listener::CallbackListener,
    matrix::{Browser, TestMatrix},
    registry::CallbackRegistry,
    sequencer::{PlanSequencer, SequencerOpts},
};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// A dispatcher standing in for the remote CI: every accepted dispatch POSTs
/// one COMPLETED callback to the listener, echoing the correlation header,
/// exactly as a real workflow run would.
struct LoopbackDispatcher {
    /// Maps (browser, run_index) to the responses that run reports.
    responses: fn(&str, usize) -> Vec<String>,
}

impl LoopbackDispatcher {
    fn run_index_of(request: &DispatchRequest) -> usize {
        let (_, key) = request.inputs.callback_header.split_once(": ").unwrap();
        key.rsplit_once(':').unwrap().1.parse().unwrap()
    }
}

impl WorkflowDispatcher for LoopbackDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let run_index = Self::run_index_of(&request);
        let browser = request.inputs.browser.as_str();
        let responses = (self.responses)(browser, run_index);
        let header = request.inputs.callback_header.clone();
        let callback_url = request.inputs.callback_url.clone();

        tokio::spawn(async move {
            // Give the sequencer a moment to register the waiter, like the
            // real CI startup delay does.
            tokio::time::sleep(Duration::from_millis(20)).await;
            post_callback(&callback_url, &header, &responses).await;
        });
        Ok(())
    }
}

/// POSTs one COMPLETED notification to `callback_url` and asserts the
/// listener answers an empty 200.
async fn post_callback(callback_url: &str, header: &str, responses: &[String]) {
    let authority = callback_url
        .strip_prefix("http://")
        .and_then(|rest| rest.split('/').next())
        .expect("loopback callback url");
    let body = serde_json::json!({
        "status": "COMPLETED",
        "rowId": 0,
        "responses": responses,
    })
    .to_string();
    let request = format!(
        "POST /callback HTTP/1.1\r\nhost: {authority}\r\n{header}\r\n\
         content-length: {}\r\n\r\n{body}",
        body.len(),
    );

    let mut stream = TcpStream::connect(authority).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read");
    assert!(
        response.starts_with(b"HTTP/1.1 200 OK"),
        "unexpected response: {}",
        String::from_utf8_lossy(&response),
    );
}

fn two_browser_matrix() -> TestMatrix {
    let mut workflows = IndexMap::new();
    workflows.insert(
        "voiceover.yml".to_owned(),
        vec![Browser::Safari, Browser::Chrome],
    );
    TestMatrix::new(workflows)
}

fn opts(callback_url: String) -> SequencerOpts {
    SequencerOpts {
        runs_per_combination: 2,
        idle_window: Duration::from_millis(150),
        plan_concurrency: 8,
        git_ref: "main".to_owned(),
        callback_url,
    }
}

#[tokio::test]
async fn agreeing_repeats_pass_end_to_end() {
    let registry = CallbackRegistry::new();
    let listener = CallbackListener::bind(0, registry.clone()).await.unwrap();
    let callback_url = format!("http://127.0.0.1:{}/callback", listener.local_port());

    // Every run of every browser reports the same non-blank responses.
    let dispatcher = LoopbackDispatcher {
        responses: |_browser, _run_index| vec!["state: checked".to_owned()],
    };
    let sequencer = PlanSequencer::new(&dispatcher, &registry, opts(callback_url));

    let verdict = sequencer
        .run(
            &two_browser_matrix(),
            &["tests/checkbox".to_owned()],
            |_| {},
        )
        .await;

    assert!(verdict.passed());
    assert_eq!(verdict.plans.len(), 1);
    assert_eq!(verdict.plans[0].combinations.len(), 2);
    for outcome in &verdict.plans[0].combinations {
        assert_eq!(outcome.dispatched_runs, 2);
        assert!(outcome.verdict.is_pass());
    }
    assert_eq!(registry.pending_runs(), 0);
}

#[tokio::test]
async fn divergent_repeat_fails_end_to_end() {
    let registry = CallbackRegistry::new();
    let listener = CallbackListener::bind(0, registry.clone()).await.unwrap();
    let callback_url = format!("http://127.0.0.1:{}/callback", listener.local_port());

    // Chrome's second repeat reads one response differently.
    let dispatcher = LoopbackDispatcher {
        responses: |browser, run_index| {
            if browser == "chrome" && run_index == 1 {
                vec!["state: unchecked".to_owned()]
            } else {
                vec!["state: checked".to_owned()]
            }
        },
    };
    let sequencer = PlanSequencer::new(&dispatcher, &registry, opts(callback_url));

    let verdict = sequencer
        .run(
            &two_browser_matrix(),
            &["tests/checkbox".to_owned()],
            |_| {},
        )
        .await;

    assert!(!verdict.passed(), "one divergent repeat must fail the run");
    let failing: Vec<_> = verdict.plans[0]
        .combinations
        .iter()
        .filter(|outcome| !outcome.verdict.is_pass())
        .collect();
    assert_eq!(failing.len(), 1);
    let outcome = failing[0];
    assert_eq!(outcome.combination.browser, Browser::Chrome);
    match &outcome.verdict {
        CombinationVerdict::Fail {
            diff:
                ConsistencyDiff::ResponseMismatch {
                    run_index,
                    response_index,
                    reference,
                    actual,
                    ..
                },
        } => {
            assert_eq!(*run_index, 1, "the diff names the divergent repeat");
            assert_eq!(*response_index, 0);
            assert_eq!(reference, "state: checked");
            assert_eq!(actual, "state: unchecked");
        }
        other => panic!("expected a response mismatch diff, got {other:?}"),
    }
}

#[tokio::test]
async fn multi_row_run_settles_with_all_rows() {
    let registry = CallbackRegistry::new();
    let listener = CallbackListener::bind(0, registry.clone()).await.unwrap();
    let callback_url = format!("http://127.0.0.1:{}/callback", listener.local_port());

    let key = CorrelationKey::from_wire("manual:chrome:p:0");
    let run = registry
        .register(key.clone(), Duration::from_millis(150))
        .unwrap();
    let header = format!("{CORRELATION_HEADER}: {}", key.as_str());

    post_callback(&callback_url, &header, &["row one".to_owned()]).await;
    post_callback(&callback_url, &header, &["row two".to_owned()]).await;

    let result = run.settled().await;
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].responses, vec!["row one".to_owned()]);
    assert_eq!(result.rows[1].responses, vec!["row two".to_owned()]);
}

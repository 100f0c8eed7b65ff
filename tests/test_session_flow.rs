mod common;

use common::{SortieProcess, WsClient, error_name};
use serde_json::{Value, json};
use sortie::mission::outcome::generate_outcomes;

async fn join(client: &mut WsClient, session_id: &str, role: &str) -> Value {
    let reply = client
        .request(
            "request-join-session",
            json!({ "sessionId": session_id, "role": role }),
        )
        .await;
    assert_eq!(reply["method"], "session-joined", "join failed: {reply}");
    assert_eq!(reply["request"]["fulfilled"], true);
    reply
}

/// Launches a drill session with an instructor manager and a student on
/// the red force, then starts it. `tag` keeps user ids distinct per session.
async fn started_session(
    server: &SortieProcess,
    config: Option<Value>,
    tag: &str,
) -> (WsClient, WsClient) {
    let instructor = format!("inst-{tag}");
    let student = format!("stu-{tag}");
    let summary = server.launch("drill", &instructor, config).await;
    let session_id = summary["id"].as_str().unwrap().to_string();

    let mut manager = server.connect(&instructor, "instructor").await;
    join(&mut manager, &session_id, "manager").await;
    let mut player = server.connect(&student, "student").await;
    let joined = join(&mut player, &session_id, "participant").await;
    let member_id = joined["data"]["memberId"].as_str().unwrap().to_string();

    let reply = manager
        .request(
            "request-assign-force",
            json!({ "memberId": member_id, "forceId": "red" }),
        )
        .await;
    assert_eq!(reply["method"], "session-members-updated", "{reply}");

    manager.send("request-start-session", Value::Null).await;
    manager.expect_method("session-started").await;
    player.expect_method("session-started").await;
    (manager, player)
}

#[tokio::test(flavor = "multi_thread")]
async fn execute_before_start_is_a_state_conflict() {
    let server = SortieProcess::spawn().await;
    let summary = server.launch("drill", "inst", None).await;
    let session_id = summary["id"].as_str().unwrap();

    let mut manager = server.connect("inst", "instructor").await;
    join(&mut manager, session_id, "manager").await;

    let reply = manager
        .request(
            "request-execute-action",
            json!({ "nodeId": "red-relay", "actionId": "red-relay-probe" }),
        )
        .await;
    assert_eq!(error_name(&reply), "session-conflicting-state");
    assert_eq!(reply["request"]["fulfilled"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn participant_runs_an_action_to_completion() {
    let server = SortieProcess::spawn().await;
    let (_manager, mut player) = started_session(&server, None, "a").await;

    // The session-start effect writes to the red force.
    let output = player.expect_method("send-output").await;
    assert_eq!(output["data"]["output"]["message"], "Exercise live.");

    let opened = player
        .request("request-open-node", json!({ "nodeId": "red-gateway" }))
        .await;
    assert_eq!(opened["method"], "node-opened", "{opened}");
    let revealed: Vec<&str> = opened["data"]["revealedNodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["id"].as_str())
        .collect();
    assert_eq!(revealed, ["red-relay"]);

    // Blue nodes are outside a red participant's visibility.
    let hidden = player
        .request("request-open-node", json!({ "nodeId": "blue-gateway" }))
        .await;
    assert_eq!(error_name(&hidden), "node-not-found");

    let initiated = player
        .request(
            "request-execute-action",
            json!({ "nodeId": "red-relay", "actionId": "red-relay-probe" }),
        )
        .await;
    assert_eq!(initiated["method"], "action-execution-initiated", "{initiated}");

    let busy = player
        .request(
            "request-execute-action",
            json!({ "nodeId": "red-relay", "actionId": "red-relay-probe" }),
        )
        .await;
    assert_eq!(error_name(&busy), "node-already-executing");

    let completed = player.expect_method("action-execution-completed").await;
    let data = &completed["data"];
    assert_eq!(data["outcome"]["actionId"], "red-relay-probe");
    assert_eq!(data["outcome"]["aborted"], false);
    assert_eq!(data["resourcesRemaining"], 4);

    let expected = generate_outcomes("abc", "red-relay-probe", 3);
    assert_eq!(data["outcome"]["successful"], expected[0].succeeds(0.5));
}

/// Runs the relay action until it fails and returns each outcome plus the error.
async fn drain_relay_action(player: &mut WsClient) -> (Vec<bool>, String) {
    player
        .request("request-open-node", json!({ "nodeId": "red-gateway" }))
        .await;
    let mut outcomes = Vec::new();
    loop {
        let reply = player
            .request(
                "request-execute-action",
                json!({ "nodeId": "red-relay", "actionId": "red-relay-probe" }),
            )
            .await;
        if reply["method"] == "error" {
            return (outcomes, error_name(&reply).to_string());
        }
        let completed = player.expect_method("action-execution-completed").await;
        outcomes.push(completed["data"]["outcome"]["successful"].as_bool().unwrap());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn seeded_outcomes_repeat_and_exhaust() {
    // 6 credits at cost 2 gives three pre-generated outcomes.
    let expected: Vec<bool> = generate_outcomes("abc", "red-relay-probe", 3)
        .iter()
        .map(|o| o.succeeds(0.5))
        .collect();

    let server = SortieProcess::spawn().await;

    let (_m1, mut player) = started_session(&server, None, "a").await;
    let (outcomes, error) = drain_relay_action(&mut player).await;
    assert_eq!(outcomes, expected);
    assert_eq!(error, "action-insufficient-resources");
    drop(player);

    let (_m2, mut player) = started_session(
        &server,
        Some(json!({ "infiniteResources": true, "instantaneousActions": true })),
        "b",
    )
    .await;
    let (outcomes, error) = drain_relay_action(&mut player).await;
    assert_eq!(outcomes, expected);
    assert_eq!(error, "action-outcomes-exhausted");
}

#[tokio::test(flavor = "multi_thread")]
async fn sixty_first_message_is_throttled() {
    let server = SortieProcess::spawn().await;
    let mut client = server.connect("chatty", "student").await;

    for _ in 0..61 {
        client.send("request-current-session", Value::Null).await;
    }

    let mut answered = 0;
    let mut throttled = 0;
    while answered + throttled < 61 {
        let frame = client.next().await.expect("socket closed");
        match frame["method"].as_str() {
            Some("current-session") => answered += 1,
            Some("error") if error_name(&frame) == "rate-limit-exceeded" => throttled += 1,
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(answered, 60);
    assert_eq!(throttled, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn takeover_switches_out_the_old_connection() {
    let server = SortieProcess::spawn().await;
    let mut first = server.connect("twin", "student").await;
    let _second = server.connect("twin", "student").await;

    let frame = first.next().await.expect("expected a switch notice");
    assert_eq!(frame["method"], "connection-switched");
    assert!(first.next().await.is_none(), "old socket should close");
}

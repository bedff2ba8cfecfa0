//! 编排器集成测试：脚本化推理客户端 + 临时 SQLite 存储

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use common::{harness, open_builder, settings_with_max_evaluations};
use sidekick::core::{AgentError, Step, TurnState};
use sidekick::llm::ScriptedReasoner;
use sidekick::memory::{CheckpointStore, Message, ProfileStore, Role, TranscriptStore};
use sidekick::react::{DisplayMessage, DisplayRole};

fn contents(messages: &[DisplayMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn direct_answer_ends_with_reply_and_feedback() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("4")
            .verdict("Correct and concise.", true, false)
            .facts(&[]),
    );
    let h = harness(reasoner.clone());
    let orchestrator = h.builder.build_orchestrator("thread-a");

    let (snapshots, outcome) = orchestrator
        .run_turn("What is 2+2?", None, Vec::new())
        .collect_all()
        .await;
    let outcome = outcome.unwrap();
    assert!(outcome.success_criteria_met);
    assert!(!outcome.user_input_needed);

    assert_eq!(snapshots.len(), 3);
    assert_eq!(contents(&snapshots[0].messages), vec!["What is 2+2?"]);
    assert_eq!(contents(&snapshots[1].messages), vec!["What is 2+2?", "4"]);
    let last = snapshots.last().unwrap();
    assert_eq!(
        contents(&last.messages),
        vec![
            "What is 2+2?",
            "4",
            "Evaluator Feedback on this answer: Correct and concise."
        ]
    );
    assert_eq!(last, &outcome.history);

    let evaluations = reasoner.judge_calls();
    assert_eq!(evaluations[0].0, "EvaluatorVerdict");
    assert!(evaluations[0].1[1]
        .content
        .contains("The answer should be clear and accurate"));
    h.builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn unknown_capability_is_reported_back_to_worker() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .invoke("search", json!({ "query": "x" }))
            .reply("I could not search, sorry.")
            .verdict("Honest answer", true, false)
            .facts(&[]),
    );
    let h = harness(reasoner.clone());
    let orchestrator = h.builder.build_orchestrator("thread-b");

    let outcome = orchestrator
        .run_turn("Look up x", None, Vec::new())
        .finish()
        .await
        .unwrap();
    assert_eq!(outcome.reply.as_deref(), Some("I could not search, sorry."));

    let calls = reasoner.generate_calls();
    assert_eq!(calls.len(), 2);
    let observed = calls[1]
        .iter()
        .find(|m| m.role == Role::Capability)
        .expect("capability result in worker context");
    assert!(observed.content.contains("CapabilityNotFound"));
    assert_eq!(observed.name.as_deref(), Some("search"));
    h.builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn rejection_feedback_is_threaded_into_next_rounds() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("4")
            .verdict("Show your working (1)", false, false)
            .reply("4")
            .verdict("Show your working (2)", false, false)
            .reply("4")
            .verdict("Same mistake again, asking the user", false, true)
            .facts(&[]),
    );
    let h = harness(reasoner.clone());
    let orchestrator = h.builder.build_orchestrator("thread-c");

    let outcome = orchestrator
        .run_turn("What is 2+2?", Some("Explain the steps"), Vec::new())
        .finish()
        .await
        .unwrap();
    assert!(!outcome.success_criteria_met);
    assert!(outcome.user_input_needed);
    assert_eq!(
        contents(&outcome.history.messages),
        vec![
            "What is 2+2?",
            "4",
            "Evaluator Feedback on this answer: Same mistake again, asking the user"
        ]
    );

    let evaluations: Vec<_> = reasoner
        .judge_calls()
        .into_iter()
        .filter(|(schema, _)| schema == "EvaluatorVerdict")
        .collect();
    assert_eq!(evaluations.len(), 3);
    assert!(!evaluations[0].1[1].content.contains("prior attempt"));
    assert!(evaluations[1].1[1]
        .content
        .contains("you provided this feedback: Show your working (1)"));
    assert!(evaluations[2].1[1]
        .content
        .contains("you provided this feedback: Show your working (2)"));
    assert!(!evaluations[2].1[1].content.contains("Show your working (1)"));
    assert!(evaluations[2].1[1].content.contains("Explain the steps"));

    let worker_calls = reasoner.generate_calls();
    assert_eq!(worker_calls.len(), 3);
    assert!(worker_calls[1][0]
        .content
        .contains("Here is the feedback on why this was rejected:\nShow your working (1)"));
    assert!(worker_calls[2][0]
        .content
        .contains("Here is the feedback on why this was rejected:\nShow your working (2)"));
    h.builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn snapshots_only_grow() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .invoke("echo", json!({ "text": "hi" }))
            .reply("done")
            .verdict("ok", true, false)
            .facts(&[]),
    );
    let h = harness(reasoner);
    let orchestrator = h.builder.build_orchestrator("thread-m");
    let prior = vec![
        DisplayMessage::user("earlier"),
        DisplayMessage::assistant("before"),
    ];

    let (snapshots, outcome) = orchestrator
        .run_turn("say hi", None, prior.clone())
        .collect_all()
        .await;
    outcome.unwrap();

    assert_eq!(snapshots.len(), 5);
    assert!(snapshots[0].messages.starts_with(&prior));
    for pair in snapshots.windows(2) {
        assert!(pair[1].extends(&pair[0]));
        assert!(pair[1].len() > pair[0].len());
    }
    assert_eq!(snapshots[1].last().unwrap().title(), Some("Calling tool"));
    assert_eq!(snapshots[1].last().unwrap().content, "**echo**(text=\"hi\")");
    assert_eq!(snapshots[2].last().unwrap().title(), Some("Result: echo"));
    assert_eq!(snapshots[2].last().unwrap().content, "hi");
    let last = snapshots.last().unwrap();
    assert!(last
        .messages
        .iter()
        .all(|m| m.role == DisplayRole::User || m.role == DisplayRole::Assistant));
    h.builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn malformed_verdict_aborts_the_turn() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("x")
            .push_judgment("EvaluatorVerdict", Ok(json!({ "feedback": 3 }))),
    );
    let h = harness(reasoner);
    let orchestrator = h.builder.build_orchestrator("thread-s");

    let err = orchestrator
        .run_turn("anything", None, Vec::new())
        .finish()
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SchemaViolation(_)));

    assert!(h.builder.transcripts().all("thread-s").await.unwrap().is_empty());
    let latest = h
        .builder
        .checkpoints()
        .load_latest("thread-s")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.next_step, Step::Evaluator);
}

#[tokio::test]
async fn finished_turns_feed_memory_of_later_turns() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("Nice to meet you, Ana")
            .verdict("Friendly", true, false)
            .facts(&[("name", "Ana")])
            .reply("Hello again, Ana")
            .verdict("Friendly", true, false)
            .facts(&[]),
    );
    let h = harness(reasoner.clone());
    let orchestrator = h.builder.build_orchestrator("thread-p");

    orchestrator
        .run_turn("My name is Ana", None, Vec::new())
        .finish()
        .await
        .unwrap();
    h.builder.scheduler().wait_background().await;

    let facts = h.builder.profile().get_all().await.unwrap();
    assert_eq!(facts.get("name").map(String::as_str), Some("Ana"));
    let transcript = h.builder.transcripts().all("thread-p").await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].content, "Nice to meet you, Ana");

    orchestrator
        .run_turn("Do you remember me?", None, Vec::new())
        .finish()
        .await
        .unwrap();
    let second = &reasoner.generate_calls()[1];
    let system = &second[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("Known facts about this user:\n  name: Ana"));
    assert!(system.content.contains("  User: My name is Ana"));
    assert_eq!(second.iter().filter(|m| m.role == Role::System).count(), 1);
    assert!(second.iter().any(|m| m.role == Role::User && m.content == "My name is Ana"));
    h.builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn evaluation_ceiling_hands_control_back_to_user() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("draft one")
            .verdict("needs more", false, false)
            .reply("draft two")
            .verdict("still needs more", false, false)
            .reply("draft three"),
    );
    let h = harness(reasoner.clone());
    let builder = h.builder.clone().with_settings(settings_with_max_evaluations(2));
    let orchestrator = builder.build_orchestrator("thread-x");

    let outcome = orchestrator
        .run_turn("write it", None, Vec::new())
        .finish()
        .await
        .unwrap();
    assert!(outcome.user_input_needed);
    assert!(!outcome.success_criteria_met);
    assert_eq!(outcome.reply.as_deref(), Some("draft two"));
    assert_eq!(reasoner.pending_generations(), 1);
    builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn interrupted_turn_resumes_from_latest_checkpoint() {
    let dir = TempDir::new().unwrap();

    let first = Arc::new(ScriptedReasoner::new().invoke("echo", json!({ "text": "halfway" })));
    let (builder, _) = open_builder(dir.path(), first);
    let orchestrator = builder.build_orchestrator("thread-r");
    let err = orchestrator
        .run_turn("Finish the report", None, Vec::new())
        .finish()
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Llm(_)));

    let lineage = builder.checkpoints().list("thread-r").await.unwrap();
    assert_eq!(lineage.len(), 2);
    assert_eq!(lineage[0].next_step, Step::Dispatch);
    assert_eq!(lineage[1].next_step, Step::Worker);
    assert_eq!(lineage[0].parent_id, None);
    assert_eq!(lineage[1].parent_id.as_deref(), Some(lineage[0].id.as_str()));

    let second = Arc::new(
        ScriptedReasoner::new()
            .reply("Report finished")
            .verdict("Good", true, false)
            .facts(&[]),
    );
    let (builder, _) = open_builder(dir.path(), second.clone());
    let orchestrator = builder.build_orchestrator("thread-r");
    let stream = orchestrator
        .resume_turn(Vec::new())
        .await
        .unwrap()
        .expect("interrupted turn");
    let outcome = stream.finish().await.unwrap();
    assert_eq!(outcome.reply.as_deref(), Some("Report finished"));

    let context = &second.generate_calls()[0];
    assert!(context
        .iter()
        .any(|m| m.role == Role::Capability && m.content.contains("halfway")));
    assert!(orchestrator.resume_turn(Vec::new()).await.unwrap().is_none());
    builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn cancelled_turn_stops_during_dispatch() {
    let reasoner = Arc::new(ScriptedReasoner::new().invoke("slow", json!({})));
    let h = harness(reasoner);
    let orchestrator = h.builder.build_orchestrator("thread-k");

    let mut stream = orchestrator.run_turn("wait for it", None, Vec::new());
    let first = stream.next_snapshot().await.unwrap();
    assert_eq!(contents(&first.messages), vec!["wait for it"]);
    let second = stream.next_snapshot().await.unwrap();
    assert_eq!(second.last().unwrap().title(), Some("Calling tool"));

    stream.cancel();
    let err = stream.finish().await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
}

#[tokio::test]
async fn second_turn_on_a_busy_session_is_rejected() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("one")
            .verdict("ok", true, false)
            .facts(&[])
            .reply("three")
            .verdict("ok", true, false)
            .facts(&[]),
    );
    let h = harness(reasoner);
    let orchestrator = h.builder.build_orchestrator("thread-busy");

    let first = orchestrator.run_turn("first", None, Vec::new());
    let second = orchestrator.run_turn("second", None, Vec::new());
    let resumed = orchestrator.resume_turn(Vec::new()).await;
    assert!(matches!(resumed, Err(AgentError::TurnInProgress(_))));
    let (first, second) = tokio::join!(first.finish(), second.finish());
    assert_eq!(first.unwrap().reply.as_deref(), Some("one"));
    assert!(matches!(second, Err(AgentError::TurnInProgress(_))));

    orchestrator
        .run_turn("third", None, Vec::new())
        .finish()
        .await
        .unwrap();
    let latest = h
        .builder
        .checkpoints()
        .load_latest("thread-busy")
        .await
        .unwrap()
        .unwrap();
    let asked: Vec<&str> = latest
        .state
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(asked, vec!["first", "third"]);
    assert_eq!(h.builder.transcripts().all("thread-busy").await.unwrap().len(), 4);
    h.builder.scheduler().wait_background().await;
}

#[tokio::test]
async fn resumed_turn_keeps_saved_feedback() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply("4, because 2+2=4")
            .verdict("Good", true, false)
            .facts(&[]),
    );
    let h = harness(reasoner.clone());
    let mut state = TurnState::begin_turn(Vec::new(), "What is 2+2?", "Explain the steps");
    state.push(Message::assistant("4"));
    state.feedback_on_work = Some("Show your working".into());
    state.evaluations = 1;
    h.builder
        .checkpoints()
        .save("thread-fb", Step::Worker, &state)
        .await
        .unwrap();

    let orchestrator = h.builder.build_orchestrator("thread-fb");
    let outcome = orchestrator
        .resume_turn(Vec::new())
        .await
        .unwrap()
        .expect("interrupted turn")
        .finish()
        .await
        .unwrap();
    assert_eq!(outcome.reply.as_deref(), Some("4, because 2+2=4"));

    let worker = &reasoner.generate_calls()[0][0];
    assert!(worker
        .content
        .contains("Here is the feedback on why this was rejected:\nShow your working"));
    let verdict = &reasoner.judge_calls()[0].1[1];
    assert!(verdict.content.contains("Explain the steps"));
    assert!(verdict.content.contains("you provided this feedback: Show your working"));
    h.builder.scheduler().wait_background().await;
}

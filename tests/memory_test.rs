//! 记忆层集成测试：记忆片段边界、画像写入幂等、检查点按线程隔离

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use sidekick::core::{Step, TurnState};
use sidekick::memory::{
    CheckpointStore, Database, MemoryAssembler, MemoryLimits, Message, ProfileStore,
    SqliteCheckpointStore, SqliteProfileStore, SqliteTranscriptStore, TranscriptStore,
};

struct Stores {
    _dir: TempDir,
    profile: Arc<SqliteProfileStore>,
    transcripts: Arc<SqliteTranscriptStore>,
    assembler: MemoryAssembler,
}

fn stores() -> Stores {
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("sidekick.db"));
    let profile = Arc::new(SqliteProfileStore::open(db.clone()).unwrap());
    let transcripts = Arc::new(SqliteTranscriptStore::open(db).unwrap());
    let assembler = MemoryAssembler::new(profile.clone(), transcripts.clone(), MemoryLimits::default());
    Stores {
        _dir: dir,
        profile,
        transcripts,
        assembler,
    }
}

async fn seed_pairs(transcripts: &SqliteTranscriptStore, session: &str, pairs: usize) {
    for i in 0..pairs {
        transcripts
            .append(session, &format!("u{i}"), &format!("a{i}"))
            .await
            .unwrap();
    }
}

fn history_lines(memory: &str) -> Vec<&str> {
    memory
        .lines()
        .filter(|l| l.starts_with("  User: ") || l.starts_with("  Assistant: "))
        .collect()
}

#[tokio::test]
async fn recent_history_is_capped_at_three_pairs() {
    for (pairs, expected_first) in [(0, None), (1, Some(0)), (3, Some(0)), (4, Some(1)), (100, Some(97))] {
        let s = stores();
        seed_pairs(&s.transcripts, "s1", pairs).await;
        let memory = s.assembler.assemble("s1").await.unwrap();
        let lines = history_lines(&memory);
        match expected_first {
            None => assert_eq!(memory, "", "pairs={pairs}"),
            Some(first) => {
                assert_eq!(lines.len(), 2 * pairs.min(3), "pairs={pairs}");
                assert_eq!(lines[0], format!("  User: u{first}"), "pairs={pairs}");
                assert_eq!(*lines.last().unwrap(), format!("  Assistant: a{}", pairs - 1));
                assert!(memory.starts_with("Recent conversation history:"));
            }
        }
    }
}

#[tokio::test]
async fn long_entries_are_cut_without_marker() {
    let s = stores();
    let long = "z".repeat(400);
    s.transcripts.append("s1", &long, "short").await.unwrap();
    let memory = s.assembler.assemble("s1").await.unwrap();
    let user_line = history_lines(&memory)[0];
    assert_eq!(user_line, format!("  User: {}", "z".repeat(300)));
}

#[tokio::test]
async fn profile_is_shared_across_sessions_and_upserts_are_idempotent() {
    let s = stores();
    s.profile.upsert("city", "Lisbon").await.unwrap();
    let first_write = s.profile.facts().await.unwrap()[0].updated_at;
    tokio::time::sleep(Duration::from_millis(5)).await;
    s.profile.upsert(" city ", " Lisbon ").await.unwrap();
    s.profile.upsert("", "ignored").await.unwrap();
    s.profile.upsert("job", "   ").await.unwrap();

    let facts = s.profile.facts().await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].key, "city");
    assert_eq!(facts[0].value, "Lisbon");
    assert!(facts[0].updated_at > first_write);

    seed_pairs(&s.transcripts, "other-session", 1).await;
    let memory = s.assembler.assemble("a-new-session").await.unwrap();
    assert_eq!(memory, "Known facts about this user:\n  city: Lisbon");

    s.profile.upsert("city", "Porto").await.unwrap();
    let memory = s.assembler.assemble("a-new-session").await.unwrap();
    assert!(memory.contains("city: Porto"));
}

#[tokio::test]
async fn checkpoints_form_a_lineage_per_thread() {
    let dir = TempDir::new().unwrap();
    let store = SqliteCheckpointStore::open(Database::new(dir.path().join("checkpoints.db"))).unwrap();

    let mut state = TurnState::begin_turn(Vec::new(), "hello", "criteria");
    let first = store.save("t1", Step::Worker, &state).await.unwrap();
    state.push(Message::assistant("hi there"));
    let second = store.save("t1", Step::Evaluator, &state).await.unwrap();
    let other = store.save("t2", Step::Worker, &state).await.unwrap();

    assert_eq!(first.parent_id, None);
    assert_eq!(second.parent_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(other.parent_id, None);

    let latest = store.load_latest("t1").await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);
    assert_eq!(latest.next_step, Step::Evaluator);
    assert_eq!(latest.state, state);

    let lineage = store.list("t1").await.unwrap();
    let ids: Vec<&str> = lineage.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    assert!(store.load_latest("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn evaluated_state_survives_a_checkpoint_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoints.db");
    let store = SqliteCheckpointStore::open(Database::new(&path)).unwrap();

    let mut state = TurnState::begin_turn(Vec::new(), "write a haiku", "five-seven-five");
    state.push(Message::assistant("an old silent pond"));
    state.feedback_on_work = Some("Only one line, finish the poem".into());
    state.user_input_needed = true;
    state.evaluations = 1;
    let saved = store.save("t1", Step::Worker, &state).await.unwrap();

    let reopened = SqliteCheckpointStore::open(Database::new(&path)).unwrap();
    let latest = reopened.load_latest("t1").await.unwrap().unwrap();
    assert_eq!(latest.id, saved.id);
    assert_eq!(latest.next_step, Step::Worker);
    assert_eq!(latest.state, state);
    assert_eq!(
        latest.state.feedback_on_work.as_deref(),
        Some("Only one line, finish the poem")
    );
    assert!(latest.state.user_input_needed);
    assert!(!latest.state.success_criteria_met);
    assert_eq!(latest.state.evaluations, 1);
}

//! Worker, save/restore and the shipped prompt files.

use std::sync::Arc;
use std::time::Duration;
use town_core::testing::{sample_prompts, sample_town};
use town_core::{
    load_conversation, save_conversation, spawn_worker, world_channel, ActionExecutor,
    ConversationCoordinator, CulpritPolicy, MockBackend, MockResponse, NpcActions, NpcProfile,
    PersistError, PromptStore, SharedBackend, TestHarness, WorkerRequest, WorkerResponse,
    WorldCommand,
};

fn shipped_prompts_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts")
}

// =============================================================================
// WORKER
// =============================================================================

#[tokio::test]
async fn test_worker_round_trip() {
    let mut harness = TestHarness::new();
    harness.expect_text("I was at the inn all night.");
    harness.expect_text("Ask the mayor.");
    let TestHarness { coordinator, .. } = harness;

    let mut worker = spawn_worker(coordinator, None);

    worker
        .requests
        .send(WorkerRequest::Talk {
            npc: "Mara".into(),
            text: "Where were you?".into(),
        })
        .await
        .unwrap();
    match worker.responses.recv().await.unwrap() {
        WorkerResponse::Complete(reply) => {
            assert_eq!(reply.from, "Mara");
            assert_eq!(reply.message, "I was at the inn all night.");
        }
        other => panic!("Expected Complete, got {other:?}"),
    }

    worker
        .requests
        .send(WorkerRequest::TalkStreaming {
            npc: "Hans".into(),
            text: "Who saw the well?".into(),
        })
        .await
        .unwrap();
    let mut streamed = String::new();
    loop {
        match worker.responses.recv().await.unwrap() {
            WorkerResponse::StreamChunk { npc, text } => {
                assert_eq!(npc, "Hans");
                streamed.push_str(&text);
            }
            WorkerResponse::Complete(reply) => {
                assert_eq!(reply.message, "Ask the mayor.");
                break;
            }
            other => panic!("Unexpected response: {other:?}"),
        }
    }
    assert_eq!(streamed, "Ask the mayor.");

    worker.requests.send(WorkerRequest::RevealCulprit).await.unwrap();
    assert!(matches!(
        worker.responses.recv().await.unwrap(),
        WorkerResponse::Culprit(name) if name == "Mara"
    ));

    worker.requests.send(WorkerRequest::Shutdown).await.unwrap();
    let coordinator = worker.task.await.unwrap();
    assert_eq!(coordinator.history("Mara").unwrap().len(), 2);
    assert_eq!(coordinator.history("Hans").unwrap().len(), 2);
}

#[tokio::test]
async fn test_worker_reports_failures_in_character() {
    let backend = Arc::new(MockBackend::failing());
    let factory = SharedBackend::new(backend, |_: &NpcProfile, _: &[NpcProfile]| {
        Arc::new(town_core::ScriptedExecutor::succeeding()) as Arc<dyn ActionExecutor>
    });
    let coordinator = ConversationCoordinator::start(
        sample_town(),
        &sample_prompts(),
        &CulpritPolicy::default(),
        &factory,
    )
    .unwrap();
    let mut worker = spawn_worker(coordinator, Some(Duration::from_secs(5)));

    worker
        .requests
        .send(WorkerRequest::Talk {
            npc: "Otto".into(),
            text: "Hello?".into(),
        })
        .await
        .unwrap();
    match worker.responses.recv().await.unwrap() {
        WorkerResponse::Failed { npc, message } => {
            assert_eq!(npc, "Otto");
            assert_eq!(message, "Sorry, I'm having trouble thinking right now...");
        }
        other => panic!("Expected Failed, got {other:?}"),
    }

    worker
        .requests
        .send(WorkerRequest::Talk {
            npc: "Bob".into(),
            text: "Hello?".into(),
        })
        .await
        .unwrap();
    assert!(matches!(
        worker.responses.recv().await.unwrap(),
        WorkerResponse::Failed { npc, .. } if npc == "Bob"
    ));

    drop(worker.requests);
    let coordinator = worker.task.await.unwrap();
    assert_eq!(coordinator.active().name(), "Otto");
}

// =============================================================================
// WORLD HAND-OFF
// =============================================================================

#[tokio::test]
async fn test_handover_reaches_the_world() {
    let backend = Arc::new(MockBackend::new(vec![MockResponse::tool_call(
        "handover_item_to_detective",
        r#"{"item_name":"ledger","response":"Fine, take it."}"#,
    )]));
    let (world, mut inbox) = world_channel(4);
    let factory = SharedBackend::new(backend, move |npc: &NpcProfile, town: &[NpcProfile]| {
        let actions = NpcActions::new(npc.clone(), town.to_vec(), world.clone());
        Arc::new(actions) as Arc<dyn ActionExecutor>
    });
    let mut coordinator = ConversationCoordinator::start(
        sample_town(),
        &sample_prompts(),
        &CulpritPolicy::default(),
        &factory,
    )
    .unwrap();

    let game = tokio::spawn(async move {
        let request = inbox.next().await.unwrap();
        let command = request.command().clone();
        request.complete(Ok(()));
        command
    });

    let reply = coordinator.talk_to("Mara", "The ledger, please.").await.unwrap();
    assert_eq!(reply.message, "Fine, take it.");
    assert!(reply.activity().unwrap().success);

    let command = game.await.unwrap();
    assert!(matches!(
        command,
        WorldCommand::GiveItem { ref npc, ref item } if npc == "Mara" && item == "ledger"
    ));
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[tokio::test]
async fn test_save_and_restore() {
    let mut harness = TestHarness::new();
    harness.collect("rope", "Frayed at one end.");
    harness.expect_text("I keep my cellar locked.");
    harness.talk("Mara", "What is in the cellar?").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("town.json");
    save_conversation(&harness.coordinator, &path).await.unwrap();

    let saved = load_conversation(&path).await.unwrap();
    assert_eq!(saved.culprit, "Mara");
    assert_eq!(saved.active, "Mara");
    assert_eq!(saved.npcs.len(), 3);

    let backend = Arc::new(MockBackend::new(vec![MockResponse::text("As I said.")]));
    let factory = SharedBackend::new(backend.clone(), |_: &NpcProfile, _: &[NpcProfile]| {
        Arc::new(town_core::ScriptedExecutor::succeeding()) as Arc<dyn ActionExecutor>
    });
    let mut restored = saved.restore(&factory).unwrap();

    assert_eq!(restored.who_is_culprit(), "Mara");
    assert_eq!(restored.active().name(), "Mara");
    assert!(restored.active().instructions().contains("- rope: Frayed at one end."));
    assert_eq!(
        restored.history("Mara").unwrap().turns(),
        harness.coordinator.history("Mara").unwrap().turns()
    );

    // A restored session resends its transcript as context.
    restored.send_to_active("Again?").await.unwrap();
    let request = &backend.requests()[0];
    assert_eq!(request.input.len(), 3);
    assert!(request.previous_response_id.is_none());
    assert_eq!(restored.history("Mara").unwrap().len(), 4);
}

#[tokio::test]
async fn test_load_missing_save() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_conversation(dir.path().join("nope.json")).await;
    assert!(matches!(result, Err(PersistError::Io(_))));
}

// =============================================================================
// SHIPPED PROMPTS
// =============================================================================

#[test]
fn test_shipped_prompts_cover_the_town() {
    let store = PromptStore::load(shipped_prompts_dir()).unwrap();
    assert!(!store.town_memory().is_empty());
    assert!(!store.general_rules().is_empty());

    let mut town = sample_town();
    town[1].is_culprit = true;
    for npc in &town {
        let text = store.resolve(npc).unwrap();
        assert!(text.contains(&npc.name));
        assert!(text.contains("[COLLECTED EVIDENCE]"));
        assert!(!text.contains("{name}"));
        assert!(!text.contains("{general_rules}"));
    }
}

//! Interrogate the townsfolk from the console.
//!
//! Requires OPENAI_API_KEY (via .env file or environment).
//! Run with: `cargo run -p town-core --example interrogate`
//!
//! Commands: `/talk <name>`, `/culprit`, `/save [path]`, `/quit`.
//! Anything else is said to the NPC you are facing.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use town_core::persist::save_path;
use town_core::{
    spawn_worker, world_channel, ActionExecutor, ConversationCoordinator, CulpritPolicy,
    EvidenceBoard, EvidenceItem, NpcActions, NpcProfile, PromptStore, SharedBackend, TownConfig,
    Worker, WorkerRequest, WorkerResponse, WorldCommand,
};
use tracing_subscriber::EnvFilter;

fn town() -> Vec<NpcProfile> {
    vec![
        NpcProfile::new("Hans", "farmer", "a pitchfork, a coil of rope"),
        NpcProfile::new("Mara", "innkeeper", "the guest ledger, a cellar key"),
        NpcProfile::new("Otto", "mayor", "the town seal, a pocket watch"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = TownConfig::from_env()?;
    if !config.prompts_dir.exists() {
        config.prompts_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("prompts");
    }
    let prompts = PromptStore::load(&config.prompts_dir)?;

    // Stand-in for the game: accept every command, keep handed-over items.
    let evidence = Arc::new(EvidenceBoard::new());
    let (world, mut inbox) = world_channel(16);
    let board = evidence.clone();
    tokio::spawn(async move {
        while let Some(request) = inbox.next().await {
            match request.command() {
                WorldCommand::GiveItem { npc, item } => {
                    let description = format!("Handed over by {npc}.");
                    board.collect(EvidenceItem::new(item.clone(), description));
                    println!("  * {npc} gives you {item}.");
                }
                WorldCommand::MoveNextTo { npc, target } => {
                    println!("  * {npc} walks over to {target}.");
                }
                WorldCommand::Arrest { npc, suspect } => {
                    println!("  * {npc} arrests {suspect}.");
                }
            }
            request.complete(Ok(()));
        }
    });

    let backend = Arc::new(config.backend()?);
    let factory = SharedBackend::new(backend, move |npc: &NpcProfile, town: &[NpcProfile]| {
        let actions = NpcActions::new(npc.clone(), town.to_vec(), world.clone());
        Arc::new(actions) as Arc<dyn ActionExecutor>
    })
    .with_config(config.agent_config());

    let coordinator =
        ConversationCoordinator::start(town(), &prompts, &CulpritPolicy::default(), &factory)?
            .with_detective_name(config.detective_name.clone())
            .with_inventory(evidence);

    let names: Vec<String> = coordinator
        .sessions()
        .iter()
        .map(|s| format!("{} the {}", s.name(), s.profile().role))
        .collect();
    println!("In town: {}", names.join(", "));

    let mut facing = coordinator.active().name().to_string();
    let mut worker = spawn_worker(coordinator, config.request_timeout);
    println!("You are talking to {facing}. Type /quit to leave.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" => break,
            "/talk" if !argument.is_empty() => {
                facing = argument.trim().to_string();
                println!("You turn to {facing}.");
            }
            "/culprit" => {
                worker.requests.send(WorkerRequest::RevealCulprit).await?;
                if let Some(WorkerResponse::Culprit(name)) = worker.responses.recv().await {
                    println!("The culprit was {name}.");
                }
            }
            "/save" => {
                let path = if argument.is_empty() {
                    save_path(".", &config.detective_name)
                } else {
                    PathBuf::from(argument.trim())
                };
                worker.requests.send(WorkerRequest::Save(path)).await?;
                match worker.responses.recv().await {
                    Some(WorkerResponse::SaveComplete(Ok(path))) => {
                        println!("Saved to {}", path.display())
                    }
                    Some(WorkerResponse::SaveComplete(Err(e))) => println!("Save failed: {e}"),
                    _ => {}
                }
            }
            _ => {
                worker
                    .requests
                    .send(WorkerRequest::TalkStreaming {
                        npc: facing.clone(),
                        text: line.to_string(),
                    })
                    .await?;
                print_reply(&mut worker).await?;
            }
        }
    }

    worker.requests.send(WorkerRequest::Shutdown).await?;
    worker.task.await?;
    Ok(())
}

async fn print_reply(worker: &mut Worker) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    let mut streamed = String::new();
    while let Some(response) = worker.responses.recv().await {
        match response {
            WorkerResponse::StreamChunk { npc, text } => {
                if streamed.is_empty() {
                    print!("{npc}: ");
                }
                print!("{text}");
                streamed.push_str(&text);
                stdout.flush()?;
            }
            WorkerResponse::Processing { npc } => println!("  ({npc} is doing something...)"),
            WorkerResponse::Action { invocation, .. } => println!("  {invocation}"),
            WorkerResponse::Complete(reply) => {
                if streamed.is_empty() {
                    println!("{}: {}", reply.from, reply.message);
                } else if streamed.trim() != reply.message.trim() {
                    println!("\n{}: {}", reply.from, reply.message);
                } else {
                    println!();
                }
                break;
            }
            WorkerResponse::Failed { npc, message } => {
                println!("{npc}: {message}");
                break;
            }
            WorkerResponse::Culprit(_) | WorkerResponse::SaveComplete(_) => {}
        }
    }
    Ok(())
}

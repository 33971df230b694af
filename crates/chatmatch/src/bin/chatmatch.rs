//! Interactive console over a `ChatEngine` backed by in-memory stores.
//!
//! Lines are sent as user messages. Commands:
//!   /train <question> => <answer>   teach an intent and its response
//!   /history                        print the conversation
//!   /clear                          forget the conversation
//!   /quit

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use chatmatch::{
    ChatEngine, ChatRequest, EngineConfig, ExternalProvider, InMemoryConversationStore,
    InMemoryIntentStore, ReplyOutcome, RequestScheduler, TrainingRequest,
};

const CONVERSATION_ID: &str = "console";
const BOT_ID: &str = "console-bot";

#[tokio::main]
async fn main() -> chatmatch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::load()?;
    let external = Arc::new(ExternalProvider::new(&config.provider)?);
    let provider = Arc::new(RequestScheduler::spawn(external, &config.scheduler));
    let engine = ChatEngine::new(
        config,
        Arc::new(InMemoryConversationStore::new()),
        Arc::new(InMemoryIntentStore::new()),
        provider,
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" => break,
            "/clear" => engine.clear_conversation(CONVERSATION_ID).await?,
            "/history" => {
                for message in engine.history(CONVERSATION_ID).await? {
                    println!("[{}] {}", message.message_type.as_str(), message.text);
                }
            }
            _ if line.starts_with("/train ") => {
                let Some((question, answer)) = line["/train ".len()..].split_once("=>") else {
                    println!("usage: /train <question> => <answer>");
                    continue;
                };
                let result = engine
                    .train_intent(TrainingRequest {
                        bot_id: BOT_ID.to_string(),
                        project_id: None,
                        texts: vec![question.trim().to_string()],
                        response: Some(answer.trim().to_string()),
                        merge: false,
                    })
                    .await;
                match result {
                    Ok(trained) => println!("trained intent {}", trained.intent_match.intent_id),
                    Err(e) => println!("error: {}", e),
                }
            }
            _ => {
                let request = ChatRequest {
                    conversation_id: CONVERSATION_ID.to_string(),
                    bot_id: BOT_ID.to_string(),
                    text: line.to_string(),
                };
                match engine.reply(request).await {
                    Ok(ReplyOutcome::Replied(reply)) => {
                        println!("{} ({:?})", reply.text, reply.source)
                    }
                    Ok(ReplyOutcome::Cancelled) => println!("(cancelled)"),
                    Err(e) => println!("error: {}", e),
                }
            }
        }
    }

    Ok(())
}

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use crate::ai::chat::{ConversationSession, SessionSnapshot, TurnRole};
use crate::ai::prompt::{GREETING, SUGGESTED_PROMPTS, skill_mentor_prompt};
use crate::core::{AppConfig, ChatError};
use crate::openai::{CompletionsTransport, RelayTransport};

pub async fn run(relay: Option<String>) -> Result<()> {
    // Logs go to stderr so they don't interleave with the reply
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edumesh=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = AppConfig::default();
    let session = Arc::new(build_session(&config, relay)?);
    let mut rl = DefaultEditor::new()?;

    println!("{}\n", GREETING);
    println!("Try asking:");
    for prompt in SUGGESTED_PROMPTS {
        println!("  - {}", prompt);
    }
    println!();

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                if let Err(e) = stream_reply(&session, line).await {
                    eprintln!("{}", e.user_message());
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    session.abandon();
    Ok(())
}

fn build_session(config: &AppConfig, relay: Option<String>) -> Result<ConversationSession> {
    let builder = match relay.or_else(|| config.relay_url.clone()) {
        Some(url) => ConversationSession::builder(RelayTransport::new(&url)),
        None => {
            let transport = CompletionsTransport::new(
                &config.llm_api_hostname,
                config.llm_api_key.as_deref(),
                &config.llm_model,
            )
            .system_message(&skill_mentor_prompt(&[])?);
            ConversationSession::builder(transport)
        }
    };
    Ok(builder.config(config).build())
}

/// Submit `line` and print the reply as it streams in.
async fn stream_reply(session: &Arc<ConversationSession>, line: String) -> Result<(), ChatError> {
    let mut rx = session.subscribe();
    // The user turn lands at the end of the transcript, the reply after it
    let reply_index = rx.borrow_and_update().turns.len() + 1;
    let mut submit = tokio::spawn({
        let session = Arc::clone(session);
        async move { session.submit(&line).await }
    });

    let mut printed = 0;
    let result = loop {
        tokio::select! {
            result = &mut submit => break result,
            changed = rx.changed() => {
                if changed.is_err() {
                    break (&mut submit).await;
                }
            }
        }
        printed += print_unprinted(&rx.borrow_and_update(), reply_index, printed);
    };
    print_unprinted(&session.snapshot(), reply_index, printed);
    println!();

    result.unwrap_or_else(|e| Err(ChatError::Transport(e.to_string())))
}

fn print_unprinted(snapshot: &SessionSnapshot, reply_index: usize, printed: usize) -> usize {
    match unprinted(snapshot, reply_index, printed) {
        Some(text) => {
            print!("{}", text);
            let _ = io::stdout().flush();
            text.len()
        }
        None => 0,
    }
}

fn unprinted(snapshot: &SessionSnapshot, reply_index: usize, printed: usize) -> Option<&str> {
    let turn = snapshot.turns.get(reply_index)?;
    if turn.role != TurnRole::Assistant {
        return None;
    }
    turn.content.get(printed..).filter(|text| !text.is_empty())
}

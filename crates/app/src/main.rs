use std::sync::Arc;

use murmur_bridge::{ConversationId, LoopbackBackend};
use murmur_chat::{AppState, Message, MessageId, ModelLoadState, SendOutcome, SettingsStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const HELP: &str = "\
commands:
  /retry              resend the last message
  /react <id>         thumbs-up a message
  /models             list models and the current selection
  /select <model>     add a model to the selection
  /deselect <model>   remove a model from the selection
  /theme              toggle light/dark
  /new                start a new chat
  /history            list saved conversations
  /open <id>          open a saved conversation
  /delete <id>        delete a saved conversation
  /run <code>         run code through the backend
  /error              show the current error
  /dismiss            dismiss the current error
  /again              retry the failed operation
  /quit               exit
anything else is sent as a message";

/// Terminal front end over the loopback backend.
#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let backend = Arc::new(LoopbackBackend::new());
    let mut app = AppState::new(backend, SettingsStore::load(), false);
    app.start().await;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_transcript(&mut stdout, app.chat.messages()).await?;
    stdout.write_all(format!("{HELP}\n").as_bytes()).await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        let shown = app.chat.messages().len();
        let output = match command {
            "/quit" => break,
            "/help" => HELP.to_string(),
            "/retry" => {
                let outcome = app.chat.retry_last().await;
                print_transcript(&mut stdout, app.chat.messages()).await?;
                describe_outcome(outcome, &app)
            }
            "/react" => match find_message(&app, argument) {
                Some(id) => match app.chat.react(&id) {
                    Some(count) => format!("{id}: {count} thumbs up"),
                    None => format!("no message {id}"),
                },
                None => format!("no message {argument}"),
            },
            "/models" => describe_models(&app),
            "/select" => toggle_model(&mut app, argument, true),
            "/deselect" => toggle_model(&mut app, argument, false),
            "/theme" => match app.theme.toggle() {
                Ok(mode) => format!("theme: {}", mode.name()),
                Err(error) => format!("failed to save theme: {error}"),
            },
            "/new" => match app.chat.new_chat().await {
                Ok(()) => "started a new chat".to_string(),
                Err(error) => error.to_string(),
            },
            "/history" => describe_conversations(&app),
            "/open" => match argument.parse::<i64>() {
                Ok(raw) => match app
                    .chat
                    .select_conversation(Some(ConversationId::new(raw)))
                    .await
                {
                    Ok(()) => {
                        print_transcript(&mut stdout, app.chat.messages()).await?;
                        String::new()
                    }
                    Err(error) => error.to_string(),
                },
                Err(_) => format!("not a conversation id: {argument}"),
            },
            "/delete" => match argument.parse::<i64>() {
                Ok(raw) => match app.chat.delete_conversation(ConversationId::new(raw)).await {
                    Ok(()) => format!("deleted conversation {raw}"),
                    Err(error) => error.to_string(),
                },
                Err(_) => format!("not a conversation id: {argument}"),
            },
            "/run" => app.chat.run_code(argument).await,
            "/error" => match app.chat.error() {
                Some(slot) => slot.error.to_string(),
                None => "no error".to_string(),
            },
            "/dismiss" => {
                app.chat.dismiss_error();
                String::new()
            }
            "/again" => {
                if app.chat.retry_failed().await {
                    print_transcript(&mut stdout, app.chat.messages()).await?;
                    String::new()
                } else {
                    "nothing to retry".to_string()
                }
            }
            _ if command.starts_with('/') => format!("unknown command {command}, try /help"),
            _ => {
                app.chat.set_input(line);
                let outcome = app.chat.send_input().await;
                let fresh = app.chat.messages().get(shown + 1..).unwrap_or_default();
                print_transcript(&mut stdout, fresh).await?;
                describe_outcome(outcome, &app)
            }
        };

        if !output.is_empty() {
            stdout.write_all(format!("{output}\n").as_bytes()).await?;
        }
    }

    Ok(())
}

async fn print_transcript(
    stdout: &mut tokio::io::Stdout,
    messages: &[Message],
) -> std::io::Result<()> {
    for message in messages {
        let speaker = match &message.model {
            Some(model) if message.is_assistant() => model.as_str(),
            _ => message.role.as_str(),
        };
        let line = format!(
            "[{}] {} {}: {}\n",
            message.id, message.timestamp, speaker, message.content
        );
        stdout.write_all(line.as_bytes()).await?;
    }
    Ok(())
}

fn describe_outcome(outcome: SendOutcome, app: &AppState) -> String {
    match (outcome, app.chat.error()) {
        (SendOutcome::Failed, Some(slot)) => format!("error: {} (/again to retry)", slot.error),
        (SendOutcome::Skipped, _) => "nothing sent".to_string(),
        _ => String::new(),
    }
}

fn find_message(app: &AppState, raw: &str) -> Option<MessageId> {
    app.chat
        .messages()
        .iter()
        .map(|message| message.id.clone())
        .find(|id| id.to_string() == raw)
}

fn describe_models(app: &AppState) -> String {
    let models = app.chat.models();
    match models.state() {
        ModelLoadState::Loading => return "models are loading".to_string(),
        ModelLoadState::Empty => return "no models available".to_string(),
        ModelLoadState::Failed(error) => return format!("failed to load models: {error}"),
        ModelLoadState::Ready => {}
    }

    let mut lines = Vec::new();
    for (provider, group) in models.grouped_by_provider() {
        lines.push(format!("{provider}:"));
        for model in group {
            let marker = if models.is_selected(&model.id) { "*" } else { " " };
            lines.push(format!("  {marker} {}", model.name));
        }
    }
    lines.join("\n")
}

fn toggle_model(app: &mut AppState, model_id: &str, select: bool) -> String {
    let models = app.chat.models_mut();
    let changed = if select {
        models.select(model_id)
    } else {
        models.deselect(model_id)
    };

    match (changed, select) {
        (true, true) => format!("selected {model_id}"),
        (true, false) => format!("deselected {model_id}"),
        (false, true) => format!("cannot select {model_id}"),
        (false, false) => format!("cannot deselect {model_id}"),
    }
}

fn describe_conversations(app: &AppState) -> String {
    let conversations = app.chat.conversations();
    if conversations.summaries().is_empty() {
        return "no saved conversations".to_string();
    }

    conversations
        .summaries()
        .iter()
        .map(|summary| {
            let marker = if conversations.active() == Some(summary.id) {
                "*"
            } else {
                " "
            };
            format!(
                "{marker} {} {} ({} messages, {})",
                summary.id, summary.title, summary.message_count, summary.model
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

use crate::handlers::identity::UserId;
use crate::services::conversation::{ConversationManager, PendingUpload, RelayEvent};
use crate::utils::error::ApiError;
use axum::{
    extract::{Multipart, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

const DONE_SENTINEL: &str = "[DONE]";

/// Fields of the multipart chat request
#[derive(Debug, Default)]
struct ChatForm {
    message: String,
    thread_id: Option<String>,
    uploads: Vec<PendingUpload>,
}

async fn read_chat_form(mut multipart: Multipart) -> Result<ChatForm, ApiError> {
    let mut form = ChatForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "message" => {
                form.message = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid message: {}", e)))?;
            }
            "threadId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid threadId: {}", e)))?;
                form.thread_id = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            "files" | "files[]" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let mime_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;

                debug!("Received upload {} ({} bytes)", file_name, data.len());
                form.uploads.push(PendingUpload {
                    file_name,
                    mime_type,
                    data,
                });
            }
            _ => {}
        }
    }

    Ok(form)
}

/// `data: <fragment>` per token, `data: [DONE]` on completion, `event: error` on failure
fn to_sse_event(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Token(fragment) => Event::default().data(fragment),
        RelayEvent::Done => Event::default().data(DONE_SENTINEL),
        RelayEvent::Failed(message) => Event::default().event("error").data(message),
    }
}

pub async fn chat_handler(
    State(manager): State<Arc<ConversationManager>>,
    UserId(user_id): UserId,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let form = read_chat_form(multipart).await?;

    info!(
        user_id = %user_id,
        thread_id = ?form.thread_id,
        message_len = form.message.len(),
        files = form.uploads.len(),
        "Chat request"
    );

    let relay = manager
        .send_message(&user_id, form.thread_id, form.message, form.uploads)
        .await?;

    let events = relay.map(|event| Ok::<_, Infallible>(to_sse_event(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

//! `POST /api/generate-with-template`.
//!
//! Non-streaming services answer with one JSON body. Streaming services answer
//! with server-sent events: one `message` event per fragment carrying
//! `{"content": ...}`, then a single `done` event with the token and point
//! totals. The upstream is driven by its own task, so a stream is billed
//! even when the client disconnects before `done`.

use super::{ApiState, extract::CurrentUser};
use crate::{
    core::generation::{self, GenerationRequest, PreparedGeneration},
    errors::Result,
    provider::{CompletionChunk, CompletionStream},
};
use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{Stream, StreamExt};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Events buffered between the upstream relay and the client.
const EVENT_BUFFER: usize = 32;

/// Renders the template, calls the service and bills the call.
pub async fn generate_with_template(
    State(state): State<ApiState>,
    CurrentUser(caller): CurrentUser,
    Json(request): Json<GenerationRequest>,
) -> Result<Response> {
    let prepared = generation::prepare_generation(&state.db, &caller, &request).await?;
    let tokens_per_point = state.config.billing.tokens_per_point;

    if !prepared.streaming {
        let result =
            generation::complete_generation(&state.db, &state.client, &prepared, tokens_per_point)
                .await?;
        return Ok(Json(result).into_response());
    }

    let upstream = state.client.stream(&prepared.target, &prepared.prompt).await?;
    let events = sse_events(state.db.clone(), prepared, upstream, tokens_per_point);
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn sse_events(
    db: DatabaseConnection,
    prepared: PreparedGeneration,
    upstream: CompletionStream,
    tokens_per_point: u64,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    let (events, mut received) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(relay_and_settle(db, prepared, upstream, tokens_per_point, events));

    async_stream::stream! {
        while let Some(event) = received.recv().await {
            yield Ok(event);
        }
    }
}

/// Forwards upstream fragments to `events` and bills the call once the
/// upstream finishes, whether or not the client is still listening.
async fn relay_and_settle(
    db: DatabaseConnection,
    prepared: PreparedGeneration,
    mut upstream: CompletionStream,
    tokens_per_point: u64,
    events: mpsc::Sender<Event>,
) {
    let mut response_length = 0;
    let mut usage = None;
    let mut client_gone = false;

    while let Some(chunk) = upstream.next().await {
        match chunk {
            CompletionChunk::Text(text) => {
                response_length += text.chars().count();
                if client_gone {
                    continue;
                }
                let event = Event::default()
                    .event("message")
                    .data(json!({ "content": text }).to_string());
                if events.send(event).await.is_err() {
                    tracing::info!(
                        "Client of '{}' disconnected mid-stream, finishing upstream for billing",
                        prepared.user.username
                    );
                    client_gone = true;
                }
            }
            CompletionChunk::Finished(reported) => {
                usage = reported;
                break;
            }
        }
    }

    let last = match generation::settle(&db, &prepared, usage, response_length, tokens_per_point).await {
        Ok(settlement) => {
            let done = json!({
                "tokens_consumed": usage.map_or(0, |u| u.total_tokens),
                "points_deducted": settlement.as_ref().map_or(0, |s| s.points_deducted),
                "balance": settlement.map_or(prepared.user.points, |s| s.balance_after),
            });
            Event::default().event("done").data(done.to_string())
        }
        Err(e) => {
            tracing::error!("Failed to bill streamed call for '{}': {}", prepared.user.username, e);
            Event::default()
                .event("error")
                .data(json!({ "error": e.public_message() }).to_string())
        }
    };

    if !client_gone {
        events.send(last).await.ok();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::sse_events;
    use crate::{
        api::test_support::*,
        core::{
            generation::{GenerationRequest, prepare_generation},
            prompts::{NewTemplate, create_template},
        },
        entities::{ai_service, user},
        provider::{CompletionChunk, CompletionStream, Usage},
        test_utils::*,
    };
    use futures_util::StreamExt;
    use std::time::Duration;
    use axum::{
        Json, Router,
        http::{Method, StatusCode, header},
        response::IntoResponse,
        routing::post,
    };
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};
    use serde_json::json;

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn template_id(state: &crate::api::ApiState) -> i64 {
        let admin = create_test_admin(&state.db, "boss").await.unwrap();
        create_template(
            &state.db,
            &admin,
            &NewTemplate {
                name: "Continue".to_string(),
                template_string: "Continue: @[前文]".to_string(),
                is_default: false,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_json_generation_bills_points() {
        let base = spawn_upstream(Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(json!({
                    "choices": [{"message": {"content": "and then"}}],
                    "usage": {"prompt_tokens": 150, "completion_tokens": 100, "total_tokens": 250}
                }))
            }),
        ))
        .await;

        let state = test_state().await;
        let tid = template_id(&state).await;
        let writer = create_test_user_with_points(&state.db, "writer", 10).await.unwrap();
        let service = create_test_service(&state.db, None, &base).await.unwrap();

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/generate-with-template",
            Some(writer.id),
            Some(json!({
                "template_id": tid,
                "input_data": {"前文": "Once"},
                "ai_service_config_id": service.id
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generated_text"], "and then");
        assert_eq!(body["points_deducted"], 2);
        assert_eq!(body["balance"], 8);
    }

    #[tokio::test]
    async fn test_streaming_generation_emits_events_then_bills() {
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":200,\"completion_tokens\":100,\"total_tokens\":300}}\n\n",
            "data: [DONE]\n\n",
        );
        let base = spawn_upstream(Router::new().route(
            "/v1/chat/completions",
            post(move || async move {
                ([(header::CONTENT_TYPE, "text/event-stream")], sse_body).into_response()
            }),
        ))
        .await;

        let state = test_state().await;
        let tid = template_id(&state).await;
        let writer = create_test_user_with_points(&state.db, "writer", 10).await.unwrap();
        let service = create_test_service(&state.db, None, &base).await.unwrap();
        let mut active: ai_service::ActiveModel = service.clone().into();
        active.enable_streaming = Set(true);
        active.update(&state.db).await.unwrap();

        let (status, text) = call_raw(
            &state,
            Method::POST,
            "/api/generate-with-template",
            Some(writer.id),
            Some(json!({"template_id": tid, "input_data": {}, "ai_service_config_id": service.id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("event: message"));
        assert!(text.contains("\"content\":\"Hel\""));
        assert!(text.contains("event: done"));
        assert!(text.contains("\"points_deducted\":3"));

        let reloaded = user::Entity::find_by_id(writer.id).one(&state.db).await.unwrap().unwrap();
        assert_eq!(reloaded.points, 7);
    }

    #[tokio::test]
    async fn test_zero_balance_is_payment_required() {
        let state = test_state().await;
        let tid = template_id(&state).await;
        let broke = create_test_user(&state.db, "broke").await.unwrap();
        let service = create_test_service(&state.db, None, "http://127.0.0.1:9").await.unwrap();

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/generate-with-template",
            Some(broke.id),
            Some(json!({"template_id": tid, "input_data": {}, "ai_service_config_id": service.id})),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert!(body["error"].as_str().unwrap().contains("Insufficient"));
    }

    #[tokio::test]
    async fn test_stream_dropped_after_first_event_is_still_billed() {
        let state = test_state().await;
        let tid = template_id(&state).await;
        let writer = create_test_user_with_points(&state.db, "writer", 10).await.unwrap();
        let service = create_test_service(&state.db, None, "http://127.0.0.1:9").await.unwrap();
        let request = GenerationRequest {
            template_id: tid,
            input_data: serde_json::Map::new(),
            ai_service_config_id: Some(service.id),
        };
        let prepared = prepare_generation(&state.db, &writer, &request).await.unwrap();

        let upstream: CompletionStream = Box::pin(futures_util::stream::iter(vec![
            CompletionChunk::Text("first".to_string()),
            CompletionChunk::Text("second".to_string()),
            CompletionChunk::Finished(Some(Usage::new(500, 500, None))),
        ]));
        let mut events = Box::pin(sse_events(state.db.clone(), prepared, upstream, 100));
        assert!(events.next().await.is_some());
        drop(events);

        let mut balance = writer.points;
        for _ in 0..100 {
            balance = user::Entity::find_by_id(writer.id)
                .one(&state.db)
                .await
                .unwrap()
                .unwrap()
                .points;
            if balance != writer.points {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(balance, 0);
    }
}

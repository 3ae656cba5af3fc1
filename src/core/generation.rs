//! Template-driven generation: build the prompt, call the service, bill it.

use crate::{
    core::{
        ai_services,
        billing::{self, CallSizes, Settlement},
        prompts,
        template::{self, SETTINGS_KEY},
    },
    entities::{ai_service, user},
    errors::Result,
    provider::{AiClient, ServiceTarget, Usage},
};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a generation request.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    /// Template to render
    pub template_id: i64,
    /// Placeholder values
    #[serde(default, alias = "input")]
    pub input_data: Map<String, Value>,
    /// Service to call; falls back to the active or default service
    #[serde(default, alias = "service_id")]
    pub ai_service_config_id: Option<i64>,
}

/// A validated request, ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct PreparedGeneration {
    /// Caller
    pub user: user::Model,
    /// Service row, kept for billing
    pub service: ai_service::Model,
    /// Connection details for the service
    pub target: ServiceTarget,
    /// Fully rendered prompt
    pub prompt: String,
    /// Whether the service streams its answer
    pub streaming: bool,
}

/// Non-streaming outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    /// Generated text
    pub generated_text: String,
    /// Tokens reported by the service
    pub tokens_consumed: u64,
    /// Points deducted for this call
    pub points_deducted: i64,
    /// Balance after billing
    pub balance: i64,
}

/// Checks access and balance, then renders the prompt.
///
/// Nothing is written to the database.
pub async fn prepare_generation<C>(
    db: &C,
    caller: &user::Model,
    request: &GenerationRequest,
) -> Result<PreparedGeneration>
where
    C: ConnectionTrait,
{
    let prompt_template = prompts::get_visible(db, caller, request.template_id).await?;
    let service = ai_services::resolve_for_user(db, caller, request.ai_service_config_id).await?;
    billing::ensure_can_generate(caller)?;
    let target = ServiceTarget::from_model(&service)?;

    let mut data = request.input_data.clone();
    let settings = data.get(SETTINGS_KEY).map_or_else(String::new, template::format_enabled_settings);
    data.insert(SETTINGS_KEY.to_string(), Value::String(settings));

    let prompt = template::render(&prompt_template.template_string, &data);
    tracing::info!(
        "User '{}' generating with template '{}' on service '{}' ({} prompt chars)",
        caller.username,
        prompt_template.name,
        service.name,
        prompt.chars().count()
    );

    Ok(PreparedGeneration {
        user: caller.clone(),
        streaming: service.enable_streaming,
        service,
        target,
        prompt,
    })
}

/// Bills a finished call of either mode.
pub async fn settle(
    db: &DatabaseConnection,
    prepared: &PreparedGeneration,
    usage: Option<Usage>,
    response_length: usize,
    tokens_per_point: u64,
) -> Result<Option<Settlement>> {
    let sizes = CallSizes {
        prompt_length: prepared.prompt.chars().count(),
        response_length,
    };
    billing::settle_call(
        db,
        &prepared.user,
        &prepared.service,
        usage,
        sizes,
        tokens_per_point,
    )
    .await
}

/// Runs a prepared request as one upstream call and bills it.
pub async fn complete_generation(
    db: &DatabaseConnection,
    client: &AiClient,
    prepared: &PreparedGeneration,
    tokens_per_point: u64,
) -> Result<GenerationResult> {
    let completion = client.complete(&prepared.target, &prepared.prompt).await?;
    let settlement = settle(
        db,
        prepared,
        completion.usage,
        completion.text.chars().count(),
        tokens_per_point,
    )
    .await?;

    Ok(GenerationResult {
        tokens_consumed: completion.usage.map_or(0, |u| u.total_tokens),
        points_deducted: settlement.as_ref().map_or(0, |s| s.points_deducted),
        balance: settlement.map_or(prepared.user.points, |s| s.balance_after),
        generated_text: completion.text,
    })
}

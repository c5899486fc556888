//! Request pipeline: bearer extraction -> field checks -> identity -> entitlement ->
//! prompt composition -> completion -> JSON validation.
//!
//! Each stage hands its output to the next and the first failure ends the request. Header
//! extraction and field checks are pure, so a malformed request is rejected before the
//! identity oracle, the ledger or the backend is touched.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use crate::completion::{validate_completion, ChatCompletionsClient, CompletionBackend, CompletionRequest};
use crate::config::{ConfigError, GatewayConfig};
use crate::entitlement::{check_entitlement, EntitledPrincipal, EntitlementStore, SledEntitlementStore};
use crate::error::GatewayError;
use crate::principal::{extract_bearer, BearerToken, IdentityOracle, JwtIdentityOracle};
use crate::prompt::{compose, FsTemplateStore, Operation, TemplateStore, UserContent};

pub const IMAGE_QUESTION: &str = "What’s in this image?";
pub const VISION_MAX_TOKENS: u32 = 300;
pub const TEXT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngredientsRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecipesListQuery {
    pub ingredients: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecipeDetailsQuery {
    pub ingredients: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
}

/// First occurrence of each key in a raw query string. Later repeats are ignored; a value that
/// does not percent-decode to UTF-8 counts as absent.
fn first_values(raw: Option<&str>) -> HashMap<String, Option<String>> {
    let mut values = HashMap::new();
    for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let Some(key) = decode_component(key) else {
            continue;
        };
        values.entry(key).or_insert_with(|| decode_component(value));
    }
    values
}

fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|v| v.into_owned())
}

impl RecipesListQuery {
    pub fn from_query(raw: Option<&str>) -> Self {
        let mut values = first_values(raw);
        Self {
            ingredients: values.remove("ingredients").flatten(),
        }
    }
}

impl RecipeDetailsQuery {
    pub fn from_query(raw: Option<&str>) -> Self {
        let mut values = first_values(raw);
        Self {
            ingredients: values.remove("ingredients").flatten(),
            title: values.remove("title").flatten(),
            category: values.remove("category").flatten(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelProfiles {
    pub text_model: String,
    pub vision_model: String,
}

/// Long-lived collaborator handles, built once at startup and shared read-only.
pub struct GatewayContext {
    identity: Arc<dyn IdentityOracle>,
    entitlements: Arc<dyn EntitlementStore>,
    templates: Arc<dyn TemplateStore>,
    completions: Arc<dyn CompletionBackend>,
    models: ModelProfiles,
}

fn require_field<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, GatewayError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(GatewayError::InvalidInput { field })
}

fn require_base64<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, GatewayError> {
    let value = require_field(value, field)?.trim();
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|_| GatewayError::InvalidInput { field })?;
    Ok(value)
}

impl GatewayContext {
    pub fn new(
        identity: Arc<dyn IdentityOracle>,
        entitlements: Arc<dyn EntitlementStore>,
        templates: Arc<dyn TemplateStore>,
        completions: Arc<dyn CompletionBackend>,
        models: ModelProfiles,
    ) -> Self {
        Self {
            identity,
            entitlements,
            templates,
            completions,
            models,
        }
    }

    /// Wire the default collaborators: JWT oracle, sled ledger, template directory, reqwest client.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self, ConfigError> {
        let identity = JwtIdentityOracle::new(
            &cfg.auth.verification_key()?,
            cfg.auth.issuer()?,
            cfg.auth.audience.as_deref(),
        )?;
        let entitlements = SledEntitlementStore::open(&cfg.entitlement_db)?;
        let templates = FsTemplateStore::new(&cfg.template_dir);
        let templates = if cfg.template_cache {
            templates.with_cache()
        } else {
            templates
        };
        let completions = ChatCompletionsClient::with_base_url(cfg.api_key()?, &cfg.completion_base_url);

        Ok(Self::new(
            Arc::new(identity),
            Arc::new(entitlements),
            Arc::new(templates),
            Arc::new(completions),
            ModelProfiles {
                text_model: cfg.text_model.clone(),
                vision_model: cfg.vision_model.clone(),
            },
        ))
    }

    fn profile(&self, operation: Operation) -> (&str, u32) {
        match operation {
            Operation::IdentifyIngredients => (self.models.vision_model.as_str(), VISION_MAX_TOKENS),
            Operation::ListRecipes | Operation::RecipeDetails => {
                (self.models.text_model.as_str(), TEXT_MAX_TOKENS)
            }
        }
    }

    async fn entitle(&self, token: BearerToken<'_>) -> Result<EntitledPrincipal, GatewayError> {
        let principal = self.identity.verify(token).await?;
        check_entitlement(self.entitlements.as_ref(), principal).await
    }

    async fn run(
        &self,
        caller: &EntitledPrincipal,
        operation: Operation,
        content: UserContent,
    ) -> Result<Value, GatewayError> {
        let prompt = compose(self.templates.as_ref(), operation, content).await?;
        let (model, max_tokens) = self.profile(operation);
        let request = CompletionRequest::new(model, prompt, max_tokens).ok_or_else(|| {
            GatewayError::Configuration(format!("{:?} has a zero token budget", operation))
        })?;

        tracing::info!(
            uid = %caller.uid(),
            template = operation.template_id(),
            "[PANTRY SYSTEM] forwarding prompt to completion backend"
        );
        let raw = self.completions.complete(&request).await?;
        validate_completion(&raw)
    }

    /// POST /getIngredients
    pub async fn identify_ingredients(
        &self,
        authorization: Option<&str>,
        request: &IngredientsRequest,
    ) -> Result<Value, GatewayError> {
        let token = extract_bearer(authorization)?;
        let image = require_base64(request.image.as_deref(), "image")?;
        let caller = self.entitle(token).await?;

        let content = UserContent::Image {
            question: IMAGE_QUESTION.to_string(),
            base64: image.to_string(),
        };
        self.run(&caller, Operation::IdentifyIngredients, content).await
    }

    /// GET /getRecipesList
    pub async fn list_recipes(
        &self,
        authorization: Option<&str>,
        query: &RecipesListQuery,
    ) -> Result<Value, GatewayError> {
        let token = extract_bearer(authorization)?;
        let ingredients = require_field(query.ingredients.as_deref(), "ingredients")?;
        let caller = self.entitle(token).await?;

        self.run(&caller, Operation::ListRecipes, UserContent::Text(ingredients.to_string()))
            .await
    }

    /// GET /getRecipeDetails
    pub async fn recipe_details(
        &self,
        authorization: Option<&str>,
        query: &RecipeDetailsQuery,
    ) -> Result<Value, GatewayError> {
        let token = extract_bearer(authorization)?;
        let ingredients = require_field(query.ingredients.as_deref(), "ingredients")?;
        let title = require_field(query.title.as_deref(), "title")?;
        let category = require_field(query.category.as_deref(), "category")?;
        let caller = self.entitle(token).await?;

        let text = format!(
            "title: {}, ingredients: {}, category: {}",
            title, ingredients, category
        );
        self.run(&caller, Operation::RecipeDetails, UserContent::Text(text))
            .await
    }

    /// GET /test: identity and entitlement only.
    pub async fn probe(&self, authorization: Option<&str>) -> Result<EntitledPrincipal, GatewayError> {
        let token = extract_bearer(authorization)?;
        self.entitle(token).await
    }
}

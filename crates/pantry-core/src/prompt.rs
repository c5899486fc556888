//! Prompt composition: fixed per-operation instructions + caller content.
//!
//! A [`CompositePrompt`] always holds exactly one system message followed by exactly one
//! non-empty user message; the constructor is the only way to build one.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::GatewayError;

/// Closed set of completion-backed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    IdentifyIngredients,
    ListRecipes,
    RecipeDetails,
}

impl Operation {
    /// Template identifier; also the file stem in the template directory.
    pub const fn template_id(self) -> &'static str {
        match self {
            Operation::IdentifyIngredients => "getIngredients",
            Operation::ListRecipes => "getRecipesList",
            Operation::RecipeDetails => "getRecipeDetails",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One typed piece of message content, in chat-completions wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Wraps base64 JPEG bytes into a data URI image reference.
    pub fn jpeg_base64(payload: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/jpeg;base64,{}", payload),
            },
        }
    }
}

/// What the caller contributes to the user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserContent {
    Text(String),
    /// A question about an image, sent as a text part followed by an image part.
    Image { question: String, base64: String },
}

impl UserContent {
    fn into_parts(self) -> Vec<ContentPart> {
        match self {
            UserContent::Text(text) => vec![ContentPart::text(text)],
            UserContent::Image { question, base64 } => {
                vec![ContentPart::text(question), ContentPart::jpeg_base64(&base64)]
            }
        }
    }
}

/// Borrowed view of one message, in chat-completions wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum PromptMessage<'a> {
    System { content: &'a str },
    User { content: &'a [ContentPart] },
}

/// System instructions followed by one user message; serializes as the `messages` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePrompt {
    instructions: String,
    user: Vec<ContentPart>,
}

impl CompositePrompt {
    pub fn new(instructions: impl Into<String>, user: UserContent) -> Self {
        Self {
            instructions: instructions.into(),
            user: user.into_parts(),
        }
    }

    pub fn messages(&self) -> [PromptMessage<'_>; 2] {
        [
            PromptMessage::System {
                content: &self.instructions,
            },
            PromptMessage::User { content: &self.user },
        ]
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn user_parts(&self) -> &[ContentPart] {
        &self.user
    }
}

impl Serialize for CompositePrompt {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.messages().serialize(serializer)
    }
}

/// Key -> text lookup for instruction templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// `Ok(None)` when no template exists for `template_id`.
    async fn load(&self, template_id: &str) -> std::io::Result<Option<Arc<str>>>;
}

/// One `{template_id}.txt` file per operation under a directory.
pub struct FsTemplateStore {
    dir: PathBuf,
    cache: Option<DashMap<String, Arc<str>>>,
}

impl FsTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: None,
        }
    }

    /// Keep loaded templates for the rest of the process lifetime.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(DashMap::new());
        self
    }
}

#[async_trait]
impl TemplateStore for FsTemplateStore {
    async fn load(&self, template_id: &str) -> std::io::Result<Option<Arc<str>>> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(template_id)) {
            return Ok(Some(Arc::clone(hit.value())));
        }

        let path = self.dir.join(format!("{}.txt", template_id));
        let text: Arc<str> = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text.into(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Some(cache) = &self.cache {
            cache.insert(template_id.to_string(), Arc::clone(&text));
        }
        Ok(Some(text))
    }
}

/// Loads the operation's template and wraps the caller content around it.
pub async fn compose(
    templates: &dyn TemplateStore,
    operation: Operation,
    user: UserContent,
) -> Result<CompositePrompt, GatewayError> {
    let id = operation.template_id();
    let template = templates
        .load(id)
        .await
        .map_err(|e| GatewayError::Configuration(format!("template {}: {}", id, e)))?
        .ok_or_else(|| GatewayError::Configuration(format!("template {} is missing", id)))?;

    if template.trim().is_empty() {
        return Err(GatewayError::Configuration(format!("template {} is empty", id)));
    }

    Ok(CompositePrompt::new(&*template, user))
}

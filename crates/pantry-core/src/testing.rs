//! In-memory collaborators that count their calls, for pipeline and HTTP tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Map;

use crate::completion::{CompletionBackend, CompletionRequest};
use crate::entitlement::{EntitlementStore, StoreError};
use crate::error::{CredentialFault, GatewayError};
use crate::gateway::{GatewayContext, ModelProfiles};
use crate::principal::{BearerToken, IdentityOracle, Principal};
use crate::prompt::{Operation, TemplateStore};

pub const GOOD_TOKEN: &str = "good-token";
pub const GOOD_UID: &str = "cook-1";

/// Accepts exactly [`GOOD_TOKEN`] as [`GOOD_UID`], or fails every call as unreachable.
#[derive(Default)]
pub struct StaticOracle {
    unreachable: bool,
    calls: AtomicUsize,
}

impl StaticOracle {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityOracle for StaticOracle {
    async fn verify(&self, token: BearerToken<'_>) -> Result<Principal, CredentialFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(CredentialFault::OracleUnavailable(
                "connect to issuer: connection refused".into(),
            ));
        }
        if token.as_str() == GOOD_TOKEN {
            Ok(Principal {
                uid: GOOD_UID.to_string(),
                claims: Map::new(),
            })
        } else {
            Err(CredentialFault::Invalid("unknown token".into()))
        }
    }
}

/// Reports a fixed number of active records for every principal, or fails when `None`.
pub struct FixedLedger {
    active: Option<usize>,
    calls: AtomicUsize,
}

impl FixedLedger {
    pub fn new(active: Option<usize>) -> Self {
        Self {
            active,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementStore for FixedLedger {
    async fn count_active(&self, _uid: &str) -> Result<usize, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.active
            .ok_or_else(|| StoreError::Unavailable("ledger offline".into()))
    }
}

/// Templates whose text is `template:{template_id}`.
pub struct MemoryTemplates {
    texts: HashMap<String, Arc<str>>,
    loads: AtomicUsize,
}

impl MemoryTemplates {
    pub fn all() -> Self {
        let texts: HashMap<String, Arc<str>> = [
            Operation::IdentifyIngredients,
            Operation::ListRecipes,
            Operation::RecipeDetails,
        ]
        .into_iter()
        .map(|op| {
            let id = op.template_id();
            (id.to_string(), Arc::from(format!("template:{}", id)))
        })
        .collect();
        Self {
            texts,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            texts: HashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplates {
    async fn load(&self, template_id: &str) -> std::io::Result<Option<Arc<str>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.texts.get(template_id).cloned())
    }
}

/// Records every request and answers with a canned completion, or fails when `None`.
pub struct RecordingBackend {
    reply: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl RecordingBackend {
    pub fn new(reply: Option<&str>) -> Self {
        Self {
            reply: reply.map(str::to_string),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for RecordingBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        self.reply
            .clone()
            .ok_or_else(|| GatewayError::dependency("completion backend", "503: overloaded"))
    }
}

/// A context wired to fakes, with handles kept for assertions.
pub struct Harness {
    pub ctx: Arc<GatewayContext>,
    pub oracle: Arc<StaticOracle>,
    pub ledger: Arc<FixedLedger>,
    pub templates: Arc<MemoryTemplates>,
    pub backend: Arc<RecordingBackend>,
}

impl Harness {
    pub fn build(active: Option<usize>, templates: MemoryTemplates, reply: Option<&str>) -> Self {
        Self::build_with_oracle(StaticOracle::default(), active, templates, reply)
    }

    fn build_with_oracle(
        oracle: StaticOracle,
        active: Option<usize>,
        templates: MemoryTemplates,
        reply: Option<&str>,
    ) -> Self {
        let oracle = Arc::new(oracle);
        let ledger = Arc::new(FixedLedger::new(active));
        let templates = Arc::new(templates);
        let backend = Arc::new(RecordingBackend::new(reply));
        let ctx = GatewayContext::new(
            oracle.clone(),
            ledger.clone(),
            templates.clone(),
            backend.clone(),
            ModelProfiles {
                text_model: "text-model".into(),
                vision_model: "vision-model".into(),
            },
        );
        Self {
            ctx: Arc::new(ctx),
            oracle,
            ledger,
            templates,
            backend,
        }
    }

    pub fn entitled(reply: &str) -> Self {
        Self::with_active_records(1, reply)
    }

    pub fn with_active_records(active: usize, reply: &str) -> Self {
        Self::build(Some(active), MemoryTemplates::all(), Some(reply))
    }

    pub fn ledger_down() -> Self {
        Self::build(None, MemoryTemplates::all(), Some("{}"))
    }

    pub fn backend_down() -> Self {
        Self::build(Some(1), MemoryTemplates::all(), None)
    }

    pub fn oracle_down(reply: &str) -> Self {
        Self::build_with_oracle(
            StaticOracle::unreachable(),
            Some(1),
            MemoryTemplates::all(),
            Some(reply),
        )
    }

    pub fn without_templates(reply: &str) -> Self {
        Self::build(Some(1), MemoryTemplates::empty(), Some(reply))
    }

    pub fn bearer() -> String {
        format!("Bearer {}", GOOD_TOKEN)
    }
}

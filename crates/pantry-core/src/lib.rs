//! Pantry gateway core.
//! Authenticated, entitlement-gated prompt pipeline in front of a chat-completions backend.

pub mod completion;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod gateway;
pub mod principal;
pub mod prompt;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use completion::{validate_completion, ChatCompletionsClient, CompletionBackend, CompletionRequest};
pub use config::{ConfigError, GatewayConfig, DEFAULT_MAX_IMAGE_BYTES};
pub use entitlement::{check_entitlement, EntitledPrincipal, EntitlementStore, SledEntitlementStore, StoreError};
pub use error::{CredentialFault, GatewayError};
pub use gateway::{
    GatewayContext, IngredientsRequest, ModelProfiles, RecipeDetailsQuery, RecipesListQuery,
};
pub use principal::{extract_bearer, BearerToken, IdentityOracle, JwtIdentityOracle, Principal, VerificationKey};
pub use prompt::{compose, CompositePrompt, ContentPart, FsTemplateStore, Operation, TemplateStore, UserContent};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

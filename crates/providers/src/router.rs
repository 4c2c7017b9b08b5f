//! Backend selection from configuration.

use std::sync::Arc;

use oi_config::{ApiKind, ResolvedModel};
use oi_core::{Backend, Error};
use tracing::debug;

use crate::ollama::OllamaBackend;
use crate::openai_compat::OpenAiCompatBackend;

/// Build the backend serving `resolved`.
///
/// An API that names a key variable must have it set; endpoints without
/// `api_key_env` may run unauthenticated.
pub fn backend_for(resolved: &ResolvedModel) -> Result<Arc<dyn Backend>, Error> {
    let api = &resolved.api;
    debug!(api = %resolved.api_name, kind = ?api.kind, base_url = %api.base_url, "Building backend");

    let backend: Arc<dyn Backend> = match api.kind {
        ApiKind::Ollama => Arc::new(OllamaBackend::new(&resolved.api_name, &api.base_url)?),
        ApiKind::OpenAi => {
            let api_key = api.resolve_api_key();
            if api_key.is_none()
                && let Some(var) = &api.api_key_env
            {
                return Err(Error::Config {
                    message: format!(
                        "API {:?} needs a key: set ${var} or api_key in the config",
                        resolved.api_name
                    ),
                });
            }
            Arc::new(OpenAiCompatBackend::new(&resolved.api_name, &api.base_url, api_key)?)
        }
    };
    Ok(backend)
}

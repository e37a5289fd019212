//! Application state wiring the engine to its infrastructure.
//!
//! AppState holds the concrete service instances the commands share: the
//! session service over an OpenAI-compatible provider and the configured
//! template source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use parley_core::action::ActionServices;
use parley_core::execution::ScriptExecutor;
use parley_core::session::SessionService;
use parley_core::template::{InMemoryTemplateSource, TemplateResolver};
use parley_infra::config::{load_global_config, resolve_data_dir, resolve_template_root};
use parley_infra::llm::{api_key_from_env, build_generation_service};
use parley_infra::template_fs::FsTemplateSource;
use parley_types::config::GlobalConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub session_service: Arc<SessionService>,
    pub config: GlobalConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load config and wire services.
    ///
    /// `data_dir` overrides `PARLEY_DATA_DIR` / `~/.parley`.
    pub async fn init(data_dir: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = data_dir.map(Path::to_path_buf).unwrap_or_else(resolve_data_dir);
        let config = load_global_config(&data_dir).await;

        let api_key = api_key_from_env(&config.provider);
        let generation = build_generation_service(&config, api_key).with_context(|| {
            format!(
                "cannot create provider '{}': set the {} environment variable",
                config.provider.name, config.provider.api_key_env
            )
        })?;

        let templates = match resolve_template_root(&config, &data_dir) {
            Some(root) => {
                tracing::info!(root = %root.display(), "using filesystem templates");
                TemplateResolver::new(FsTemplateSource::new(root))
            }
            None => {
                tracing::debug!("using built-in templates");
                TemplateResolver::new(InMemoryTemplateSource::builtin())
            }
        };

        let services = ActionServices::new(Arc::new(generation), Arc::new(templates));
        let session_service = SessionService::new(ScriptExecutor::from_services(services));

        tracing::debug!(
            data_dir = %data_dir.display(),
            provider = %config.provider.name,
            model = %config.provider.model,
            "application state initialized"
        );

        Ok(Self {
            session_service: Arc::new(session_service),
            config,
            data_dir,
        })
    }
}

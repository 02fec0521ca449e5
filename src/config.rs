use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{builder::RangedU64ValueParser, Args, Parser, ValueEnum};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    mcp::Peer,
    pattern::{FsResolver, PatternEngine, ResourceResolver, DEFAULT_MAX_CONCURRENCY},
    providers::{openai::OpenAI, scripted::ScriptedProvider, LLMProvider},
    sampling::{ClientSamplingBackend, ProviderBackend, SamplingBackend},
    LLMError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Ask the connected MCP client to sample (`sampling/createMessage`)
    Client,
    /// Call an OpenAI-compatible chat completions API
    Openai,
    /// Replay canned responses from `--scripted-responses`
    Scripted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Stdio,
    Http,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the client sampling backend needs a bidirectional transport (stdio)")]
    ClientBackendUnavailable,
    #[error(transparent)]
    Provider(#[from] LLMError),
    #[error("failed to read scripted responses from {path}: {source}")]
    ScriptedRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scripted responses must be a JSON array of strings: {0}")]
    ScriptedParse(#[from] serde_json::Error),
}

/// Sampling and resolution settings shared by every binary.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Model requested from the openai backend
    #[arg(long, env = "DIALECTIC_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Most sampling calls in flight at once within one run
    #[arg(
        long,
        env = "DIALECTIC_MAX_CONCURRENCY",
        default_value_t = DEFAULT_MAX_CONCURRENCY,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub max_concurrency: usize,

    /// Deadline for a single sampling call, in milliseconds
    #[arg(long, env = "DIALECTIC_SAMPLE_TIMEOUT_MS", default_value_t = 60_000)]
    pub sample_timeout_ms: u64,

    /// Directory relative prompt and reminder paths are read from
    #[arg(long, env = "DIALECTIC_PROMPT_ROOT")]
    pub prompt_root: Option<PathBuf>,

    /// JSON array of strings replayed by the scripted backend
    #[arg(long, env = "DIALECTIC_SCRIPTED_RESPONSES")]
    pub scripted_responses: Option<PathBuf>,
}

impl EngineArgs {
    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    /// `peer` is the client connection, when the transport has one.
    pub fn build_backend(
        &self,
        kind: BackendKind,
        peer: Option<Peer>,
    ) -> Result<Arc<dyn SamplingBackend>, ConfigError> {
        let backend: Arc<dyn SamplingBackend> = match kind {
            BackendKind::Client => {
                let peer = peer.ok_or(ConfigError::ClientBackendUnavailable)?;
                Arc::new(ClientSamplingBackend::new(peer).with_timeout(self.sample_timeout()))
            }
            BackendKind::Openai => {
                let provider: Arc<dyn LLMProvider> = Arc::new(OpenAI::from_env()?);
                Arc::new(ProviderBackend::new(provider, self.model.clone()).with_timeout(self.sample_timeout()))
            }
            BackendKind::Scripted => {
                let provider: Arc<dyn LLMProvider> = Arc::new(self.scripted_provider()?);
                Arc::new(ProviderBackend::new(provider, "scripted").with_timeout(self.sample_timeout()))
            }
        };
        Ok(backend)
    }

    pub fn build_resolver(&self) -> Arc<dyn ResourceResolver> {
        match &self.prompt_root {
            Some(root) => Arc::new(FsResolver::with_root(root.clone())),
            None => Arc::new(FsResolver::new()),
        }
    }

    pub fn build_engine(&self, backend: Arc<dyn SamplingBackend>) -> PatternEngine {
        PatternEngine::new(backend, self.build_resolver()).with_max_concurrency(self.max_concurrency)
    }

    fn scripted_provider(&self) -> Result<ScriptedProvider, ConfigError> {
        let Some(path) = &self.scripted_responses else {
            return Ok(ScriptedProvider::new());
        };
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ScriptedRead {
            path: path.clone(),
            source,
        })?;
        let texts: Vec<String> = serde_json::from_str(&raw)?;
        Ok(ScriptedProvider::from_texts(texts))
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "dialectic")]
#[command(about = "MCP server for testing collaboration patterns", version)]
pub struct ServerArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Where samples come from
    #[arg(long, value_enum, env = "DIALECTIC_BACKEND", default_value = "client")]
    pub backend: BackendKind,

    /// How the server talks to its client
    #[arg(long, value_enum, env = "DIALECTIC_TRANSPORT", default_value = "stdio")]
    pub transport: TransportKind,

    /// Port for the http transport
    #[arg(long, env = "DIALECTIC_PORT", default_value_t = 3002)]
    pub port: u16,
}

/// Logs go to stderr; stdout belongs to the protocol.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(args: &[&str]) -> ServerArgs {
        ServerArgs::try_parse_from(std::iter::once("dialectic").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_to_client_sampling_over_stdio() {
        let args = parse(&[]);
        assert_eq!(args.backend, BackendKind::Client);
        assert_eq!(args.transport, TransportKind::Stdio);
        assert_eq!(args.engine.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(args.engine.sample_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let result = ServerArgs::try_parse_from(["dialectic", "--max-concurrency", "0"]);
        assert!(result.is_err());

        let args = parse(&["--max-concurrency", "2"]);
        assert_eq!(args.engine.max_concurrency, 2);
    }

    #[test]
    fn client_backend_needs_a_peer() {
        let args = parse(&["--backend", "client", "--transport", "http"]);
        let error = args.engine.build_backend(args.backend, None).err().unwrap();
        assert!(matches!(error, ConfigError::ClientBackendUnavailable));
        assert!(args
            .engine
            .build_backend(args.backend, Some(Peer::disconnected()))
            .is_ok());
    }

    #[test]
    fn scripted_backend_loads_responses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["one", "two"]"#).unwrap();

        let args = parse(&[
            "--backend",
            "scripted",
            "--scripted-responses",
            file.path().to_str().unwrap(),
        ]);
        let provider = args.engine.scripted_provider().unwrap();
        assert_eq!(provider.remaining(), 2);

        let backend = args.engine.build_backend(args.backend, None).unwrap();
        assert_eq!(backend.name(), "scripted");
    }

    #[test]
    fn scripted_responses_must_be_strings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"not": "an array"}}"#).unwrap();

        let args = parse(&[
            "--backend",
            "scripted",
            "--scripted-responses",
            file.path().to_str().unwrap(),
        ]);
        assert!(matches!(
            args.engine.build_backend(args.backend, None).err().unwrap(),
            ConfigError::ScriptedParse(_)
        ));
    }
}

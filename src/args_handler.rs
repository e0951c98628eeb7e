use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use hf_hub::api::sync::ApiBuilder;
use llama_cpp_2::model::params::kv_overrides::ParamOverrideValue;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::llm::GenerationParams;
use super::relay::RelayConfig;

#[derive(Subcommand, Debug, Clone)]
pub enum Model {
    /// Use an already downloaded model
    #[clap(name = "local")]
    Local {
        /// The path to the model. e.g. `./llama-3.2-1b-instruct-q8_0.gguf`
        path: PathBuf,
    },
    /// Download a model from huggingface (or use a cached version)
    #[clap(name = "hf-model")]
    HuggingFace {
        /// the repo containing the model. e.g. `bartowski/Llama-3.2-1B-Instruct-GGUF`
        repo: String,
        /// the model name. e.g. `Llama-3.2-1B-Instruct-Q4_K_M.gguf`
        model: String,
    },
}

impl Model {
    /// Convert the model to a path - may download from huggingface
    pub fn get_or_load(self) -> anyhow::Result<PathBuf> {
        match self {
            Model::Local { path } => Ok(path),
            Model::HuggingFace { model, repo } => ApiBuilder::new()
                .with_progress(true)
                .build()
                .with_context(|| "unable to create huggingface api")?
                .model(repo)
                .get(&model)
                .with_context(|| "unable to download model"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kelsie", version, about = "A small conversational assistant")]
pub struct Args {
    /// log progress and recoveries to stderr (RUST_LOG takes precedence)
    #[clap(short = 'v', long, action, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Chat with a local model in the terminal
    Chat(ChatArgs),
    /// Relay `POST /chat` requests to a hosted completion API
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ChatArgs {
    /// The path to the model
    #[command(subcommand)]
    pub model: Model,

    /// maximum number of tokens generated per reply
    #[clap(long, default_value_t = 80)]
    pub max_new_tokens: i32,

    /// longer prompts are trimmed from the start to this many tokens
    #[clap(long, default_value_t = 800)]
    pub max_prompt_tokens: usize,

    #[clap(long, default_value_t = 0.7)]
    pub temperature: f32,

    #[clap(long, default_value_t = 50)]
    pub top_k: i32,

    #[clap(long, default_value_t = 0.9)]
    pub top_p: f32,

    #[clap(long, default_value_t = 1.2)]
    pub repeat_penalty: f32,

    /// stop a reply once it repeats an n-gram of this size (0 disables)
    #[clap(long, default_value_t = 3)]
    pub no_repeat_ngram: usize,

    /// give up on a reply after this many seconds
    #[clap(long, default_value_t = 60)]
    pub generation_timeout: u64,

    /// override some parameters of the model
    #[clap(short = 'o', value_parser = parse_key_val)]
    pub key_value_overrides: Vec<(String, ParamOverrideValue)>,

    /// how many layers to keep on the gpu - zero is cpu mode
    #[clap(short = 'g', long, default_value_t = 0)]
    pub n_gpu_layers: u32,

    /// set the seed for the RNG
    #[clap(short = 's', long, default_value_t = 561371)]
    pub seed: u32,

    /// number of threads to use during generation
    #[clap(
        long,
        help = "number of threads to use during generation (default: use all available threads)"
    )]
    pub threads: Option<i32>,
    #[clap(
        long,
        help = "number of threads to use during batch and prompt processing (default: use all available threads)"
    )]
    pub threads_batch: Option<i32>,

    /// size of the prompt context
    #[clap(short = 'c', long, help = "size of the prompt context (default: 2048)")]
    pub ctx_size: Option<NonZeroU32>,

    /// answer factual questions from the model alone
    #[clap(long, action)]
    pub no_search: bool,

    #[clap(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Google programmable search engine id
    #[clap(long, env = "GOOGLE_CSE_ID")]
    pub google_cse_id: Option<String>,
}

impl ChatArgs {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            max_prompt_tokens: self.max_prompt_tokens,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            repeat_penalty: self.repeat_penalty,
            no_repeat_ngram: self.no_repeat_ngram,
            seed: self.seed,
            timeout: Duration::from_secs(self.generation_timeout),
            ..GenerationParams::default()
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// address to listen on
    #[clap(long, env = "KELSIE_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// base url of an OpenAI-compatible API
    #[clap(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com")]
    pub openai_base_url: String,

    #[clap(long, env = "OPENAI_MODEL", default_value = "gpt-3.5-turbo")]
    pub openai_model: String,

    /// upstream request timeout in seconds
    #[clap(long, default_value_t = 60)]
    pub upstream_timeout: u64,
}

impl ServeArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            model: self.openai_model.clone(),
            timeout: Duration::from_secs(self.upstream_timeout),
        }
    }
}

/// Parse a single key-value pair
fn parse_key_val(s: &str) -> anyhow::Result<(String, ParamOverrideValue)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let value = &s[pos + 1..];
    let value = i64::from_str(value)
        .map(ParamOverrideValue::Int)
        .or_else(|_| f64::from_str(value).map(ParamOverrideValue::Float))
        .or_else(|_| bool::from_str(value).map(ParamOverrideValue::Bool))
        .map_err(|_| anyhow!("must be one of i64, f64, or bool"))?;

    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_defaults() {
        let args = Args::try_parse_from(["kelsie", "chat", "local", "model.gguf"]).unwrap();
        let Command::Chat(chat) = args.command else {
            panic!("expected chat");
        };
        assert!(matches!(chat.model, Model::Local { ref path } if path == &PathBuf::from("model.gguf")));
        let params = chat.generation_params();
        assert_eq!(params.max_new_tokens, 80);
        assert_eq!(params.max_prompt_tokens, 800);
        assert_eq!(params.top_k, 50);
        assert_eq!(params.no_repeat_ngram, 3);
        assert_eq!(params.timeout, Duration::from_secs(60));
    }

    #[test]
    fn chat_options_before_model() {
        let args = Args::try_parse_from([
            "kelsie",
            "-v",
            "chat",
            "--temperature",
            "0.2",
            "--no-search",
            "-o",
            "llama.context_length=4096",
            "hf-model",
            "org/repo",
            "model.gguf",
        ])
        .unwrap();
        assert!(args.verbose);
        let Command::Chat(chat) = args.command else {
            panic!("expected chat");
        };
        assert!(chat.no_search);
        assert_eq!(chat.temperature, 0.2);
        assert_eq!(chat.key_value_overrides.len(), 1);
        assert_eq!(chat.key_value_overrides[0].0, "llama.context_length");
        assert!(matches!(chat.key_value_overrides[0].1, ParamOverrideValue::Int(4096)));
    }

    #[test]
    fn key_val_types() {
        assert!(matches!(parse_key_val("a=1.5"), Ok((_, ParamOverrideValue::Float(_)))));
        assert!(matches!(parse_key_val("a=true"), Ok((_, ParamOverrideValue::Bool(true)))));
        assert!(parse_key_val("no-equals").is_err());
        assert!(parse_key_val("a=text").is_err());
    }
}

use std::ffi::CString;
use std::num::NonZeroU32;
use std::pin::pin;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::data_array::LlamaTokenDataArray;
use log::{debug, info};

use super::args_handler::ChatArgs;
use super::error::GenerationError;

const DEFAULT_CTX_SIZE: u32 = 2048;

/// A text-completion oracle: continues `prompt` and returns only the new text.
pub trait Generator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt)
    }
}

/// Sampling and budget settings for one generation.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_new_tokens: i32,
    /// Longer prompts lose tokens from the start.
    pub max_prompt_tokens: usize,
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: i32,
    /// Tokens that would repeat an n-gram of this size are never sampled. 0 disables.
    pub no_repeat_ngram: usize,
    pub seed: u32,
    pub timeout: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 80,
            max_prompt_tokens: 800,
            temperature: 0.7,
            top_k: 50,
            top_p: 0.9,
            repeat_penalty: 1.2,
            repeat_last_n: 64,
            no_repeat_ngram: 3,
            seed: 561371,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct LLM {
    model: LlamaModel,
    backend: LlamaBackend,
    ctx_size: NonZeroU32,
    threads: Option<i32>,
    threads_batch: Option<i32>,
    params: GenerationParams,
}

impl LLM {
    /// Initialize the backend and load (or download) the model.
    pub fn new(args: &ChatArgs) -> anyhow::Result<Self> {
        let backend = LlamaBackend::init().context("could not initialize llama backend")?;

        // offload layers to the gpu when asked to
        let model_params = {
            if args.n_gpu_layers > 0 {
                LlamaModelParams::default().with_n_gpu_layers(args.n_gpu_layers)
            } else {
                LlamaModelParams::default()
            }
        };

        let mut model_params = pin!(model_params);

        for (k, v) in &args.key_value_overrides {
            let k = CString::new(k.as_bytes()).with_context(|| format!("invalid key: {k}"))?;
            model_params.as_mut().append_kv_override(k.as_c_str(), *v);
        }

        let model_path = args
            .model
            .clone()
            .get_or_load()
            .context("failed to get model from args")?;

        info!("loading model from {}", model_path.display());
        let model = LlamaModel::load_from_file(&backend, &model_path, &model_params)
            .with_context(|| format!("unable to load model {}", model_path.display()))?;

        let params = args.generation_params();
        let ctx_size = args
            .ctx_size
            .or(NonZeroU32::new(DEFAULT_CTX_SIZE))
            .context("context size must be non-zero")?;

        let required = params.max_prompt_tokens as u64 + params.max_new_tokens.max(0) as u64;
        if u64::from(ctx_size.get()) < required {
            bail!(
                "context size {} cannot hold {} prompt tokens plus {} new tokens",
                ctx_size,
                params.max_prompt_tokens,
                params.max_new_tokens
            );
        }

        Ok(Self {
            model,
            backend,
            ctx_size,
            threads: args.threads,
            threads_batch: args.threads_batch.or(args.threads),
            params,
        })
    }

    fn context_params(&self) -> LlamaContextParams {
        let mut ctx_params = LlamaContextParams::default().with_n_ctx(Some(self.ctx_size));
        if let Some(threads) = self.threads {
            ctx_params = ctx_params.with_n_threads(threads);
        }
        if let Some(threads_batch) = self.threads_batch {
            ctx_params = ctx_params.with_n_threads_batch(threads_batch);
        }
        ctx_params
    }
}

impl Generator for LLM {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let started = Instant::now();

        // a fresh context per turn: the prompt already carries the conversation
        let mut ctx = self
            .model
            .new_context(&self.backend, self.context_params())
            .map_err(|e| GenerationError::Context(e.to_string()))?;

        let tokens_list = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| GenerationError::Tokenize(e.to_string()))?;

        if tokens_list.len() > self.params.max_prompt_tokens {
            debug!(
                "prompt has {} tokens, keeping the last {}",
                tokens_list.len(),
                self.params.max_prompt_tokens
            );
        }
        let tokens_list = trim_prompt(
            tokens_list,
            self.params.max_prompt_tokens,
            Some(self.model.token_bos()),
        );
        if tokens_list.is_empty() {
            return Ok(String::new());
        }

        let n_ctx = ctx.n_ctx() as i32;
        let n_len = (tokens_list.len() as i32 + self.params.max_new_tokens).min(n_ctx);

        // we use this object to submit token data for decoding
        let mut batch = LlamaBatch::new(n_ctx as usize, 1);

        let last_index = tokens_list.len() as i32 - 1;
        for (i, token) in (0_i32..).zip(tokens_list.iter()) {
            // llama_decode will output logits only for the last token of the prompt
            batch
                .add(*token, i, &[0], i == last_index)
                .map_err(|e| GenerationError::Decode(e.to_string()))?;
        }

        ctx.decode(&mut batch)
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::penalties(
                self.params.repeat_last_n,
                self.params.repeat_penalty,
                0.0,
                0.0,
            ),
            LlamaSampler::top_k(self.params.top_k),
            LlamaSampler::top_p(self.params.top_p, 1),
            LlamaSampler::temp(self.params.temperature),
            LlamaSampler::dist(self.params.seed),
        ]);

        let mut n_cur = batch.n_tokens();
        let mut generated = Vec::new();

        let mut decoder = Utf8Stream::new();
        let mut llm_output = String::new();

        while n_cur < n_len {
            if started.elapsed() >= self.params.timeout {
                return Err(GenerationError::Timeout(self.params.timeout));
            }

            let mut candidates =
                LlamaTokenDataArray::from_iter(ctx.candidates_ith(batch.n_tokens() - 1), false);
            let banned = banned_ngram_tokens(&generated, self.params.no_repeat_ngram);
            if !banned.is_empty() {
                for data in candidates.data.iter_mut() {
                    if banned.contains(&data.id()) {
                        data.set_logit(f32::NEG_INFINITY);
                    }
                }
            }

            candidates.apply_sampler(&sampler);
            let token = candidates
                .selected_token()
                .ok_or_else(|| GenerationError::Decode("sampler selected no token".to_string()))?;
            sampler.accept(token);

            // is it an end of stream?
            if self.model.is_eog_token(token) {
                break;
            }

            generated.push(token);

            let output_bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| GenerationError::Decode(e.to_string()))?;
            llm_output.push_str(&decoder.push(&output_bytes));

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| GenerationError::Decode(e.to_string()))?;

            n_cur += 1;

            ctx.decode(&mut batch)
                .map_err(|e| GenerationError::Decode(e.to_string()))?;
        }

        llm_output.push_str(&decoder.finish());

        let elapsed = started.elapsed();
        debug!(
            "decoded {} tokens in {:.2} s, speed {:.2} t/s",
            generated.len(),
            elapsed.as_secs_f32(),
            generated.len() as f32 / elapsed.as_secs_f32().max(f32::EPSILON)
        );

        Ok(llm_output)
    }
}

/// Keep the last `max` prompt tokens. When anything is dropped, `bos` goes
/// back in front and still counts toward `max`.
pub fn trim_prompt<T: Copy>(tokens: Vec<T>, max: usize, bos: Option<T>) -> Vec<T> {
    if tokens.len() <= max {
        return tokens;
    }
    if max == 0 {
        return Vec::new();
    }

    let keep = max - usize::from(bos.is_some());
    let mut trimmed = Vec::with_capacity(max);
    trimmed.extend(bos);
    trimmed.extend_from_slice(&tokens[tokens.len() - keep..]);
    trimmed
}

/// Tokens that would complete an `n`-gram already present in `seq` when
/// appended to it.
pub fn banned_ngram_tokens<T: PartialEq + Copy>(seq: &[T], n: usize) -> Vec<T> {
    if n == 0 || seq.len() + 1 < n {
        return Vec::new();
    }
    let prefix = &seq[seq.len() + 1 - n..];
    let mut banned = Vec::new();
    for window in seq.windows(n) {
        let (head, last) = window.split_at(n - 1);
        if head == prefix && !banned.contains(&last[0]) {
            banned.push(last[0]);
        }
    }
    banned
}

/// Incremental UTF-8 decoding of token pieces, which may split a character.
struct Utf8Stream {
    decoder: encoding_rs::Decoder,
}

impl Utf8Stream {
    fn new() -> Self {
        Self {
            decoder: encoding_rs::UTF_8.new_decoder(),
        }
    }

    fn push(&mut self, bytes: &[u8]) -> String {
        self.decode(bytes, false)
    }

    /// Flush whatever is still buffered. An incomplete character becomes U+FFFD.
    fn finish(mut self) -> String {
        self.decode(&[], true)
    }

    fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        // use `Decoder.decode_to_string()` to avoid the intermediate buffer
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(32)
            .max(4);
        let mut output = String::with_capacity(capacity);
        let _decode_result = self.decoder.decode_to_string(bytes, &mut output, last);
        output
    }
}

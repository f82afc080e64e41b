//! Request commands (`get`, `post`, `put`, `patch`, `delete`)

use anyhow::{bail, Context as _, Result};
use clap::Args;
use resilient_api_sdk::{CacheDirective, RequestContext, SdkError};
use std::time::Duration;

use crate::context::Context;

/// Key under which the in-flight CLI request is registered for cancellation
const CANCELLATION_KEY: &str = "rapi-request";

#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    /// Path relative to the API base URL, or an absolute URL
    pub path: String,

    /// Query parameter as `name=value` (repeatable)
    #[arg(short, long = "query")]
    pub query: Vec<String>,

    /// Extra header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub header: Vec<String>,

    /// Cache the response for this many seconds (GET only). The cache lives
    /// in process memory, so one `rapi` invocation never reuses it; the flag
    /// only matters for SDK callers sharing a client.
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Explicit cache key (GET only). Like --cache-ttl, it has no effect
    /// across separate `rapi` invocations.
    #[arg(long)]
    pub cache_key: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Maximum retries for this request
    #[arg(long)]
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct BodyArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// JSON body, or `@path` to read it from a file
    #[arg(short, long)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    fn context(self, path: &str) -> RequestContext {
        match self {
            Self::Get => RequestContext::get(path),
            Self::Post => RequestContext::post(path),
            Self::Put => RequestContext::put(path),
            Self::Patch => RequestContext::patch(path),
            Self::Delete => RequestContext::delete(path),
        }
    }
}

/// Send one request and print the response
pub async fn execute(ctx: &Context, verb: Verb, args: RequestArgs, data: Option<String>) -> Result<()> {
    let body = data.as_deref().map(parse_body).transpose()?;
    let request = build_context(verb, &args, body)?.with_cancellation_key(CANCELLATION_KEY);

    let client = ctx.create_client()?;
    tracing::debug!("{:?} {} via {}", verb, args.path, ctx.api_url());

    let spinner = ctx.output.spinner(&format!("{:?} {}", verb, args.path));
    let result = tokio::select! {
        result = client.send(request) => result,
        _ = tokio::signal::ctrl_c() => {
            client.cancel(CANCELLATION_KEY);
            Err(SdkError::Cancelled)
        }
    };
    spinner.finish_and_clear();

    match result {
        Ok(response) => ctx.output.response(&response),
        Err(SdkError::Cancelled) => {
            ctx.output.warning("Request cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Translate command arguments into a request context
pub fn build_context(
    verb: Verb,
    args: &RequestArgs,
    body: Option<serde_json::Value>,
) -> Result<RequestContext> {
    let mut request = verb.context(&args.path);

    for pair in &args.query {
        let (name, value) = split_pair(pair, '=')
            .with_context(|| format!("Invalid query parameter '{}', expected name=value", pair))?;
        request = request.with_query(name, value);
    }

    for pair in &args.header {
        let (name, value) = split_pair(pair, ':')
            .with_context(|| format!("Invalid header '{}', expected 'Name: value'", pair))?;
        request = request.with_header(name, value);
    }

    if let Some(body) = body {
        request = request.with_body(body);
    }
    if let Some(secs) = args.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = args.retries {
        request = request.with_max_retries(retries);
    }

    if args.cache_ttl.is_some() || args.cache_key.is_some() {
        if verb != Verb::Get {
            bail!("--cache-ttl and --cache-key only apply to GET requests");
        }
        let mut directive = CacheDirective::new();
        if let Some(key) = &args.cache_key {
            directive = directive.with_key(key.clone());
        }
        if let Some(secs) = args.cache_ttl {
            directive = directive.with_ttl(Duration::from_secs(secs));
        }
        request = request.with_cache(directive);
    }

    Ok(request)
}

fn split_pair(pair: &str, separator: char) -> Option<(String, String)> {
    let (name, value) = pair.split_once(separator)?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

fn parse_body(data: &str) -> Result<serde_json::Value> {
    let raw = match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request body from {}", path))?,
        None => data.to_string(),
    };
    serde_json::from_str(&raw).context("Request body is not valid JSON")
}

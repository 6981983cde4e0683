use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Args;
use reqwest::Url;
use serde_json::{Map, Value};
use user::auth::sign_request;
use user::auth::timestamp::parse_timestamp;
use user::auth::ClientCredential;

#[derive(Args, Debug)]
pub struct SignArgs {
    /// HTTP method
    pub method: String,

    /// Full URL, or a path with optional query when --host is given
    pub target: String,

    /// Host header value; taken from the URL when omitted
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long, env = "KEYSTONE_SESSION_ID")]
    pub session_id: String,

    #[arg(long, env = "KEYSTONE_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Request body
    #[arg(long, default_value = "")]
    pub body: String,

    #[arg(long)]
    pub content_type: Option<String>,

    /// Extra header as `name: value`; repeatable
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Signing time in basic ISO 8601 format; defaults to now
    #[arg(long)]
    pub timestamp: Option<String>,

    /// Output format (json, text)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

/// Splits the target into the host and the path with its query.
fn resolve_target(target: &str, host: Option<&str>) -> Result<(String, String)> {
    if target.starts_with("http://") || target.starts_with("https://") {
        let url = Url::parse(target).with_context(|| format!("Invalid URL: {}", target))?;
        let url_host = url
            .host_str()
            .ok_or_else(|| anyhow!("URL has no host: {}", target))?;
        let host = match (host, url.port()) {
            (Some(host), _) => host.to_string(),
            (None, Some(port)) => format!("{}:{}", url_host, port),
            (None, None) => url_host.to_string(),
        };
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        return Ok((host, path_and_query));
    }

    let Some(host) = host else {
        bail!("--host is required when signing a bare path");
    };
    if !target.starts_with('/') {
        bail!("path must start with '/': {}", target);
    }
    Ok((host.to_string(), target.to_string()))
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header must look like `name: value`: {}", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

pub fn execute(args: SignArgs) -> Result<()> {
    let (host, path_and_query) = resolve_target(&args.target, args.host.as_deref())?;

    let at = match &args.timestamp {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| anyhow!("invalid timestamp: {}", raw))?,
        None => Utc::now(),
    };

    let mut headers = args
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>>>()?;
    if let Some(content_type) = &args.content_type {
        headers.push(("content-type".to_string(), content_type.clone()));
    }

    let credential = ClientCredential::new(&args.session_id, &args.secret);
    let signed = sign_request(
        &credential,
        &args.method.to_ascii_uppercase(),
        &host,
        &path_and_query,
        &headers,
        args.body.as_bytes(),
        at,
    )?;

    match args.format.as_str() {
        "json" => {
            let object: Map<String, Value> = signed
                .into_iter()
                .map(|(name, value)| (name, Value::String(value)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&object)?);
        }
        _ => {
            for (name, value) in signed {
                println!("{}: {}", name, value);
            }
        }
    }
    Ok(())
}

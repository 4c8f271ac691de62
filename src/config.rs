use crate::flow::ids::IdPattern;
use crate::reconcile::EngineSettings;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub engine_url: Url,
    pub engine_token: Option<String>,
    pub http_timeout: Duration,
    pub connect_retries: u32,
    pub retry_backoff: Duration,

    pub template_path: PathBuf,
    pub id_pattern: IdPattern,

    pub counter_path: PathBuf,
    pub lock_timeout: Duration,

    pub http_bind: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let engine_url = env.string("PROVISIONER_ENGINE_URL", Some("http://127.0.0.1:1880"))?;
        let engine_url = Url::parse(&engine_url).context("invalid PROVISIONER_ENGINE_URL")?;
        if !matches!(engine_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "PROVISIONER_ENGINE_URL must be http or https, got {}",
                engine_url.scheme()
            ));
        }
        let engine_token = env.optional("PROVISIONER_ENGINE_TOKEN");

        let http_timeout =
            Duration::from_millis(env.u64("PROVISIONER_HTTP_TIMEOUT_MS", Some(10_000))?);
        let connect_retries = env.u64("PROVISIONER_CONNECT_RETRIES", Some(2))? as u32;
        let retry_backoff =
            Duration::from_millis(env.u64("PROVISIONER_RETRY_BACKOFF_MS", Some(250))?);

        let template_path = PathBuf::from(env.string(
            "PROVISIONER_TEMPLATE_PATH",
            Some("templates/sensordata_to_db.json"),
        )?);
        let id_pattern = env
            .string("PROVISIONER_ID_PATTERN", Some("legacy"))?
            .parse::<IdPattern>()
            .map_err(|err| anyhow!(err))
            .context("invalid PROVISIONER_ID_PATTERN")?;

        let counter_path =
            PathBuf::from(env.string("PROVISIONER_COUNTER_PATH", Some("state/flow-counter"))?);
        let lock_timeout =
            Duration::from_millis(env.u64("PROVISIONER_LOCK_TIMEOUT_MS", Some(5_000))?);

        let http_bind = env.string("PROVISIONER_HTTP_BIND", Some("127.0.0.1:3034"))?;

        Ok(Self {
            engine_url,
            engine_token,
            http_timeout,
            connect_retries,
            retry_backoff,
            template_path,
            id_pattern,
            counter_path,
            lock_timeout,
            http_bind,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            base_url: self.engine_url.clone(),
            token: self.engine_token.clone(),
            request_timeout: self.http_timeout,
            connect_retries: self.connect_retries,
            retry_backoff: self.retry_backoff,
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: Option<&str>) -> Result<String> {
        match (self.0)(key) {
            Some(value) => Ok(value.trim().to_string()),
            None => default
                .map(str::to_string)
                .ok_or_else(|| anyhow!("missing env var {key}")),
        }
    }

    fn u64(&self, key: &str, default: Option<u64>) -> Result<u64> {
        match (self.0)(key) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid {key}")),
            None => default.ok_or_else(|| anyhow!("missing env var {key}")),
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

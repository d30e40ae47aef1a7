use clap::Parser;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

// Persona instruction sent ahead of every user prompt
pub const SYSTEM_PROMPT: &str =
    "你是工具精靈，由天才承澤創造的天才 AI 助手。請用專業且友善的語氣回答問題。";

// Refusal shown to the browser once the daily quota is spent
pub const QUOTA_EXCEEDED_MESSAGE: &str = "今日請求次數已達上限，請明天再試";

pub const MAX_COMPLETION_TOKENS: u32 = 2048;
pub const TEMPERATURE: f32 = 0.0;

pub const DEFAULT_ALLOWED_ORIGINS: &str =
    "https://vue-profit-calculate.vercel.app,http://localhost:5173,http://localhost:4173";

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-relay")]
#[command(about = "Streaming relay that keeps the OpenAI key off the browser")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    // Upstream credential
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(short, long, env = "OPENAI_MODEL", default_value = "gpt-5.1")]
    pub model: String,

    // Max admitted requests per window and client
    #[arg(long, default_value_t = 100)]
    pub rate_limit: u32,

    // Rate limit window in seconds (24h)
    #[arg(long, default_value_t = 86_400)]
    pub rate_window: u64,

    // Browser origins allowed to call the relay (comma-separated)
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = DEFAULT_ALLOWED_ORIGINS)]
    pub allowed_origins: Vec<String>,

    // Number of reverse proxy hops trusted for X-Forwarded-For, 0 = use the peer address
    #[arg(long, env = "TRUST_PROXY", default_value_t = 1)]
    pub trust_proxy: usize,

    // How often expired rate windows are evicted, in seconds
    #[arg(long, default_value_t = 3600)]
    pub cleanup_interval: u64,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Loads `env_file` into the process environment when it exists, then
    /// parses `argv`. Variables already set in the environment are kept.
    pub fn load_from<I, T>(env_file: &Path, argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        // a missing file is fine, deployments may set everything directly
        let _ = dotenvy::from_path(env_file);
        Self::try_parse_from(argv)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKFORGE__*` 覆盖（双下划线表示嵌套，如 `TASKFORGE__STORE__BACKEND=memory`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub store: StoreSection,
    pub router: RouterSection,
    pub planning: PlanningSection,
    pub executor: ExecutorSection,
}

/// [app] 段：应用名、工作目录
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 步骤执行的工作目录（相对路径的 file_create 与 shell 均以此为基准），未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// 任务存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// [store] 段：后端与 SQLite 文件路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("data/taskforge.db"),
        }
    }
}

/// [router] 段：路由模式与 Provider 列表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// auto / prefer_local / prefer_hosted / only:<name>
    pub mode: String,
    pub providers: Vec<ProviderSection>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            providers: default_providers(),
        }
    }
}

/// [[router.providers]]：单个 LLM 后端
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub name: String,
    /// ollama / openai_compatible / anthropic
    pub kind: String,
    pub endpoint: String,
    pub model: String,
    /// free / low / high
    #[serde(default = "default_cost_tier")]
    pub cost_tier: String,
    /// 直接写入的凭证（不推荐），优先级高于 credential_env
    #[serde(default)]
    pub credential: Option<String>,
    /// 读取凭证的环境变量名
    #[serde(default)]
    pub credential_env: Option<String>,
    /// 单次调用超时（秒）；未设置时本地 30s、托管 60s
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_cost_tier() -> String {
    "low".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_providers() -> Vec<ProviderSection> {
    vec![
        ProviderSection {
            name: "ollama".into(),
            kind: "ollama".into(),
            endpoint: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            cost_tier: "free".into(),
            credential: None,
            credential_env: None,
            timeout_secs: None,
            enabled: true,
        },
        ProviderSection {
            name: "deepseek".into(),
            kind: "openai_compatible".into(),
            endpoint: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            cost_tier: "low".into(),
            credential: None,
            credential_env: Some("DEEPSEEK_API_KEY".into()),
            timeout_secs: None,
            enabled: true,
        },
        ProviderSection {
            name: "claude".into(),
            kind: "anthropic".into(),
            endpoint: "https://api.anthropic.com".into(),
            model: "claude-sonnet-4-5".into(),
            cost_tier: "high".into(),
            credential: None,
            credential_env: Some("ANTHROPIC_API_KEY".into()),
            timeout_secs: None,
            enabled: true,
        },
    ]
}

/// [planning] 段：计划生成策略与模型参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanningSection {
    /// auto / template_only / model_only
    pub strategy: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            strategy: "auto".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// [executor] 段：步骤超时、输出截断、失败策略、Shell 拒绝列表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub shell_timeout_secs: u64,
    pub api_timeout_secs: u64,
    /// stdout / stderr / 响应体保留的最大字节数
    pub output_cap_bytes: usize,
    /// abort_on_first_failure / continue_on_failure
    pub failure_policy: String,
    /// 命中任一子串（忽略大小写）的 shell 命令不会被执行
    pub denied_patterns: Vec<String>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 60,
            api_timeout_secs: 30,
            output_cap_bytes: 4096,
            failure_policy: "abort_on_first_failure".to_string(),
            denied_patterns: default_denied_patterns(),
        }
    }
}

fn default_denied_patterns() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "mkfs".into(),
        "dd if=".into(),
        "> /dev/sd".into(),
        ":(){ :|:& };:".into(), // fork bomb
    ]
}

/// 从 config 目录加载配置，环境变量 TASKFORGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKFORGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKFORGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

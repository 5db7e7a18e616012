use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub payment: PaymentConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub entitlement: EntitlementConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub tickets: TicketConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64, // seconds
}

/// PIX 支付网关
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentConfig {
    pub api_base_url: String,
    pub api_token: String,
    /// Webhook Basic 认证 (两项都为空则不启用)
    #[serde(default)]
    pub webhook_username: Option<String>,
    #[serde(default)]
    pub webhook_password: Option<String>,
    /// Webhook 共享令牌 (X-Webhook-Token)
    #[serde(default)]
    pub webhook_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// 转盘赠送次数规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 每张号码赠送的次数 (向下取整)
    pub ratio: f64,
    pub minimum: i64,
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ratio: 0.1,
            minimum: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub confirmation_enabled: bool,
    #[serde(default = "default_true")]
    pub recovery_enabled: bool,
    /// 待支付超过该分钟数后发送一次催付邮件
    pub recovery_after_minutes: i64,
    /// 支付确认后由定时任务补发前的等待时间
    pub grace_period_secs: i64,
    /// 确认邮件最多尝试次数 (含对账时的首次发送)
    #[serde(default = "default_confirmation_attempts")]
    pub max_confirmation_attempts: i32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            confirmation_enabled: true,
            recovery_enabled: true,
            recovery_after_minutes: 30,
            grace_period_secs: 120,
            max_confirmation_attempts: default_confirmation_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    /// 单个号码允许的最大随机重抽次数
    pub max_draws_per_ticket: u32,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            max_draws_per_ticket: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub sweep_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 300,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_confirmation_attempts() -> i32 {
    5
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => {
                toml::from_str(&config_str).map_err(|e| format!("解析配置文件失败: {e}"))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("缺少 DATABASE_URL 环境变量，且未找到配置文件 config.toml")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                        access_token_expires_in: get_env_parse("JWT_ACCESS_EXPIRES_IN", 7200i64),
                    },
                    payment: PaymentConfig {
                        api_base_url: get_env("PAYMENT_API_BASE_URL").unwrap_or_default(),
                        api_token: get_env("PAYMENT_API_TOKEN").unwrap_or_default(),
                        webhook_username: get_env("PAYMENT_WEBHOOK_USERNAME"),
                        webhook_password: get_env("PAYMENT_WEBHOOK_PASSWORD"),
                        webhook_token: get_env("PAYMENT_WEBHOOK_TOKEN"),
                        request_timeout_secs: get_env_parse(
                            "PAYMENT_REQUEST_TIMEOUT_SECS",
                            default_timeout_secs(),
                        ),
                    },
                    email: EmailConfig {
                        api_url: get_env("EMAIL_API_URL")
                            .unwrap_or_else(|| "https://api.resend.com/emails".to_string()),
                        api_key: get_env("EMAIL_API_KEY").unwrap_or_default(),
                        from_address: get_env("EMAIL_FROM_ADDRESS").unwrap_or_default(),
                        from_name: get_env("EMAIL_FROM_NAME"),
                        request_timeout_secs: get_env_parse(
                            "EMAIL_REQUEST_TIMEOUT_SECS",
                            default_timeout_secs(),
                        ),
                    },
                    entitlement: EntitlementConfig::default(),
                    notification: NotificationConfig::default(),
                    tickets: TicketConfig::default(),
                    tasks: TaskConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("无法读取配置文件 {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("JWT_ACCESS_EXPIRES_IN")
            && let Ok(n) = v.parse()
        {
            self.jwt.access_token_expires_in = n;
        }

        // 支付网关
        if let Ok(v) = env::var("PAYMENT_API_BASE_URL") {
            self.payment.api_base_url = v;
        }
        if let Ok(v) = env::var("PAYMENT_API_TOKEN") {
            self.payment.api_token = v;
        }
        if let Ok(v) = env::var("PAYMENT_WEBHOOK_USERNAME") {
            self.payment.webhook_username = Some(v);
        }
        if let Ok(v) = env::var("PAYMENT_WEBHOOK_PASSWORD") {
            self.payment.webhook_password = Some(v);
        }
        if let Ok(v) = env::var("PAYMENT_WEBHOOK_TOKEN") {
            self.payment.webhook_token = Some(v);
        }
        if let Ok(v) = env::var("PAYMENT_REQUEST_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.payment.request_timeout_secs = n;
        }

        // 邮件
        if let Ok(v) = env::var("EMAIL_API_URL") {
            self.email.api_url = v;
        }
        if let Ok(v) = env::var("EMAIL_API_KEY") {
            self.email.api_key = v;
        }
        if let Ok(v) = env::var("EMAIL_FROM_ADDRESS") {
            self.email.from_address = v;
        }
        if let Ok(v) = env::var("EMAIL_FROM_NAME") {
            self.email.from_name = Some(v);
        }
        if let Ok(v) = env::var("EMAIL_REQUEST_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.email.request_timeout_secs = n;
        }

        // 赠送次数
        if let Ok(v) = env::var("ENTITLEMENT_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.entitlement.enabled = b;
        }
        if let Ok(v) = env::var("ENTITLEMENT_RATIO")
            && let Ok(r) = v.parse()
        {
            self.entitlement.ratio = r;
        }
        if let Ok(v) = env::var("ENTITLEMENT_MINIMUM")
            && let Ok(m) = v.parse()
        {
            self.entitlement.minimum = m;
        }

        // 通知 & 定时任务
        if let Ok(v) = env::var("NOTIFICATION_CONFIRMATION_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.notification.confirmation_enabled = b;
        }
        if let Ok(v) = env::var("NOTIFICATION_RECOVERY_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.notification.recovery_enabled = b;
        }
        if let Ok(v) = env::var("NOTIFICATION_RECOVERY_AFTER_MINUTES")
            && let Ok(n) = v.parse()
        {
            self.notification.recovery_after_minutes = n;
        }
        if let Ok(v) = env::var("NOTIFICATION_GRACE_PERIOD_SECS")
            && let Ok(n) = v.parse()
        {
            self.notification.grace_period_secs = n;
        }
        if let Ok(v) = env::var("NOTIFICATION_MAX_CONFIRMATION_ATTEMPTS")
            && let Ok(n) = v.parse()
        {
            self.notification.max_confirmation_attempts = n;
        }
        if let Ok(v) = env::var("TICKETS_MAX_DRAWS_PER_TICKET")
            && let Ok(n) = v.parse()
        {
            self.tickets.max_draws_per_ticket = n;
        }
        if let Ok(v) = env::var("TASKS_ENABLED")
            && let Ok(b) = v.parse()
        {
            self.tasks.enabled = b;
        }
        if let Ok(v) = env::var("TASKS_SWEEP_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            self.tasks.sweep_interval_secs = n;
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !self.entitlement.ratio.is_finite() || self.entitlement.ratio < 0.0 {
            return Err(format!(
                "entitlement.ratio 必须为非负数: {}",
                self.entitlement.ratio
            ));
        }
        if self.entitlement.minimum < 0 {
            return Err("entitlement.minimum 不能为负数".to_string());
        }
        if self.notification.max_confirmation_attempts <= 0 {
            return Err("notification.max_confirmation_attempts 必须大于 0".to_string());
        }
        if self.tickets.max_draws_per_ticket == 0 {
            return Err("tickets.max_draws_per_ticket 必须大于 0".to_string());
        }
        Ok(())
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

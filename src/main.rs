use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;
use std::time::Duration;

use raffle_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{EmailSender, HttpMailer, PaymentGateway, PaymentStatusProvider},
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    swagger::swagger_config,
    tasks,
    utils::{JwtService, WebhookAuthenticator},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database connection pool")?;

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);

    // 外部服务
    let payment_timeout = Duration::from_secs(config.payment.request_timeout_secs);
    let gateway: Arc<dyn PaymentStatusProvider> = Arc::new(
        PaymentGateway::new(config.payment.clone()).context("Failed to build payment gateway client")?,
    );
    let email_timeout = Duration::from_secs(config.email.request_timeout_secs);
    let mailer: Arc<dyn EmailSender> = Arc::new(
        HttpMailer::new(config.email.clone()).context("Failed to build email client")?,
    );

    let authenticator = WebhookAuthenticator::new(&config.payment);
    if !authenticator.is_configured() {
        log::warn!("No webhook credentials configured; payment callbacks will be rejected");
    }

    // 创建服务
    let store = PurchaseStore::new(pool.clone());
    let spin_service = SpinService::new(
        pool.clone(),
        store.clone(),
        EntitlementCalculator::new(config.entitlement.clone()),
    );
    let notifier = NotificationDispatcher::new(
        store.clone(),
        mailer,
        config.notification.clone(),
        email_timeout,
    );
    let reconciler = PaymentReconciler::new(
        pool.clone(),
        store,
        Arc::new(TicketNumberGenerator::new(&config.tickets)),
        spin_service.clone(),
        notifier.clone(),
    );
    let webhook_ingress = WebhookIngress::new(authenticator);
    let polling_ingress = PollingIngress::new(gateway, payment_timeout);

    if config.tasks.enabled {
        tasks::spawn_all(
            &config.tasks,
            notifier,
            spin_service.clone(),
            config.notification.grace_period_secs,
        );
    }

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(reconciler.clone()))
            .app_data(web::Data::new(webhook_ingress.clone()))
            .app_data(web::Data::new(polling_ingress.clone()))
            .app_data(web::Data::new(spin_service.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::payment_config)
                    .configure(handlers::spin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}

use axum::{
    http::{HeaderValue, Method},
    routing::{get, Router},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod models;
mod producers;
mod routes;
mod services;
mod state;
mod utils;

use crate::{
    config::Config,
    producers::{
        bid_accepted::BidAcceptedProducer, bid_received::BidReceivedProducer,
        item_sold::ItemSoldProducer, rental_ended::RentalEndedProducer,
        rental_started::RentalStartedProducer, royalties_earned::RoyaltiesEarnedProducer,
        NotificationGenerator, ProducerRegistry, ProducerScheduler, SubgraphClient,
    },
    services::{
        AnalyticsService, Database, Db, EmailRenderer, EmailSender, NotificationService,
        SmtpEmailSender, SubscriptionService,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "rainbow_inbox=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rainbow-Inbox service...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化数据库连接
    let database = Database::new(&config).await?;
    database.run_migrations().await?;
    database.verify_connection().await?;
    let db: Arc<dyn Db> = Arc::new(database);

    // 初始化服务
    let analytics = AnalyticsService::new(&config);
    let email_renderer = Arc::new(EmailRenderer::new(&config.service_base_url)?);
    let email_sender: Arc<dyn EmailSender> = Arc::new(SmtpEmailSender::new(&config)?);
    let notification_service = NotificationService::new(
        db.clone(),
        email_renderer,
        email_sender,
        analytics.clone(),
        config.environment.clone(),
        config.enable_email_notifications,
    );
    let subscription_service = SubscriptionService::new(db.clone(), analytics);

    // 子图客户端
    let subgraph_timeout = Duration::from_secs(config.subgraph_timeout);
    let collections_subgraph = Arc::new(SubgraphClient::new(
        &config.collections_subgraph_url,
        subgraph_timeout,
    )?);
    let rentals_subgraph = Arc::new(SubgraphClient::new(
        &config.rentals_subgraph_url,
        subgraph_timeout,
    )?);
    let land_manager_subgraph = Arc::new(SubgraphClient::new(
        &config.land_manager_subgraph_url,
        subgraph_timeout,
    )?);

    // 构建生产者注册表并启动调度
    let generators: Vec<Arc<dyn NotificationGenerator>> = vec![
        Arc::new(ItemSoldProducer::new(
            collections_subgraph.clone(),
            &config.marketplace_base_url,
        )),
        Arc::new(BidAcceptedProducer::new(
            collections_subgraph.clone(),
            &config.marketplace_base_url,
        )),
        Arc::new(BidReceivedProducer::new(
            collections_subgraph.clone(),
            &config.marketplace_base_url,
        )),
        Arc::new(RoyaltiesEarnedProducer::new(
            collections_subgraph,
            &config.marketplace_base_url,
        )),
        Arc::new(RentalStartedProducer::new(
            rentals_subgraph.clone(),
            land_manager_subgraph.clone(),
            &config.marketplace_base_url,
            &config.land_contract_address,
            &config.estate_contract_address,
        )),
        Arc::new(RentalEndedProducer::new(
            rentals_subgraph,
            land_manager_subgraph,
            &config.marketplace_base_url,
            &config.land_contract_address,
            &config.estate_contract_address,
        )),
    ];

    let poll_interval = Duration::from_secs(config.producer_poll_interval);
    let mut producer_registry = ProducerRegistry::new();
    for generator in generators {
        producer_registry.add_producer(Arc::new(ProducerScheduler::new(
            generator,
            db.clone(),
            notification_service.clone(),
            poll_interval,
        )))?;
    }
    let producer_registry = Arc::new(producer_registry);
    producer_registry.start();

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        notification_service,
        subscription_service,
        producer_registry,
    });

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(
            config
                .cors_allowed_origins
                .split(',')
                .map(|origin| origin.parse::<HeaderValue>().unwrap())
                .collect::<Vec<_>>(),
        );

    // 构建应用路由
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/api/inbox/status", get(routes::status))
        .nest("/api/inbox/notifications", routes::notifications::router())
        .nest("/api/inbox/subscriptions", routes::subscriptions::router())
        .nest("/api/inbox/producers", routes::producers::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "Rainbow-Inbox is running!"
}

//! Process entry point: wires the Config Registry, Data Fetcher Pool, News
//! Service, LLM Router, Persistence, Task Queue, Agent Executor, and
//! Notification Dispatcher together, then runs the HTTP API server and/or
//! the daily batch scheduler depending on the CLI flags given.

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use dsa_analyst::agent::bindings::{AnalyzeTrendTool, GetDailyHistoryTool, GetRealtimeQuoteTool, SearchStockNewsTool};
use dsa_analyst::agent::strategy::load_strategies;
use dsa_analyst::agent::{AgentExecutor, ToolRegistry};
use dsa_analyst::api::{build_router, AppState};
use dsa_analyst::auth::jwt::JwtHandler;
use dsa_analyst::auth::middleware::AuthMiddlewareState;
use dsa_analyst::auth::{AuthService, AuthState};
use dsa_analyst::calendar::CalendarGate;
use dsa_analyst::config::{Config, ConfigRegistry};
use dsa_analyst::fetcher::sources::{TushareSource, UsQuoteSource};
use dsa_analyst::fetcher::FetcherPool;
use dsa_analyst::llm::{LlmRouter, ModelEntry, OpenAiCompatProvider};
use dsa_analyst::middleware::{self, RateLimitConfig, RateLimitLayer};
use dsa_analyst::models::Ticker;
use dsa_analyst::news::{NewsService, RestSearchProvider};
use dsa_analyst::notify::{NotificationDispatcher, WebhookChannel};
use dsa_analyst::persistence::Store;
use dsa_analyst::pipeline::Pipeline;
use dsa_analyst::queue::TaskQueue;
use dsa_analyst::scheduler::Scheduler;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Size of the Task Queue's broadcast event bus.
const TASK_EVENT_BUFFER: usize = 256;
/// Circuit breaker trip threshold and cooldown for the Data Fetcher Pool.
const FETCHER_CIRCUIT_THRESHOLD: u32 = 3;
const FETCHER_CIRCUIT_COOLDOWN: Duration = Duration::from_secs(600);
const QUOTE_CACHE_TTL: Duration = Duration::from_secs(60);
/// History cache TTL equal to one trading session.
const HISTORY_CACHE_TTL: Duration = Duration::from_secs(6 * 3600);
/// Lookback window for daily candles fed into the technical indicator engine.
const HISTORY_LOOKBACK_DAYS: u32 = 120;
/// Cap on ranked news items kept per ticker after dedup.
const NEWS_MAX_ITEMS: usize = 10;
/// LLM retry budget before falling through to the next model in the chain.
const LLM_MAX_RETRIES: u32 = 3;

/// `dsa-analyst` — scheduled and on-demand stock watchlist analysis.
#[derive(Parser, Debug)]
#[command(name = "dsa-analyst", version, about)]
struct Cli {
    /// Start the HTTP API server (also runs the scheduler unless combined with --serve-only).
    #[arg(long, alias = "webui")]
    serve: bool,
    /// Start the HTTP API server only; do not run the batch scheduler.
    #[arg(long, alias = "webui-only")]
    serve_only: bool,
    /// Run the batch scheduler (daily run at SCHEDULE_TIME).
    #[arg(long)]
    schedule: bool,
    /// Skip notification dispatch for the scheduled batch run.
    #[arg(long)]
    no_notify: bool,
    /// Dispatch one notification per ticker report rather than a merged digest.
    #[arg(long)]
    single_notify: bool,
    /// Run every watchlist ticker once immediately, ignoring the calendar gate.
    #[arg(long)]
    force_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "dsa_analyst=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

struct Wiring {
    registry: Arc<ConfigRegistry>,
    pipeline: Arc<Pipeline>,
    queue: Arc<TaskQueue>,
    store: Arc<Store>,
    llm: Arc<LlmRouter>,
    agent: Option<Arc<AgentExecutor>>,
    strategies: Arc<HashMap<String, dsa_analyst::agent::strategy::Strategy>>,
    auth_state: AuthState,
    auth_mw: Arc<AuthMiddlewareState>,
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let wiring = wire(config).await?;

    // --serve-only / --webui-only: HTTP API only, no scheduler.
    // --serve / --webui: HTTP API plus the daily scheduler, unless --serve-only wins.
    // --schedule alone: scheduler only, no HTTP API.
    // No flags at all: full daemon, server plus scheduler.
    let any_flag = cli.serve || cli.serve_only || cli.schedule;
    let run_server = cli.serve || cli.serve_only || !any_flag;
    let run_schedule = !cli.serve_only && (cli.serve || cli.schedule || !any_flag);

    if cli.single_notify && wiring.registry.config.merge_email_notification {
        info!("--single-notify overrides MERGE_EMAIL_NOTIFICATION for this run: dispatching one notification per ticker");
    }

    if cli.force_run {
        run_batch(&wiring, !cli.no_notify, true).await;
        if !run_server && !run_schedule {
            return Ok(());
        }
    }

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    if run_schedule {
        let wiring_clone = WiringHandles::from(&wiring);
        let no_notify = cli.no_notify;
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let scheduler = match Scheduler::new(&wiring_clone.schedule_time, wiring_clone.run_immediately) {
                Ok(s) => s,
                Err(e) => {
                    error!("invalid SCHEDULE_TIME: {e:#}");
                    return;
                }
            };
            scheduler
                .run_forever(cancel, || {
                    let handles = wiring_clone.clone();
                    async move {
                        handles.run_batch(!no_notify, false).await;
                    }
                })
                .await;
        }));
    }

    if run_server {
        let addr = format!("{}:{}", wiring.registry.config.webui_host, wiring.registry.config.webui_port);
        let app_state = AppState {
            pipeline: wiring.pipeline.clone(),
            queue: wiring.queue.clone(),
            store: wiring.store.clone(),
            llm: wiring.llm.clone(),
            agent: wiring.agent.clone(),
            strategies: wiring.strategies.clone(),
            notify_channel: Some("webhook".to_string()),
        };
        let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
        let router = build_router(app_state, wiring.auth_state.clone(), wiring.auth_mw.clone())
            .layer(axum::middleware::from_fn(middleware::request_logging))
            .layer(axum::middleware::from_fn_with_state(rate_limiter, middleware::rate_limit_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "HTTP API server listening");
        let cancel_server = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>());
            tokio::select! {
                result = serve => {
                    if let Err(e) = result {
                        error!("server error: {e:#}");
                    }
                }
                _ = cancel_server.cancelled() => {
                    info!("server shutting down");
                }
            }
        }));
    }

    if tasks.is_empty() {
        return Ok(());
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// The subset of wiring a spawned scheduler task needs, cloned out so the
/// task doesn't have to borrow across `.await` points.
#[derive(Clone)]
struct WiringHandles {
    registry: Arc<ConfigRegistry>,
    pipeline: Arc<Pipeline>,
    queue: Arc<TaskQueue>,
    schedule_time: String,
    run_immediately: bool,
}

impl From<&Wiring> for WiringHandles {
    fn from(w: &Wiring) -> Self {
        Self {
            registry: w.registry.clone(),
            pipeline: w.pipeline.clone(),
            queue: w.queue.clone(),
            schedule_time: w.registry.config.schedule_time.clone(),
            run_immediately: w.registry.config.run_immediately,
        }
    }
}

impl WiringHandles {
    async fn run_batch(&self, notify: bool, force_run: bool) {
        self.registry.reload();
        let watchlist = self.registry.watchlist();
        info!(tickers = watchlist.len(), notify, force_run, "starting scheduled batch run");
        let notify_channel = notify.then(|| "webhook".to_string());
        let parallelism = self.registry.config.batch_parallelism.max(1);

        futures_util::stream::iter(watchlist)
            .map(|ticker| {
                let pipeline = self.pipeline.clone();
                let queue = self.queue.clone();
                let notify_channel = notify_channel.clone();
                async move {
                    run_one(&pipeline, &queue, &ticker, notify_channel.as_deref(), force_run).await;
                }
            })
            .buffer_unordered(parallelism)
            .collect::<Vec<_>>()
            .await;
    }
}

async fn run_batch(wiring: &Wiring, notify: bool, force_run: bool) {
    WiringHandles::from(wiring).run_batch(notify, force_run).await;
}

async fn run_one(pipeline: &Pipeline, queue: &TaskQueue, ticker: &Ticker, notify_channel: Option<&str>, force_run: bool) {
    let task = match queue.enqueue(ticker.as_str(), "scheduled") {
        Ok(task) => task,
        Err(e) => {
            warn!(ticker = ticker.as_str(), error = %e, "skipping ticker already in flight");
            return;
        }
    };
    queue.mark_started(&task.task_id);
    match pipeline.run_for_ticker(ticker, "scheduled", Some((queue, &task.task_id)), notify_channel, force_run).await {
        Ok(_) => {}
        Err(e) => {
            warn!(ticker = ticker.as_str(), error = %e, "scheduled run failed for ticker");
            queue.mark_failed(&task.task_id, e.to_string());
        }
    }
}

async fn wire(config: Config) -> Result<Wiring> {
    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build().context("failed to build HTTP client")?;

    let registry = Arc::new(ConfigRegistry::new(config));
    let config = &registry.config;

    let store = Arc::new(Store::open(&config.database_path).with_context(|| format!("failed to open database at {}", config.database_path))?);

    // --- Data Fetcher Pool (C3) ---
    let mut sources: Vec<Arc<dyn dsa_analyst::fetcher::DataFetcher>> = Vec::new();
    if let Some(token) = &config.tushare_token {
        sources.push(Arc::new(TushareSource::new(http_client.clone(), tushare_base_url(), token.clone(), 10)));
    } else {
        warn!("TUSHARE_TOKEN not configured; A-share/HK quotes will be unavailable");
    }
    sources.push(Arc::new(UsQuoteSource::new(http_client.clone(), us_quote_base_url(), 10)));
    let fetcher = Arc::new(FetcherPool::new(
        sources,
        &config.source_priority_overrides,
        Some(UsQuoteSource::ID),
        FETCHER_CIRCUIT_THRESHOLD,
        FETCHER_CIRCUIT_COOLDOWN,
        QUOTE_CACHE_TTL,
        HISTORY_CACHE_TTL,
    ));

    // --- News Service (C4) ---
    let news_providers: Vec<Arc<dyn dsa_analyst::news::NewsProvider>> = vec![
        Arc::new(RestSearchProvider::new("bocha", http_client.clone(), bocha_base_url())),
        Arc::new(RestSearchProvider::new("tavily", http_client.clone(), tavily_base_url())),
        Arc::new(RestSearchProvider::new("serpapi", http_client.clone(), serpapi_base_url())),
    ];
    let news_keys: HashMap<&'static str, Vec<String>> = HashMap::from([
        ("bocha", config.bocha_api_keys.keys.clone()),
        ("tavily", config.tavily_api_keys.keys.clone()),
        ("serpapi", config.serpapi_api_keys.keys.clone()),
    ]);
    let news = Arc::new(NewsService::new(news_providers, news_keys, NEWS_MAX_ITEMS));

    // --- LLM Router (C5) ---
    let gemini_provider: Arc<dyn dsa_analyst::llm::LlmProvider> = Arc::new(OpenAiCompatProvider::new("gemini", http_client.clone(), gemini_base_url()));
    let anthropic_provider: Arc<dyn dsa_analyst::llm::LlmProvider> = Arc::new(OpenAiCompatProvider::new("anthropic", http_client.clone(), anthropic_base_url()));
    let openai_provider: Arc<dyn dsa_analyst::llm::LlmProvider> = Arc::new(OpenAiCompatProvider::new("openai", http_client.clone(), openai_base_url()));

    let mut chain = vec![ModelEntry {
        provider: provider_for_model(&config.litellm_model, &gemini_provider, &anthropic_provider, &openai_provider),
        model: config.litellm_model.clone(),
    }];
    for model in &config.litellm_fallback_models {
        chain.push(ModelEntry {
            provider: provider_for_model(model, &gemini_provider, &anthropic_provider, &openai_provider),
            model: model.clone(),
        });
    }
    let llm_keys: HashMap<String, Vec<String>> = HashMap::from([
        ("gemini".to_string(), config.gemini_api_keys.keys.clone()),
        ("anthropic".to_string(), config.anthropic_api_keys.keys.clone()),
        ("openai".to_string(), config.openai_api_keys.keys.clone()),
    ]);
    let llm = Arc::new(LlmRouter::new(chain, llm_keys, LLM_MAX_RETRIES));

    // --- Notification Dispatcher (C13) ---
    let mut channels: HashMap<String, Arc<dyn dsa_analyst::notify::NotificationChannel>> = HashMap::new();
    if let Some(url) = std::env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty()) {
        channels.insert("webhook".to_string(), Arc::new(WebhookChannel::new(http_client.clone(), url)));
    } else {
        warn!("NOTIFY_WEBHOOK_URL not configured; notifications will be dropped");
    }
    let notifier = Arc::new(NotificationDispatcher::new(
        channels,
        config.stock_groups.clone(),
        config.email_groups.clone(),
        Some(config.notify_chunk_limit),
    ));

    // --- Calendar Gate (C2) ---
    let gate = Arc::new(CalendarGate::with_defaults());

    // --- Analysis Pipeline (C8) ---
    let pipeline = Arc::new(Pipeline {
        fetcher: fetcher.clone(),
        news: news.clone(),
        llm: llm.clone(),
        store: store.clone(),
        gate,
        notifier: Some(notifier),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        enable_realtime_technical_indicators: config.enable_realtime_technical_indicators,
        history_days: HISTORY_LOOKBACK_DAYS,
        bias_threshold: config.bias_threshold,
        trading_day_check_enabled: config.trading_day_check_enabled,
    });

    // --- Task Queue + Event Bus (C10) ---
    let queue = Arc::new(TaskQueue::new(config.batch_parallelism, TASK_EVENT_BUFFER));

    // --- Agent Executor (C9) ---
    let skill_allowed = |name: &str| config.agent_skills.is_empty() || config.agent_skills.iter().any(|s| s == name);
    let mut registry_tools = ToolRegistry::new();
    if skill_allowed("get_daily_history") {
        registry_tools.register(Box::new(GetDailyHistoryTool { fetcher: fetcher.clone() }));
    }
    if skill_allowed("get_realtime_quote") {
        registry_tools.register(Box::new(GetRealtimeQuoteTool { fetcher: fetcher.clone() }));
    }
    if skill_allowed("analyze_trend") {
        registry_tools.register(Box::new(AnalyzeTrendTool { fetcher: fetcher.clone() }));
    }
    if skill_allowed("search_stock_news") {
        registry_tools.register(Box::new(SearchStockNewsTool { news: news.clone() }));
    }

    let strategy_dir = PathBuf::from(&config.agent_strategy_dir);
    let user_strategy_dir = strategy_dir.exists().then_some(strategy_dir.as_path());
    let strategies = Arc::new(load_strategies(&PathBuf::from("strategies/builtin"), user_strategy_dir));

    let agent = config.agent_mode.then(|| {
        Arc::new(AgentExecutor {
            llm: llm.clone(),
            tools: Arc::new(registry_tools),
            store: store.clone(),
            max_steps: config.agent_max_steps,
        })
    });

    // --- Admin auth ---
    let auth_service = Arc::new(AuthService::new(store.clone()));
    auth_service.bootstrap(std::env::var("ADMIN_PASSWORD").ok().as_deref())?;
    let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_mw = Arc::new(AuthMiddlewareState {
        jwt: jwt.clone(),
        enabled: config.admin_auth_enabled,
    });
    let auth_state = AuthState {
        service: auth_service,
        jwt,
        enabled: config.admin_auth_enabled,
    };

    Ok(Wiring {
        registry: registry.clone(),
        pipeline,
        queue,
        store,
        llm,
        agent,
        strategies,
        auth_state,
        auth_mw,
    })
}

fn provider_for_model(
    model: &str,
    gemini: &Arc<dyn dsa_analyst::llm::LlmProvider>,
    anthropic: &Arc<dyn dsa_analyst::llm::LlmProvider>,
    openai: &Arc<dyn dsa_analyst::llm::LlmProvider>,
) -> Arc<dyn dsa_analyst::llm::LlmProvider> {
    let lower = model.to_lowercase();
    if lower.contains("gemini") {
        gemini.clone()
    } else if lower.contains("claude") {
        anthropic.clone()
    } else {
        openai.clone()
    }
}

fn tushare_base_url() -> String {
    env_or("TUSHARE_BASE_URL", "https://api.tushare.pro")
}
fn us_quote_base_url() -> String {
    env_or("US_QUOTE_BASE_URL", "https://query1.finance.yahoo.com/v8/finance/chart")
}
fn bocha_base_url() -> String {
    env_or("BOCHA_BASE_URL", "https://api.bochaai.com/v1/web-search")
}
fn tavily_base_url() -> String {
    env_or("TAVILY_BASE_URL", "https://api.tavily.com/search")
}
fn serpapi_base_url() -> String {
    env_or("SERPAPI_BASE_URL", "https://serpapi.com/search")
}
fn gemini_base_url() -> String {
    env_or("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions")
}
fn anthropic_base_url() -> String {
    env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com/v1/chat/completions")
}
fn openai_base_url() -> String {
    env_or("OPENAI_BASE_URL", "https://api.openai.com/v1/chat/completions")
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

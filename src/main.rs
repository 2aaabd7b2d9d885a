mod api;
mod cache;
mod config;
mod entity;
mod migration;
mod panel_manager;
mod sync;
mod xui_client;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use sea_orm::{DatabaseConnection, EntityTrait};
use sea_orm_migration::MigratorTrait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::panel_manager::PanelManager;
use crate::sync::{ReconcileOptions, Reconciler};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub reconciler: Reconciler,
    pub config: Arc<config::Config>,
}

#[derive(Parser)]
#[command(name = "xui-controller", version, about = "XUI Controller - 3X-UI 面板同步服务")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = "controller.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 启动管理接口和定时同步（默认）
    Serve,

    /// 执行一次同步后退出
    Sync {
        /// 只同步指定服务器
        #[arg(long)]
        server: Option<i64>,
    },

    /// 只执行数据库迁移
    Migrate,
}

fn init_tracing(log_dir: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    // 配置了日志目录时按天轮转写文件，否则输出到控制台
    if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, "xui-controller.log");
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(file_appender).with_ansi(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 读取配置
    let (config, loaded) = config::load_config(&cli.config)?;
    init_tracing(config.log_dir.as_deref());
    if loaded {
        info!("📋 已加载配置文件: {}", cli.config.display());
    } else {
        warn!("配置文件 {} 不存在，使用默认配置", cli.config.display());
    }

    // 初始化数据库
    let db = migration::init_connection(&config.db_path).await?.clone();
    migration::Migrator::up(&db, None).await?;
    info!("✅ 数据库初始化完成: {}", config.db_path);

    let config = Arc::new(config);
    let panels = Arc::new(PanelManager::new(config.panel_timeout()));
    let reconciler = Reconciler::new(db.clone(), panels, ReconcileOptions::from_config(&config));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => Ok(()),
        Command::Sync { server } => run_sync_once(&reconciler, server).await,
        Command::Serve => {
            let app_state = AppState {
                db,
                reconciler,
                config,
            };
            serve(app_state).await
        }
    }
}

/// 执行一次同步，存在失败时返回错误（进程以非零状态退出）
async fn run_sync_once(reconciler: &Reconciler, server_id: Option<i64>) -> Result<()> {
    let report = match server_id {
        Some(id) => {
            let server = entity::Server::find_by_id(id)
                .one(reconciler.db())
                .await?
                .ok_or_else(|| anyhow!("服务器 #{} 不存在", id))?;
            reconciler.reconcile_clients(&server).await
        }
        None => reconciler.reconcile_all().await?,
    };

    println!("{}", report);
    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow!("同步存在 {} 项失败", report.failed()))
    }
}

async fn serve(app_state: AppState) -> Result<()> {
    info!("📋 xui-controller 启动");
    info!("🌐 管理接口端口: {}", app_state.config.web_port);
    if app_state.config.get_api_secret().is_empty() {
        warn!("未配置 api_secret，管理接口不做鉴权");
    }

    let web_handle = api::start_web_server(app_state.clone());

    // 启动定时同步
    let sync_interval = app_state.config.sync.interval_secs;
    let sync_handle = if sync_interval > 0 {
        info!("🔄 定时同步间隔: {} 秒", sync_interval);
        Some(start_sync_task(app_state.reconciler.clone(), sync_interval))
    } else {
        info!("定时同步已关闭");
        None
    };

    // 等待终止信号
    info!("✅ 所有服务已启动，等待终止信号...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C 信号，正在关闭服务...");
        }
        _ = wait_for_sigterm() => {
            info!("收到 SIGTERM 信号，正在关闭服务...");
        }
    }

    web_handle.abort();
    if let Some(handle) = sync_handle {
        handle.abort();
    }
    Ok(())
}

async fn wait_for_sigterm() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

/// 启动定时同步后台任务
fn start_sync_task(reconciler: Reconciler, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match reconciler.reconcile_all().await {
                Ok(report) if report.is_clean() => info!("{}", report),
                Ok(report) => warn!("{}", report),
                Err(e) => error!("定时同步失败: {}", e),
            }

            let purged = reconciler.purge_expired_cache().await;
            if purged > 0 {
                tracing::debug!("清理 {} 个过期缓存", purged);
            }
        }
    })
}

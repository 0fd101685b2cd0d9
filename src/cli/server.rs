use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use log::{error, info, warn};
use prometheus::{BasicAuthentication, labels};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, sleep};

use crate::cli::SubCommandExtend;
use crate::config::{SelectionOptions, ServiceOptions};
use crate::server::{AppState, ServeOptions};
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub service: ServiceOptions,
    #[command(flatten)]
    pub selection: SelectionOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// 监听端口
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,
    /// 生产模式：提供前端构建产物，而不是图片目录
    #[arg(long, env = "PRODUCTION")]
    pub production: bool,
    /// 前端构建产物目录
    #[arg(long, env = "FRONTEND_DIST", default_value = "app/dist")]
    pub frontend_dist: PathBuf,
    /// 上传大小限制，单位为 MiB
    #[arg(long, value_name = "MIB", default_value_t = 20)]
    pub body_limit: usize,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let selection = self.selection.selection()?;
        let searcher = self.service.open(opts).await?;

        let frontend_dist = if self.production {
            if self.frontend_dist.is_dir() {
                Some(self.frontend_dist.clone())
            } else {
                warn!("未找到前端构建产物: {}", self.frontend_dist.display());
                None
            }
        } else {
            None
        };

        // 创建应用状态
        let state = AppState::new(searcher, selection);

        // 创建应用
        let app = server::create_app(
            state,
            ServeOptions {
                source_folder: opts.source_folder.clone(),
                frontend_dist,
                body_limit: self.body_limit * 1024 * 1024,
            },
        );

        if let Some(url) = self.prometheus_push.clone() {
            let addr = format!("{}:{}", self.host, self.port);
            let instance = self.prometheus_instance.clone().unwrap_or(addr);
            let auth = self
                .prometheus_auth
                .as_deref()
                .map(|s| {
                    s.split_once(':')
                        .map(|(username, password)| (username.to_string(), password.to_string()))
                        .ok_or_else(|| anyhow!("prometheus 认证信息格式错误"))
                })
                .transpose()?;
            tokio::spawn(push_metrics(url, instance, auth));
        }

        // 启动服务器
        let addr = format!("{}:{}", self.host, self.port);
        info!("服务器启动：http://{}", addr);
        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

        info!("服务器已停止");
        Ok(())
    }
}

async fn push_metrics(url: String, instance: String, auth: Option<(String, String)>) {
    loop {
        let metric_families = prometheus::gather();
        let url = url.clone();
        let instance = instance.clone();
        let auth = auth.clone();
        let r = spawn_blocking(move || {
            prometheus::push_metrics(
                "image_search",
                labels! {
                    "instance".to_string() => instance,
                },
                &url,
                metric_families,
                auth.map(|(username, password)| BasicAuthentication { username, password }),
            )
        })
        .await;
        match r {
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => error!("推送指标任务异常: {e}"),
            Ok(Ok(())) => {}
        }
        sleep(Duration::from_secs(30)).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("监听退出信号失败: {e}");
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，正在关闭服务器");
}

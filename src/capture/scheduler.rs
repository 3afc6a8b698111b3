// 采集调度器 - 按整分钟节拍驱动会话引擎
//
// 节拍只负责触发，是否采集由会话引擎决定

use anyhow::{anyhow, Result};
use chrono::Local;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, trace};

use crate::session::{SessionLifecycleManager, TickOutcome};
use crate::storage::local_now;

/// 每分钟第0秒触发
const TICK_EXPRESSION: &str = "0 * * * * *";

/// 采集调度器
pub struct CaptureScheduler {
    engine: Arc<SessionLifecycleManager>,
    schedule: Schedule,
}

impl CaptureScheduler {
    /// 创建新的调度器
    pub fn new(engine: Arc<SessionLifecycleManager>) -> Result<Self> {
        let schedule = Schedule::from_str(TICK_EXPRESSION)
            .map_err(|e| anyhow!("无效的调度表达式 {}: {}", TICK_EXPRESSION, e))?;
        Ok(Self { engine, schedule })
    }

    /// 距下一个整分钟的等待时间
    fn until_next_tick(&self) -> Duration {
        let now = Local::now();
        self.schedule
            .after(&now)
            .next()
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(Duration::from_secs(60))
    }

    /// 启动节拍任务，启动时立即执行一次
    pub fn start(self) -> JoinHandle<()> {
        info!("启动采集调度器，节拍: {}", TICK_EXPRESSION);

        tokio::task::spawn(async move {
            let outcome = self.engine.tick(local_now(), false).await;
            log_outcome(&outcome);

            loop {
                let wait = self.until_next_tick();
                trace!("等待下一个节拍: {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;

                let outcome = self.engine.tick(local_now(), false).await;
                log_outcome(&outcome);
            }
        })
    }
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Gated | TickOutcome::Waiting { .. } => trace!("节拍结果: {:?}", outcome),
        _ => debug!("节拍结果: {:?}", outcome),
    }
}

// 会场人数统计服务入口

use hall_counter::{app, logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = app::resolve_data_dir();

    // guard 需要保持到程序退出
    let _log_guard = logger::init(&data_dir.join("logs"))?;

    app::run(&data_dir).await
}

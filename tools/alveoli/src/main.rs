//! 超大肺组织体数据的分块肺泡分割.
//!
//! 参数全部来自 `ALVEOLI_*` 环境变量, 见 `utils::loader`. 日志级别由 `RUST_LOG` 控制.

use std::process::ExitCode;

mod result;
mod runner;

fn main() -> ExitCode {
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("failed to install logger: {e}");
    }

    match runner::run() {
        Ok(r) => {
            r.analyze();
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

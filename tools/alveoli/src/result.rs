//! 运行结果.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use lung_berry::pipeline::AggregatedResult;

/// 一次运行的最终结果.
pub struct AlveoliResult {
    result: AggregatedResult,
    output: PathBuf,
    elapsed: Duration,
}

/// 将运行统计写进 `w` 中.
fn describe_into<W: Write>(r: &AlveoliResult, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    let s = r.result.stats;
    writeln!(w, "Run summary:")?;
    writeln!(w, "{S4}Tiles visited: {}", s.visited)?;
    writeln!(w, "{S4}Tiles skipped: {}", s.skipped)?;
    writeln!(w, "{S4}Tiles segmented: {}", s.segmented)?;
    writeln!(w, "{S4}Tiles empty: {}", s.empty)?;
    writeln!(w, "{S4}Tiles failed: {}", s.failed)?;
    if s.cancelled {
        writeln!(w, "{S4}Run was cancelled")?;
    }
    writeln!(w, "{S4}Output volume: {:?}", r.result.volume.dim())?;
    writeln!(w, "{S4}Output directory: {}", r.output.display())?;
    write!(w, "{S4}Wall time: {:.3} s", r.elapsed.as_secs_f64())?;
    Ok(())
}

impl AlveoliResult {
    pub fn new(result: AggregatedResult, output: PathBuf, elapsed: Duration) -> Self {
        Self {
            result,
            output,
            elapsed,
        }
    }

    /// 打印运行统计与报告.
    pub fn analyze(&self) {
        let mut buf = Vec::with_capacity(512);
        utils::sep();
        if describe_into(self, &mut buf).is_ok() {
            println!("{}", String::from_utf8_lossy(&buf));
        }
        utils::sep();
        print!("{}", self.result.report());
        utils::sep();
    }
}

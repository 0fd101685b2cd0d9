use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, ServiceOptions};
use crate::searcher::SearchResult;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub service: ServiceOptions,
    /// 被搜索的图片路径，必须位于图片目录内
    pub image: String,
    /// 图片名称，作为文本提示参与嵌入
    #[arg(long)]
    pub name: Option<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let searcher = self.service.open(opts).await?;

        let start = Instant::now();
        let result = searcher.search(&self.image, self.name.as_deref()).await?;
        debug!("搜索耗时: {:.2}s", start.elapsed().as_secs_f32());

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for r in result {
                println!("{:.4}\t{}\t{}", r.score, r.src, r.name);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}

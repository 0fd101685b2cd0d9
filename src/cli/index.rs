use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, SelectionOptions, ServiceOptions};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub service: ServiceOptions,
    #[command(flatten)]
    pub selection: SelectionOptions,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let selection = self.selection.selection()?;
        let searcher = self.service.open(opts).await?;

        let pb = ProgressBar::no_length().with_style(pb_style());
        let count = searcher
            .index_all(&selection, |report| {
                pb.set_length(report.total as u64);
                pb.set_position(report.completed as u64);
                pb.set_message(format!("分块 {} 完成", report.index + 1));
            })
            .await?;

        pb.finish_with_message("索引完成");
        info!("共写入 {} 张图片", count);
        Ok(())
    }
}

use anyhow::Result;
use clap::Parser;
use serde_json::json;

use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 以 JSON 格式输出，与 `/listLocalFiles` 的响应相同
    #[arg(long)]
    pub json: bool,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let paths = opts.folder()?.list().await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&json!({ "imagePaths": paths }))?);
        } else {
            for path in paths {
                println!("{}", path);
            }
        }
        Ok(())
    }
}

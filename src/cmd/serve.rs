//! HTTP server command: `phasegate serve`.

use anyhow::Result;

use super::CmdContext;

pub async fn cmd_serve(ctx: &CmdContext, dev: bool) -> Result<()> {
    let mut config = ctx.config.server();
    config.dev_mode |= dev;
    phasegate::server::start_server(config).await
}

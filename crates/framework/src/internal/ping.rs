use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    app::Owner,
    callback::{HandlerResult, Invocation},
    command_callback,
    module::{Module, ModuleKind},
    transport::Transport,
};

/// Liveness check: `/ping` answers `pong`.
pub struct Ping;

impl Ping {
    async fn ping(self: Arc<Self>, inv: Invocation) -> HandlerResult {
        inv.reply("pong").await?;
        Ok(())
    }
}

#[async_trait]
impl Module for Ping {
    async fn post_init(self: Arc<Self>, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
        let ping = Arc::new(command_callback!(Ping::ping, blocking = true));
        ping.bind(self);
        transport.add_handler(ping.to_handler());
        Ok(())
    }
}

impl ModuleKind for Ping {
    const PRIORITY: i32 = 0;
    const TYPE_NAME: &'static str = "Ping";

    fn new(_owner: &Owner, _settings: &toml::Table) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

//! Text echo server: upgrades every connection and echoes text frames
//! back. Pass a JSON config file path to override the defaults and enable
//! log-level hot reload.

use finbit::network::http::config::{self, ServerConfig};
use finbit::network::http::server::WsServiceFactory;
use finbit::network::http::session::WsSession;
use finbit::network::http::ws::{MessageDispatcher, MessageKind, WsMessage};
use finbit::system::log;
use std::io::{Read, Write};
use tracing::{error, info};

struct EchoServer;

struct EchoService;

impl MessageDispatcher for EchoService {
    fn on_message<S: Read + Write>(
        &mut self,
        _kind: MessageKind,
        session: &mut WsSession<'_, '_, S>,
        message: WsMessage,
    ) -> std::io::Result<()> {
        if let Some(text) = message.as_text() {
            session.send_text(text)?;
        }
        Ok(())
    }
}

impl WsServiceFactory for EchoServer {
    type Service = EchoService;

    fn service(&self, _id: usize) -> EchoService {
        EchoService
    }
}

fn main() -> std::io::Result<()> {
    let config_path = std::env::args().nth(1);
    let cfg: ServerConfig = match &config_path {
        Some(path) => config::load(path)?,
        None => ServerConfig::default(),
    };

    let _log_guard = log::init(cfg.log.filter_level()?, cfg.log.file_config()?);
    finbit::init_global_poller(cfg.workers, cfg.stack_size);

    if let Some(path) = config_path {
        config::watch(path.into(), |fresh| {
            if let Err(e) = fresh.apply_log_filter() {
                error!("could not apply reloaded log filter: {e}");
            } else {
                info!("log filter level reloaded");
            }
        })?;
    }

    let server = EchoServer.start(cfg)?;
    server
        .join()
        .map_err(|e| std::io::Error::other(format!("server terminated: {e:?}")))
}

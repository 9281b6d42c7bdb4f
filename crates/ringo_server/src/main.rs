use anyhow::Context;
use log::info;
use ringo_core::{init_logging, log_tag, CoreConfig};
use ringo_server::{router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let core = CoreConfig::from_env().context("reading core configuration")?;
    let server = ServerConfig::from_env().context("reading server configuration")?;

    init_logging(&core.log_level, core.log_target.clone(), &core.service_name)
        .map_err(anyhow::Error::msg)?;

    let conn = core
        .open_store()
        .with_context(|| format!("opening store {:?}", core.db))?;
    let app = router(AppState::new(conn));

    let listener = tokio::net::TcpListener::bind(server.bind_addr)
        .await
        .with_context(|| format!("binding {}", server.bind_addr))?;
    info!(
        "event=server_start module=server status=ok tag={} addr={}",
        log_tag(&core.service_name),
        server.bind_addr
    );

    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}

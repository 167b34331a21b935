//! A widget backend talking to two in-process frontends.
//!
//! Run with `cargo run -p comm-bridge --example loopback`.
//!
//! Both frontends register, then the backend broadcasts a call, queries every
//! frontend, races them for the first answer and finally gives up on a query
//! that never completes.

use std::rc::Rc;
use std::time::Duration;

use comm_bridge::{ChannelConfig, ChannelSet, MemoryConnector, MemoryEnd, Responder, widget_target};
use serde_json::json;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::Level;

fn display(
    set: &Rc<ChannelSet<MemoryConnector>>,
    connector: &MemoryConnector,
    delay: u64,
) -> (Responder, MemoryEnd) {
    let (widget_end, backend_end) = MemoryEnd::pair(set.target());
    set.attach(Rc::new(backend_end));

    let name = Responder::target_for(set.target());
    let responder = Responder::new(name.clone(), Rc::new(connector.expose(&name)));
    responder.endpoint("plot", "size", move |_| async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!({"width": 640, "height": 480, "delay": delay}))
    });
    responder.endpoint("plot", "redraw", |args| async move {
        tracing::info!(?args, "redraw");
        Ok(json!(null))
    });
    responder.endpoint("plot", "export", |_| futures::future::pending());

    set.create_channel();
    if let Err(error) = responder.register(&widget_end) {
        tracing::error!(%error, "failed to register frontend");
    }
    (responder, widget_end)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .try_init();

    LocalSet::new()
        .run_until(async {
            let connector = MemoryConnector::new();
            let set = Rc::new(ChannelSet::with_config(
                widget_target("demo"),
                connector.clone(),
                ChannelConfig::interactive(),
            ));

            let _fast = display(&set, &connector, 10);
            let _slow = display(&set, &connector, 200);

            let reached = set.call("plot", "redraw", vec![json!("full")]).await;
            tracing::info!(reached, "broadcast call");

            match set.query_all("plot", "size", vec![]).await {
                Ok(sizes) => tracing::info!(?sizes, "query all"),
                Err(error) => tracing::error!(%error, "query all failed"),
            }

            match set.query_first("plot", "size", vec![]).await {
                Ok(size) => tracing::info!(%size, "query first"),
                Err(error) => tracing::error!(%error, "query first failed"),
            }

            let token = CancellationToken::new();
            let stop = token.clone();
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                stop.cancel();
            });
            let request = json!({"target": "plot", "endpoint": "export", "args": []});
            if let Some(channel) = set.channels().first() {
                match channel.query_until(&request, &token).await {
                    Ok(value) => tracing::info!(%value, "export finished"),
                    Err(error) => tracing::info!(%error, "export abandoned"),
                }
            }

            // Let the frontends see the cancel notice.
            tokio::task::yield_now().await;
        })
        .await;
}

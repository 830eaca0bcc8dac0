use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use gossip_view::api::{config::GossipConfig, gossip::GossipCluster};
use gossip_view::error::Result;
use gossip_view::Event;

#[tokio::main]
async fn main() -> Result<()> {
    let mut nodes = Vec::with_capacity(3);

    for i in 0..3 {
        let config = GossipConfig::builder()
            .with_node_id(i + 1)
            .with_seeds(["127.0.0.1:8080"])
            .with_gossip_interval(Duration::from_millis(500))
            .with_heartbeat_interval(Duration::from_millis(250))
            .build()?;
        let node = GossipCluster::try_new(format!("127.0.0.1:808{i}"), config).await?;
        node.run().await;
        nodes.push(node);
    }

    let mut events = nodes[0].subscribe();
    let mut view = nodes[0].subscribe_view();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(Event::NodeJoined(e)) => tracing::info!("[{}] {} joined", e.from, e.endpoint),
                Ok(Event::NodeAlive(e)) => tracing::info!("[{}] {} is alive", e.from, e.endpoint),
                Ok(Event::NodeDead(e)) => tracing::info!("[{}] {} is dead", e.from, e.endpoint),
                Ok(Event::NodeRemoved(e)) => tracing::info!("[{}] {} was removed", e.from, e.endpoint),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = view.borrow_and_update().clone();
                tracing::info!(
                    "view {:?} stable={} leader={:?}",
                    update.view.members(),
                    update.view.is_stable(),
                    update.leader
                );
            }
        }
    }

    Ok(())
}

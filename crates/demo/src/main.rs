//! Demo entry point: provisions a few server groups and logs every event
//! the store publishes.

mod provisioning;

use std::sync::Arc;

use common::AggregateRef;
use event_store::{BroadcastPublisher, InMemoryEventStore};
use futures_util::StreamExt;
use saga::{SagaConfig, SagaRuntime};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use provisioning::ServerGroupRequest;

fn requests() -> Vec<(&'static str, ServerGroupRequest)> {
    vec![
        (
            "checkout-v001",
            ServerGroupRequest {
                application: "checkout".to_string(),
                region: "us-west-2".to_string(),
                capacity: 3,
                load_balancers: vec!["checkout-frontend".to_string()],
            },
        ),
        (
            "batch-v004",
            ServerGroupRequest {
                application: "batch".to_string(),
                region: "eu-west-1".to_string(),
                capacity: 2,
                load_balancers: Vec::new(),
            },
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SagaConfig::from_env();

    // 1. Initialize tracing
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    // 2. Create the event store with a publisher and a subscriber
    let publisher = Arc::new(BroadcastPublisher::new());
    let mut events = publisher.subscribe();
    let listener = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => tracing::info!(
                    event_type = %event.event_type,
                    aggregate = %event.aggregate_ref(),
                    "event published"
                ),
                Err(error) => tracing::warn!(%error, "event subscriber lagged"),
            }
        }
    });

    let store = InMemoryEventStore::new()
        .with_identity(config.identity())
        .with_publisher(publisher);
    let runtime = SagaRuntime::new(store, config)?;

    // 3. Run one saga per request
    let flow = provisioning::flow()?;
    for (id, request) in requests() {
        let aggregate = AggregateRef::new("ServerGroup", id);
        let application = request.application.clone();
        let command = request.into_command(id);
        let saga = runtime
            .start(Arc::clone(&flow), aggregate, command)
            .await?;
        tracing::info!(
            %application,
            status = %saga.status(),
            steps = saga.cursor(),
            "provisioning finished"
        );
    }

    // Dropping the runtime drops the last publisher handle and ends the stream.
    drop(runtime);
    listener.await?;

    tracing::info!("demo finished");
    Ok(())
}

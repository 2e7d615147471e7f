use axum::extract::ws::Message;
use pepper_server::delivery::DeliveryQueue;
use pepper_server::registry::{ConnectionHandle, ConnectionRegistry};
use pepper_types::Role;
use std::time::Duration;
use tokio::sync::mpsc;

fn agent() -> (ConnectionHandle, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(8);
    (ConnectionHandle::new(Role::Agent, tx), rx)
}

async fn recv_text(rx: &mut mpsc::Receiver<Message>) -> String {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(Message::Text(text))) => text.to_string(),
        other => panic!("expected text message, got {:?}", other),
    }
}

#[tokio::test]
async fn messages_reach_the_agent_in_order() {
    let registry = ConnectionRegistry::default();
    let (handle, mut rx) = agent();
    registry.register_agent(handle).await;

    let queue = DeliveryQueue::new(Duration::from_millis(5));
    assert!(queue.ensure_consumer(registry.clone()));

    let producer = queue.clone();
    std::thread::spawn(move || {
        producer.push("first");
        producer.push("second");
    })
    .join()
    .unwrap();

    assert_eq!(recv_text(&mut rx).await, "first");
    assert_eq!(recv_text(&mut rx).await, "second");
    queue.cancel().await;
}

#[tokio::test]
async fn push_without_consumer_is_dropped() {
    let registry = ConnectionRegistry::default();
    let (handle, mut rx) = agent();
    registry.register_agent(handle).await;

    let queue = DeliveryQueue::new(Duration::from_millis(5));
    queue.push("too early");
    assert!(queue.ensure_consumer(registry.clone()));
    queue.push("on time");

    assert_eq!(recv_text(&mut rx).await, "on time");
    queue.cancel().await;
}

#[tokio::test]
async fn consumer_starts_once() {
    let registry = ConnectionRegistry::default();
    let queue = DeliveryQueue::new(Duration::from_millis(5));

    assert!(queue.ensure_consumer(registry.clone()));
    assert!(!queue.ensure_consumer(registry.clone()));
    assert!(queue.is_active());

    queue.cancel().await;
    assert!(!queue.is_active());
}

#[tokio::test]
async fn messages_are_dropped_while_no_agent_is_registered() {
    let registry = ConnectionRegistry::default();
    let queue = DeliveryQueue::new(Duration::from_millis(5));
    queue.ensure_consumer(registry.clone());

    queue.push("nobody listening");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (handle, mut rx) = agent();
    registry.register_agent(handle).await;
    queue.push("hello");

    assert_eq!(recv_text(&mut rx).await, "hello");
    queue.cancel().await;
}

#[tokio::test]
async fn cancelled_consumer_can_be_restarted() {
    let registry = ConnectionRegistry::default();
    let (handle, mut rx) = agent();
    registry.register_agent(handle).await;

    let queue = DeliveryQueue::new(Duration::from_millis(5));
    queue.ensure_consumer(registry.clone());
    queue.cancel().await;

    queue.push("while stopped");
    assert!(queue.ensure_consumer(registry.clone()));
    queue.push("after restart");

    assert_eq!(recv_text(&mut rx).await, "after restart");
    queue.cancel().await;
}

//! End-to-end relay tests: plugs, multiplexer and the in-process broker
//! wired together the way an actor host wires them.

use async_trait::async_trait;
use pubsub_framework::mock::{MockBroker, MockProcessor};
use pubsub_framework::{
    DeliveryTarget, ProcessError, PubSubConfig, PubSubError, PubSubPlug, PubSubProxy,
    TopicMessage, TopicMultiplexer, TopicPolicy, TransactionalPlug,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn connected() -> (TopicMultiplexer, MockBroker) {
    let broker = MockBroker::new();
    let mux = TopicMultiplexer::new();
    mux.connect(&PubSubConfig::local(), &broker).await.unwrap();
    (mux, broker)
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

async fn subscribed_plug(
    mux: &TopicMultiplexer,
    identity: &str,
    processor: &MockProcessor,
    topic: &str,
    handler: &str,
) -> PubSubPlug {
    let mut plug = PubSubPlug::new(identity, mux.clone(), Arc::new(processor.clone()));
    plug.begin().await.unwrap();
    plug.subscribe(topic, handler).unwrap();
    plug.commit().await.unwrap();
    plug
}

#[tokio::test]
async fn test_fan_out_to_two_actors() {
    let (mux, broker) = connected().await;
    let alice = MockProcessor::new();
    let bob = MockProcessor::new();
    let carol = MockProcessor::new();

    let _a = subscribed_plug(&mux, "alice-a", &alice, "forum-topic1", "handler1").await;
    let _b = subscribed_plug(&mux, "bob-b", &bob, "forum-topic1", "handler2").await;
    assert_eq!(broker.subscribe_calls("forum-topic1"), 1);

    let mut c = PubSubPlug::new("carol-c", mux.clone(), Arc::new(carol.clone()));
    let policy = TopicPolicy::for_identity("carol-c", &PubSubConfig::local());
    c.begin().await.unwrap();
    PubSubProxy::new(&mut c, &policy, &[])
        .publish("forum-topic1", json!("hello1"))
        .unwrap();
    c.commit().await.unwrap();

    assert!(eventually(|| alice.received().len() == 1 && bob.received().len() == 1).await);
    let (alice_got, bob_got) = (alice.received(), bob.received());
    let (a, b) = (&alice_got[0], &bob_got[0]);
    assert_eq!((a.method.as_str(), a.from.as_str()), ("handler1", "carol-c"));
    assert_eq!((b.method.as_str(), b.value.clone()), ("handler2", json!("hello1")));
    assert!(carol.received().is_empty());
}

#[tokio::test]
async fn test_broker_subscription_follows_reference_count() {
    let (mux, broker) = connected().await;
    let processor = MockProcessor::new();
    let mut plugs = Vec::new();
    for identity in ["a-1", "b-1", "c-1"] {
        plugs.push(subscribed_plug(&mux, identity, &processor, "forum-x", "h").await);
    }
    assert_eq!(broker.subscribe_calls("forum-x"), 1);

    for plug in plugs.iter_mut().take(2) {
        plug.begin().await.unwrap();
        plug.unsubscribe(Some("forum-x")).unwrap();
        plug.commit().await.unwrap();
    }
    assert!(broker.is_subscribed("forum-x"));
    assert_eq!(broker.unsubscribe_calls("forum-x"), 0);

    plugs[2].begin().await.unwrap();
    plugs[2].unsubscribe(None).unwrap();
    plugs[2].commit().await.unwrap();
    assert!(!broker.is_subscribed("forum-x"));
    assert_eq!(broker.unsubscribe_calls("forum-x"), 1);
}

#[tokio::test]
async fn test_system_failure_drops_only_that_actor() {
    let (mux, broker) = connected().await;
    let healthy = MockProcessor::new();
    let failing = MockProcessor::new();
    failing
        .expect_process()
        .return_err(ProcessError::System("mailbox closed".into()));
    let thrower = MockProcessor::new();
    thrower
        .expect_process()
        .return_err(ProcessError::Exception("Oops".into()));

    let _h = subscribed_plug(&mux, "h-1", &healthy, "forum-t", "h").await;
    let _f = subscribed_plug(&mux, "f-1", &failing, "forum-t", "h").await;
    let _t = subscribed_plug(&mux, "t-1", &thrower, "forum-t", "h").await;

    let raw = TopicMessage::new("forum-t", "x-1", json!(1)).encode().unwrap();
    let report = mux.deliver("forum-t", &raw).await;

    assert_eq!(report.delivered, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(mux.subscriber_count("forum-t").await, 2);
    assert!(broker.is_subscribed("forum-t"));
}

#[tokio::test]
async fn test_last_dropped_target_closes_broker_subscription() {
    let (mux, broker) = connected().await;
    let processor = MockProcessor::new();
    let _p = subscribed_plug(&mux, "a-1", &processor, "forum-t", "h").await;

    broker.inject("forum-t", "not json");

    assert!(eventually(|| !broker.is_subscribed("forum-t")).await);
    assert_eq!(mux.subscriber_count("forum-t").await, 0);
    assert!(processor.received().is_empty());
}

struct Slow {
    calls: AtomicUsize,
}

#[async_trait]
impl DeliveryTarget for Slow {
    async fn deliver(&self, _topic: &str, _raw: &str) -> pubsub_framework::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_stalled_target_does_not_block_others() {
    let (mux, broker) = connected().await;
    let fast = MockProcessor::new();
    let _f = subscribed_plug(&mux, "fast-1", &fast, "forum-t", "h").await;
    mux.subscribe(
        "forum-t",
        "slow-1",
        Arc::new(Slow {
            calls: AtomicUsize::new(0),
        }),
    )
    .await
    .unwrap();

    let raw = TopicMessage::new("forum-t", "x-1", json!(1)).encode().unwrap();
    broker.inject("forum-t", &raw);
    broker.inject("forum-t", &raw);

    assert!(eventually(|| fast.received().len() == 2).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_topic_messages_reach_actor_in_broker_order() {
    let (mux, broker) = connected().await;
    let processor = MockProcessor::new();
    let _p = subscribed_plug(&mux, "a-1", &processor, "forum-t", "h").await;

    for n in 0..2000 {
        let raw = TopicMessage::new("forum-t", "x-1", json!(n)).encode().unwrap();
        broker.inject("forum-t", &raw);
    }

    assert!(eventually(|| processor.received().len() == 2000).await);
    let values: Vec<u64> = processor
        .received()
        .iter()
        .map(|request| request.value.as_u64().unwrap())
        .collect();
    let expected: Vec<u64> = (0..2000).collect();
    assert_eq!(values, expected);
}

#[tokio::test]
async fn test_publish_without_local_subscribers_reaches_broker() {
    let (mux, broker) = connected().await;
    let processor = MockProcessor::new();
    let mut plug = PubSubPlug::new("alice-a", mux.clone(), Arc::new(processor));

    plug.begin().await.unwrap();
    plug.publish("alice-news", json!({"n": 1})).unwrap();
    plug.commit().await.unwrap();

    let published = broker.published("alice-news");
    assert_eq!(published.len(), 1);
    let message = TopicMessage::decode(&published[0]).unwrap();
    assert_eq!(message.from, "alice-a");
    assert_eq!(message.to, "alice-news");
    assert_eq!(message.value, json!({"n": 1}));
}

#[tokio::test]
async fn test_commit_while_disconnected_surfaces_replay_error() {
    let mux = TopicMultiplexer::new();
    let mut plug = PubSubPlug::new("alice-a", mux, Arc::new(MockProcessor::new()));

    plug.begin().await.unwrap();
    plug.publish("alice-news", json!(1)).unwrap();
    let err = plug.commit().await.unwrap_err();

    assert!(matches!(
        &err,
        PubSubError::Replay { index: 0, total: 1, source } if matches!(**source, PubSubError::NoConnection)
    ));
}

#[tokio::test]
async fn test_connect_failures() {
    let broker = MockBroker::new();
    broker.fail_connect("connection refused");
    let mux = TopicMultiplexer::new();

    let result = mux.connect(&PubSubConfig::local(), &broker).await;
    assert!(matches!(result, Err(PubSubError::Connection(_))));
    assert!(!mux.is_connected());

    let mut config = PubSubConfig::local();
    config.broker.hostname.clear();
    let result = mux.connect(&config, &MockBroker::new()).await;
    assert!(matches!(result, Err(PubSubError::Configuration(_))));
}

#[tokio::test]
async fn test_fatal_broker_error_closes_relay() {
    let (mux, broker) = connected().await;
    broker.inject_error("socket reset");

    tokio::time::timeout(Duration::from_secs(1), mux.closed())
        .await
        .unwrap();
    assert!(!mux.is_connected());
    assert!(broker.is_closed());
    assert!(matches!(
        mux.publish("forum-t", "{}").await,
        Err(PubSubError::NoConnection)
    ));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (mux, broker) = connected().await;
    let processor = MockProcessor::new();
    let _p = subscribed_plug(&mux, "a-1", &processor, "forum-t", "h").await;

    mux.shutdown().await;
    mux.shutdown().await;

    assert!(broker.is_closed());
    assert!(mux.topics().await.is_empty());
    tokio::time::timeout(Duration::from_secs(1), mux.closed())
        .await
        .unwrap();
}
